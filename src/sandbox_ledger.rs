// Sandbox Ledger - in-process LedgerGateway for local runs and tests
// Contract ids are single use: exercising a contract archives it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ledger::{
    ActiveContract, Choice, ContractId, CreateCommand, CreatePayload, ExerciseResult,
    LedgerError, LedgerGateway, PoolContract, TemplateKind, TokenHolding,
};

/// One recorded exercise call, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseRecord {
    pub contract_id: ContractId,
    pub choice: Choice,
    pub command_id: String,
    pub succeeded: bool,
}

#[derive(Default)]
struct LedgerState {
    // Creation order is the query order.
    active: Vec<ActiveContract>,
    command_ids: HashSet<String>,
    next_id: u64,
    exercises: Vec<ExerciseRecord>,
    failing_create_symbols: HashSet<String>,
}

impl LedgerState {
    fn allocate_id(&mut self) -> ContractId {
        self.next_id += 1;
        ContractId::new(format!("00{:062x}", self.next_id))
    }

    fn position(&self, cid: &ContractId) -> Option<usize> {
        self.active.iter().position(|c| c.contract_id() == cid)
    }

    fn token(&self, cid: &ContractId) -> Option<&TokenHolding> {
        self.active
            .iter()
            .find(|c| c.contract_id() == cid)
            .and_then(|c| c.as_token())
    }

    fn archive(&mut self, cid: &ContractId) {
        if let Some(idx) = self.position(cid) {
            self.active.remove(idx);
        }
    }

    fn insert(&mut self, payload: CreatePayload) -> ContractId {
        let contract_id = self.allocate_id();
        let contract = match payload {
            CreatePayload::Token {
                issuer,
                owner,
                symbol,
                amount,
            } => ActiveContract::Token(TokenHolding {
                contract_id: contract_id.clone(),
                issuer,
                owner,
                symbol,
                amount,
            }),
            CreatePayload::Pool {
                pool_id,
                operator,
                symbol_a,
                symbol_b,
            } => ActiveContract::Pool(PoolContract {
                contract_id: contract_id.clone(),
                pool_id,
                operator,
                symbol_a,
                symbol_b,
            }),
        };
        self.active.push(contract);
        contract_id
    }
}

/// In-memory ledger with fault injection and call accounting.
///
/// Exercise calls can be slowed down (`with_exercise_delay`) so tests can observe
/// whether exercises ever overlap; `max_concurrent_exercises` reports the peak.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    query_calls: AtomicUsize,
    create_calls: AtomicUsize,
    exercise_calls: AtomicUsize,
    // 1-based index of the exercise call to reject; 0 = none
    fail_exercise_at: AtomicUsize,
    in_flight_exercises: AtomicUsize,
    max_concurrent_exercises: AtomicUsize,
    exercise_delay: Option<Duration>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exercise_delay(mut self, delay: Duration) -> Self {
        self.exercise_delay = Some(delay);
        self
    }

    /// Rejects the `n`-th exercise call (1-based) counted from ledger creation.
    pub fn fail_exercise_at(&self, n: usize) {
        self.fail_exercise_at.store(n, Ordering::SeqCst);
    }

    /// Rejects every token create for `symbol`.
    pub async fn fail_creates_for_symbol(&self, symbol: &str) {
        self.state
            .lock()
            .await
            .failing_create_symbols
            .insert(symbol.to_string());
    }

    /// Adds a token holding directly, bypassing command deduplication.
    pub async fn seed_token(&self, issuer: &str, owner: &str, symbol: &str, amount: Decimal) -> ContractId {
        self.state.lock().await.insert(CreatePayload::Token {
            issuer: issuer.to_string(),
            owner: owner.to_string(),
            symbol: symbol.to_string(),
            amount,
        })
    }

    pub async fn seed_pool(&self, pool_id: &str, operator: &str, symbol_a: &str, symbol_b: &str) -> ContractId {
        self.state.lock().await.insert(CreatePayload::Pool {
            pool_id: pool_id.to_string(),
            operator: operator.to_string(),
            symbol_a: symbol_a.to_string(),
            symbol_b: symbol_b.to_string(),
        })
    }

    pub async fn tokens_of(&self, owner: &str, symbol: &str) -> Vec<TokenHolding> {
        self.state
            .lock()
            .await
            .active
            .iter()
            .filter_map(|c| c.as_token())
            .filter(|t| t.owner == owner && t.symbol == symbol)
            .cloned()
            .collect()
    }

    pub async fn is_active(&self, cid: &ContractId) -> bool {
        self.state.lock().await.position(cid).is_some()
    }

    pub async fn exercise_log(&self) -> Vec<ExerciseRecord> {
        self.state.lock().await.exercises.clone()
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn exercise_calls(&self) -> usize {
        self.exercise_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_exercises(&self) -> usize {
        self.max_concurrent_exercises.load(Ordering::SeqCst)
    }

    async fn apply_exercise(
        &self,
        contract_id: &ContractId,
        choice: &Choice,
        command_id: &str,
        call_number: usize,
    ) -> Result<ExerciseResult, LedgerError> {
        let mut state = self.state.lock().await;

        if !state.command_ids.insert(command_id.to_string()) {
            return Err(LedgerError::DuplicateCommand(command_id.to_string()));
        }

        if self.fail_exercise_at.load(Ordering::SeqCst) == call_number {
            return Err(LedgerError::Rejected(format!(
                "injected failure on exercise #{}",
                call_number
            )));
        }

        if state.position(contract_id).is_none() {
            return Err(LedgerError::ContractNotActive(contract_id.clone()));
        }

        match choice {
            Choice::Archive => {
                state.archive(contract_id);
                Ok(ExerciseResult::Archived)
            }
            Choice::Merge { other } => {
                if other == contract_id {
                    return Err(LedgerError::Rejected("cannot merge a token with itself".to_string()));
                }
                let base = state
                    .token(contract_id)
                    .cloned()
                    .ok_or_else(|| LedgerError::Rejected(format!("{} is not a token", contract_id)))?;
                let other_token = state
                    .token(other)
                    .cloned()
                    .ok_or_else(|| LedgerError::ContractNotActive(other.clone()))?;

                if base.owner != other_token.owner || base.symbol != other_token.symbol {
                    return Err(LedgerError::Rejected(
                        "merge requires same owner and symbol".to_string(),
                    ));
                }

                state.archive(contract_id);
                state.archive(other);
                let merged = state.insert(CreatePayload::Token {
                    issuer: base.issuer,
                    owner: base.owner,
                    symbol: base.symbol,
                    amount: base.amount + other_token.amount,
                });
                Ok(ExerciseResult::Created(merged))
            }
        }
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn query_active(&self, template: TemplateKind) -> Result<Vec<ActiveContract>, LedgerError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().await;
        Ok(state
            .active
            .iter()
            .filter(|c| c.kind() == template)
            .cloned()
            .collect())
    }

    async fn create(&self, command: CreateCommand) -> Result<ContractId, LedgerError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;

        if command.template != command.payload.template() {
            return Err(LedgerError::Rejected(format!(
                "payload does not match template {}",
                command.template.qualified_name()
            )));
        }
        if let CreatePayload::Token { symbol, .. } = &command.payload {
            if state.failing_create_symbols.contains(symbol) {
                return Err(LedgerError::Rejected(format!("injected create failure for {}", symbol)));
            }
        }
        if !state.command_ids.insert(command.command_id.clone()) {
            return Err(LedgerError::DuplicateCommand(command.command_id));
        }

        let cid = state.insert(command.payload);
        debug!(contract_id = %cid.short(), template = command.template.qualified_name(), "Sandbox create");
        Ok(cid)
    }

    async fn exercise(
        &self,
        contract_id: &ContractId,
        choice: Choice,
        command_id: &str,
    ) -> Result<ExerciseResult, LedgerError> {
        let call_number = self.exercise_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let concurrent = self.in_flight_exercises.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_exercises.fetch_max(concurrent, Ordering::SeqCst);

        if let Some(delay) = self.exercise_delay {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .apply_exercise(contract_id, &choice, command_id, call_number)
            .await;

        self.state.lock().await.exercises.push(ExerciseRecord {
            contract_id: contract_id.clone(),
            choice,
            command_id: command_id.to_string(),
            succeeded: result.is_ok(),
        });
        self.in_flight_exercises.fetch_sub(1, Ordering::SeqCst);

        result
    }
}
