//! # Token Merge Coordinator
//!
//! Swaps leave a party holding many small token contracts per symbol. The coordinator
//! folds them back into one contract per symbol with a chain of pairwise `Merge`
//! exercises.
//!
//! ## Ordering
//!
//! Holdings are sorted by amount, largest first (stable sort, so equal amounts keep
//! their ledger query order). The largest becomes the base; every other holding is
//! merged into the current base in sorted order. Each exercise consumes the base and
//! yields a new contract id, so step *i+1* only starts once step *i* has resolved. There
//! are never two exercises in flight for the same fold. Folds for different symbols are
//! independent and may run concurrently ([`SequentialMergeCoordinator::merge_symbols`]).
//!
//! ## Failure policy
//!
//! Merging is an optimization. Any failure (query or exercise) stops the fold, is logged,
//! and is reported as [`MergeOutcome::Failed`]. It is never turned into an error for the
//! operation that triggered the merge.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::ledger::{Choice, ContractId, ExerciseResult, LedgerGateway, TemplateKind, TokenHolding};
use crate::metrics;

/// Result of one merge fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The party holds no contract for the symbol.
    NoHoldings,
    /// Exactly one holding; returned untouched, no ledger mutation.
    Unchanged(ContractId),
    /// `folded` holdings were merged into `contract_id` with `folded - 1` exercises.
    Merged { contract_id: ContractId, folded: usize },
    /// Merging is disabled by configuration.
    Skipped,
    /// Soft failure. `last_contract_id` is the base at the point the fold stopped.
    Failed {
        reason: String,
        completed_exercises: usize,
        last_contract_id: Option<ContractId>,
    },
}

impl MergeOutcome {
    /// The merged contract id. `None` for empty, skipped and failed folds.
    pub fn contract_id(&self) -> Option<&ContractId> {
        match self {
            MergeOutcome::Unchanged(cid) => Some(cid),
            MergeOutcome::Merged { contract_id, .. } => Some(contract_id),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, MergeOutcome::Failed { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            MergeOutcome::NoHoldings => "no_holdings",
            MergeOutcome::Unchanged(_) => "unchanged",
            MergeOutcome::Merged { .. } => "merged",
            MergeOutcome::Skipped => "skipped",
            MergeOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct SequentialMergeCoordinator {
    ledger: Arc<dyn LedgerGateway>,
    enabled: bool,
}

impl SequentialMergeCoordinator {
    pub fn new(ledger: Arc<dyn LedgerGateway>) -> Self {
        Self {
            ledger,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Folds every `symbol` holding of `party` into one contract.
    #[instrument(skip(self))]
    pub async fn merge_all(&self, party: &str, symbol: &str) -> MergeOutcome {
        let outcome = self.merge_all_inner(party, symbol).await;
        metrics::increment_merge_outcome(outcome.label());
        outcome
    }

    /// Runs one fold per distinct symbol, concurrently. Outcomes keep the order of first
    /// appearance in `symbols`.
    pub async fn merge_symbols(&self, party: &str, symbols: &[&str]) -> Vec<(String, MergeOutcome)> {
        let mut seen = HashSet::new();
        let distinct: Vec<&str> = symbols
            .iter()
            .copied()
            .filter(|s| seen.insert(*s))
            .collect();

        let outcomes = join_all(distinct.iter().map(|symbol| self.merge_all(party, symbol))).await;

        distinct
            .into_iter()
            .map(str::to_string)
            .zip(outcomes)
            .collect()
    }

    async fn merge_all_inner(&self, party: &str, symbol: &str) -> MergeOutcome {
        if !self.enabled {
            debug!("Auto-merge disabled");
            return MergeOutcome::Skipped;
        }

        if party.trim().is_empty() || symbol.trim().is_empty() {
            return MergeOutcome::Failed {
                reason: "party and symbol must be non-empty".to_string(),
                completed_exercises: 0,
                last_contract_id: None,
            };
        }

        info!("Auto-merging {} tokens for party {}", symbol, party);

        let contracts = match self.ledger.query_active(TemplateKind::Token).await {
            Ok(contracts) => contracts,
            Err(e) => {
                error!(error = %e, "Failed to merge {} tokens: query failed", symbol);
                return MergeOutcome::Failed {
                    reason: e.to_string(),
                    completed_exercises: 0,
                    last_contract_id: None,
                };
            }
        };

        let mut holdings: Vec<TokenHolding> = contracts
            .into_iter()
            .filter_map(|c| c.as_token().cloned())
            .filter(|t| t.owner == party && t.symbol == symbol)
            .collect();

        match holdings.len() {
            0 => {
                debug!("No merge needed for {} - no holdings", symbol);
                return MergeOutcome::NoHoldings;
            }
            1 => {
                debug!("No merge needed for {} - single holding", symbol);
                return MergeOutcome::Unchanged(holdings.remove(0).contract_id);
            }
            n => info!("Merging {} {} tokens into 1 contract", n, symbol),
        }

        // Stable: equal amounts keep ledger query order.
        holdings.sort_by(|a, b| b.amount.cmp(&a.amount));

        self.fold(holdings).await
    }

    async fn fold(&self, holdings: Vec<TokenHolding>) -> MergeOutcome {
        let start = Instant::now();
        let folded = holdings.len();
        let mut rest = holdings.into_iter();
        let Some(base) = rest.next() else {
            return MergeOutcome::NoHoldings;
        };

        let mut current = base.contract_id;
        let mut completed = 0;

        for other in rest {
            let command_id = Uuid::new_v4().to_string();
            let choice = Choice::Merge {
                other: other.contract_id.clone(),
            };

            match self.ledger.exercise(&current, choice, &command_id).await {
                Ok(ExerciseResult::Created(next)) => {
                    metrics::increment_merge_exercise("ok");
                    debug!(
                        base = %current.short(),
                        other = %other.contract_id.short(),
                        merged = %next.short(),
                        "Merge step completed"
                    );
                    current = next;
                    completed += 1;
                }
                Ok(ExerciseResult::Archived) => {
                    metrics::increment_merge_exercise("failed");
                    error!(base = %current.short(), "Merge archived the base without a successor");
                    return MergeOutcome::Failed {
                        reason: "merge produced no successor contract".to_string(),
                        completed_exercises: completed,
                        last_contract_id: None,
                    };
                }
                Err(e) => {
                    metrics::increment_merge_exercise("failed");
                    error!(
                        error = %e,
                        base = %current.short(),
                        other = %other.contract_id.short(),
                        completed,
                        "Merge step failed, aborting remaining folds"
                    );
                    return MergeOutcome::Failed {
                        reason: e.to_string(),
                        completed_exercises: completed,
                        last_contract_id: Some(current),
                    };
                }
            }
        }

        metrics::record_merge_duration(start.elapsed());
        info!("Merged {} tokens into 1: {}...", folded, current.short());
        MergeOutcome::Merged {
            contract_id: current,
            folded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox_ledger::InMemoryLedger;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_disabled_coordinator_skips() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.seed_token("issuer", "alice", "ETH", Decimal::ONE).await;
        ledger.seed_token("issuer", "alice", "ETH", Decimal::ONE).await;

        let coordinator = SequentialMergeCoordinator::new(ledger.clone()).with_enabled(false);
        assert_eq!(coordinator.merge_all("alice", "ETH").await, MergeOutcome::Skipped);
        assert_eq!(ledger.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_input_is_soft_failure() {
        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = SequentialMergeCoordinator::new(ledger.clone());

        let outcome = coordinator.merge_all("", "ETH").await;
        assert!(outcome.is_failure());
        assert!(outcome.contract_id().is_none());
        assert_eq!(ledger.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_other_owners_and_symbols_untouched() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.seed_token("issuer", "alice", "ETH", Decimal::new(2, 0)).await;
        ledger.seed_token("issuer", "alice", "ETH", Decimal::new(3, 0)).await;
        let bob = ledger.seed_token("issuer", "bob", "ETH", Decimal::new(9, 0)).await;
        let usdc = ledger.seed_token("issuer", "alice", "USDC", Decimal::new(9, 0)).await;

        let coordinator = SequentialMergeCoordinator::new(ledger.clone());
        let outcome = coordinator.merge_all("alice", "ETH").await;

        assert!(matches!(outcome, MergeOutcome::Merged { folded: 2, .. }));
        assert!(ledger.is_active(&bob).await);
        assert!(ledger.is_active(&usdc).await);
        assert_eq!(ledger.exercise_calls(), 1);
    }
}
