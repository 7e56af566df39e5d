//! # Ledger Gateway
//!
//! The ledger is the source of truth for token holdings and pools. This module defines
//! the `LedgerGateway` trait the SDK consumes, plus the value types exchanged with it.
//! The SDK never implements contract logic itself: it queries the active contract set,
//! creates contracts and exercises choices, and the ledger enforces single use of
//! contract ids.
//!
//! Implementations must be safe to share across tasks (`Send + Sync`). Timeouts and
//! cancellation belong to the implementation; the SDK propagates failures as-is.
//!
//! See [`crate::sandbox_ledger::InMemoryLedger`] for the in-process implementation used
//! by the sandbox binary and the tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Opaque, single-use reference to a ledger contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(16) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for ContractId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Template families the SDK queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    Token,
    Pool,
}

impl TemplateKind {
    /// Qualified template name (`Module:Entity`).
    pub fn qualified_name(&self) -> &'static str {
        match self {
            TemplateKind::Token => "Token.Token:Token",
            TemplateKind::Pool => "AMM.Pool:Pool",
        }
    }
}

/// A fungible token contract as observed in an active-contract query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHolding {
    pub contract_id: ContractId,
    pub issuer: String,
    pub owner: String,
    pub symbol: String,
    pub amount: Decimal,
}

/// A liquidity pool contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolContract {
    pub contract_id: ContractId,
    pub pool_id: String,
    pub operator: String,
    pub symbol_a: String,
    pub symbol_b: String,
}

/// One entry of the active contract set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActiveContract {
    Token(TokenHolding),
    Pool(PoolContract),
}

impl ActiveContract {
    pub fn contract_id(&self) -> &ContractId {
        match self {
            ActiveContract::Token(t) => &t.contract_id,
            ActiveContract::Pool(p) => &p.contract_id,
        }
    }

    pub fn kind(&self) -> TemplateKind {
        match self {
            ActiveContract::Token(_) => TemplateKind::Token,
            ActiveContract::Pool(_) => TemplateKind::Pool,
        }
    }

    pub fn as_token(&self) -> Option<&TokenHolding> {
        match self {
            ActiveContract::Token(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_pool(&self) -> Option<&PoolContract> {
        match self {
            ActiveContract::Pool(p) => Some(p),
            _ => None,
        }
    }
}

/// Contract arguments for a create command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatePayload {
    Token {
        issuer: String,
        owner: String,
        symbol: String,
        amount: Decimal,
    },
    Pool {
        pool_id: String,
        operator: String,
        symbol_a: String,
        symbol_b: String,
    },
}

impl CreatePayload {
    pub fn template(&self) -> TemplateKind {
        match self {
            CreatePayload::Token { .. } => TemplateKind::Token,
            CreatePayload::Pool { .. } => TemplateKind::Pool,
        }
    }
}

/// A create command. `command_id` is the ledger-level deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCommand {
    pub template: TemplateKind,
    pub payload: CreatePayload,
    pub act_as: Vec<String>,
    pub observers: Vec<String>,
    pub command_id: String,
}

/// Choices the SDK exercises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Choice {
    /// Consumes the target token and `other`, producing one token with the summed amount.
    Merge { other: ContractId },
    Archive,
}

impl Choice {
    pub fn name(&self) -> &'static str {
        match self {
            Choice::Merge { .. } => "Merge",
            Choice::Archive => "Archive",
        }
    }
}

/// Result of an exercise: the successor contract, or nothing if the choice only archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExerciseResult {
    Created(ContractId),
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Contract {0} is not active (already consumed or unknown)")]
    ContractNotActive(ContractId),
    #[error("Duplicate command id {0}")]
    DuplicateCommand(String),
    #[error("Command rejected: {0}")]
    Rejected(String),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Ledger operations the SDK depends on.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Active contracts of one template kind, in ledger order.
    async fn query_active(&self, template: TemplateKind) -> Result<Vec<ActiveContract>, LedgerError>;

    /// Submits a create command and returns the new contract id.
    async fn create(&self, command: CreateCommand) -> Result<ContractId, LedgerError>;

    /// Exercises `choice` on `contract_id` and waits for the result. The target contract
    /// is consumed on success.
    async fn exercise(
        &self,
        contract_id: &ContractId,
        choice: Choice,
        command_id: &str,
    ) -> Result<ExerciseResult, LedgerError>;
}
