// Token Mint - mints a pair of tokens for one owner
// Validation happens before any ledger call; a failure after token A leaves A minted.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::{SdkError, SdkResult};
use crate::ledger::{ContractId, CreateCommand, CreatePayload, LedgerError, LedgerGateway, TemplateKind};
use crate::metrics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintTokensCommand {
    pub issuer_party: String,
    pub owner_party: String,
    pub symbol_a: String,
    pub amount_a: Decimal,
    pub symbol_b: String,
    pub amount_b: Decimal,
}

impl MintTokensCommand {
    pub fn validate(&self) -> SdkResult<()> {
        for (field, value) in [
            ("issuerParty", &self.issuer_party),
            ("ownerParty", &self.owner_party),
            ("symbolA", &self.symbol_a),
            ("symbolB", &self.symbol_b),
        ] {
            if value.trim().is_empty() {
                return Err(SdkError::Validation(format!("{} must not be empty", field)));
            }
        }

        for (symbol, amount) in [(&self.symbol_a, self.amount_a), (&self.symbol_b, self.amount_b)] {
            if amount <= Decimal::ZERO {
                return Err(SdkError::Validation(format!(
                    "Amount must be positive for {}",
                    symbol
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintedToken {
    pub symbol: String,
    pub contract_id: ContractId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintTokensResponse {
    pub minted: Vec<MintedToken>,
    pub steps: Vec<String>,
}

pub struct TokenMintService {
    ledger: Arc<dyn LedgerGateway>,
}

impl TokenMintService {
    pub fn new(ledger: Arc<dyn LedgerGateway>) -> Self {
        Self { ledger }
    }

    /// Mints token A then token B. No compensation if B fails after A succeeded:
    /// the error is [`SdkError::PartialMint`] listing what was minted.
    pub async fn mint_pair(&self, command: &MintTokensCommand) -> SdkResult<MintTokensResponse> {
        if let Err(e) = command.validate() {
            metrics::increment_mint("validation");
            return Err(e);
        }

        let mut steps = Vec::with_capacity(2);
        let mut minted = Vec::with_capacity(2);

        steps.push(format!("Minting token {}", command.symbol_a));
        let token_a = self
            .mint_token(command, &command.symbol_a, command.amount_a)
            .await
            .map_err(|e| {
                metrics::increment_mint("failed");
                error!(error = %e, symbol = %command.symbol_a, "Token minting failed");
                SdkError::Ledger(e)
            })?;
        minted.push(MintedToken {
            symbol: command.symbol_a.clone(),
            contract_id: token_a,
        });

        steps.push(format!("Minting token {}", command.symbol_b));
        match self
            .mint_token(command, &command.symbol_b, command.amount_b)
            .await
        {
            Ok(token_b) => minted.push(MintedToken {
                symbol: command.symbol_b.clone(),
                contract_id: token_b,
            }),
            Err(e) => {
                metrics::increment_mint("partial");
                error!(
                    error = %e,
                    minted = %command.symbol_a,
                    failed = %command.symbol_b,
                    "Token minting partially failed; {} stays minted",
                    command.symbol_a
                );
                return Err(SdkError::PartialMint {
                    minted,
                    failed_symbol: command.symbol_b.clone(),
                    source: e,
                });
            }
        }

        metrics::increment_mint("ok");
        info!(
            "Minted tokens {} and {} for {}",
            command.symbol_a, command.symbol_b, command.owner_party
        );
        Ok(MintTokensResponse { minted, steps })
    }

    async fn mint_token(
        &self,
        command: &MintTokensCommand,
        symbol: &str,
        amount: Decimal,
    ) -> Result<ContractId, LedgerError> {
        self.ledger
            .create(CreateCommand {
                template: TemplateKind::Token,
                payload: CreatePayload::Token {
                    issuer: command.issuer_party.clone(),
                    owner: command.owner_party.clone(),
                    symbol: symbol.to_string(),
                    amount,
                },
                act_as: vec![command.issuer_party.clone()],
                observers: Vec::new(),
                command_id: Uuid::new_v4().to_string(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(amount_a: i64, amount_b: i64) -> MintTokensCommand {
        MintTokensCommand {
            issuer_party: "issuer".to_string(),
            owner_party: "alice".to_string(),
            symbol_a: "ETH".to_string(),
            amount_a: Decimal::new(amount_a, 0),
            symbol_b: "USDC".to_string(),
            amount_b: Decimal::new(amount_b, 0),
        }
    }

    #[test]
    fn test_validation_rejects_non_positive_amounts() {
        assert!(command(1, 1).validate().is_ok());
        assert!(matches!(command(0, 1).validate(), Err(SdkError::Validation(_))));
        assert!(matches!(command(1, -5).validate(), Err(SdkError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_blank_parties() {
        let mut cmd = command(1, 1);
        cmd.owner_party = " ".to_string();
        let err = cmd.validate().unwrap_err();
        assert!(err.to_string().contains("ownerParty"));
    }

    #[test]
    fn test_command_accepts_camel_case_json() {
        let cmd: MintTokensCommand = serde_json::from_str(
            r#"{"issuerParty":"i","ownerParty":"o","symbolA":"ETH","amountA":"1.5","symbolB":"USDC","amountB":"3000"}"#,
        )
        .unwrap();
        assert_eq!(cmd.amount_a, Decimal::new(15, 1));
    }
}
