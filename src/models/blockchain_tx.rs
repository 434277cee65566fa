use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChainOperation {
    KycVerification,
    IdentityUpdate,
    KycRevocation,
}

impl ChainOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainOperation::KycVerification => "kyc_verification",
            ChainOperation::IdentityUpdate => "identity_update",
            ChainOperation::KycRevocation => "kyc_revocation",
        }
    }

    /// Rough gas usage of the contract call, used for cost estimates.
    pub fn gas_estimate(&self) -> u64 {
        match self {
            ChainOperation::KycVerification => 150_000,
            ChainOperation::IdentityUpdate => 100_000,
            ChainOperation::KycRevocation => 120_000,
        }
    }
}

pub const DEFAULT_GAS_ESTIMATE: u64 = 200_000;

impl fmt::Display for ChainOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainOperation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kyc_verification" => Ok(ChainOperation::KycVerification),
            "identity_update" => Ok(ChainOperation::IdentityUpdate),
            "kyc_revocation" => Ok(ChainOperation::KycRevocation),
            other => Err(AppError::validation(format!("Unknown blockchain operation: {}", other))),
        }
    }
}

/// A confirmed contract transaction. Rows are only written after the
/// receipt arrives with a success status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlockchainTransaction {
    pub id: Uuid,
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    /// Fee in wei, as a decimal string.
    pub transaction_fee: String,
    pub user_id: Uuid,
    pub kyc_id: Option<Uuid>,
    pub admin_id: String,
    pub operation_type: ChainOperation,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnchorReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub transaction_fee: String,
}

impl From<&BlockchainTransaction> for AnchorReceipt {
    fn from(tx: &BlockchainTransaction) -> Self {
        Self {
            transaction_hash: tx.transaction_hash.clone(),
            block_number: tx.block_number,
            gas_used: tx.gas_used,
            transaction_fee: tx.transaction_fee.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BlockchainTransactionView {
    pub transaction: BlockchainTransaction,
    /// `None` when the node could not be reached.
    pub confirmations: Option<u64>,
}

/// Local and on-chain view of one submission's anchoring.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KycChainRecord {
    pub kyc_id: Uuid,
    pub user_id: Uuid,
    pub on_chain: Option<crate::blockchain::OnChainVerification>,
    /// Why `on_chain` is missing, when the node could not answer.
    pub chain_error: Option<String>,
    pub transactions: Vec<BlockchainTransactionView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CostEstimate {
    pub operation: String,
    pub gas_estimate: u64,
    pub gas_price_wei: String,
    pub estimated_cost_wei: String,
    pub estimated_cost_eth: f64,
}
