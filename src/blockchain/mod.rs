//! Ethereum-side collaborators: the contract ABI codec, the JSON-RPC client
//! and the `ChainClient` seam the services depend on.

pub mod abi;
pub mod rpc;

use crate::errors::Result;
use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

pub const STORE_VERIFICATION_SIG: &str = "storeKYCVerification(string,string,string,bool,string)";
pub const GET_VERIFICATION_SIG: &str = "getKYCVerification(string,string)";
pub const UPDATE_IDENTITY_SIG: &str = "updateUserIdentity(string,string,string)";
pub const GET_IDENTITY_SIG: &str = "getUserIdentity(string)";
pub const REVOKE_VERIFICATION_SIG: &str = "revokeKYCVerification(string,string,string,string)";

pub const NODE_UNREACHABLE: &str = "Ethereum node unreachable";

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OnChainVerification {
    pub exists: bool,
    pub status: bool,
    pub timestamp: u64,
    pub admin_id: String,
    pub verification_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OnChainIdentity {
    pub exists: bool,
    pub identity_hash: String,
    pub timestamp: u64,
    pub admin_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub effective_gas_price: Option<u128>,
    /// Receipt status field equals 1.
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct NetworkStatus {
    pub connected: bool,
    pub chain_id: Option<u64>,
    pub latest_block: Option<u64>,
    pub gas_price_wei: Option<String>,
    pub account: Option<String>,
    pub balance_wei: Option<String>,
    pub node_url: String,
    pub contract_address: String,
    pub error: Option<String>,
}

/// Contract operations the workflow relies on. State-changing calls return
/// the transaction hash as soon as the node accepts the transaction;
/// confirmation is polled separately through `transaction_receipt`.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn store_verification(
        &self,
        user_id: &str,
        kyc_id: &str,
        verification_hash: &str,
        status: bool,
        admin_id: &str,
    ) -> Result<String>;

    async fn get_verification(&self, user_id: &str, kyc_id: &str) -> Result<OnChainVerification>;

    async fn update_identity(&self, user_id: &str, identity_hash: &str, admin_id: &str) -> Result<String>;

    async fn get_identity(&self, user_id: &str) -> Result<OnChainIdentity>;

    async fn revoke_verification(
        &self,
        user_id: &str,
        kyc_id: &str,
        reason: &str,
        admin_id: &str,
    ) -> Result<String>;

    /// `None` while the transaction is still unmined.
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>>;

    async fn block_number(&self) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    /// Never fails; an unreachable node is reported as `connected: false`.
    async fn network_status(&self) -> NetworkStatus;
}
