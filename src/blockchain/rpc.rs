//! Ethereum JSON-RPC client for the KYC registry contract.
//!
//! Transactions are sent with `eth_sendTransaction` from an account the node
//! manages (configured, or the first of `eth_accounts`), so no key material
//! lives in this service.

use crate::blockchain::abi::{self, ParamType, Token};
use crate::blockchain::{
    ChainClient, NetworkStatus, OnChainIdentity, OnChainVerification, TxReceipt, GET_IDENTITY_SIG,
    GET_VERIFICATION_SIG, NODE_UNREACHABLE, REVOKE_VERIFICATION_SIG, STORE_VERIFICATION_SIG, UPDATE_IDENTITY_SIG,
};
use crate::config::Settings;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: String,
    gas_used: String,
    effective_gas_price: Option<String>,
    status: Option<String>,
}

pub struct EthRpcClient {
    client: Client,
    node_url: String,
    contract_address: String,
    account: OnceCell<String>,
    gas_limit: u64,
    request_id: AtomicU64,
}

/// Parses an Ethereum hex quantity such as `0x1a`.
pub fn parse_quantity(raw: &str) -> Result<u128> {
    let digits = raw.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| AppError::BlockchainError(format!("Invalid hex quantity {}: {}", raw, e)))
}

fn quantity_u64(raw: &str) -> Result<u64> {
    u64::try_from(parse_quantity(raw)?)
        .map_err(|_| AppError::BlockchainError(format!("Quantity {} exceeds u64", raw)))
}

impl EthRpcClient {
    pub fn new(
        node_url: impl Into<String>,
        contract_address: impl Into<String>,
        account: Option<String>,
        gas_limit: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::BlockchainError(format!("Failed to build HTTP client: {}", e)))?;

        let account_cell = OnceCell::new();
        if let Some(account) = account {
            // a fresh cell cannot already be set
            let _ = account_cell.set(account);
        }

        Ok(Self {
            client,
            node_url: node_url.into(),
            contract_address: contract_address.into(),
            account: account_cell,
            gas_limit,
            request_id: AtomicU64::new(0),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.ethereum_node_url.clone(),
            settings.contract_address.clone(),
            settings.chain_account_address.clone(),
            settings.gas_limit,
        )
    }

    async fn call_raw(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!(action = "eth_rpc_call", method = %method, id = id);

        let response = self
            .client
            .post(&self.node_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::BlockchainError(format!("RPC connection failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::BlockchainError(format!("RPC HTTP {} - {}", status, body)));
        }

        let rpc_response: RpcResponse = response
            .json()
            .await
            .map_err(|e| AppError::BlockchainError(format!("Malformed RPC response: {}", e)))?;

        if let Some(err) = rpc_response.error {
            error!(action = "eth_rpc_error", method = %method, code = err.code, message = %err.message);
            return Err(AppError::BlockchainError(format!(
                "RPC error {}: {}",
                err.code, err.message
            )));
        }

        Ok(rpc_response.result.unwrap_or(Value::Null))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let raw = self.call_raw(method, params).await?;
        serde_json::from_value(raw)
            .map_err(|e| AppError::BlockchainError(format!("Unexpected {} result: {}", method, e)))
    }

    async fn sender(&self) -> Result<String> {
        self.account
            .get_or_try_init(|| async {
                let accounts: Vec<String> = self.call("eth_accounts", json!([])).await?;
                accounts
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::BlockchainError("Node exposes no unlocked account".to_string()))
            })
            .await
            .cloned()
    }

    async fn send_contract_transaction(&self, calldata: Vec<u8>) -> Result<String> {
        let from = self.sender().await?;
        let tx = json!({
            "from": from,
            "to": self.contract_address,
            "gas": format!("0x{:x}", self.gas_limit),
            "data": format!("0x{}", hex::encode(calldata)),
        });
        let tx_hash: String = self.call("eth_sendTransaction", json!([tx])).await?;
        info!(action = "eth_transaction_sent", tx_hash = %tx_hash);
        Ok(tx_hash)
    }

    async fn contract_call(&self, calldata: Vec<u8>, outputs: &[ParamType]) -> Result<Vec<Token>> {
        let call = json!({
            "to": self.contract_address,
            "data": format!("0x{}", hex::encode(calldata)),
        });
        let raw: String = self.call("eth_call", json!([call, "latest"])).await?;
        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| AppError::BlockchainError(format!("Invalid eth_call data: {}", e)))?;
        abi::decode(outputs, &bytes)
    }

    async fn chain_id(&self) -> Result<u64> {
        let raw: String = self.call("eth_chainId", json!([])).await?;
        quantity_u64(&raw)
    }

    async fn balance(&self, account: &str) -> Result<u128> {
        let raw: String = self.call("eth_getBalance", json!([account, "latest"])).await?;
        parse_quantity(&raw)
    }
}

#[async_trait]
impl ChainClient for EthRpcClient {
    async fn store_verification(
        &self,
        user_id: &str,
        kyc_id: &str,
        verification_hash: &str,
        status: bool,
        admin_id: &str,
    ) -> Result<String> {
        let calldata = abi::encode_call(
            STORE_VERIFICATION_SIG,
            &[
                Token::String(user_id.to_string()),
                Token::String(kyc_id.to_string()),
                Token::String(verification_hash.to_string()),
                Token::Bool(status),
                Token::String(admin_id.to_string()),
            ],
        );
        self.send_contract_transaction(calldata).await
    }

    async fn get_verification(&self, user_id: &str, kyc_id: &str) -> Result<OnChainVerification> {
        let calldata = abi::encode_call(
            GET_VERIFICATION_SIG,
            &[Token::String(user_id.to_string()), Token::String(kyc_id.to_string())],
        );
        let mut values = self
            .contract_call(
                calldata,
                &[ParamType::Bool, ParamType::Bool, ParamType::Uint, ParamType::String, ParamType::String],
            )
            .await?
            .into_iter();

        let mut next = || {
            values
                .next()
                .ok_or_else(|| AppError::BlockchainError("Missing return value".to_string()))
        };
        Ok(OnChainVerification {
            exists: next()?.into_bool()?,
            status: next()?.into_bool()?,
            timestamp: next()?.into_uint()? as u64,
            admin_id: next()?.into_string()?,
            verification_hash: next()?.into_string()?,
        })
    }

    async fn update_identity(&self, user_id: &str, identity_hash: &str, admin_id: &str) -> Result<String> {
        let calldata = abi::encode_call(
            UPDATE_IDENTITY_SIG,
            &[
                Token::String(user_id.to_string()),
                Token::String(identity_hash.to_string()),
                Token::String(admin_id.to_string()),
            ],
        );
        self.send_contract_transaction(calldata).await
    }

    async fn get_identity(&self, user_id: &str) -> Result<OnChainIdentity> {
        let calldata = abi::encode_call(GET_IDENTITY_SIG, &[Token::String(user_id.to_string())]);
        let mut values = self
            .contract_call(
                calldata,
                &[ParamType::Bool, ParamType::String, ParamType::Uint, ParamType::String],
            )
            .await?
            .into_iter();

        let mut next = || {
            values
                .next()
                .ok_or_else(|| AppError::BlockchainError("Missing return value".to_string()))
        };
        Ok(OnChainIdentity {
            exists: next()?.into_bool()?,
            identity_hash: next()?.into_string()?,
            timestamp: next()?.into_uint()? as u64,
            admin_id: next()?.into_string()?,
        })
    }

    async fn revoke_verification(
        &self,
        user_id: &str,
        kyc_id: &str,
        reason: &str,
        admin_id: &str,
    ) -> Result<String> {
        let calldata = abi::encode_call(
            REVOKE_VERIFICATION_SIG,
            &[
                Token::String(user_id.to_string()),
                Token::String(kyc_id.to_string()),
                Token::String(reason.to_string()),
                Token::String(admin_id.to_string()),
            ],
        );
        self.send_contract_transaction(calldata).await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        let raw = self.call_raw("eth_getTransactionReceipt", json!([tx_hash])).await?;
        if raw.is_null() {
            return Ok(None);
        }
        let receipt: RawReceipt = serde_json::from_value(raw)
            .map_err(|e| AppError::BlockchainError(format!("Malformed receipt: {}", e)))?;

        Ok(Some(TxReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number: quantity_u64(&receipt.block_number)?,
            gas_used: quantity_u64(&receipt.gas_used)?,
            effective_gas_price: receipt
                .effective_gas_price
                .as_deref()
                .map(parse_quantity)
                .transpose()?,
            success: match receipt.status.as_deref() {
                Some(status) => parse_quantity(status)? == 1,
                None => false,
            },
        }))
    }

    async fn block_number(&self) -> Result<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        quantity_u64(&raw)
    }

    async fn gas_price(&self) -> Result<u128> {
        let raw: String = self.call("eth_gasPrice", json!([])).await?;
        parse_quantity(&raw)
    }

    async fn network_status(&self) -> NetworkStatus {
        let mut status = NetworkStatus {
            node_url: self.node_url.clone(),
            contract_address: self.contract_address.clone(),
            ..Default::default()
        };

        match self.chain_id().await {
            Ok(chain_id) => {
                status.connected = true;
                status.chain_id = Some(chain_id);
            }
            Err(e) => {
                warn!(action = "chain_status_failed", node_url = %self.node_url, error = %e);
                status.error = Some(NODE_UNREACHABLE.to_string());
                return status;
            }
        }

        status.latest_block = self.block_number().await.ok();
        status.gas_price_wei = self.gas_price().await.ok().map(|p| p.to_string());
        if let Ok(account) = self.sender().await {
            status.balance_wei = self.balance(&account).await.ok().map(|b| b.to_string());
            status.account = Some(account);
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn rpc_result(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 0, "result": result}))
    }

    async fn mock_method(server: &MockServer, method: &str, result: Value) {
        Mock::given(matchers::method("POST"))
            .and(matchers::body_partial_json(json!({ "method": method })))
            .respond_with(rpc_result(result))
            .mount(server)
            .await;
    }

    fn client(server: &MockServer, account: Option<&str>) -> EthRpcClient {
        EthRpcClient::new(
            server.uri(),
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
            account.map(str::to_string),
            3_000_000,
        )
        .unwrap()
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[tokio::test]
    async fn block_number_is_decoded() {
        let server = MockServer::start().await;
        mock_method(&server, "eth_blockNumber", json!("0x2a")).await;
        assert_eq!(client(&server, None).block_number().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn pending_receipt_is_none() {
        let server = MockServer::start().await;
        mock_method(&server, "eth_getTransactionReceipt", Value::Null).await;
        assert!(client(&server, None).transaction_receipt("0xabc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mined_receipt_reports_status() {
        let server = MockServer::start().await;
        mock_method(
            &server,
            "eth_getTransactionReceipt",
            json!({
                "transactionHash": "0xabc",
                "blockNumber": "0x10",
                "gasUsed": "0x5208",
                "effectiveGasPrice": "0x3b9aca00",
                "status": "0x1"
            }),
        )
        .await;

        let receipt = client(&server, None).transaction_receipt("0xabc").await.unwrap().unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.block_number, 16);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.effective_gas_price, Some(1_000_000_000));
    }

    #[tokio::test]
    async fn store_verification_sends_contract_call_from_node_account() {
        let server = MockServer::start().await;
        mock_method(&server, "eth_accounts", json!(["0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1"])).await;
        mock_method(&server, "eth_sendTransaction", json!("0xfeed")).await;

        let hash = client(&server, None)
            .store_verification("user-1", "kyc-1", "abcd", true, "admin-1")
            .await
            .unwrap();
        assert_eq!(hash, "0xfeed");

        let requests = server.received_requests().await.unwrap();
        let send = requests
            .iter()
            .map(|r| serde_json::from_slice::<Value>(&r.body).unwrap())
            .find(|body| body["method"] == "eth_sendTransaction")
            .unwrap();
        let tx = &send["params"][0];
        assert_eq!(tx["from"], "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1");
        let expected_prefix = format!("0x{}", hex::encode(abi::selector(STORE_VERIFICATION_SIG)));
        assert!(tx["data"].as_str().unwrap().starts_with(&expected_prefix));
    }

    #[tokio::test]
    async fn get_verification_decodes_tuple() {
        let server = MockServer::start().await;
        let encoded = abi::encode(&[
            Token::Bool(true),
            Token::Bool(true),
            Token::Uint(1_700_000_000),
            Token::String("admin-1".into()),
            Token::String("abcd".into()),
        ]);
        mock_method(&server, "eth_call", json!(format!("0x{}", hex::encode(encoded)))).await;

        let record = client(&server, Some("0x01")).get_verification("user-1", "kyc-1").await.unwrap();
        assert!(record.exists && record.status);
        assert_eq!(record.admin_id, "admin-1");
        assert_eq!(record.verification_hash, "abcd");
    }

    #[tokio::test]
    async fn rpc_error_surfaces_as_blockchain_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 0, "error": {"code": -32000, "message": "execution reverted"}
            })))
            .mount(&server)
            .await;

        let err = client(&server, None).gas_price().await.unwrap_err();
        assert!(matches!(err, AppError::BlockchainError(ref m) if m.contains("execution reverted")));
    }

    #[tokio::test]
    async fn unreachable_node_reports_disconnected() {
        let client = EthRpcClient::new("http://127.0.0.1:1", "0x0", None, 1).unwrap();
        let status = client.network_status().await;
        assert!(!status.connected);
        assert_eq!(status.error.as_deref(), Some(NODE_UNREACHABLE));
    }
}
