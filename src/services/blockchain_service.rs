use crate::blockchain::{
    ChainClient, NetworkStatus, OnChainIdentity, OnChainVerification, TxReceipt, NODE_UNREACHABLE,
};
use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::blockchain_tx::{
    BlockchainTransaction, BlockchainTransactionView, ChainOperation, CostEstimate, KycChainRecord,
    DEFAULT_GAS_ESTIMATE,
};
use crate::models::kyc::{KycStatus, KycSubmission};
use crate::utils::crypto::sha256_hex;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

const WEI_PER_ETH: f64 = 1e18;

/// Hash anchored for an approved submission.
pub fn verification_hash(user_id: &Uuid, kyc_id: &Uuid) -> String {
    sha256_hex(&format!("{}:{}:True", user_id, kyc_id))
}

/// Hash of the identity attributes of a submission.
pub fn identity_hash(submission: &KycSubmission) -> String {
    let info = &submission.personal_info;
    sha256_hex(&format!(
        "{}|{}|{}|{}",
        info.full_name.trim().to_lowercase(),
        info.date_of_birth,
        submission.identity_documents.document_type,
        info.nationality
    ))
}

pub struct BlockchainService {
    chain: Arc<dyn ChainClient>,
    db: Arc<SqliteDatabase>,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl BlockchainService {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        db: Arc<SqliteDatabase>,
        confirmation_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            chain,
            db,
            confirmation_timeout,
            poll_interval,
        }
    }

    /// Sends one `storeKYCVerification` transaction and waits for it. There
    /// is no retry; a timeout means the outcome is unknown.
    pub async fn anchor_verification(
        &self,
        user_id: &Uuid,
        kyc_id: &Uuid,
        admin_id: &str,
    ) -> Result<BlockchainTransaction> {
        let hash = verification_hash(user_id, kyc_id);
        let tx_hash = self
            .chain
            .store_verification(&user_id.to_string(), &kyc_id.to_string(), &hash, true, admin_id)
            .await?;
        info!(action = "kyc_anchor_sent", kyc_id = %kyc_id, tx_hash = %tx_hash);

        self.confirm_and_record(&tx_hash, user_id, Some(*kyc_id), admin_id, ChainOperation::KycVerification)
            .await
    }

    pub async fn revoke(&self, kyc_id: &Uuid, admin_id: &str, reason: &str) -> Result<BlockchainTransaction> {
        if reason.trim().is_empty() {
            return Err(AppError::validation("Revocation reason is required"));
        }
        let submission = self.submission(kyc_id).await?;
        if submission.status != KycStatus::Approved {
            return Err(AppError::Conflict(format!(
                "Only approved submissions can be revoked (status is {})",
                submission.status
            )));
        }

        let tx_hash = self
            .chain
            .revoke_verification(&submission.user_id.to_string(), &kyc_id.to_string(), reason.trim(), admin_id)
            .await?;
        info!(action = "kyc_revocation_sent", kyc_id = %kyc_id, tx_hash = %tx_hash);

        self.confirm_and_record(
            &tx_hash,
            &submission.user_id,
            Some(*kyc_id),
            admin_id,
            ChainOperation::KycRevocation,
        )
        .await
    }

    /// Anchors the identity hash of the user's latest submission.
    pub async fn update_identity(&self, user_id: &Uuid, admin_id: &str) -> Result<BlockchainTransaction> {
        let submission = self
            .db
            .get_latest_kyc_submission(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No KYC submission found for user".to_string()))?;

        let hash = identity_hash(&submission);
        let tx_hash = self
            .chain
            .update_identity(&user_id.to_string(), &hash, admin_id)
            .await?;
        info!(action = "identity_update_sent", user_id = %user_id, tx_hash = %tx_hash);

        self.confirm_and_record(&tx_hash, user_id, None, admin_id, ChainOperation::IdentityUpdate)
            .await
    }

    pub async fn get_identity(&self, user_id: &Uuid) -> Result<OnChainIdentity> {
        self.chain.get_identity(&user_id.to_string()).await
    }

    pub async fn get_verification(&self, user_id: &Uuid, kyc_id: &Uuid) -> Result<OnChainVerification> {
        self.chain
            .get_verification(&user_id.to_string(), &kyc_id.to_string())
            .await
    }

    /// Recorded transactions plus the contract's view. An unreachable node
    /// only empties the on-chain half.
    pub async fn kyc_record(&self, kyc_id: &Uuid) -> Result<KycChainRecord> {
        let submission = self.submission(kyc_id).await?;
        let transactions = self.db.get_blockchain_transactions_by_kyc(kyc_id).await?;

        let (on_chain, chain_error) = match self.get_verification(&submission.user_id, kyc_id).await {
            Ok(record) => (Some(record), None),
            Err(e) => {
                warn!(action = "chain_lookup_failed", kyc_id = %kyc_id, error = %e);
                (None, Some(NODE_UNREACHABLE.to_string()))
            }
        };

        Ok(KycChainRecord {
            kyc_id: *kyc_id,
            user_id: submission.user_id,
            on_chain,
            chain_error,
            transactions: self.with_confirmations(transactions).await,
        })
    }

    pub async fn network_status(&self) -> NetworkStatus {
        self.chain.network_status().await
    }

    pub async fn estimate_cost(&self, operation: &str) -> Result<CostEstimate> {
        let gas_estimate = operation
            .parse::<ChainOperation>()
            .map(|op| op.gas_estimate())
            .unwrap_or(DEFAULT_GAS_ESTIMATE);
        let gas_price = self.chain.gas_price().await?;
        let cost = gas_estimate as u128 * gas_price;

        Ok(CostEstimate {
            operation: operation.to_string(),
            gas_estimate,
            gas_price_wei: gas_price.to_string(),
            estimated_cost_wei: cost.to_string(),
            estimated_cost_eth: cost as f64 / WEI_PER_ETH,
        })
    }

    pub async fn history(&self, user_id: &Uuid) -> Result<Vec<BlockchainTransactionView>> {
        let transactions = self.db.get_blockchain_transactions_by_user(user_id).await?;
        Ok(self.with_confirmations(transactions).await)
    }

    pub async fn list_transactions(&self, page: i64, limit: i64) -> Result<(Vec<BlockchainTransaction>, i64)> {
        let limit = limit.clamp(1, 100);
        let offset = (page.max(1) - 1) * limit;
        let transactions = self.db.list_blockchain_transactions(limit, offset).await?;
        let total = self.db.count_blockchain_transactions().await?;
        Ok((transactions, total))
    }

    /// Polls for the receipt until the deadline. RPC errors while polling
    /// are logged and retried; only the deadline ends the wait.
    pub async fn wait_for_confirmation(&self, tx_hash: &str) -> Result<TxReceipt> {
        let deadline = Instant::now() + self.confirmation_timeout;

        loop {
            match self.chain.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.success => return Ok(receipt),
                Ok(Some(_)) => {
                    return Err(AppError::BlockchainError(format!("Transaction {} reverted", tx_hash)));
                }
                Ok(None) => {}
                Err(e) => warn!(action = "receipt_poll_failed", tx_hash = %tx_hash, error = %e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AppError::ConfirmationTimeout(format!(
                    "No receipt for {} within {}s",
                    tx_hash,
                    self.confirmation_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn confirm_and_record(
        &self,
        tx_hash: &str,
        user_id: &Uuid,
        kyc_id: Option<Uuid>,
        admin_id: &str,
        operation: ChainOperation,
    ) -> Result<BlockchainTransaction> {
        let receipt = self.wait_for_confirmation(tx_hash).await?;

        let gas_price = match receipt.effective_gas_price {
            Some(price) => price,
            None => self.chain.gas_price().await.unwrap_or_default(),
        };

        let record = BlockchainTransaction {
            id: Uuid::new_v4(),
            transaction_hash: receipt.transaction_hash.clone(),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            transaction_fee: (receipt.gas_used as u128 * gas_price).to_string(),
            user_id: *user_id,
            kyc_id,
            admin_id: admin_id.to_string(),
            operation_type: operation,
            recorded_at: Utc::now(),
        };
        self.db.record_blockchain_transaction(&record).await?;

        info!(
            action = "chain_transaction_confirmed",
            operation = %operation,
            tx_hash = %record.transaction_hash,
            block = record.block_number
        );
        Ok(record)
    }

    async fn with_confirmations(&self, transactions: Vec<BlockchainTransaction>) -> Vec<BlockchainTransactionView> {
        let latest = if transactions.is_empty() {
            None
        } else {
            self.chain.block_number().await.ok()
        };

        transactions
            .into_iter()
            .map(|transaction| BlockchainTransactionView {
                confirmations: latest.map(|head| head.saturating_sub(transaction.block_number) + 1),
                transaction,
            })
            .collect()
    }

    async fn submission(&self, kyc_id: &Uuid) -> Result<KycSubmission> {
        self.db
            .get_kyc_submission(kyc_id)
            .await?
            .ok_or_else(|| AppError::NotFound("KYC submission not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::kyc::{IdentityDocuments, PersonalInfo};
    use crate::models::user::{User, UserRole};
    use crate::services::test_support::{FakeChain, ReceiptMode};

    async fn approved_submission(db: &SqliteDatabase) -> KycSubmission {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4().simple()),
            full_name: "Chain User".to_string(),
            phone_number: None,
            password_hash: "x".to_string(),
            role: UserRole::User,
            kyc_status: KycStatus::NotSubmitted,
            is_active: true,
            date_of_birth: None,
            nationality: None,
            created_at: now,
            updated_at: now,
        };
        db.create_user(&user).await.unwrap();
        let kyc = KycSubmission {
            id: Uuid::new_v4(),
            user_id: user.id,
            personal_info: PersonalInfo {
                full_name: "  Chain User ".to_string(),
                date_of_birth: "1990-01-01".to_string(),
                nationality: "Kenyan".to_string(),
                ..Default::default()
            },
            identity_documents: IdentityDocuments {
                document_type: "passport".to_string(),
                ..Default::default()
            },
            face_image: None,
            additional_documents: vec![],
            status: KycStatus::Pending,
            admin_notes: None,
            verification_attempts: 0,
            submitted_at: now,
            status_updated_at: None,
            updated_at: now,
        };
        db.create_kyc_submission(&kyc).await.unwrap();
        db.decide_kyc_submission(&kyc.id, &user.id, KycStatus::Approved, "ok").await.unwrap();
        db.get_kyc_submission(&kyc.id).await.unwrap().unwrap()
    }

    fn service(chain: Arc<FakeChain>, db: Arc<SqliteDatabase>) -> BlockchainService {
        BlockchainService::new(chain, db, Duration::from_millis(50), Duration::from_millis(5))
    }

    #[test]
    fn verification_hash_is_stable() {
        let user = Uuid::nil();
        let kyc = Uuid::nil();
        assert_eq!(
            verification_hash(&user, &kyc),
            sha256_hex(&format!("{}:{}:True", Uuid::nil(), Uuid::nil()))
        );
        assert_eq!(verification_hash(&user, &kyc).len(), 64);
    }

    #[tokio::test]
    async fn anchor_records_confirmed_transaction() {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let chain = Arc::new(FakeChain::default());
        let kyc = approved_submission(&db).await;

        let tx = service(chain.clone(), db.clone())
            .anchor_verification(&kyc.user_id, &kyc.id, "admin-1")
            .await
            .unwrap();
        assert_eq!(tx.operation_type, ChainOperation::KycVerification);
        assert_eq!(tx.transaction_fee, (150_000u128 * 2_000_000_000).to_string());
        assert_eq!(chain.calls().len(), 1);
        assert!(chain.calls()[0].contains(&verification_hash(&kyc.user_id, &kyc.id)));

        let history = service(chain, db).history(&kyc.user_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].confirmations, Some(4));
    }

    #[tokio::test]
    async fn missing_receipt_times_out_without_record() {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let chain = Arc::new(FakeChain::with_receipts(ReceiptMode::Never));
        let kyc = approved_submission(&db).await;

        let err = service(chain.clone(), db.clone())
            .anchor_verification(&kyc.user_id, &kyc.id, "admin-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConfirmationTimeout(_)));
        assert_eq!(chain.calls().len(), 1);
        assert_eq!(db.count_blockchain_transactions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reverted_transaction_is_a_failure() {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let chain = Arc::new(FakeChain::with_receipts(ReceiptMode::Reverted));
        let kyc = approved_submission(&db).await;

        let err = service(chain, db.clone())
            .anchor_verification(&kyc.user_id, &kyc.id, "admin-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BlockchainError(_)));
        assert_eq!(db.count_blockchain_transactions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn identity_hash_normalises_name() {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let chain = Arc::new(FakeChain::default());
        let kyc = approved_submission(&db).await;

        let tx = service(chain.clone(), db)
            .update_identity(&kyc.user_id, "admin-1")
            .await
            .unwrap();
        assert_eq!(tx.kyc_id, None);
        let expected = sha256_hex("chain user|1990-01-01|passport|Kenyan");
        assert!(chain.calls()[0].contains(&expected));
    }

    #[tokio::test]
    async fn unknown_identity_reads_as_absent() {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let service = service(Arc::new(FakeChain::default()), db);

        let identity = service.get_identity(&Uuid::new_v4()).await.unwrap();
        assert!(!identity.exists);
    }

    #[tokio::test]
    async fn revoke_requires_reason_and_approval() {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let chain = Arc::new(FakeChain::default());
        let kyc = approved_submission(&db).await;
        let service = service(chain, db);

        assert!(matches!(service.revoke(&kyc.id, "admin-1", " ").await, Err(AppError::ValidationError(_))));
        let tx = service.revoke(&kyc.id, "admin-1", "fraud").await.unwrap();
        assert_eq!(tx.operation_type, ChainOperation::KycRevocation);

        let record = service.kyc_record(&kyc.id).await.unwrap();
        assert_eq!(record.transactions.len(), 1);
        assert!(record.on_chain.is_some());
    }

    #[tokio::test]
    async fn unreachable_node_is_reported_without_details() {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let kyc = approved_submission(&db).await;

        let record = service(Arc::new(FakeChain::failing()), db).kyc_record(&kyc.id).await.unwrap();
        assert!(record.on_chain.is_none());
        assert_eq!(record.chain_error.as_deref(), Some(NODE_UNREACHABLE));
    }

    #[tokio::test]
    async fn estimates_use_operation_gas() {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let service = service(Arc::new(FakeChain::default()), db);

        let known = service.estimate_cost("identity_update").await.unwrap();
        assert_eq!(known.gas_estimate, 100_000);
        assert_eq!(known.estimated_cost_wei, (100_000u128 * 2_000_000_000).to_string());

        let unknown = service.estimate_cost("something_else").await.unwrap();
        assert_eq!(unknown.gas_estimate, DEFAULT_GAS_ESTIMATE);
    }
}
