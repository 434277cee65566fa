use crate::blockchain::{NetworkStatus, OnChainIdentity};
use crate::models::blockchain_tx::{BlockchainTransaction, BlockchainTransactionView, CostEstimate, KycChainRecord};
use crate::models::face_verification::{FaceVerificationOutcome, FaceVerificationRecord, QualityReport};
use crate::models::kyc::{
    BulkActionOutcome, DecisionOutcome, KycPayload, KycStatistics, KycStatus, KycStatusView, KycSubmission,
};
use crate::models::user::UserResponse;
use crate::utils::validation::ValidationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// Auth

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserEnvelope {
    pub success: bool,
    pub user: UserResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

// KYC

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitKycResponse {
    pub success: bool,
    pub message: String,
    pub kyc_id: Uuid,
    pub status: KycStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KycStatusResponse {
    pub success: bool,
    pub kyc: KycStatusView,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KycDetailsResponse {
    pub success: bool,
    pub submission: KycSubmission,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KycUpdateResponse {
    pub success: bool,
    pub message: String,
    pub submission: KycSubmission,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyFaceRequest {
    /// Base64 image, optionally as a `data:image/...;base64,` URL.
    pub live_image: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyFaceResponse {
    pub success: bool,
    pub result: FaceVerificationOutcome,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateImageRequest {
    pub image_data: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateImageResponse {
    pub success: bool,
    pub quality: QualityReport,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateDataRequest {
    pub data: KycPayload,
    #[serde(default)]
    pub partial: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ValidateDataResponse {
    pub success: bool,
    pub validation: ValidationReport,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerificationHistoryResponse {
    pub success: bool,
    pub count: usize,
    pub verifications: Vec<FaceVerificationRecord>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BlockchainHistoryResponse {
    pub success: bool,
    pub count: usize,
    pub transactions: Vec<BlockchainTransactionView>,
}

// Admin

#[derive(Debug, Serialize, ToSchema)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let limit = limit.max(1);
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardResponse {
    pub success: bool,
    pub statistics: KycStatistics,
    pub total_users: i64,
    pub pending_preview: Vec<KycSubmission>,
    pub recent_transactions: Vec<BlockchainTransaction>,
    pub blockchain: NetworkStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyticsResponse {
    pub success: bool,
    pub statistics: KycStatistics,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PendingQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmissionListResponse {
    pub success: bool,
    pub count: usize,
    pub submissions: Vec<KycSubmission>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SubmissionsQuery {
    /// `all`, `pending`, `approved` or `rejected`.
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// `asc` or `desc` by submission time.
    pub sort: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PagedSubmissionsResponse {
    pub success: bool,
    pub submissions: Vec<KycSubmission>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DecideRequest {
    /// `approved` or `rejected`.
    pub decision: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DecideResponse {
    pub success: bool,
    pub message: String,
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkActionRequest {
    pub kyc_ids: Vec<Uuid>,
    pub action: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkActionResponse {
    pub success: bool,
    pub result: BulkActionOutcome,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KycChainResponse {
    pub success: bool,
    pub record: KycChainRecord,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChainTransactionResponse {
    pub success: bool,
    pub message: String,
    pub transaction: BlockchainTransaction,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UsersQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserListResponse {
    pub success: bool,
    pub users: Vec<UserResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserKycResponse {
    pub success: bool,
    pub user: UserResponse,
    pub submissions: Vec<KycSubmission>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IdentityResponse {
    pub success: bool,
    pub user_id: Uuid,
    pub identity: OnChainIdentity,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NetworkStatusResponse {
    pub success: bool,
    pub network: NetworkStatus,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionListResponse {
    pub success: bool,
    pub transactions: Vec<BlockchainTransaction>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CostEstimateResponse {
    pub success: bool,
    pub estimate: CostEstimate,
}

// Health

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn up() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` when every subsystem is up, `degraded` otherwise.
    pub status: String,
    pub database: ComponentHealth,
    pub blockchain: ComponentHealth,
    pub face_model: ComponentHealth,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_rounds_up() {
        assert_eq!(Pagination::new(1, 20, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 20, 20).total_pages, 1);
        assert_eq!(Pagination::new(2, 20, 21).total_pages, 2);
    }
}
