//! Reviewer endpoints. Every handler requires the admin role.

use crate::api::routes::AdminUser;
use crate::api::types::*;
use crate::api::{health_report, AppState};
use crate::errors::AppError;
use crate::models::kyc::{KycListFilter, KycStatus};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use uuid::Uuid;

type ApiResult<T> = Result<(StatusCode, Json<T>), AppError>;

const DASHBOARD_PREVIEW: i64 = 5;
const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

pub fn admin_router() -> Router {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/analytics", get(analytics))
        .route("/kyc/pending", get(pending_submissions))
        .route("/kyc/submissions", get(list_submissions))
        .route("/kyc/bulk-action", post(bulk_action))
        .route("/kyc/:id/decide", post(decide_submission))
        .route("/kyc/:id/blockchain", get(kyc_blockchain_record))
        .route("/kyc/:id/revoke", post(revoke_verification))
        .route("/users", get(list_users))
        .route("/users/:id/kyc", get(user_kyc))
        .route("/users/:id/deactivate", post(deactivate_user))
        .route("/users/:id/activate", post(activate_user))
        .route("/users/:id/identity", get(user_identity).post(anchor_identity))
        .route("/blockchain/status", get(blockchain_status))
        .route("/blockchain/transactions", get(blockchain_transactions))
        .route("/blockchain/estimate/:operation", get(estimate_cost))
        .route("/system/health", get(system_health))
}

fn page_params(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    (
        page.unwrap_or(1).max(1),
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
    )
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/dashboard",
    responses((status = 200, body = DashboardResponse), (status = 403)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn dashboard(Extension(state): Extension<AppState>, AdminUser(_admin): AdminUser) -> ApiResult<DashboardResponse> {
    let kyc = state.kyc_service()?;
    let blockchain = state.blockchain_service()?;

    let statistics = kyc.analytics().await?;
    let total_users = state.db()?.count_users(None).await?;
    let pending_preview = kyc.pending(Some(DASHBOARD_PREVIEW)).await?;
    let (recent_transactions, _) = blockchain.list_transactions(1, DASHBOARD_PREVIEW).await?;
    let network = blockchain.network_status().await;

    Ok((
        StatusCode::OK,
        Json(DashboardResponse {
            success: true,
            statistics,
            total_users,
            pending_preview,
            recent_transactions,
            blockchain: network,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/analytics",
    responses((status = 200, body = AnalyticsResponse)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn analytics(Extension(state): Extension<AppState>, AdminUser(_admin): AdminUser) -> ApiResult<AnalyticsResponse> {
    let statistics = state.kyc_service()?.analytics().await?;
    Ok((StatusCode::OK, Json(AnalyticsResponse { success: true, statistics })))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/kyc/pending",
    params(PendingQuery),
    responses((status = 200, body = SubmissionListResponse)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn pending_submissions(
    Extension(state): Extension<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PendingQuery>,
) -> ApiResult<SubmissionListResponse> {
    let submissions = state.kyc_service()?.pending(query.limit).await?;
    Ok((
        StatusCode::OK,
        Json(SubmissionListResponse {
            success: true,
            count: submissions.len(),
            submissions,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/kyc/submissions",
    params(SubmissionsQuery),
    responses((status = 200, body = PagedSubmissionsResponse), (status = 400)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn list_submissions(
    Extension(state): Extension<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<SubmissionsQuery>,
) -> ApiResult<PagedSubmissionsResponse> {
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(raw.parse::<KycStatus>()?),
    };
    let ascending = match query.sort.as_deref() {
        None | Some("desc") => false,
        Some("asc") => true,
        Some(other) => return Err(AppError::validation(format!("Unknown sort order: {}", other))),
    };
    let (page, limit) = page_params(query.page, query.limit);

    let filter = KycListFilter {
        status,
        limit,
        offset: (page - 1) * limit,
        ascending,
    };
    let (submissions, total) = state.kyc_service()?.list(&filter).await?;
    Ok((
        StatusCode::OK,
        Json(PagedSubmissionsResponse {
            success: true,
            submissions,
            pagination: Pagination::new(page, limit, total),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/kyc/{id}/decide",
    params(("id" = Uuid, Path, description = "KYC submission id")),
    request_body = DecideRequest,
    responses(
        (status = 200, body = DecideResponse),
        (status = 400),
        (status = 404),
        (status = 409, description = "Submission is no longer pending")
    ),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn decide_submission(
    Extension(state): Extension<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<DecideRequest>,
) -> ApiResult<DecideResponse> {
    let outcome = state
        .kyc_service()?
        .decide(&id, &admin.user_id, &req.decision, req.notes.as_deref())
        .await?;
    Ok((
        StatusCode::OK,
        Json(DecideResponse {
            success: true,
            message: format!("KYC submission {}", outcome.status),
            outcome,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/kyc/bulk-action",
    request_body = BulkActionRequest,
    responses((status = 200, body = BulkActionResponse), (status = 400)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn bulk_action(
    Extension(state): Extension<AppState>,
    AdminUser(admin): AdminUser,
    Json(req): Json<BulkActionRequest>,
) -> ApiResult<BulkActionResponse> {
    let result = state
        .kyc_service()?
        .bulk_decide(&req.kyc_ids, &admin.user_id, &req.action, req.notes.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(BulkActionResponse { success: true, result })))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/kyc/{id}/blockchain",
    params(("id" = Uuid, Path, description = "KYC submission id")),
    responses((status = 200, body = KycChainResponse), (status = 404)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn kyc_blockchain_record(
    Extension(state): Extension<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<KycChainResponse> {
    let record = state.blockchain_service()?.kyc_record(&id).await?;
    Ok((StatusCode::OK, Json(KycChainResponse { success: true, record })))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/kyc/{id}/revoke",
    params(("id" = Uuid, Path, description = "KYC submission id")),
    request_body = RevokeRequest,
    responses((status = 200, body = ChainTransactionResponse), (status = 400), (status = 404), (status = 409)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn revoke_verification(
    Extension(state): Extension<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RevokeRequest>,
) -> ApiResult<ChainTransactionResponse> {
    let transaction = state
        .blockchain_service()?
        .revoke(&id, &admin.user_id.to_string(), &req.reason)
        .await?;
    Ok((
        StatusCode::OK,
        Json(ChainTransactionResponse {
            success: true,
            message: "Verification revoked on chain".to_string(),
            transaction,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    params(UsersQuery),
    responses((status = 200, body = UserListResponse)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn list_users(
    Extension(state): Extension<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<UsersQuery>,
) -> ApiResult<UserListResponse> {
    let (page, limit) = page_params(query.page, query.limit);
    let (users, total) = state
        .user_service()?
        .list_users(query.search.as_deref(), page, limit)
        .await?;
    Ok((
        StatusCode::OK,
        Json(UserListResponse {
            success: true,
            users: users.into_iter().map(Into::into).collect(),
            pagination: Pagination::new(page, limit, total),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users/{id}/kyc",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, body = UserKycResponse), (status = 404)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn user_kyc(
    Extension(state): Extension<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<UserKycResponse> {
    let user = state.user_service()?.get_user(&id).await?;
    let submissions = state.kyc_service()?.user_submissions(&id).await?;
    Ok((
        StatusCode::OK,
        Json(UserKycResponse {
            success: true,
            user: user.into(),
            submissions,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/deactivate",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, body = UserEnvelope), (status = 400), (status = 404)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn deactivate_user(
    Extension(state): Extension<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<UserEnvelope> {
    if id == admin.user_id {
        return Err(AppError::validation("Admins cannot deactivate their own account"));
    }
    let user = state.user_service()?.set_active(&id, false, &admin.user_id).await?;
    Ok((StatusCode::OK, Json(UserEnvelope { success: true, user: user.into() })))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/activate",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, body = UserEnvelope), (status = 404)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn activate_user(
    Extension(state): Extension<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<UserEnvelope> {
    let user = state.user_service()?.set_active(&id, true, &admin.user_id).await?;
    Ok((StatusCode::OK, Json(UserEnvelope { success: true, user: user.into() })))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/identity",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, body = ChainTransactionResponse), (status = 404), (status = 409)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn anchor_identity(
    Extension(state): Extension<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<ChainTransactionResponse> {
    let transaction = state
        .blockchain_service()?
        .update_identity(&id, &admin.user_id.to_string())
        .await?;
    Ok((
        StatusCode::OK,
        Json(ChainTransactionResponse {
            success: true,
            message: "Identity hash anchored on chain".to_string(),
            transaction,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users/{id}/identity",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, body = IdentityResponse)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn user_identity(
    Extension(state): Extension<AppState>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<IdentityResponse> {
    let identity = state.blockchain_service()?.get_identity(&id).await?;
    Ok((
        StatusCode::OK,
        Json(IdentityResponse {
            success: true,
            user_id: id,
            identity,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/blockchain/status",
    responses((status = 200, body = NetworkStatusResponse)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn blockchain_status(
    Extension(state): Extension<AppState>,
    AdminUser(_admin): AdminUser,
) -> ApiResult<NetworkStatusResponse> {
    let network = state.blockchain_service()?.network_status().await;
    Ok((StatusCode::OK, Json(NetworkStatusResponse { success: true, network })))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/blockchain/transactions",
    params(PageQuery),
    responses((status = 200, body = TransactionListResponse)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn blockchain_transactions(
    Extension(state): Extension<AppState>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<PageQuery>,
) -> ApiResult<TransactionListResponse> {
    let (page, limit) = page_params(query.page, query.limit);
    let (transactions, total) = state.blockchain_service()?.list_transactions(page, limit).await?;
    Ok((
        StatusCode::OK,
        Json(TransactionListResponse {
            success: true,
            transactions,
            pagination: Pagination::new(page, limit, total),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/blockchain/estimate/{operation}",
    params(("operation" = String, Path, description = "kyc_verification, identity_update or kyc_revocation")),
    responses((status = 200, body = CostEstimateResponse)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn estimate_cost(
    Extension(state): Extension<AppState>,
    AdminUser(_admin): AdminUser,
    Path(operation): Path<String>,
) -> ApiResult<CostEstimateResponse> {
    let estimate = state.blockchain_service()?.estimate_cost(&operation).await?;
    Ok((StatusCode::OK, Json(CostEstimateResponse { success: true, estimate })))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/system/health",
    responses((status = 200, body = HealthResponse)),
    security(("bearerAuth" = [])),
    tag = "Admin"
)]
pub async fn system_health(Extension(state): Extension<AppState>, AdminUser(_admin): AdminUser) -> Json<HealthResponse> {
    Json(health_report(&state).await)
}
