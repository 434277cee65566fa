use crate::api::types::*;
use crate::api::AppState;
use crate::errors::AppError;
use crate::models::kyc::KycPayload;
use crate::models::user::{NewUser, UserProfileUpdate};
use crate::services::jwt::AuthenticatedUser;
use crate::utils::validation::Validator;
use axum::extract::{FromRequestParts, Path};
use axum::http::{header::AUTHORIZATION, request::Parts, StatusCode};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use tracing::info;
use uuid::Uuid;

type ApiResult<T> = Result<(StatusCode, Json<T>), AppError>;

// JWT extractor for Authorization: Bearer ...
pub struct AuthBearer(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(auth) = parts.headers.get(AUTHORIZATION) {
            if let Ok(auth_str) = auth.to_str() {
                if let Some(token) = auth_str.strip_prefix("Bearer ") {
                    return Ok(AuthBearer(token.trim().to_string()));
                }
            }
        }
        Err(AppError::AuthenticationError(
            "Missing or invalid Authorization header".to_string(),
        ))
    }
}

fn app_state(parts: &Parts) -> Result<AppState, AppError> {
    parts
        .extensions
        .get::<AppState>()
        .cloned()
        .ok_or_else(|| AppError::InternalError("Application state not configured".to_string()))
}

/// A caller holding a valid, unrevoked session token.
pub struct CurrentUser(pub AuthenticatedUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthBearer(token) = AuthBearer::from_request_parts(parts, state).await?;
        let user = app_state(parts)?.auth_service()?.validate_token(&token).await?;
        Ok(CurrentUser(user))
    }
}

/// A caller whose current role, read from the database, is admin.
pub struct AdminUser(pub AuthenticatedUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// Auth API endpoints
pub fn auth_router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/user/:id", get(get_user).put(update_user))
        .route("/health", get(auth_health))
}

/// KYC API endpoints
pub fn kyc_router() -> Router {
    Router::new()
        .route("/submit", post(submit_kyc))
        .route("/status", get(kyc_status))
        .route("/details/:id", get(kyc_details))
        .route("/update/:id", put(update_kyc))
        .route("/verify-face", post(verify_face))
        .route("/validate-image", post(validate_image))
        .route("/validate-data", post(validate_data))
        .route("/verification-history", get(verification_history))
        .route("/blockchain-history", get(blockchain_history))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = NewUser,
    responses(
        (status = 201, body = AuthResponse),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already registered")
    ),
    tag = "Auth"
)]
pub async fn register(Extension(state): Extension<AppState>, Json(req): Json<NewUser>) -> ApiResult<AuthResponse> {
    let session = state.auth_service()?.register(&req).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "User registered successfully".to_string(),
            token: session.token,
            expires_at: session.expires_at,
            user: session.user.into(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses((status = 200, body = AuthResponse), (status = 401, description = "Invalid credentials")),
    tag = "Auth"
)]
pub async fn login(Extension(state): Extension<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<AuthResponse> {
    let session = state.auth_service()?.login(&req.email, &req.password).await?;
    Ok((
        StatusCode::OK,
        Json(AuthResponse {
            success: true,
            message: "Login successful".to_string(),
            token: session.token,
            expires_at: session.expires_at,
            user: session.user.into(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    responses((status = 200, body = MessageResponse)),
    security(("bearerAuth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    AuthBearer(token): AuthBearer,
) -> ApiResult<MessageResponse> {
    state.auth_service()?.logout(&token).await?;
    info!(action = "logout", user_id = %user.user_id);
    Ok((StatusCode::OK, Json(MessageResponse::ok("Logged out"))))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/user/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, body = UserEnvelope), (status = 403), (status = 404)),
    security(("bearerAuth" = [])),
    tag = "Auth"
)]
pub async fn get_user(
    Extension(state): Extension<AppState>,
    CurrentUser(viewer): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<UserEnvelope> {
    let user = state.user_service()?.get_profile(&id, &viewer).await?;
    Ok((
        StatusCode::OK,
        Json(UserEnvelope {
            success: true,
            user: user.into(),
        }),
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/auth/user/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserProfileUpdate,
    responses((status = 200, body = UserEnvelope), (status = 400), (status = 403), (status = 404)),
    security(("bearerAuth" = [])),
    tag = "Auth"
)]
pub async fn update_user(
    Extension(state): Extension<AppState>,
    CurrentUser(viewer): CurrentUser,
    Path(id): Path<Uuid>,
    Json(update): Json<UserProfileUpdate>,
) -> ApiResult<UserEnvelope> {
    let user = state.user_service()?.update_profile(&id, &viewer, &update).await?;
    Ok((
        StatusCode::OK,
        Json(UserEnvelope {
            success: true,
            user: user.into(),
        }),
    ))
}

#[utoipa::path(get, path = "/api/v1/auth/health", responses((status = 200, body = MessageResponse)), tag = "Auth")]
pub async fn auth_health() -> Json<MessageResponse> {
    Json(MessageResponse::ok("Auth service is running"))
}

#[utoipa::path(
    post,
    path = "/api/v1/kyc/submit",
    request_body = KycPayload,
    responses(
        (status = 201, body = SubmitKycResponse),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "An active submission already exists")
    ),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn submit_kyc(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<KycPayload>,
) -> ApiResult<SubmitKycResponse> {
    let submission = state.kyc_service()?.submit(&user.user_id, &payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitKycResponse {
            success: true,
            message: "KYC submission received".to_string(),
            kyc_id: submission.id,
            status: submission.status,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/kyc/status",
    responses((status = 200, body = KycStatusResponse)),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn kyc_status(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<KycStatusResponse> {
    let kyc = state.kyc_service()?.status(&user.user_id).await?;
    Ok((StatusCode::OK, Json(KycStatusResponse { success: true, kyc })))
}

#[utoipa::path(
    get,
    path = "/api/v1/kyc/details/{id}",
    params(("id" = Uuid, Path, description = "KYC submission id")),
    responses((status = 200, body = KycDetailsResponse), (status = 403), (status = 404)),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn kyc_details(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<KycDetailsResponse> {
    let submission = state.kyc_service()?.details(&id, &user).await?;
    Ok((
        StatusCode::OK,
        Json(KycDetailsResponse {
            success: true,
            submission,
        }),
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/kyc/update/{id}",
    params(("id" = Uuid, Path, description = "KYC submission id")),
    request_body = KycPayload,
    responses(
        (status = 200, body = KycUpdateResponse),
        (status = 400),
        (status = 403),
        (status = 404),
        (status = 409, description = "Submission already approved")
    ),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn update_kyc(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<KycPayload>,
) -> ApiResult<KycUpdateResponse> {
    let submission = state.kyc_service()?.update(&id, &user.user_id, &patch).await?;
    Ok((
        StatusCode::OK,
        Json(KycUpdateResponse {
            success: true,
            message: "KYC submission updated".to_string(),
            submission: submission.redacted(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/kyc/verify-face",
    request_body = VerifyFaceRequest,
    responses(
        (status = 200, body = VerifyFaceResponse),
        (status = 400, description = "Image could not be decoded or holds no face"),
        (status = 404, description = "No approved submission with a face image")
    ),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn verify_face(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<VerifyFaceRequest>,
) -> ApiResult<VerifyFaceResponse> {
    let result = state.face_service()?.verify(&user.user_id, &req.live_image).await?;
    Ok((StatusCode::OK, Json(VerifyFaceResponse { success: true, result })))
}

#[utoipa::path(
    post,
    path = "/api/v1/kyc/validate-image",
    request_body = ValidateImageRequest,
    responses((status = 200, body = ValidateImageResponse)),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn validate_image(
    Extension(state): Extension<AppState>,
    CurrentUser(_user): CurrentUser,
    Json(req): Json<ValidateImageRequest>,
) -> ApiResult<ValidateImageResponse> {
    let quality = state.face_service()?.quality_check(&req.image_data).await?;
    Ok((StatusCode::OK, Json(ValidateImageResponse { success: true, quality })))
}

#[utoipa::path(
    post,
    path = "/api/v1/kyc/validate-data",
    request_body = ValidateDataRequest,
    responses((status = 200, body = ValidateDataResponse)),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn validate_data(
    CurrentUser(_user): CurrentUser,
    Json(req): Json<ValidateDataRequest>,
) -> ApiResult<ValidateDataResponse> {
    let validation = Validator::validate_kyc_data(&req.data, req.partial);
    Ok((
        StatusCode::OK,
        Json(ValidateDataResponse {
            success: true,
            validation,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/kyc/verification-history",
    responses((status = 200, body = VerificationHistoryResponse)),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn verification_history(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<VerificationHistoryResponse> {
    let verifications = state.face_service()?.history(&user.user_id).await?;
    Ok((
        StatusCode::OK,
        Json(VerificationHistoryResponse {
            success: true,
            count: verifications.len(),
            verifications,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/kyc/blockchain-history",
    responses((status = 200, body = BlockchainHistoryResponse)),
    security(("bearerAuth" = [])),
    tag = "KYC"
)]
pub async fn blockchain_history(
    Extension(state): Extension<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<BlockchainHistoryResponse> {
    let transactions = state.blockchain_service()?.history(&user.user_id).await?;
    Ok((
        StatusCode::OK,
        Json(BlockchainHistoryResponse {
            success: true,
            count: transactions.len(),
            transactions,
        }),
    ))
}
