use crate::blockchain::rpc::EthRpcClient;
use crate::blockchain::{ChainClient, NetworkStatus, OnChainIdentity, OnChainVerification, NODE_UNREACHABLE};
use crate::config::Settings;
use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::services::auth::AuthService;
use crate::services::blockchain_service::BlockchainService;
use crate::services::face_model::{FaceModel, RemoteFaceModel};
use crate::services::face_service::FaceService;
use crate::services::jwt::JwtManager;
use crate::services::kyc_service::KycService;
use crate::services::user_service::UserService;
use crate::utils::middleware::{rate_limiter_middleware, request_id_middleware, RateLimiter};
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

pub mod admin;
pub mod routes;
pub mod types;

use types::{ComponentHealth, HealthResponse};

const TOKEN_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::register,
        routes::login,
        routes::logout,
        routes::get_user,
        routes::update_user,
        routes::auth_health,
        routes::submit_kyc,
        routes::kyc_status,
        routes::kyc_details,
        routes::update_kyc,
        routes::verify_face,
        routes::validate_image,
        routes::validate_data,
        routes::verification_history,
        routes::blockchain_history,
        admin::dashboard,
        admin::analytics,
        admin::pending_submissions,
        admin::list_submissions,
        admin::decide_submission,
        admin::bulk_action,
        admin::kyc_blockchain_record,
        admin::revoke_verification,
        admin::list_users,
        admin::user_kyc,
        admin::deactivate_user,
        admin::activate_user,
        admin::anchor_identity,
        admin::user_identity,
        admin::blockchain_status,
        admin::blockchain_transactions,
        admin::estimate_cost,
        admin::system_health,
        health_check,
    ),
    components(
        schemas(
            types::LoginRequest,
            types::AuthResponse,
            types::UserEnvelope,
            types::MessageResponse,
            types::SubmitKycResponse,
            types::KycStatusResponse,
            types::KycDetailsResponse,
            types::KycUpdateResponse,
            types::VerifyFaceRequest,
            types::VerifyFaceResponse,
            types::ValidateImageRequest,
            types::ValidateImageResponse,
            types::ValidateDataRequest,
            types::ValidateDataResponse,
            types::VerificationHistoryResponse,
            types::BlockchainHistoryResponse,
            types::Pagination,
            types::DashboardResponse,
            types::AnalyticsResponse,
            types::SubmissionListResponse,
            types::PagedSubmissionsResponse,
            types::DecideRequest,
            types::DecideResponse,
            types::BulkActionRequest,
            types::BulkActionResponse,
            types::KycChainResponse,
            types::RevokeRequest,
            types::ChainTransactionResponse,
            types::UserListResponse,
            types::UserKycResponse,
            types::NetworkStatusResponse,
            types::IdentityResponse,
            types::TransactionListResponse,
            types::CostEstimateResponse,
            types::ComponentHealth,
            types::HealthResponse,
            crate::models::user::NewUser,
            crate::models::user::UserResponse,
            crate::models::user::UserRole,
            crate::models::user::UserProfileUpdate,
            crate::models::kyc::KycStatus,
            crate::models::kyc::KycPayload,
            crate::models::kyc::KycSubmission,
            crate::models::kyc::PersonalInfo,
            crate::models::kyc::IdentityDocuments,
            crate::models::kyc::KycStatusView,
            crate::models::kyc::DecisionOutcome,
            crate::models::kyc::BulkFailure,
            crate::models::kyc::BulkActionOutcome,
            crate::models::kyc::KycStatistics,
            crate::models::face_verification::FaceVerificationOutcome,
            crate::models::face_verification::FaceVerificationRecord,
            crate::models::face_verification::QualityReport,
            crate::models::face_verification::Dimensions,
            crate::models::blockchain_tx::BlockchainTransaction,
            crate::models::blockchain_tx::BlockchainTransactionView,
            crate::models::blockchain_tx::ChainOperation,
            crate::models::blockchain_tx::AnchorReceipt,
            crate::models::blockchain_tx::KycChainRecord,
            crate::models::blockchain_tx::CostEstimate,
            crate::utils::validation::ValidationReport,
            OnChainVerification,
            OnChainIdentity,
            NetworkStatus,
        )
    ),
    tags(
        (name = "Auth", description = "Registration, login and profile endpoints"),
        (name = "KYC", description = "Submission, status and face verification endpoints. Use the Authorize button and paste your token."),
        (name = "Admin", description = "Review, anchoring and user management endpoints. Requires the admin role."),
        (name = "System", description = "Health probes")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Collaborators shared by every request. The database is optional: when it
/// failed to open, the server still starts and database-backed routes
/// answer 503.
#[derive(Clone)]
pub struct AppState {
    pub db: Option<Arc<SqliteDatabase>>,
    pub chain: Arc<dyn ChainClient>,
    pub face_model: Arc<dyn FaceModel>,
    pub jwt: Arc<JwtManager>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        db: Option<Arc<SqliteDatabase>>,
        chain: Arc<dyn ChainClient>,
        face_model: Arc<dyn FaceModel>,
        settings: Settings,
    ) -> Self {
        let jwt = Arc::new(JwtManager::new(settings.jwt_secret.clone(), settings.jwt_expiry_hours));
        Self {
            db,
            chain,
            face_model,
            jwt,
            settings: Arc::new(settings),
        }
    }

    pub fn db(&self) -> Result<Arc<SqliteDatabase>> {
        self.db
            .clone()
            .ok_or_else(|| AppError::ServiceUnavailable("Database is unavailable".to_string()))
    }

    pub fn auth_service(&self) -> Result<AuthService> {
        Ok(AuthService::new(self.db()?, self.jwt.clone()))
    }

    pub fn user_service(&self) -> Result<UserService> {
        Ok(UserService::new(self.db()?))
    }

    pub fn face_service(&self) -> Result<FaceService> {
        Ok(FaceService::new(
            self.db()?,
            self.face_model.clone(),
            self.settings.face_verification_threshold,
        ))
    }

    pub fn blockchain_service(&self) -> Result<BlockchainService> {
        Ok(BlockchainService::new(
            self.chain.clone(),
            self.db()?,
            self.settings.confirmation_timeout(),
            self.settings.confirmation_poll_interval(),
        ))
    }

    pub fn kyc_service(&self) -> Result<KycService> {
        Ok(KycService::new(
            self.db()?,
            Arc::new(self.face_service()?),
            Arc::new(self.blockchain_service()?),
        ))
    }
}

/// Probes each subsystem on its own; one being down never hides the others.
pub async fn health_report(state: &AppState) -> HealthResponse {
    let database = match &state.db {
        Some(db) => match db.ping().await {
            Ok(()) => ComponentHealth::up(),
            Err(e) => {
                warn!(action = "health_database_down", error = %e);
                ComponentHealth::down("Database unreachable")
            }
        },
        None => ComponentHealth::down("Database not initialised"),
    };

    let network = state.chain.network_status().await;
    let blockchain = if network.connected {
        ComponentHealth::up()
    } else {
        warn!(action = "health_blockchain_down", error = ?network.error);
        ComponentHealth::down(NODE_UNREACHABLE)
    };

    let face_model = match state.face_model.health().await {
        Ok(()) => ComponentHealth::up(),
        Err(e) => {
            warn!(action = "health_face_model_down", error = %e);
            ComponentHealth::down("Face model unreachable")
        }
    };

    let all_up = database.healthy && blockchain.healthy && face_model.healthy;
    HealthResponse {
        status: if all_up { "healthy" } else { "degraded" }.to_string(),
        database,
        blockchain,
        face_model,
        timestamp: Utc::now(),
    }
}

/// Answers 503 only when the database is down; chain and model outages
/// degrade single features.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, body = HealthResponse), (status = 503, body = HealthResponse)),
    tag = "System"
)]
pub async fn health_check(Extension(state): Extension<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = health_report(&state).await;
    let status = if report.database.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub fn build_router(state: AppState, limiter: Arc<RateLimiter>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1/auth", routes::auth_router())
        .nest("/api/v1/kyc", routes::kyc_router())
        .nest("/api/v1/admin", admin::admin_router())
        .route("/health", get(health_check))
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn(rate_limiter_middleware))
        .layer(Extension(limiter))
        .layer(Extension(state))
        .layer(cors)
        .layer(axum::middleware::from_fn(request_id_middleware))
}

/// Opens the collaborators and serves the API until the process stops.
pub async fn start_http_server(settings: Settings) -> Result<()> {
    let db = match SqliteDatabase::new(&settings.database_path).await {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            error!(action = "database_init_failed", path = %settings.database_path, error = %e);
            None
        }
    };
    if let Some(db) = &db {
        spawn_token_cleanup(db.clone());
    }

    let chain: Arc<dyn ChainClient> = Arc::new(EthRpcClient::from_settings(&settings)?);
    let face_model: Arc<dyn FaceModel> = Arc::new(RemoteFaceModel::new(settings.face_model_url.clone())?);
    let limiter = Arc::new(RateLimiter::per_minute(settings.rate_limit_per_minute));
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));

    let state = AppState::new(db, chain, face_model, settings);
    let app = build_router(state, limiter);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::ConfigError(format!("Failed to bind {}: {}", addr, e)))?;

    info!(action = "server_started", addr = %addr);
    println!("🚀 HTTP API running at http://{}/health", addr);
    println!("📚 API Documentation available at: http://{}/api/docs", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| AppError::InternalError(format!("Server error: {}", e)))
}

fn spawn_token_cleanup(db: Arc<SqliteDatabase>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TOKEN_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match db.cleanup_expired_tokens().await {
                Ok(removed) if removed > 0 => info!(action = "tokens_cleaned", removed = removed),
                Ok(_) => {}
                Err(e) => warn!(action = "token_cleanup_failed", error = %e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_has_bearer_scheme_and_kyc_paths() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["components"]["securitySchemes"]["bearerAuth"].is_object());
        assert!(json["paths"]["/api/v1/kyc/submit"]["post"].is_object());
        assert!(json["paths"]["/api/v1/admin/kyc/{id}/decide"]["post"].is_object());
    }
}
