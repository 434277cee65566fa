#![allow(dead_code)]

use kyc_backend::api::{build_router, AppState};
use kyc_backend::config::Settings;
use kyc_backend::database::sqlite::SqliteDatabase;
use kyc_backend::models::kyc::{Address, KycPayload};
use kyc_backend::models::user::NewUser;
use kyc_backend::services::test_support::{FakeChain, FakeFaceModel};
use kyc_backend::utils::middleware::RateLimiter;
use std::sync::Arc;

pub use kyc_backend::services::test_support::noise_png_base64;

pub fn test_settings() -> Settings {
    Settings {
        jwt_secret: "integration-secret".to_string(),
        confirmation_timeout_secs: 1,
        confirmation_poll_ms: 10,
        ..Settings::default()
    }
}

pub struct TestApp {
    pub state: AppState,
    pub db: Arc<SqliteDatabase>,
    pub chain: Arc<FakeChain>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let chain = Arc::new(FakeChain::default());
        let state = AppState::new(
            Some(db.clone()),
            chain.clone(),
            Arc::new(FakeFaceModel::scoring(0.82)),
            test_settings(),
        );
        Self { state, db, chain }
    }

    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone(), Arc::new(RateLimiter::per_minute(1_000)))
    }
}

pub fn new_user(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        password: "Str0ng!Pass".to_string(),
        full_name: "Jane Doe".to_string(),
        phone_number: "+254712345678".to_string(),
        date_of_birth: Some("1990-05-17".to_string()),
        nationality: Some("Kenyan".to_string()),
    }
}

pub fn kyc_payload(email: &str) -> KycPayload {
    KycPayload {
        full_name: Some("Jane Doe".to_string()),
        date_of_birth: Some("1990-05-17".to_string()),
        gender: Some("female".to_string()),
        nationality: Some("Kenyan".to_string()),
        address: Some(Address::Line("12 Moi Avenue, Nairobi".to_string())),
        phone_number: Some("+254712345678".to_string()),
        email: Some(email.to_string()),
        document_type: Some("passport".to_string()),
        document_number: Some("A1234567".to_string()),
        document_image: Some(noise_png_base64(64, 64)),
        face_image: Some(noise_png_base64(200, 200)),
        ..Default::default()
    }
}
