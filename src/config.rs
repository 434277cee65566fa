use crate::errors::{AppError, Result};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-only-jwt-secret-change-me";

/// Runtime settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub database_path: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub ethereum_node_url: String,
    pub contract_address: String,
    pub chain_account_address: Option<String>,
    pub gas_limit: u64,
    pub confirmation_timeout_secs: u64,
    pub confirmation_poll_ms: u64,
    pub face_model_url: String,
    pub face_verification_threshold: f64,
    pub rate_limit_per_minute: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: "kyc_system.db".to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_expiry_hours: 24,
            ethereum_node_url: "http://127.0.0.1:7545".to_string(),
            contract_address: "0x0000000000000000000000000000000000000000".to_string(),
            chain_account_address: None,
            gas_limit: 3_000_000,
            confirmation_timeout_secs: 120,
            confirmation_poll_ms: 2_000,
            face_model_url: "http://127.0.0.1:5001".to_string(),
            face_verification_threshold: 0.6,
            rate_limit_per_minute: 60,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let jwt_secret = match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => {
                warn!(action = "config_default_jwt_secret", "JWT_SECRET not set, using development secret");
                defaults.jwt_secret.clone()
            }
        };

        let settings = Self {
            port: env_or("PORT", defaults.port)?,
            database_path: std::env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            jwt_secret,
            jwt_expiry_hours: env_or("JWT_EXPIRY_HOURS", defaults.jwt_expiry_hours)?,
            ethereum_node_url: std::env::var("ETHEREUM_NODE_URL").unwrap_or(defaults.ethereum_node_url),
            contract_address: std::env::var("CONTRACT_ADDRESS").unwrap_or(defaults.contract_address),
            chain_account_address: std::env::var("CHAIN_ACCOUNT_ADDRESS").ok().filter(|s| !s.trim().is_empty()),
            gas_limit: env_or("GAS_LIMIT", defaults.gas_limit)?,
            confirmation_timeout_secs: env_or("CONFIRMATION_TIMEOUT_SECS", defaults.confirmation_timeout_secs)?,
            confirmation_poll_ms: env_or("CONFIRMATION_POLL_MS", defaults.confirmation_poll_ms)?,
            face_model_url: std::env::var("FACE_MODEL_URL").unwrap_or(defaults.face_model_url),
            face_verification_threshold: env_or("FACE_VERIFICATION_THRESHOLD", defaults.face_verification_threshold)?,
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute)?,
        };

        if !(0.0..=1.0).contains(&settings.face_verification_threshold) {
            return Err(AppError::ConfigError(
                "FACE_VERIFICATION_THRESHOLD must be between 0 and 1".to_string(),
            ));
        }

        Ok(settings)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn confirmation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation_poll_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::ConfigError(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.confirmation_timeout_secs, 120);
        assert_eq!(s.gas_limit, 3_000_000);
        assert!((s.face_verification_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(s.rate_limit_per_minute, 60);
    }

    #[test]
    fn env_or_rejects_garbage() {
        std::env::set_var("KYC_TEST_BAD_NUMBER", "twelve");
        let parsed: Result<u64> = env_or("KYC_TEST_BAD_NUMBER", 5);
        assert!(matches!(parsed, Err(AppError::ConfigError(_))));
        std::env::remove_var("KYC_TEST_BAD_NUMBER");
    }

    #[test]
    fn env_or_falls_back_when_unset() {
        let parsed: u64 = env_or("KYC_TEST_SURELY_UNSET_VAR", 42).unwrap();
        assert_eq!(parsed, 42);
    }
}
