use crate::errors::{AppError, Result};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use argon2::password_hash::SaltString;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub struct PasswordManager;

impl PasswordManager {
    pub fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::InternalError(format!("Password hashing failed: {}", e)))?;

        Ok(password_hash.to_string())
    }

    pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::InternalError(format!("Invalid password hash: {}", e)))?;

        let argon2 = Argon2::default();

        match argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Salted one-way hash for identifiers such as document numbers.
/// Output format is `<sha256(value || salt)>:<salt>`.
pub fn hash_sensitive_data(value: &str) -> String {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let salt = hex::encode(salt);
    format!("{}:{}", sha256_hex(&format!("{}{}", value, salt)), salt)
}

pub fn verify_sensitive_data(value: &str, stored: &str) -> bool {
    match stored.split_once(':') {
        Some((digest, salt)) => sha256_hex(&format!("{}{}", value, salt)) == digest,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = PasswordManager::hash_password("S3cure!pass").unwrap();
        assert!(PasswordManager::verify_password("S3cure!pass", &hash).unwrap());
        assert!(!PasswordManager::verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn sensitive_hash_is_salted() {
        let a = hash_sensitive_data("AB123456");
        let b = hash_sensitive_data("AB123456");
        assert_ne!(a, b);
        assert!(verify_sensitive_data("AB123456", &a));
        assert!(!verify_sensitive_data("AB123457", &a));
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
