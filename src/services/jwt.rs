use crate::errors::{AppError, Result};
use crate::models::user::UserRole;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// A freshly minted token together with what the session store needs.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

pub struct JwtManager {
    secret: String,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: impl Into<String>, expiry_hours: i64) -> Self {
        Self {
            secret: secret.into(),
            expiry_hours,
        }
    }

    pub fn expiry_hours(&self) -> i64 {
        self.expiry_hours
    }

    pub fn generate_token(&self, user_id: &Uuid, email: &str, role: UserRole) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + Duration::hours(self.expiry_hours);
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: role.as_str().to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: jti.clone(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_ref()),
        )
        .map_err(|e| AppError::InternalError(format!("Failed to generate token: {}", e)))?;

        Ok(IssuedToken {
            token,
            token_id: jti,
            expires_at,
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_ref()),
            &Validation::default(),
        )
        .map_err(|e| AppError::AuthenticationError(format!("Invalid token: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub token_id: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

impl TryFrom<Claims> for AuthenticatedUser {
    type Error = AppError;

    fn try_from(claims: Claims) -> Result<Self> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|e| AppError::AuthenticationError(format!("Invalid user ID in token: {}", e)))?;
        let role = claims
            .role
            .parse()
            .map_err(|_| AppError::AuthenticationError("Invalid role in token".to_string()))?;

        Ok(Self {
            user_id,
            email: claims.email,
            role,
            token_id: claims.jti,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_validates_and_carries_role() {
        let manager = JwtManager::new("secret", 1);
        let user_id = Uuid::new_v4();
        let issued = manager.generate_token(&user_id, "a@b.com", UserRole::Admin).unwrap();

        let data = manager.validate_token(&issued.token).unwrap();
        assert_eq!(data.claims.jti, issued.token_id);

        let user = AuthenticatedUser::try_from(data.claims).unwrap();
        assert_eq!(user.user_id, user_id);
        assert!(user.is_admin());
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let issued = JwtManager::new("one", 1)
            .generate_token(&Uuid::new_v4(), "a@b.com", UserRole::User)
            .unwrap();
        let err = JwtManager::new("two", 1).validate_token(&issued.token).unwrap_err();
        assert!(matches!(err, AppError::AuthenticationError(_)));
    }
}
