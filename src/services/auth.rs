use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::kyc::KycStatus;
use crate::models::user::{NewUser, User, UserRole};
use crate::services::jwt::{AuthenticatedUser, JwtManager};
use crate::utils::crypto::{sha256_hex, PasswordManager};
use crate::utils::validation::Validator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A logged-in user and the bearer token that represents the session.
#[derive(Debug)]
pub struct AuthSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

pub struct AuthService {
    jwt_manager: Arc<JwtManager>,
    database: Arc<SqliteDatabase>,
}

impl AuthService {
    pub fn new(database: Arc<SqliteDatabase>, jwt_manager: Arc<JwtManager>) -> Self {
        Self {
            jwt_manager,
            database,
        }
    }

    pub async fn register(&self, request: &NewUser) -> Result<AuthSession> {
        let mut report = Validator::validate_user_data(
            Some(&request.email),
            Some(&request.full_name),
            Some(&request.phone_number),
            false,
        );
        report.errors.extend(Validator::validate_password(&request.password).errors);
        if let Some(dob) = &request.date_of_birth {
            if !Validator::is_valid_date_of_birth(dob) {
                report.errors.push("Invalid date of birth".to_string());
            }
        }
        report.valid = report.errors.is_empty();
        report.into_result()?;

        let email = request.email.trim().to_lowercase();
        if self.database.get_user_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("User with this email already exists".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            full_name: request.full_name.trim().to_string(),
            phone_number: Some(request.phone_number.trim().to_string()),
            password_hash: PasswordManager::hash_password(&request.password)?,
            role: UserRole::User,
            kyc_status: KycStatus::NotSubmitted,
            is_active: true,
            date_of_birth: request.date_of_birth.clone(),
            nationality: request.nationality.clone(),
            created_at: now,
            updated_at: now,
        };
        self.database.create_user(&user).await?;

        info!(action = "user_registered", user_id = %user.id);
        self.open_session(user).await
    }

    pub async fn authenticate_user(&self, email: &str, password: &str) -> Result<User> {
        let user = self
            .database
            .get_user_by_email(email)
            .await?
            .ok_or_else(|| AppError::AuthenticationError("Invalid email or password".to_string()))?;

        if !PasswordManager::verify_password(password, &user.password_hash)? {
            warn!(action = "login_failed", user_id = %user.id);
            return Err(AppError::AuthenticationError("Invalid email or password".to_string()));
        }
        if !user.is_active {
            return Err(AppError::Forbidden("Account is deactivated".to_string()));
        }
        Ok(user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let user = self.authenticate_user(email, password).await?;
        info!(action = "user_logged_in", user_id = %user.id);
        self.open_session(user).await
    }

    async fn open_session(&self, user: User) -> Result<AuthSession> {
        let issued = self.jwt_manager.generate_token(&user.id, &user.email, user.role)?;
        let token_hash = self.hash_token(&issued.token);

        self.database
            .store_user_token(&user.id, &issued.token_id, &token_hash, issued.expires_at)
            .await?;

        if let Err(e) = self.database.cleanup_expired_tokens().await {
            warn!(action = "token_cleanup_failed", error = %e);
        }

        Ok(AuthSession {
            token: issued.token,
            expires_at: issued.expires_at,
            user,
        })
    }

    /// Verifies signature, expiry and the session row, then reloads the user
    /// so that role changes and deactivation take effect immediately.
    pub async fn validate_token(&self, token: &str) -> Result<AuthenticatedUser> {
        let token_data = self.jwt_manager.validate_token(token)?;

        if !self.database.is_token_valid(&token_data.claims.jti).await? {
            return Err(AppError::AuthenticationError("Token not found or inactive".to_string()));
        }

        let mut authenticated = AuthenticatedUser::try_from(token_data.claims)?;
        let user = self
            .database
            .get_user_by_id(&authenticated.user_id)
            .await?
            .ok_or_else(|| AppError::AuthenticationError("User no longer exists".to_string()))?;
        if !user.is_active {
            return Err(AppError::Forbidden("Account is deactivated".to_string()));
        }

        authenticated.role = user.role;
        Ok(authenticated)
    }

    pub async fn logout(&self, token: &str) -> Result<()> {
        let token_data = self.jwt_manager.validate_token(token)?;
        self.database.revoke_token(&token_data.claims.jti).await?;
        Ok(())
    }

    fn hash_token(&self, token: &str) -> String {
        sha256_hex(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> AuthService {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        AuthService::new(db, Arc::new(JwtManager::new("test-secret", 1)))
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password: "Str0ng!Pass".to_string(),
            full_name: "Ada Lovelace".to_string(),
            phone_number: "+1 555 123 4567".to_string(),
            date_of_birth: Some("1990-01-01".to_string()),
            nationality: Some("British".to_string()),
        }
    }

    #[tokio::test]
    async fn register_then_login_and_validate() {
        let auth = service().await;
        let session = auth.register(&new_user("A@B.com")).await.unwrap();
        assert_eq!(session.user.email, "a@b.com");
        assert_eq!(session.user.kyc_status, KycStatus::NotSubmitted);

        let login = auth.login("a@b.com", "Str0ng!Pass").await.unwrap();
        let user = auth.validate_token(&login.token).await.unwrap();
        assert_eq!(user.user_id, session.user.id);
        assert!(!user.is_admin());
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let auth = service().await;
        auth.register(&new_user("dup@example.com")).await.unwrap();
        let err = auth.register(&new_user("dup@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn weak_password_lists_every_problem() {
        let auth = service().await;
        let mut request = new_user("weak@example.com");
        request.password = "short".to_string();
        match auth.register(&request).await.unwrap_err() {
            AppError::ValidationError(errors) => assert!(errors.len() >= 3),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let auth = service().await;
        auth.register(&new_user("pw@example.com")).await.unwrap();
        let err = auth.login("pw@example.com", "Wr0ng!Pass").await.unwrap_err();
        assert!(matches!(err, AppError::AuthenticationError(_)));
    }

    #[tokio::test]
    async fn logged_out_token_is_invalid() {
        let auth = service().await;
        let session = auth.register(&new_user("out@example.com")).await.unwrap();
        auth.logout(&session.token).await.unwrap();
        let err = auth.validate_token(&session.token).await.unwrap_err();
        assert!(matches!(err, AppError::AuthenticationError(_)));
    }
}
