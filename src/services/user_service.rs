use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::user::{User, UserProfileUpdate, UserRole};
use crate::services::jwt::AuthenticatedUser;
use crate::utils::validation::Validator;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct UserService {
    pub db: Arc<SqliteDatabase>,
}

impl UserService {
    pub fn new(db: Arc<SqliteDatabase>) -> Self {
        Self { db }
    }

    pub async fn get_user(&self, user_id: &Uuid) -> Result<User> {
        self.db
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Users may read their own profile; admins may read anyone's.
    pub async fn get_profile(&self, user_id: &Uuid, viewer: &AuthenticatedUser) -> Result<User> {
        if viewer.user_id != *user_id && !viewer.is_admin() {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        self.get_user(user_id).await
    }

    pub async fn update_profile(
        &self,
        user_id: &Uuid,
        viewer: &AuthenticatedUser,
        update: &UserProfileUpdate,
    ) -> Result<User> {
        let mut user = self.get_profile(user_id, viewer).await?;
        if update.is_empty() {
            return Err(AppError::validation("No valid fields to update"));
        }

        let mut report = Validator::validate_user_data(
            None,
            update.full_name.as_deref(),
            update.phone_number.as_deref(),
            true,
        );
        if let Some(dob) = &update.date_of_birth {
            if !Validator::is_valid_date_of_birth(dob) {
                report.errors.push("Invalid date of birth".to_string());
                report.valid = false;
            }
        }
        report.into_result()?;

        if let Some(name) = &update.full_name {
            user.full_name = name.trim().to_string();
        }
        if let Some(phone) = &update.phone_number {
            user.phone_number = Some(phone.trim().to_string());
        }
        if let Some(dob) = &update.date_of_birth {
            user.date_of_birth = Some(dob.trim().to_string());
        }
        if let Some(nationality) = &update.nationality {
            user.nationality = Some(nationality.trim().to_string());
        }

        self.db.update_user_profile(&user).await?;
        info!(action = "user_profile_updated", user_id = %user.id);
        self.get_user(user_id).await
    }

    pub async fn list_users(&self, search: Option<&str>, page: i64, limit: i64) -> Result<(Vec<User>, i64)> {
        let limit = limit.clamp(1, 100);
        let offset = (page.max(1) - 1) * limit;
        let search = search.filter(|s| !s.trim().is_empty());

        let users = self.db.list_users(search, limit, offset).await?;
        let total = self.db.count_users(search).await?;
        Ok((users, total))
    }

    /// Deactivation also ends every open session of the user.
    pub async fn set_active(&self, user_id: &Uuid, is_active: bool, admin_id: &Uuid) -> Result<User> {
        if !self.db.set_user_active(user_id, is_active).await? {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        if !is_active {
            let revoked = self.db.revoke_all_user_tokens(user_id).await?;
            info!(action = "user_deactivated", user_id = %user_id, admin_id = %admin_id, revoked_sessions = revoked);
        } else {
            info!(action = "user_activated", user_id = %user_id, admin_id = %admin_id);
        }
        self.get_user(user_id).await
    }

    pub async fn promote_to_admin(&self, email: &str) -> Result<User> {
        let user = self
            .db
            .get_user_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No user registered with {}", email)))?;

        self.db.set_user_role(&user.id, UserRole::Admin).await?;
        info!(action = "user_promoted", user_id = %user.id);
        self.get_user(&user.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::kyc::KycStatus;
    use chrono::Utc;

    async fn seeded() -> (UserService, User) {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "grace@example.com".to_string(),
            full_name: "Grace Hopper".to_string(),
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
        (UserService::new(db), user)
    }

    fn viewer(user_id: Uuid, role: UserRole) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id,
            email: "viewer@example.com".to_string(),
            role,
            token_id: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn other_users_cannot_read_profile() {
        let (service, user) = seeded().await;
        let err = service
            .get_profile(&user.id, &viewer(Uuid::new_v4(), UserRole::User))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(service.get_profile(&user.id, &viewer(Uuid::new_v4(), UserRole::Admin)).await.is_ok());
    }

    #[tokio::test]
    async fn profile_update_applies_valid_fields() {
        let (service, user) = seeded().await;
        let update = UserProfileUpdate {
            nationality: Some("American".to_string()),
            ..Default::default()
        };
        let updated = service
            .update_profile(&user.id, &viewer(user.id, UserRole::User), &update)
            .await
            .unwrap();
        assert_eq!(updated.nationality.as_deref(), Some("American"));

        let bad = UserProfileUpdate {
            phone_number: Some("12".to_string()),
            ..Default::default()
        };
        assert!(service.update_profile(&user.id, &viewer(user.id, UserRole::User), &bad).await.is_err());
    }

    #[tokio::test]
    async fn promote_and_deactivate() {
        let (service, user) = seeded().await;
        assert_eq!(service.promote_to_admin("grace@example.com").await.unwrap().role, UserRole::Admin);
        assert!(!service.set_active(&user.id, false, &Uuid::new_v4()).await.unwrap().is_active);
        assert!(matches!(
            service.set_active(&Uuid::new_v4(), true, &user.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
