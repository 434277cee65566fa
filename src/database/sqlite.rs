use crate::errors::{AppError, Result};
use crate::models::blockchain_tx::BlockchainTransaction;
use crate::models::face_verification::FaceVerificationRecord;
use crate::models::kyc::{KycListFilter, KycStatistics, KycStatus, KycSubmission};
use crate::models::user::{User, UserRole};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::DatabaseError(format!("Invalid {} timestamp: {}", column, e)))
}

fn parse_opt_ts(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(&s, column)).transpose()
}

fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| AppError::DatabaseError(format!("Invalid {}: {}", column, e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: parse_uuid(&row.get::<String, _>("id"), "user id")?,
        email: row.get("email"),
        full_name: row.get("full_name"),
        phone_number: row.get("phone_number"),
        password_hash: row.get("password_hash"),
        role: row.get::<String, _>("role").parse()?,
        kyc_status: row.get::<String, _>("kyc_status").parse()?,
        is_active: row.get("is_active"),
        date_of_birth: row.get("date_of_birth"),
        nationality: row.get("nationality"),
        created_at: parse_ts(&row.get::<String, _>("created_at"), "created_at")?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"), "updated_at")?,
    })
}

fn submission_from_row(row: &SqliteRow) -> Result<KycSubmission> {
    Ok(KycSubmission {
        id: parse_uuid(&row.get::<String, _>("id"), "kyc id")?,
        user_id: parse_uuid(&row.get::<String, _>("user_id"), "user id")?,
        personal_info: serde_json::from_str(&row.get::<String, _>("personal_info"))?,
        identity_documents: serde_json::from_str(&row.get::<String, _>("identity_documents"))?,
        face_image: row.get("face_image"),
        additional_documents: serde_json::from_str(&row.get::<String, _>("additional_documents"))?,
        status: row.get::<String, _>("status").parse()?,
        admin_notes: row.get("admin_notes"),
        verification_attempts: row.get("verification_attempts"),
        submitted_at: parse_ts(&row.get::<String, _>("submitted_at"), "submitted_at")?,
        status_updated_at: parse_opt_ts(row.get("status_updated_at"), "status_updated_at")?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"), "updated_at")?,
    })
}

fn face_record_from_row(row: &SqliteRow) -> Result<FaceVerificationRecord> {
    Ok(FaceVerificationRecord {
        id: parse_uuid(&row.get::<String, _>("id"), "verification id")?,
        user_id: parse_uuid(&row.get::<String, _>("user_id"), "user id")?,
        kyc_submission_id: parse_uuid(&row.get::<String, _>("kyc_submission_id"), "kyc id")?,
        similarity_score: row.get("similarity_score"),
        is_match: row.get("is_match"),
        threshold_used: row.get("threshold_used"),
        verified_at: parse_ts(&row.get::<String, _>("verified_at"), "verified_at")?,
    })
}

fn chain_tx_from_row(row: &SqliteRow) -> Result<BlockchainTransaction> {
    Ok(BlockchainTransaction {
        id: parse_uuid(&row.get::<String, _>("id"), "transaction id")?,
        transaction_hash: row.get("transaction_hash"),
        block_number: row.get::<i64, _>("block_number") as u64,
        gas_used: row.get::<i64, _>("gas_used") as u64,
        transaction_fee: row.get("transaction_fee"),
        user_id: parse_uuid(&row.get::<String, _>("user_id"), "user id")?,
        kyc_id: row
            .get::<Option<String>, _>("kyc_id")
            .map(|s| parse_uuid(&s, "kyc id"))
            .transpose()?,
        admin_id: row.get("admin_id"),
        operation_type: row.get::<String, _>("operation_type").parse()?,
        recorded_at: parse_ts(&row.get::<String, _>("recorded_at"), "recorded_at")?,
    })
}

impl SqliteDatabase {
    pub async fn new(database_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::DatabaseError(format!("Failed to create database directory: {}", e)))?;
            }
        }

        if !Path::new(database_path).exists() {
            std::fs::File::create(database_path)
                .map_err(|e| AppError::DatabaseError(format!("Failed to create database file: {}", e)))?;
            info!(action = "database_file_created", path = %database_path);
        }
        let database_url = format!("sqlite:{}", database_path);

        let pool = SqlitePool::connect(&database_url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.create_tables().await?;

        info!(action = "database_connected", path = %database_path);
        Ok(db)
    }

    /// Private in-memory database. Pinned to one connection so every query
    /// sees the same data.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        let query = r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                full_name TEXT NOT NULL,
                phone_number TEXT,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                kyc_status TEXT NOT NULL DEFAULT 'not_submitted',
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                date_of_birth TEXT,
                nationality TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_tokens (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                token_id TEXT UNIQUE NOT NULL,
                token_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                is_active BOOLEAN DEFAULT TRUE,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS kyc_submissions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                personal_info TEXT NOT NULL,
                identity_documents TEXT NOT NULL,
                face_image TEXT,
                additional_documents TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'pending', -- 'pending', 'approved', 'rejected'
                admin_notes TEXT,
                verification_attempts INTEGER NOT NULL DEFAULT 0,
                submitted_at TEXT NOT NULL,
                status_updated_at TEXT,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            );

            -- at most one pending or approved submission per user
            CREATE UNIQUE INDEX IF NOT EXISTS idx_kyc_one_active_per_user
                ON kyc_submissions (user_id) WHERE status IN ('pending', 'approved');
            CREATE INDEX IF NOT EXISTS idx_kyc_user_status ON kyc_submissions (user_id, status);
            CREATE INDEX IF NOT EXISTS idx_kyc_status_submitted ON kyc_submissions (status, submitted_at);

            CREATE TABLE IF NOT EXISTS face_verifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kyc_submission_id TEXT NOT NULL,
                similarity_score REAL NOT NULL,
                is_match BOOLEAN NOT NULL,
                threshold_used REAL NOT NULL,
                verified_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE,
                FOREIGN KEY (kyc_submission_id) REFERENCES kyc_submissions (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_face_user ON face_verifications (user_id, verified_at);

            CREATE TABLE IF NOT EXISTS blockchain_transactions (
                id TEXT PRIMARY KEY,
                transaction_hash TEXT UNIQUE NOT NULL,
                block_number INTEGER NOT NULL,
                gas_used INTEGER NOT NULL,
                transaction_fee TEXT NOT NULL,
                user_id TEXT NOT NULL,
                kyc_id TEXT,
                admin_id TEXT NOT NULL,
                operation_type TEXT NOT NULL, -- 'kyc_verification', 'identity_update', 'kyc_revocation'
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chain_user ON blockchain_transactions (user_id, recorded_at);
            CREATE INDEX IF NOT EXISTS idx_chain_kyc ON blockchain_transactions (kyc_id);
        "#;

        sqlx::query(query)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Database ping failed: {}", e)))?;
        Ok(())
    }

    // Users

    pub async fn create_user(&self, user: &User) -> Result<()> {
        let query = r#"
            INSERT INTO users (id, email, full_name, phone_number, password_hash, role, kyc_status, is_active, date_of_birth, nationality, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#;

        sqlx::query(query)
            .bind(user.id.to_string())
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.phone_number)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(user.kyc_status.as_str())
            .bind(user.is_active)
            .bind(&user.date_of_birth)
            .bind(&user.nationality)
            .bind(ts(&user.created_at))
            .bind(ts(&user.updated_at))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict("Email already registered".to_string())
                } else {
                    AppError::DatabaseError(format!("Failed to create user: {}", e))
                }
            })?;

        debug!(action = "user_saved", user_id = %user.id);
        Ok(())
    }

    pub async fn get_user_by_id(&self, user_id: &Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch user: {}", e)))?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch user by email: {}", e)))?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn update_user_profile(&self, user: &User) -> Result<()> {
        let query = r#"
            UPDATE users SET full_name = ?1, phone_number = ?2, date_of_birth = ?3, nationality = ?4, updated_at = ?5
            WHERE id = ?6
        "#;
        sqlx::query(query)
            .bind(&user.full_name)
            .bind(&user.phone_number)
            .bind(&user.date_of_birth)
            .bind(&user.nationality)
            .bind(ts(&Utc::now()))
            .bind(user.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to update user profile: {}", e)))?;
        Ok(())
    }

    pub async fn set_user_role(&self, user_id: &Uuid, role: UserRole) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET role = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(role.as_str())
            .bind(ts(&Utc::now()))
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to update user role: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_user_active(&self, user_id: &Uuid, is_active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(is_active)
            .bind(ts(&Utc::now()))
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to update user status: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    /// Case-insensitive search over email and full name.
    pub async fn list_users(&self, search: Option<&str>, limit: i64, offset: i64) -> Result<Vec<User>> {
        let pattern = search.map(|s| format!("%{}%", s.trim()));
        let query = r#"
            SELECT * FROM users
            WHERE (?1 IS NULL OR email LIKE ?1 OR full_name LIKE ?1)
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2 OFFSET ?3
        "#;
        let rows = sqlx::query(query)
            .bind(pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list users: {}", e)))?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn count_users(&self, search: Option<&str>) -> Result<i64> {
        let pattern = search.map(|s| format!("%{}%", s.trim()));
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM users WHERE (?1 IS NULL OR email LIKE ?1 OR full_name LIKE ?1)",
        )
        .bind(pattern)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to count users: {}", e)))?;
        Ok(row.get("count"))
    }

    // Sessions

    pub async fn store_user_token(&self, user_id: &Uuid, token_id: &str, token_hash: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let query = r#"
            INSERT INTO user_tokens (user_id, token_id, token_hash, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
        "#;

        sqlx::query(query)
            .bind(user_id.to_string())
            .bind(token_id)
            .bind(token_hash)
            .bind(ts(&Utc::now()))
            .bind(ts(&expires_at))
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to store token: {}", e)))?;
        Ok(())
    }

    pub async fn is_token_valid(&self, token_id: &str) -> Result<bool> {
        let query = r#"
            SELECT COUNT(*) as count FROM user_tokens
            WHERE token_id = ?1 AND is_active = TRUE AND expires_at > ?2
        "#;

        let row = sqlx::query(query)
            .bind(token_id)
            .bind(ts(&Utc::now()))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to validate token: {}", e)))?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    pub async fn revoke_token(&self, token_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE user_tokens SET is_active = FALSE WHERE token_id = ?1")
            .bind(token_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to revoke token: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::AuthenticationError("Token not found".to_string()));
        }
        Ok(())
    }

    pub async fn revoke_all_user_tokens(&self, user_id: &Uuid) -> Result<u64> {
        let result = sqlx::query("UPDATE user_tokens SET is_active = FALSE WHERE user_id = ?1 AND is_active = TRUE")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to revoke all user tokens: {}", e)))?;
        Ok(result.rows_affected())
    }

    pub async fn cleanup_expired_tokens(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_tokens WHERE expires_at < ?1")
            .bind(ts(&Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to cleanup expired tokens: {}", e)))?;
        Ok(result.rows_affected())
    }

    // KYC submissions

    /// Inserts a pending submission and marks the user pending in one
    /// transaction. A second active submission for the same user is a conflict.
    pub async fn create_kyc_submission(&self, kyc: &KycSubmission) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let query = r#"
            INSERT INTO kyc_submissions (id, user_id, personal_info, identity_documents, face_image, additional_documents, status, admin_notes, verification_attempts, submitted_at, status_updated_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#;
        sqlx::query(query)
            .bind(kyc.id.to_string())
            .bind(kyc.user_id.to_string())
            .bind(serde_json::to_string(&kyc.personal_info)?)
            .bind(serde_json::to_string(&kyc.identity_documents)?)
            .bind(&kyc.face_image)
            .bind(serde_json::to_string(&kyc.additional_documents)?)
            .bind(kyc.status.as_str())
            .bind(&kyc.admin_notes)
            .bind(kyc.verification_attempts)
            .bind(ts(&kyc.submitted_at))
            .bind(kyc.status_updated_at.as_ref().map(ts))
            .bind(ts(&kyc.updated_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict("User already has an active KYC submission".to_string())
                } else {
                    AppError::DatabaseError(format!("Failed to create KYC submission: {}", e))
                }
            })?;

        Self::set_user_kyc_status(&mut tx, &kyc.user_id, kyc.status).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_user_kyc_status(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_id: &Uuid,
        status: KycStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET kyc_status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(ts(&Utc::now()))
            .bind(user_id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to update user KYC status: {}", e)))?;
        Ok(())
    }

    pub async fn get_kyc_submission(&self, kyc_id: &Uuid) -> Result<Option<KycSubmission>> {
        let row = sqlx::query("SELECT * FROM kyc_submissions WHERE id = ?1")
            .bind(kyc_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch KYC submission: {}", e)))?;
        row.as_ref().map(submission_from_row).transpose()
    }

    pub async fn get_latest_kyc_submission(&self, user_id: &Uuid) -> Result<Option<KycSubmission>> {
        let query = r#"
            SELECT * FROM kyc_submissions WHERE user_id = ?1 ORDER BY submitted_at DESC, rowid DESC LIMIT 1
        "#;
        let row = sqlx::query(query)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch KYC submission: {}", e)))?;
        row.as_ref().map(submission_from_row).transpose()
    }

    pub async fn get_active_kyc_submission(&self, user_id: &Uuid) -> Result<Option<KycSubmission>> {
        let query = r#"
            SELECT * FROM kyc_submissions WHERE user_id = ?1 AND status IN ('pending', 'approved') LIMIT 1
        "#;
        let row = sqlx::query(query)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch active KYC submission: {}", e)))?;
        row.as_ref().map(submission_from_row).transpose()
    }

    /// Most recent approved submission that carries a face photo.
    pub async fn get_latest_approved_with_face(&self, user_id: &Uuid) -> Result<Option<KycSubmission>> {
        let query = r#"
            SELECT * FROM kyc_submissions
            WHERE user_id = ?1 AND status = 'approved' AND face_image IS NOT NULL AND face_image != ''
            ORDER BY submitted_at DESC, rowid DESC LIMIT 1
        "#;
        let row = sqlx::query(query)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch approved KYC submission: {}", e)))?;
        row.as_ref().map(submission_from_row).transpose()
    }

    pub async fn get_kyc_submissions_by_user(&self, user_id: &Uuid) -> Result<Vec<KycSubmission>> {
        let rows = sqlx::query("SELECT * FROM kyc_submissions WHERE user_id = ?1 ORDER BY submitted_at DESC, rowid DESC")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list KYC submissions: {}", e)))?;
        rows.iter().map(submission_from_row).collect()
    }

    /// Moves a pending submission to `status`. Returns false when the row was
    /// no longer pending, so two racing decisions cannot both win.
    pub async fn decide_kyc_submission(
        &self,
        kyc_id: &Uuid,
        user_id: &Uuid,
        status: KycStatus,
        admin_notes: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let now = ts(&Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE kyc_submissions SET status = ?1, admin_notes = ?2, status_updated_at = ?3, updated_at = ?3
            WHERE id = ?4 AND status = 'pending'
            "#,
        )
        .bind(status.as_str())
        .bind(admin_notes)
        .bind(&now)
        .bind(kyc_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update KYC status: {}", e)))?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::set_user_kyc_status(&mut tx, user_id, status).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Rewrites the mutable fields of a submission that is not approved and
    /// puts the user back to the submission's status.
    pub async fn update_kyc_submission(&self, kyc: &KycSubmission) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let query = r#"
            UPDATE kyc_submissions
            SET personal_info = ?1, identity_documents = ?2, face_image = ?3, additional_documents = ?4,
                status = ?5, verification_attempts = ?6, status_updated_at = ?7, updated_at = ?8
            WHERE id = ?9 AND status != 'approved'
        "#;
        let result = sqlx::query(query)
            .bind(serde_json::to_string(&kyc.personal_info)?)
            .bind(serde_json::to_string(&kyc.identity_documents)?)
            .bind(&kyc.face_image)
            .bind(serde_json::to_string(&kyc.additional_documents)?)
            .bind(kyc.status.as_str())
            .bind(kyc.verification_attempts)
            .bind(kyc.status_updated_at.as_ref().map(ts))
            .bind(ts(&kyc.updated_at))
            .bind(kyc.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict("User already has an active KYC submission".to_string())
                } else {
                    AppError::DatabaseError(format!("Failed to update KYC submission: {}", e))
                }
            })?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::set_user_kyc_status(&mut tx, &kyc.user_id, kyc.status).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Oldest first, so reviewers work the queue in arrival order.
    pub async fn list_pending_kyc_submissions(&self, limit: i64) -> Result<Vec<KycSubmission>> {
        let rows = sqlx::query(
            "SELECT * FROM kyc_submissions WHERE status = 'pending' ORDER BY submitted_at ASC, rowid ASC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list pending KYC submissions: {}", e)))?;
        rows.iter().map(submission_from_row).collect()
    }

    pub async fn list_kyc_submissions(&self, filter: &KycListFilter) -> Result<Vec<KycSubmission>> {
        let direction = if filter.ascending { "ASC" } else { "DESC" };
        let query = format!(
            "SELECT * FROM kyc_submissions WHERE (?1 IS NULL OR status = ?1) ORDER BY submitted_at {dir}, rowid {dir} LIMIT ?2 OFFSET ?3",
            dir = direction
        );
        let rows = sqlx::query(&query)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list KYC submissions: {}", e)))?;
        rows.iter().map(submission_from_row).collect()
    }

    pub async fn count_kyc_submissions(&self, status: Option<KycStatus>) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM kyc_submissions WHERE (?1 IS NULL OR status = ?1)")
            .bind(status.map(|s| s.as_str()))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count KYC submissions: {}", e)))?;
        Ok(row.get("count"))
    }

    pub async fn kyc_statistics(&self) -> Result<KycStatistics> {
        let query = r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'approved' THEN 1 ELSE 0 END), 0) AS approved,
                COALESCE(SUM(CASE WHEN status = 'rejected' THEN 1 ELSE 0 END), 0) AS rejected
            FROM kyc_submissions
        "#;
        let row = sqlx::query(query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to compute KYC statistics: {}", e)))?;

        let total: i64 = row.get("total");
        let approved: i64 = row.get("approved");
        let approval_rate = if total > 0 {
            ((approved as f64 / total as f64) * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(KycStatistics {
            total,
            pending: row.get("pending"),
            approved,
            rejected: row.get("rejected"),
            approval_rate,
        })
    }

    // Face verifications (append-only)

    pub async fn record_face_verification(&self, record: &FaceVerificationRecord) -> Result<()> {
        let query = r#"
            INSERT INTO face_verifications (id, user_id, kyc_submission_id, similarity_score, is_match, threshold_used, verified_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#;
        sqlx::query(query)
            .bind(record.id.to_string())
            .bind(record.user_id.to_string())
            .bind(record.kyc_submission_id.to_string())
            .bind(record.similarity_score)
            .bind(record.is_match)
            .bind(record.threshold_used)
            .bind(ts(&record.verified_at))
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to record face verification: {}", e)))?;
        Ok(())
    }

    pub async fn get_face_verifications_by_user(&self, user_id: &Uuid, limit: i64) -> Result<Vec<FaceVerificationRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM face_verifications WHERE user_id = ?1 ORDER BY verified_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(user_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list face verifications: {}", e)))?;
        rows.iter().map(face_record_from_row).collect()
    }

    pub async fn count_face_verifications(&self, user_id: &Uuid) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM face_verifications WHERE user_id = ?1")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count face verifications: {}", e)))?;
        Ok(row.get("count"))
    }

    // Blockchain transactions (append-only)

    pub async fn record_blockchain_transaction(&self, tx: &BlockchainTransaction) -> Result<()> {
        let query = r#"
            INSERT INTO blockchain_transactions (id, transaction_hash, block_number, gas_used, transaction_fee, user_id, kyc_id, admin_id, operation_type, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#;
        sqlx::query(query)
            .bind(tx.id.to_string())
            .bind(&tx.transaction_hash)
            .bind(tx.block_number as i64)
            .bind(tx.gas_used as i64)
            .bind(&tx.transaction_fee)
            .bind(tx.user_id.to_string())
            .bind(tx.kyc_id.map(|id| id.to_string()))
            .bind(&tx.admin_id)
            .bind(tx.operation_type.as_str())
            .bind(ts(&tx.recorded_at))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(format!("Transaction {} already recorded", tx.transaction_hash))
                } else {
                    AppError::DatabaseError(format!("Failed to record blockchain transaction: {}", e))
                }
            })?;
        Ok(())
    }

    pub async fn get_blockchain_transactions_by_user(&self, user_id: &Uuid) -> Result<Vec<BlockchainTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM blockchain_transactions WHERE user_id = ?1 ORDER BY recorded_at DESC, rowid DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list blockchain transactions: {}", e)))?;
        rows.iter().map(chain_tx_from_row).collect()
    }

    pub async fn get_blockchain_transactions_by_kyc(&self, kyc_id: &Uuid) -> Result<Vec<BlockchainTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM blockchain_transactions WHERE kyc_id = ?1 ORDER BY recorded_at DESC, rowid DESC",
        )
        .bind(kyc_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list blockchain transactions: {}", e)))?;
        rows.iter().map(chain_tx_from_row).collect()
    }

    pub async fn list_blockchain_transactions(&self, limit: i64, offset: i64) -> Result<Vec<BlockchainTransaction>> {
        let rows = sqlx::query(
            "SELECT * FROM blockchain_transactions ORDER BY recorded_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list blockchain transactions: {}", e)))?;
        rows.iter().map(chain_tx_from_row).collect()
    }

    pub async fn count_blockchain_transactions(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM blockchain_transactions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count blockchain transactions: {}", e)))?;
        Ok(row.get("count"))
    }
}
