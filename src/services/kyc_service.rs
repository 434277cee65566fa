//! The submission lifecycle: submit, review, resubmit. Approval is committed
//! locally first and anchored on chain afterwards; anchoring problems never
//! undo an approval.

use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::kyc::{
    BulkActionOutcome, BulkFailure, DecisionOutcome, IdentityDocuments, KycDecision, KycListFilter,
    KycPayload, KycStatistics, KycStatus, KycStatusView, KycSubmission, PersonalInfo,
};
use crate::services::blockchain_service::BlockchainService;
use crate::services::face_service::FaceService;
use crate::services::jwt::AuthenticatedUser;
use crate::utils::crypto::hash_sensitive_data;
use crate::utils::validation::{Validator, DEFAULT_DOCUMENT_TYPE};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_PENDING_LIMIT: i64 = 50;
const MAX_BULK_ITEMS: usize = 100;

pub struct KycService {
    db: Arc<SqliteDatabase>,
    face: Arc<FaceService>,
    blockchain: Arc<BlockchainService>,
}

impl KycService {
    pub fn new(db: Arc<SqliteDatabase>, face: Arc<FaceService>, blockchain: Arc<BlockchainService>) -> Self {
        Self { db, face, blockchain }
    }

    pub async fn submit(&self, user_id: &Uuid, payload: &KycPayload) -> Result<KycSubmission> {
        if self.db.get_user_by_id(user_id).await?.is_none() {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        Validator::validate_kyc_data(payload, false).into_result()?;

        if let Some(active) = self.db.get_active_kyc_submission(user_id).await? {
            return Err(AppError::Conflict(format!(
                "User already has {} KYC submission",
                active.status
            )));
        }

        if let Some(face_image) = &payload.face_image {
            self.check_face_quality(face_image).await?;
        }

        let now = Utc::now();
        let submission = KycSubmission {
            id: Uuid::new_v4(),
            user_id: *user_id,
            personal_info: PersonalInfo {
                full_name: payload.full_name.clone().unwrap_or_default().trim().to_string(),
                date_of_birth: payload.date_of_birth.clone().unwrap_or_default(),
                gender: payload.gender.clone().unwrap_or_default().trim().to_lowercase(),
                nationality: payload.nationality.clone().unwrap_or_default().trim().to_string(),
                address: payload.address.clone().unwrap_or_default(),
                phone_number: payload.phone_number.clone().unwrap_or_default().trim().to_string(),
                email: payload.email.clone().unwrap_or_default().trim().to_lowercase(),
            },
            identity_documents: IdentityDocuments {
                document_type: payload
                    .document_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DOCUMENT_TYPE.to_string()),
                document_number_hash: payload
                    .document_number
                    .as_deref()
                    .map(|n| hash_sensitive_data(&n.trim().to_uppercase())),
                document_image: payload.document_image.clone(),
                document_back_image: payload.document_back_image.clone(),
            },
            face_image: payload.face_image.clone(),
            additional_documents: payload.additional_documents.clone().unwrap_or_default(),
            status: KycStatus::Pending,
            admin_notes: None,
            verification_attempts: 0,
            submitted_at: now,
            status_updated_at: None,
            updated_at: now,
        };

        self.db.create_kyc_submission(&submission).await?;
        info!(action = "kyc_submitted", user_id = %user_id, kyc_id = %submission.id);
        Ok(submission)
    }

    /// Applies an admin verdict to a pending submission. The conditional
    /// update in the repository makes the second of two racing decisions
    /// fail with a conflict.
    pub async fn decide(
        &self,
        kyc_id: &Uuid,
        admin_id: &Uuid,
        decision: &str,
        notes: Option<&str>,
    ) -> Result<DecisionOutcome> {
        let decision = KycDecision::parse(decision)
            .ok_or_else(|| AppError::validation("Decision must be 'approved' or 'rejected'"))?;
        let admin = admin_id.to_string();
        Validator::validate_admin_action(&admin, decision.action()).into_result()?;

        let submission = self.get_submission(kyc_id).await?;
        if submission.status != KycStatus::Pending {
            return Err(AppError::Conflict(format!(
                "KYC submission is already {}",
                submission.status
            )));
        }

        let admin_notes = format!("Verified by admin {}. {}", admin, notes.unwrap_or_default().trim())
            .trim_end()
            .to_string();
        let status = decision.status();

        if !self
            .db
            .decide_kyc_submission(kyc_id, &submission.user_id, status, &admin_notes)
            .await?
        {
            let current = self.get_submission(kyc_id).await?;
            return Err(AppError::Conflict(format!("KYC submission is already {}", current.status)));
        }
        info!(action = "kyc_decided", kyc_id = %kyc_id, admin_id = %admin, status = %status);

        let mut outcome = DecisionOutcome {
            kyc_id: *kyc_id,
            status,
            admin_notes,
            anchor: None,
            warning: None,
        };

        if decision == KycDecision::Approved {
            match self
                .blockchain
                .anchor_verification(&submission.user_id, kyc_id, &admin)
                .await
            {
                Ok(tx) => outcome.anchor = Some((&tx).into()),
                Err(e) => {
                    // TODO: approvals left unanchored here need a reconciliation job to resubmit them
                    warn!(action = "kyc_anchor_failed", kyc_id = %kyc_id, error = %e);
                    outcome.warning = Some(match e {
                        AppError::ConfirmationTimeout(_) => {
                            "Approved, but blockchain confirmation timed out; anchoring outcome is unknown".to_string()
                        }
                        _ => "Approved, but blockchain anchoring failed".to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }

    pub async fn update(&self, kyc_id: &Uuid, user_id: &Uuid, patch: &KycPayload) -> Result<KycSubmission> {
        let mut submission = self.get_submission(kyc_id).await?;
        if submission.user_id != *user_id {
            return Err(AppError::Forbidden(
                "Access denied: KYC submission belongs to different user".to_string(),
            ));
        }
        if submission.status == KycStatus::Approved {
            return Err(AppError::Conflict("Cannot update approved KYC submission".to_string()));
        }
        if patch.is_empty() {
            return Err(AppError::validation("No changes were made"));
        }

        // a lone document number is checked against the stored document type
        let scoped;
        let checked = if patch.document_number.is_some() && patch.document_type.is_none() {
            scoped = KycPayload {
                document_type: Some(submission.identity_documents.document_type.clone()),
                ..patch.clone()
            };
            &scoped
        } else {
            patch
        };
        Validator::validate_kyc_data(checked, true).into_result()?;
        if let Some(face_image) = &patch.face_image {
            self.check_face_quality(face_image).await?;
        }

        apply_patch(&mut submission, patch);
        if submission.status == KycStatus::Rejected {
            submission.verification_attempts += 1;
        }
        let now = Utc::now();
        submission.status = KycStatus::Pending;
        submission.status_updated_at = Some(now);
        submission.updated_at = now;

        if !self.db.update_kyc_submission(&submission).await? {
            return Err(AppError::Conflict("Cannot update approved KYC submission".to_string()));
        }

        info!(
            action = "kyc_updated",
            kyc_id = %kyc_id,
            user_id = %user_id,
            attempts = submission.verification_attempts
        );
        Ok(submission)
    }

    pub async fn status(&self, user_id: &Uuid) -> Result<KycStatusView> {
        Ok(self
            .db
            .get_latest_kyc_submission(user_id)
            .await?
            .as_ref()
            .map(KycStatusView::from)
            .unwrap_or_else(KycStatusView::not_submitted))
    }

    /// Owners see their submission without reviewer-only fields; admins see all.
    pub async fn details(&self, kyc_id: &Uuid, viewer: &AuthenticatedUser) -> Result<KycSubmission> {
        let submission = self.get_submission(kyc_id).await?;
        if viewer.is_admin() {
            return Ok(submission);
        }
        if submission.user_id != viewer.user_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(submission.redacted())
    }

    pub async fn pending(&self, limit: Option<i64>) -> Result<Vec<KycSubmission>> {
        let limit = limit.unwrap_or(DEFAULT_PENDING_LIMIT).clamp(1, 200);
        self.db.list_pending_kyc_submissions(limit).await
    }

    pub async fn list(&self, filter: &KycListFilter) -> Result<(Vec<KycSubmission>, i64)> {
        let submissions = self.db.list_kyc_submissions(filter).await?;
        let total = self.db.count_kyc_submissions(filter.status).await?;
        Ok((submissions, total))
    }

    pub async fn user_submissions(&self, user_id: &Uuid) -> Result<Vec<KycSubmission>> {
        if self.db.get_user_by_id(user_id).await?.is_none() {
            return Err(AppError::NotFound("User not found".to_string()));
        }
        self.db.get_kyc_submissions_by_user(user_id).await
    }

    /// Decides each submission independently; one failure does not stop the rest.
    pub async fn bulk_decide(
        &self,
        kyc_ids: &[Uuid],
        admin_id: &Uuid,
        action: &str,
        notes: Option<&str>,
    ) -> Result<BulkActionOutcome> {
        if kyc_ids.is_empty() {
            return Err(AppError::validation("At least one KYC id is required"));
        }
        if kyc_ids.len() > MAX_BULK_ITEMS {
            return Err(AppError::validation(format!(
                "At most {} submissions can be processed at once",
                MAX_BULK_ITEMS
            )));
        }
        if KycDecision::parse(action).is_none() {
            return Err(AppError::validation("Decision must be 'approved' or 'rejected'"));
        }

        let mut outcome = BulkActionOutcome {
            processed: Vec::new(),
            failed: Vec::new(),
        };
        for kyc_id in kyc_ids {
            match self.decide(kyc_id, admin_id, action, notes).await {
                Ok(decision) => outcome.processed.push(decision),
                Err(e) => outcome.failed.push(BulkFailure {
                    kyc_id: *kyc_id,
                    error: e.public_message(),
                }),
            }
        }

        info!(
            action = "kyc_bulk_decided",
            admin_id = %admin_id,
            processed = outcome.processed.len(),
            failed = outcome.failed.len()
        );
        Ok(outcome)
    }

    pub async fn analytics(&self) -> Result<KycStatistics> {
        self.db.kyc_statistics().await
    }

    async fn get_submission(&self, kyc_id: &Uuid) -> Result<KycSubmission> {
        self.db
            .get_kyc_submission(kyc_id)
            .await?
            .ok_or_else(|| AppError::NotFound("KYC submission not found".to_string()))
    }

    async fn check_face_quality(&self, face_image: &str) -> Result<()> {
        let report = self.face.quality_check(face_image).await?;
        if report.valid {
            return Ok(());
        }
        Err(AppError::validation(format!(
            "Face image validation failed: {}",
            report.reason.unwrap_or_default()
        )))
    }
}

fn apply_patch(submission: &mut KycSubmission, patch: &KycPayload) {
    let info = &mut submission.personal_info;
    if let Some(v) = &patch.full_name {
        info.full_name = v.trim().to_string();
    }
    if let Some(v) = &patch.date_of_birth {
        info.date_of_birth = v.clone();
    }
    if let Some(v) = &patch.gender {
        info.gender = v.trim().to_lowercase();
    }
    if let Some(v) = &patch.nationality {
        info.nationality = v.trim().to_string();
    }
    if let Some(v) = &patch.address {
        info.address = v.clone();
    }
    if let Some(v) = &patch.phone_number {
        info.phone_number = v.trim().to_string();
    }
    if let Some(v) = &patch.email {
        info.email = v.trim().to_lowercase();
    }

    let docs = &mut submission.identity_documents;
    if let Some(v) = &patch.document_type {
        docs.document_type = v.clone();
    }
    if let Some(v) = &patch.document_number {
        docs.document_number_hash = Some(hash_sensitive_data(&v.trim().to_uppercase()));
    }
    if let Some(v) = &patch.document_image {
        docs.document_image = Some(v.clone());
    }
    if let Some(v) = &patch.document_back_image {
        docs.document_back_image = Some(v.clone());
    }

    if let Some(v) = &patch.face_image {
        submission.face_image = Some(v.clone());
    }
    if let Some(v) = &patch.additional_documents {
        submission.additional_documents = v.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::kyc::Address;
    use crate::models::user::{User, UserRole};
    use crate::services::test_support::{noise_png_base64, FakeChain, FakeFaceModel, ReceiptMode};
    use crate::utils::crypto::verify_sensitive_data;
    use crate::utils::imaging::encode_png_base64;
    use std::time::Duration;

    struct Fixture {
        service: KycService,
        db: Arc<SqliteDatabase>,
        chain: Arc<FakeChain>,
        user_id: Uuid,
        admin_id: Uuid,
    }

    async fn user(db: &SqliteDatabase, email: &str, role: UserRole) -> Uuid {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            full_name: "Some Person".to_string(),
            phone_number: None,
            password_hash: "x".to_string(),
            role,
            kyc_status: KycStatus::NotSubmitted,
            is_active: true,
            date_of_birth: None,
            nationality: None,
            created_at: now,
            updated_at: now,
        };
        db.create_user(&user).await.unwrap();
        user.id
    }

    async fn fixture(chain: FakeChain) -> Fixture {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let chain = Arc::new(chain);
        let face = Arc::new(FaceService::new(db.clone(), Arc::new(FakeFaceModel::scoring(0.9)), 0.6));
        let blockchain = Arc::new(BlockchainService::new(
            chain.clone(),
            db.clone(),
            Duration::from_millis(30),
            Duration::from_millis(5),
        ));
        let user_id = user(&db, "a@b.com", UserRole::User).await;
        let admin_id = user(&db, "admin@b.com", UserRole::Admin).await;
        Fixture {
            service: KycService::new(db.clone(), face, blockchain),
            db,
            chain,
            user_id,
            admin_id,
        }
    }

    fn payload() -> KycPayload {
        KycPayload {
            full_name: Some("Jane Doe".to_string()),
            date_of_birth: Some("1990-05-17".to_string()),
            gender: Some("Female".to_string()),
            nationality: Some("Kenyan".to_string()),
            address: Some(Address::Line("12 Moi Avenue, Nairobi".to_string())),
            phone_number: Some("+254712345678".to_string()),
            email: Some("a@b.com".to_string()),
            document_type: Some("passport".to_string()),
            document_number: Some("A1234567".to_string()),
            document_image: Some(noise_png_base64(64, 64)),
            face_image: Some(noise_png_base64(200, 200)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn submit_hashes_document_number_and_marks_user_pending() {
        let f = fixture(FakeChain::default()).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();

        let stored = f.db.get_kyc_submission(&kyc.id).await.unwrap().unwrap();
        let hash = stored.identity_documents.document_number_hash.unwrap();
        assert!(!hash.contains("A1234567"));
        assert!(verify_sensitive_data("A1234567", &hash));

        let user = f.db.get_user_by_id(&f.user_id).await.unwrap().unwrap();
        assert_eq!(user.kyc_status, KycStatus::Pending);
        assert!(f.chain.calls().is_empty());
    }

    #[tokio::test]
    async fn submit_reports_every_validation_error() {
        let f = fixture(FakeChain::default()).await;
        let mut bad = payload();
        bad.email = Some("nope".to_string());
        bad.gender = None;
        match f.service.submit(&f.user_id, &bad).await.unwrap_err() {
            AppError::ValidationError(errors) => {
                assert!(errors.contains(&"Missing required field: gender".to_string()));
                assert!(errors.contains(&"Invalid email format".to_string()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn blurry_face_is_rejected_at_submission() {
        let f = fixture(FakeChain::default()).await;
        // one bit of noise per pixel: too soft to pass the blur check, too
        // noisy to compress under the minimum upload size
        let mut state: u32 = 7;
        let soft = image::RgbImage::from_fn(300, 300, |_, _| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let v = 120 + (state >> 31) as u8;
            image::Rgb([v, v, v])
        });
        let mut bad = payload();
        bad.face_image = Some(encode_png_base64(&image::DynamicImage::ImageRgb8(soft)).unwrap());

        let err = f.service.submit(&f.user_id, &bad).await.unwrap_err();
        assert_eq!(err.public_message(), "Face image validation failed: Image appears to be blurry");
        assert!(f.db.get_kyc_submissions_by_user(&f.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approval_anchors_and_second_decision_conflicts() {
        let f = fixture(FakeChain::default()).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();

        let outcome = f.service.decide(&kyc.id, &f.admin_id, "approved", Some("looks good")).await.unwrap();
        assert_eq!(outcome.status, KycStatus::Approved);
        assert_eq!(outcome.admin_notes, format!("Verified by admin {}. looks good", f.admin_id));
        assert!(outcome.anchor.is_some());
        assert!(outcome.warning.is_none());

        let err = f.service.decide(&kyc.id, &f.admin_id, "rejected", None).await.unwrap_err();
        assert_eq!(err.public_message(), "KYC submission is already approved");

        let err = f.service.submit(&f.user_id, &payload()).await.unwrap_err();
        assert_eq!(err.public_message(), "User already has approved KYC submission");
    }

    #[tokio::test]
    async fn failed_anchor_keeps_approval_with_warning() {
        let f = fixture(FakeChain::failing()).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();

        let outcome = f.service.decide(&kyc.id, &f.admin_id, "approve", None).await.unwrap();
        assert!(outcome.anchor.is_none());
        assert!(outcome.warning.is_some());
        assert_eq!(f.service.status(&f.user_id).await.unwrap().status, KycStatus::Approved);
        assert_eq!(f.chain.calls().len(), 1);
    }

    #[tokio::test]
    async fn confirmation_timeout_warns_outcome_unknown() {
        let f = fixture(FakeChain::with_receipts(ReceiptMode::Never)).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();

        let outcome = f.service.decide(&kyc.id, &f.admin_id, "approved", None).await.unwrap();
        assert!(outcome.warning.unwrap().contains("unknown"));
        assert_eq!(f.db.count_blockchain_transactions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejection_then_update_returns_to_pending() {
        let f = fixture(FakeChain::default()).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();
        f.service.decide(&kyc.id, &f.admin_id, "rejected", Some("blurry document")).await.unwrap();
        assert!(f.chain.calls().is_empty());

        let patch = KycPayload {
            document_image: Some(noise_png_base64(70, 70)),
            ..Default::default()
        };
        let updated = f.service.update(&kyc.id, &f.user_id, &patch).await.unwrap();
        assert_eq!(updated.status, KycStatus::Pending);
        assert_eq!(updated.verification_attempts, 1);

        let status = f.service.status(&f.user_id).await.unwrap();
        assert_eq!(status.status, KycStatus::Pending);
        assert_eq!(status.admin_notes.as_deref(), Some(format!("Verified by admin {}. blurry document", f.admin_id).as_str()));
    }

    #[tokio::test]
    async fn update_guards() {
        let f = fixture(FakeChain::default()).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();

        let err = f.service.update(&kyc.id, &f.admin_id, &payload()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = f.service.update(&kyc.id, &f.user_id, &KycPayload::default()).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        f.service.decide(&kyc.id, &f.admin_id, "approved", None).await.unwrap();
        let patch = KycPayload {
            nationality: Some("Ugandan".to_string()),
            ..Default::default()
        };
        let err = f.service.update(&kyc.id, &f.user_id, &patch).await.unwrap_err();
        assert_eq!(err.public_message(), "Cannot update approved KYC submission");

        let err = f.service.update(&Uuid::new_v4(), &f.user_id, &patch).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn lone_document_number_uses_stored_document_type() {
        let f = fixture(FakeChain::default()).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();

        // seven characters: a valid passport number, too short for a national id
        let patch = KycPayload {
            document_number: Some("B765432".to_string()),
            ..Default::default()
        };
        let updated = f.service.update(&kyc.id, &f.user_id, &patch).await.unwrap();
        assert_eq!(updated.identity_documents.document_type, "passport");
        let hash = updated.identity_documents.document_number_hash.unwrap();
        assert!(verify_sensitive_data("B765432", &hash));

        let patch = KycPayload {
            document_number: Some("B765432".to_string()),
            document_type: Some("national_id".to_string()),
            ..Default::default()
        };
        let err = f.service.update(&kyc.id, &f.user_id, &patch).await.unwrap_err();
        assert_eq!(err.public_message(), "Invalid document number format");
    }

    #[tokio::test]
    async fn details_are_redacted_for_owner() {
        let f = fixture(FakeChain::default()).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();
        f.service.decide(&kyc.id, &f.admin_id, "rejected", Some("retake photo")).await.unwrap();

        let owner = AuthenticatedUser {
            user_id: f.user_id,
            email: "a@b.com".to_string(),
            role: UserRole::User,
            token_id: "t".to_string(),
        };
        let view = f.service.details(&kyc.id, &owner).await.unwrap();
        assert!(view.identity_documents.document_number_hash.is_none());
        assert!(view.admin_notes.is_none());

        let admin = AuthenticatedUser {
            user_id: f.admin_id,
            role: UserRole::Admin,
            ..owner.clone()
        };
        assert!(f.service.details(&kyc.id, &admin).await.unwrap().admin_notes.is_some());

        let stranger = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            ..owner
        };
        assert!(matches!(f.service.details(&kyc.id, &stranger).await, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn bulk_decide_collects_failures() {
        let f = fixture(FakeChain::default()).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();
        let missing = Uuid::new_v4();

        let outcome = f
            .service
            .bulk_decide(&[kyc.id, missing], &f.admin_id, "reject", Some("incomplete"))
            .await
            .unwrap();
        assert_eq!(outcome.processed.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].kyc_id, missing);

        let stats = f.service.analytics().await.unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.approval_rate, 0.0);
    }

    #[tokio::test]
    async fn unknown_decision_is_a_validation_error() {
        let f = fixture(FakeChain::default()).await;
        let kyc = f.service.submit(&f.user_id, &payload()).await.unwrap();
        let err = f.service.decide(&kyc.id, &f.admin_id, "maybe", None).await.unwrap_err();
        assert_eq!(err.public_message(), "Decision must be 'approved' or 'rejected'");
    }
}
