use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::models::face_verification::{
    Dimensions, FaceVerificationOutcome, FaceVerificationRecord, QualityReport,
};
use crate::services::face_model::FaceModel;
use crate::utils::imaging::{crop_face, decode_base64_image, dimensions, laplacian_variance, largest_face};
use chrono::Utc;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MIN_IMAGE_SIDE: u32 = 100;
const MIN_FACE_SIDE: u32 = 50;
const MIN_BLUR_SCORE: f64 = 100.0;
const HISTORY_LIMIT: i64 = 50;

pub struct FaceService {
    db: Arc<SqliteDatabase>,
    model: Arc<dyn FaceModel>,
    threshold: f64,
}

impl FaceService {
    pub fn new(db: Arc<SqliteDatabase>, model: Arc<dyn FaceModel>, threshold: f64) -> Self {
        Self { db, model, threshold }
    }

    /// Compares a live photo with the face on the user's latest approved
    /// submission. Once both images decode, exactly one verification record
    /// is written, even when detection or scoring fails afterwards.
    pub async fn verify(&self, user_id: &Uuid, live_image: &str) -> Result<FaceVerificationOutcome> {
        let submission = self
            .db
            .get_latest_approved_with_face(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No approved KYC submission with face image found".to_string()))?;

        let stored_image = submission.face_image.as_deref().unwrap_or_default();
        let (live, stored) = match (decode_base64_image(live_image), decode_base64_image(stored_image)) {
            (Ok(live), Ok(stored)) => (live, stored),
            _ => return Err(AppError::ImageError("Failed to decode images".to_string())),
        };

        let (similarity_score, failure) = match self.score(&live, &stored).await {
            Ok(score) => (score, None),
            Err(e) => (0.0, Some(e)),
        };
        let is_match = failure.is_none() && similarity_score > self.threshold;

        let record = FaceVerificationRecord {
            id: Uuid::new_v4(),
            user_id: *user_id,
            kyc_submission_id: submission.id,
            similarity_score,
            is_match,
            threshold_used: self.threshold,
            verified_at: Utc::now(),
        };
        self.db.record_face_verification(&record).await?;

        if let Some(e) = failure {
            warn!(action = "face_verification_failed", user_id = %user_id, record_id = %record.id, error = %e);
            return Err(e);
        }

        info!(
            action = "face_verified",
            user_id = %user_id,
            record_id = %record.id,
            similarity = similarity_score,
            is_match = is_match
        );

        Ok(FaceVerificationOutcome {
            record_id: record.id,
            kyc_submission_id: submission.id,
            is_match,
            similarity_score,
            threshold: self.threshold,
        })
    }

    async fn score(&self, live: &DynamicImage, stored: &DynamicImage) -> Result<f64> {
        let live_face = largest_face(&self.model.detect_faces(live).await?)
            .ok_or_else(|| AppError::ImageError("No face detected in live image".to_string()))?;
        let stored_face = largest_face(&self.model.detect_faces(stored).await?)
            .ok_or_else(|| AppError::ImageError("No face detected in stored image".to_string()))?;

        let live_crop = crop_face(live, &live_face);
        let stored_crop = crop_face(stored, &stored_face);
        self.model.compare(&live_crop, &stored_crop).await
    }

    /// Checks that an image is usable for verification. Bad images produce an
    /// invalid report rather than an error; only model failures are errors.
    pub async fn quality_check(&self, image_data: &str) -> Result<QualityReport> {
        let image = match decode_base64_image(image_data) {
            Ok(image) => image,
            Err(_) => {
                return Ok(QualityReport::rejected(
                    "Failed to decode image",
                    Dimensions { width: 0, height: 0 },
                ))
            }
        };

        let image_dimensions = dimensions(&image);
        if image_dimensions.width < MIN_IMAGE_SIDE || image_dimensions.height < MIN_IMAGE_SIDE {
            return Ok(QualityReport::rejected(
                "Image resolution too low (minimum 100x100 pixels)",
                image_dimensions,
            ));
        }

        let Some(face) = largest_face(&self.model.detect_faces(&image).await?) else {
            return Ok(QualityReport::rejected("No face detected in image", image_dimensions));
        };
        let face_dimensions = Dimensions {
            width: face.width,
            height: face.height,
        };
        if face.width < MIN_FACE_SIDE || face.height < MIN_FACE_SIDE {
            let mut report = QualityReport::rejected("Detected face is too small", image_dimensions);
            report.face_dimensions = Some(face_dimensions);
            return Ok(report);
        }

        let blur_score = laplacian_variance(&image);
        let sharp = blur_score >= MIN_BLUR_SCORE;
        Ok(QualityReport {
            valid: sharp,
            reason: (!sharp).then(|| "Image appears to be blurry".to_string()),
            image_dimensions,
            face_dimensions: Some(face_dimensions),
            blur_score: Some(blur_score),
        })
    }

    pub async fn history(&self, user_id: &Uuid) -> Result<Vec<FaceVerificationRecord>> {
        self.db.get_face_verifications_by_user(user_id, HISTORY_LIMIT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::kyc::{IdentityDocuments, KycStatus, KycSubmission, PersonalInfo};
    use crate::models::user::{User, UserRole};
    use crate::services::test_support::{noise_png_base64, FakeFaceModel};
    use crate::utils::imaging::encode_png_base64;
    use image::{Rgb, RgbImage};

    async fn setup(model: FakeFaceModel, approved_face: Option<String>) -> (FaceService, Arc<SqliteDatabase>, Uuid) {
        let db = Arc::new(SqliteDatabase::new_in_memory().await.unwrap());
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "face@example.com".to_string(),
            full_name: "Face Owner".to_string(),
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

        if let Some(face) = approved_face {
            let kyc = KycSubmission {
                id: Uuid::new_v4(),
                user_id: user.id,
                personal_info: PersonalInfo::default(),
                identity_documents: IdentityDocuments::default(),
                face_image: Some(face),
                additional_documents: vec![],
                status: KycStatus::Pending,
                admin_notes: None,
                verification_attempts: 0,
                submitted_at: now,
                status_updated_at: None,
                updated_at: now,
            };
            db.create_kyc_submission(&kyc).await.unwrap();
            db.decide_kyc_submission(&kyc.id, &user.id, KycStatus::Approved, "ok").await.unwrap();
        }

        (FaceService::new(db.clone(), Arc::new(model), 0.6), db, user.id)
    }

    #[tokio::test]
    async fn no_approved_submission_writes_nothing() {
        let (service, db, user_id) = setup(FakeFaceModel::scoring(0.9), None).await;
        let err = service.verify(&user_id, &noise_png_base64(120, 120)).await.unwrap_err();
        assert_eq!(err.public_message(), "No approved KYC submission with face image found");
        assert_eq!(db.count_face_verifications(&user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn undecodable_live_image_writes_nothing() {
        let (service, db, user_id) = setup(FakeFaceModel::scoring(0.9), Some(noise_png_base64(120, 120))).await;
        let err = service.verify(&user_id, "bm90IGFuIGltYWdl").await.unwrap_err();
        assert_eq!(err.public_message(), "Failed to decode images");
        assert_eq!(db.count_face_verifications(&user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn score_above_threshold_matches() {
        let (service, db, user_id) = setup(FakeFaceModel::scoring(0.75), Some(noise_png_base64(120, 120))).await;
        let outcome = service.verify(&user_id, &noise_png_base64(160, 160)).await.unwrap();
        assert!(outcome.is_match);
        assert_eq!(outcome.threshold, 0.6);

        let history = service.history(&user_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, outcome.record_id);
        assert_eq!(db.count_face_verifications(&user_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn score_equal_to_threshold_does_not_match() {
        let (service, db, user_id) = setup(FakeFaceModel::scoring(0.6), Some(noise_png_base64(120, 120))).await;
        assert!(!service.verify(&user_id, &noise_png_base64(160, 160)).await.unwrap().is_match);
        assert_eq!(db.count_face_verifications(&user_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_live_face_is_recorded_then_reported() {
        let model = FakeFaceModel::scoring(0.9);
        *model.faceless_width.lock().unwrap() = Some(160);
        let (service, db, user_id) = setup(model, Some(noise_png_base64(120, 120))).await;

        let err = service.verify(&user_id, &noise_png_base64(160, 160)).await.unwrap_err();
        assert_eq!(err.public_message(), "No face detected in live image");

        let records = db.get_face_verifications_by_user(&user_id, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].similarity_score, 0.0);
        assert!(!records[0].is_match);
    }

    #[tokio::test]
    async fn model_failure_is_recorded_then_reported() {
        let model = FakeFaceModel::scoring(0.9);
        *model.score.lock().unwrap() = None;
        let (service, db, user_id) = setup(model, Some(noise_png_base64(120, 120))).await;

        let err = service.verify(&user_id, &noise_png_base64(160, 160)).await.unwrap_err();
        assert!(matches!(err, AppError::FaceModelError(_)));
        assert_eq!(db.count_face_verifications(&user_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn quality_check_rules() {
        let (service, _db, _) = setup(FakeFaceModel::scoring(0.9), None).await;

        let small = service.quality_check(&noise_png_base64(80, 80)).await.unwrap();
        assert_eq!(small.reason.as_deref(), Some("Image resolution too low (minimum 100x100 pixels)"));

        let garbage = service.quality_check("###").await.unwrap();
        assert_eq!(garbage.reason.as_deref(), Some("Failed to decode image"));

        // the fake reports a face a quarter of the image side
        let tiny_face = service.quality_check(&noise_png_base64(160, 160)).await.unwrap();
        assert_eq!(tiny_face.reason.as_deref(), Some("Detected face is too small"));

        let flat = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 200, Rgb([90, 90, 90])));
        let blurry = service.quality_check(&encode_png_base64(&flat).unwrap()).await.unwrap();
        assert_eq!(blurry.reason.as_deref(), Some("Image appears to be blurry"));

        let good = service.quality_check(&noise_png_base64(200, 200)).await.unwrap();
        assert!(good.valid, "{:?}", good.reason);
        assert!(good.blur_score.unwrap() >= 100.0);
    }
}
