use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use utoipa::ToSchema;

/// One row of the append-only face verification log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FaceVerificationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kyc_submission_id: Uuid,
    pub similarity_score: f64,
    pub is_match: bool,
    pub threshold_used: f64,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FaceVerificationOutcome {
    pub record_id: Uuid,
    pub kyc_submission_id: Uuid,
    pub is_match: bool,
    pub similarity_score: f64,
    pub threshold: f64,
}

/// Pixel-space bounding box reported by a face detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QualityReport {
    pub valid: bool,
    pub reason: Option<String>,
    pub image_dimensions: Dimensions,
    pub face_dimensions: Option<Dimensions>,
    pub blur_score: Option<f64>,
}

impl QualityReport {
    pub fn rejected(reason: &str, image_dimensions: Dimensions) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
            image_dimensions,
            face_dimensions: None,
            blur_score: None,
        }
    }
}
