use crate::errors::AppError;
use crate::models::blockchain_tx::AnchorReceipt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use utoipa::ToSchema;

/// Review state of a submission. `NotSubmitted` only ever appears on users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    NotSubmitted,
    Pending,
    Approved,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::NotSubmitted => "not_submitted",
            KycStatus::Pending => "pending",
            KycStatus::Approved => "approved",
            KycStatus::Rejected => "rejected",
        }
    }

    /// Pending and approved submissions block a new submission.
    pub fn is_active(&self) -> bool {
        matches!(self, KycStatus::Pending | KycStatus::Approved)
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KycStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_submitted" => Ok(KycStatus::NotSubmitted),
            "pending" => Ok(KycStatus::Pending),
            "approved" => Ok(KycStatus::Approved),
            "rejected" => Ok(KycStatus::Rejected),
            other => Err(AppError::validation(format!("Unknown KYC status: {}", other))),
        }
    }
}

/// An admin verdict on a pending submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum KycDecision {
    Approved,
    Rejected,
}

impl KycDecision {
    /// Accepts both the status spelling and the action spelling.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "approved" | "approve" => Some(KycDecision::Approved),
            "rejected" | "reject" => Some(KycDecision::Rejected),
            _ => None,
        }
    }

    pub fn status(&self) -> KycStatus {
        match self {
            KycDecision::Approved => KycStatus::Approved,
            KycDecision::Rejected => KycStatus::Rejected,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            KycDecision::Approved => "approve",
            KycDecision::Rejected => "reject",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredAddress {
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: String,
}

/// Either a structured postal address or a single free-form line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Address {
    Structured(StructuredAddress),
    Line(String),
}

impl Default for Address {
    fn default() -> Self {
        Address::Line(String::new())
    }
}

/// Inbound KYC data. Every field is optional so the same shape serves
/// full submissions and partial updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct KycPayload {
    pub full_name: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub nationality: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub address: Option<Address>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub document_type: Option<String>,
    pub document_number: Option<String>,
    pub document_image: Option<String>,
    pub document_back_image: Option<String>,
    pub face_image: Option<String>,
    pub additional_documents: Option<Vec<String>>,
}

impl KycPayload {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.date_of_birth.is_none()
            && self.gender.is_none()
            && self.nationality.is_none()
            && self.address.is_none()
            && self.phone_number.is_none()
            && self.email.is_none()
            && self.document_type.is_none()
            && self.document_number.is_none()
            && self.document_image.is_none()
            && self.document_back_image.is_none()
            && self.face_image.is_none()
            && self.additional_documents.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PersonalInfo {
    pub full_name: String,
    pub date_of_birth: String,
    pub gender: String,
    pub nationality: String,
    #[schema(value_type = Object)]
    pub address: Address,
    pub phone_number: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IdentityDocuments {
    pub document_type: String,
    /// Salted hash of the document number; `None` in redacted views.
    pub document_number_hash: Option<String>,
    pub document_image: Option<String>,
    pub document_back_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KycSubmission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub personal_info: PersonalInfo,
    pub identity_documents: IdentityDocuments,
    pub face_image: Option<String>,
    pub additional_documents: Vec<String>,
    pub status: KycStatus,
    pub admin_notes: Option<String>,
    pub verification_attempts: i64,
    pub submitted_at: DateTime<Utc>,
    pub status_updated_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl KycSubmission {
    /// Strips fields that only reviewers may see.
    pub fn redacted(mut self) -> Self {
        self.identity_documents.document_number_hash = None;
        self.admin_notes = None;
        self
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KycStatusView {
    pub status: KycStatus,
    pub kyc_id: Option<Uuid>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
    pub verification_attempts: i64,
}

impl KycStatusView {
    pub fn not_submitted() -> Self {
        Self {
            status: KycStatus::NotSubmitted,
            kyc_id: None,
            submitted_at: None,
            last_updated: None,
            admin_notes: None,
            verification_attempts: 0,
        }
    }
}

impl From<&KycSubmission> for KycStatusView {
    fn from(submission: &KycSubmission) -> Self {
        Self {
            status: submission.status,
            kyc_id: Some(submission.id),
            submitted_at: Some(submission.submitted_at),
            last_updated: submission.status_updated_at.or(Some(submission.updated_at)),
            admin_notes: submission.admin_notes.clone(),
            verification_attempts: submission.verification_attempts,
        }
    }
}

/// Result of an admin decision. An approval whose anchoring failed still
/// succeeds and carries a warning.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DecisionOutcome {
    pub kyc_id: Uuid,
    pub status: KycStatus,
    pub admin_notes: String,
    pub anchor: Option<AnchorReceipt>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkFailure {
    pub kyc_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkActionOutcome {
    pub processed: Vec<DecisionOutcome>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct KycStatistics {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    /// Percentage of all submissions that are approved.
    pub approval_rate: f64,
}

#[derive(Debug, Clone)]
pub struct KycListFilter {
    pub status: Option<KycStatus>,
    pub limit: i64,
    pub offset: i64,
    pub ascending: bool,
}

impl Default for KycListFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 20,
            offset: 0,
            ascending: false,
        }
    }
}
