use crate::errors::{AppError, Result};
use crate::models::kyc::{Address, KycPayload};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use utoipa::ToSchema;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("Invalid email regex")
});

static FULL_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z\s\-'\.]+$").expect("Invalid name regex")
});

static NATIONALITY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z\s]{2,50}$").expect("Invalid nationality regex")
});

static POSTAL_CODE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z0-9\s\-]{3,10}$").expect("Invalid postal code regex")
});

static PASSPORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z0-9]{6,9}$").expect("Invalid passport regex")
});

static NATIONAL_ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z0-9]{8,20}$").expect("Invalid national id regex")
});

static AADHAAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{12}$").expect("Invalid aadhaar regex")
});

static GENERIC_DOCUMENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z0-9]{5,20}$").expect("Invalid document regex")
});

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];
const GENDERS: [&str; 6] = ["male", "female", "other", "m", "f", "o"];
const ADMIN_ACTIONS: [&str; 4] = ["approve", "reject", "revoke", "update"];
pub const DEFAULT_DOCUMENT_TYPE: &str = "national_id";

const MIN_IMAGE_BYTES: usize = 1024;
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Outcome of a validation pass. Never short-circuits; every problem is listed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(AppError::ValidationError(self.errors))
        }
    }
}

pub struct Validator;

impl Validator {
    /// Checks a KYC payload. With `partial` set, missing fields are fine and
    /// only the supplied ones are checked.
    pub fn validate_kyc_data(payload: &KycPayload, partial: bool) -> ValidationReport {
        let mut errors = Vec::new();

        if !partial {
            let required: [(&str, bool); 9] = [
                ("full_name", payload.full_name.is_some()),
                ("date_of_birth", payload.date_of_birth.is_some()),
                ("gender", payload.gender.is_some()),
                ("nationality", payload.nationality.is_some()),
                ("address", payload.address.is_some()),
                ("phone_number", payload.phone_number.is_some()),
                ("email", payload.email.is_some()),
                ("document_type", payload.document_type.is_some()),
                ("document_number", payload.document_number.is_some()),
            ];
            for (field, present) in required {
                if !present {
                    errors.push(format!("Missing required field: {}", field));
                }
            }
        }

        if let Some(name) = &payload.full_name {
            if !Self::is_valid_full_name(name) {
                errors.push("Invalid full name format".to_string());
            }
        }
        if let Some(email) = &payload.email {
            if !Self::is_valid_email(email) {
                errors.push("Invalid email format".to_string());
            }
        }
        if let Some(phone) = &payload.phone_number {
            if !Self::is_valid_phone(phone) {
                errors.push("Invalid phone number format".to_string());
            }
        }
        if let Some(dob) = &payload.date_of_birth {
            if !Self::is_valid_date_of_birth(dob) {
                errors.push("Invalid date of birth".to_string());
            }
        }
        if let Some(gender) = &payload.gender {
            if !Self::is_valid_gender(gender) {
                errors.push("Invalid gender value".to_string());
            }
        }
        if let Some(nationality) = &payload.nationality {
            if !NATIONALITY_PATTERN.is_match(nationality.trim()) {
                errors.push("Invalid nationality".to_string());
            }
        }
        if let Some(number) = &payload.document_number {
            let doc_type = payload.document_type.as_deref().unwrap_or(DEFAULT_DOCUMENT_TYPE);
            if !Self::is_valid_document_number(number, doc_type) {
                errors.push("Invalid document number format".to_string());
            }
        }
        if let Some(address) = &payload.address {
            if let Err(message) = Self::check_address(address) {
                errors.push(message.to_string());
            }
        }
        if let Some(image) = &payload.face_image {
            if !Self::is_valid_base64_image(image) {
                errors.push("Invalid face image data".to_string());
            }
        }
        if let Some(image) = &payload.document_image {
            if !Self::is_valid_base64_image(image) {
                errors.push("Invalid document image data".to_string());
            }
        }
        if let Some(image) = &payload.document_back_image {
            if !Self::is_valid_base64_image(image) {
                errors.push("Invalid document back image data".to_string());
            }
        }

        ValidationReport::from_errors(errors)
    }

    pub fn validate_user_data(
        email: Option<&str>,
        full_name: Option<&str>,
        phone_number: Option<&str>,
        partial: bool,
    ) -> ValidationReport {
        let mut errors = Vec::new();

        if !partial {
            for (field, present) in [
                ("email", email.is_some()),
                ("full_name", full_name.is_some()),
                ("phone_number", phone_number.is_some()),
            ] {
                if !present {
                    errors.push(format!("Missing required field: {}", field));
                }
            }
        }

        if let Some(email) = email {
            if !Self::is_valid_email(email) {
                errors.push("Invalid email format".to_string());
            }
        }
        if let Some(name) = full_name {
            if !Self::is_valid_full_name(name) {
                errors.push("Invalid full name format".to_string());
            }
        }
        if let Some(phone) = phone_number {
            if !Self::is_valid_phone(phone) {
                errors.push("Invalid phone number format".to_string());
            }
        }

        ValidationReport::from_errors(errors)
    }

    pub fn validate_admin_action(admin_id: &str, action_type: &str) -> ValidationReport {
        let mut errors = Vec::new();
        let admin_id = admin_id.trim();

        if admin_id.is_empty() {
            errors.push("Missing required field: admin_id".to_string());
        } else if admin_id.len() < 3 {
            errors.push("Invalid admin ID".to_string());
        }

        if action_type.trim().is_empty() {
            errors.push("Missing required field: action_type".to_string());
        } else if !ADMIN_ACTIONS.contains(&action_type.trim()) {
            errors.push("Invalid action type".to_string());
        }

        ValidationReport::from_errors(errors)
    }

    pub fn validate_password(password: &str) -> ValidationReport {
        let mut errors = Vec::new();

        if password.len() < 8 {
            errors.push("Password must be at least 8 characters long".to_string());
        }
        if password.len() > 128 {
            errors.push("Password must be less than 128 characters".to_string());
        }
        if !password.chars().any(|c| c.is_uppercase()) {
            errors.push("Password must contain at least one uppercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_lowercase()) {
            errors.push("Password must contain at least one lowercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_numeric()) {
            errors.push("Password must contain at least one digit".to_string());
        }
        if !password.chars().any(|c| "!@#$%^&*()_+-=[]{}|;:,.<>?".contains(c)) {
            errors.push("Password must contain at least one special character".to_string());
        }

        ValidationReport::from_errors(errors)
    }

    pub fn is_valid_email(email: &str) -> bool {
        let email = email.trim();
        email.len() <= 254 && EMAIL_PATTERN.is_match(email)
    }

    pub fn is_valid_full_name(name: &str) -> bool {
        let name = name.trim();
        name.len() >= 2 && FULL_NAME_PATTERN.is_match(name) && name.contains(' ')
    }

    /// 10 to 15 digits, ignoring common separators and a leading `+`.
    pub fn is_valid_phone(phone: &str) -> bool {
        let phone = phone.trim();
        if !phone.chars().all(|c| c.is_ascii_digit() || " +-()".contains(c)) {
            return false;
        }
        let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
        (10..=15).contains(&digits)
    }

    pub fn parse_date_of_birth(dob: &str) -> Option<NaiveDate> {
        DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(dob.trim(), format).ok())
    }

    pub fn is_valid_date_of_birth(dob: &str) -> bool {
        let Some(date) = Self::parse_date_of_birth(dob) else {
            return false;
        };
        let today = Utc::now().date_naive();
        if date > today {
            return false;
        }
        let mut age = today.year() - date.year();
        if (today.month(), today.day()) < (date.month(), date.day()) {
            age -= 1;
        }
        age <= 150
    }

    pub fn is_valid_gender(gender: &str) -> bool {
        GENDERS.contains(&gender.trim().to_lowercase().as_str())
    }

    pub fn is_valid_document_number(number: &str, document_type: &str) -> bool {
        let number = number.trim().to_uppercase();
        let pattern: &Regex = match document_type.trim().to_lowercase().as_str() {
            "passport" => &PASSPORT_PATTERN,
            "national_id" | "voter_id" => &NATIONAL_ID_PATTERN,
            "aadhaar" => &AADHAAR_PATTERN,
            _ => &GENERIC_DOCUMENT_PATTERN,
        };
        pattern.is_match(&number)
    }

    fn check_address(address: &Address) -> std::result::Result<(), &'static str> {
        match address {
            Address::Structured(parts) => {
                let long_enough = |s: &str| s.trim().len() >= 2;
                if !long_enough(&parts.street) || !long_enough(&parts.city) || !long_enough(&parts.country) {
                    return Err("Invalid address information");
                }
                if let Some(code) = &parts.postal_code {
                    if !POSTAL_CODE_PATTERN.is_match(&code.trim().to_uppercase()) {
                        return Err("Invalid address information");
                    }
                }
                Ok(())
            }
            Address::Line(line) => {
                if line.trim().len() < 10 {
                    Err("Address too short")
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Base64 payload (optionally a data URL) that decodes to 1KB..10MB.
    pub fn is_valid_base64_image(data: &str) -> bool {
        match general_purpose::STANDARD.decode(strip_data_url(data)) {
            Ok(bytes) => (MIN_IMAGE_BYTES..=MAX_IMAGE_BYTES).contains(&bytes.len()),
            Err(_) => false,
        }
    }
}

/// Drops a `data:image/...;base64,` prefix if present.
pub fn strip_data_url(data: &str) -> &str {
    let data = data.trim();
    if data.starts_with("data:") {
        data.split_once(',').map(|(_, body)| body).unwrap_or("")
    } else {
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::kyc::StructuredAddress;

    fn valid_payload() -> KycPayload {
        KycPayload {
            full_name: Some("Jane Doe".to_string()),
            date_of_birth: Some("1990-04-12".to_string()),
            gender: Some("female".to_string()),
            nationality: Some("Kenyan".to_string()),
            address: Some(Address::Structured(StructuredAddress {
                street: "12 Moi Avenue".to_string(),
                city: "Nairobi".to_string(),
                state: None,
                postal_code: Some("00100".to_string()),
                country: "Kenya".to_string(),
            })),
            phone_number: Some("+254 712 345678".to_string()),
            email: Some("jane@example.com".to_string()),
            document_type: Some("passport".to_string()),
            document_number: Some("ab123456".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn complete_payload_passes() {
        let report = Validator::validate_kyc_data(&valid_payload(), false);
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn missing_fields_are_all_listed() {
        let report = Validator::validate_kyc_data(&KycPayload::default(), false);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 9);
        assert!(report.errors.contains(&"Missing required field: document_number".to_string()));
    }

    #[test]
    fn partial_mode_skips_required_checks() {
        let patch = KycPayload {
            gender: Some("x".to_string()),
            ..Default::default()
        };
        let report = Validator::validate_kyc_data(&patch, true);
        assert_eq!(report.errors, vec!["Invalid gender value".to_string()]);

        assert!(Validator::validate_kyc_data(&KycPayload::default(), true).valid);
    }

    #[test]
    fn full_name_needs_two_words() {
        assert!(Validator::is_valid_full_name("Mary-Ann O'Neil"));
        assert!(!Validator::is_valid_full_name("Prince"));
        assert!(!Validator::is_valid_full_name("R2 D2"));
    }

    #[test]
    fn phone_digit_bounds() {
        assert!(Validator::is_valid_phone("0712345678"));
        assert!(!Validator::is_valid_phone("12345"));
        assert!(!Validator::is_valid_phone("0712abc678"));
        assert!(!Validator::is_valid_phone("+1234567890123456"));
    }

    #[test]
    fn date_of_birth_formats_and_bounds() {
        assert!(Validator::is_valid_date_of_birth("31/12/1985"));
        assert!(!Validator::is_valid_date_of_birth("12-31-1985"));
        assert!(Validator::is_valid_date_of_birth("31-12-1985"));
        assert!(!Validator::is_valid_date_of_birth("1800-01-01"));
        let tomorrow = (Utc::now().date_naive() + chrono::Duration::days(1)).format("%Y-%m-%d").to_string();
        assert!(!Validator::is_valid_date_of_birth(&tomorrow));
    }

    #[test]
    fn document_patterns_per_type() {
        assert!(Validator::is_valid_document_number("ab123456", "passport"));
        assert!(!Validator::is_valid_document_number("AB1234567890", "passport"));
        assert!(Validator::is_valid_document_number("123412341234", "aadhaar"));
        assert!(!Validator::is_valid_document_number("12341234123A", "aadhaar"));
        assert!(Validator::is_valid_document_number("ID12345678", "national_id"));
        assert!(Validator::is_valid_document_number("DL123", "drivers_license"));
    }

    #[test]
    fn line_address_must_be_long_enough() {
        let mut payload = valid_payload();
        payload.address = Some(Address::Line("Nairobi".to_string()));
        let report = Validator::validate_kyc_data(&payload, false);
        assert_eq!(report.errors, vec!["Address too short".to_string()]);
    }

    #[test]
    fn image_size_bounds() {
        let tiny = general_purpose::STANDARD.encode([1u8; 100]);
        assert!(!Validator::is_valid_base64_image(&tiny));
        let ok = format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(vec![7u8; 4096]));
        assert!(Validator::is_valid_base64_image(&ok));
        assert!(!Validator::is_valid_base64_image("not base64 at all!"));
    }

    #[test]
    fn admin_action_rules() {
        assert!(Validator::validate_admin_action("admin-1", "approve").valid);
        let report = Validator::validate_admin_action("a", "delete");
        assert_eq!(report.errors, vec!["Invalid admin ID".to_string(), "Invalid action type".to_string()]);
    }

    #[test]
    fn user_data_requires_core_fields() {
        let report = Validator::validate_user_data(Some("a@b.com"), None, None, false);
        assert_eq!(report.errors.len(), 2);
        assert!(Validator::validate_user_data(None, Some("Jane Doe"), None, true).valid);
    }
}
