pub mod auth;
pub mod blockchain_service;
pub mod face_model;
pub mod face_service;
pub mod jwt;
pub mod kyc_service;
pub mod user_service;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;
