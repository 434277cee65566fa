pub mod blockchain_tx;
pub mod face_verification;
pub mod kyc;
pub mod user;
