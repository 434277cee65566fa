pub mod crypto;
pub mod imaging;
pub mod middleware;
pub mod validation;
