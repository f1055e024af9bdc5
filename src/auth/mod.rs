//! Bearer token authentication
//!
//! Tokens are issued by the identity service; this backend only verifies
//! them and reads the member id and chama role.

mod jwt;

pub use jwt::{generate_access_token, verify_token, Claims, JwtError};

/// Verification settings shared with the request extractor
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
        }
    }
}
