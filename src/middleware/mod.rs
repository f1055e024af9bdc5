//! Middleware for the chama API
//!
//! Request tracing and bearer-token authentication.

pub mod auth;
mod tracing;

pub use auth::{AuthenticatedUser, OptionalUser};
pub use self::tracing::request_tracing;
