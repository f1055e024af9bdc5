//! Shared data models for the chama backend

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Member roles within a chama.
///
/// `System` is never issued in tokens; it identifies background jobs and
/// gateway callbacks.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Member,
    Secretary,
    Treasurer,
    Chairman,
    Admin,
    System,
}

impl UserRole {
    /// Parse a role claim. `system` is rejected.
    pub fn from_claim(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "member" => Some(UserRole::Member),
            "secretary" => Some(UserRole::Secretary),
            "treasurer" => Some(UserRole::Treasurer),
            "chairman" | "chairperson" => Some(UserRole::Chairman),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Member => "member",
            UserRole::Secretary => "secretary",
            UserRole::Treasurer => "treasurer",
            UserRole::Chairman => "chairman",
            UserRole::Admin => "admin",
            UserRole::System => "system",
        }
    }

    /// Officials allowed to approve, reject, disburse and default loans
    pub fn is_official(&self) -> bool {
        matches!(
            self,
            UserRole::Admin | UserRole::Chairman | UserRole::Treasurer
        )
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The acting user behind a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self { user_id, role }
    }

    /// Actor used by the default sweep and payment callbacks
    pub fn system() -> Self {
        Self {
            user_id: Uuid::nil(),
            role: UserRole::System,
        }
    }
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Paginated response
#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub limit: u32,
}
