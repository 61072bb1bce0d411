use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// Clinic role of an authenticated user. Doctors, operators and admins are
/// the clinic's workers; everyone else is treated as a patient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Doctor,
    Operator,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "patient" => Some(Role::Patient),
            "doctor" => Some(Role::Doctor),
            "operator" => Some(Role::Operator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn is_worker(&self) -> bool {
        matches!(self, Role::Doctor | Role::Operator | Role::Admin)
    }

    /// Operators and admins run the assignment board.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, Role::Operator | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Patient => write!(f, "patient"),
            Role::Doctor => write!(f, "doctor"),
            Role::Operator => write!(f, "operator"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    /// Resolved clinic role. Supabase puts the database role ("authenticated")
    /// in the `role` claim, so the clinic role normally lives in app metadata
    /// and is copied into `role` during token validation.
    pub fn clinic_role(&self) -> Role {
        self.role
            .as_deref()
            .and_then(Role::parse)
            .unwrap_or(Role::Patient)
    }

    pub fn is_worker(&self) -> bool {
        self.clinic_role().is_worker()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.clinic_role() == role
    }

    pub fn is_self(&self, id: impl fmt::Display) -> bool {
        self.id == id.to_string()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub valid: bool,
    pub user_id: String,
    pub email: Option<String>,
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_role(role: Option<&str>) -> User {
        User {
            id: "u-1".to_string(),
            email: None,
            role: role.map(str::to_string),
            metadata: None,
            created_at: None,
        }
    }

    #[test]
    fn unknown_roles_fall_back_to_patient() {
        assert_eq!(user_with_role(Some("authenticated")).clinic_role(), Role::Patient);
        assert_eq!(user_with_role(None).clinic_role(), Role::Patient);
    }

    #[test]
    fn worker_roles() {
        assert!(user_with_role(Some("Doctor")).is_worker());
        assert!(user_with_role(Some("operator")).is_worker());
        assert!(!user_with_role(Some("patient")).is_worker());
        assert!(Role::Admin.can_dispatch());
        assert!(!Role::Doctor.can_dispatch());
    }
}
