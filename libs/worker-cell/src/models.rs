use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::auth::Role;
use shared_models::error::AppError;

/// Clinical staff member: a doctor, an operator running the assignment
/// board, or an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Worker {
    /// Japanese order: family name first.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkerRequest {
    /// Auth user id the record belongs to.
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
}

impl CreateWorkerRequest {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if !self.role.is_worker() {
            return Err(WorkerError::ValidationError(
                "Workers must have the doctor, operator or admin role".to_string(),
            ));
        }
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(WorkerError::ValidationError("Name must not be empty".to_string()));
        }
        if self.role == Role::Doctor
            && self.specialty.as_deref().map_or(true, |s| s.trim().is_empty())
        {
            return Err(WorkerError::ValidationError("Doctors require a specialty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWorkerRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
}

impl UpdateWorkerRequest {
    /// Fields a worker may change on their own record.
    pub fn touches_only_name(&self) -> bool {
        self.specialty.is_none() && self.license_number.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSearchQuery {
    pub role: Option<Role>,
    pub specialty: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker not found")]
    NotFound,

    #[error("Worker with email {0} already exists")]
    DuplicateEmail(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<WorkerError> for AppError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::NotFound => AppError::NotFound(err.to_string()),
            WorkerError::DuplicateEmail(_) => AppError::Conflict(err.to_string()),
            WorkerError::ValidationError(msg) => AppError::ValidationError(msg),
            WorkerError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
