use thiserror::Error;

use appointment_cell::AppointmentError;
use patient_cell::PatientError;
use shared_models::error::AppError;
use worker_cell::WorkerError;

use crate::models::WaitingStatus;

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Waiting entry not found")]
    WaitingEntryNotFound,

    #[error("Patient is already on the waiting list")]
    AlreadyWaiting,

    #[error("Waiting entry is {0}")]
    EntryNotWaiting(WaitingStatus),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error(transparent)]
    Scheduling(#[from] AppointmentError),

    #[error(transparent)]
    Patient(#[from] PatientError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl From<BoardError> for AppError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::WaitingEntryNotFound => AppError::NotFound(err.to_string()),
            BoardError::AlreadyWaiting | BoardError::EntryNotWaiting(_) => {
                AppError::Conflict(err.to_string())
            }
            BoardError::ValidationError(msg) => AppError::ValidationError(msg),
            BoardError::DatabaseError(msg) => AppError::Database(msg),
            BoardError::Scheduling(e) => e.into(),
            BoardError::Patient(e) => e.into(),
            BoardError::Worker(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn scheduling_errors_keep_their_status() {
        let busy: AppError = BoardError::from(AppointmentError::SlotBusy).into();
        assert_eq!(busy.status_code(), StatusCode::CONFLICT);

        let missing: AppError = BoardError::from(AppointmentError::SlotNotFound).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let assigned: AppError = BoardError::EntryNotWaiting(WaitingStatus::Assigned).into();
        assert_eq!(assigned.status_code(), StatusCode::CONFLICT);
    }
}
