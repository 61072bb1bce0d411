// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use shared_models::auth::Role;

use crate::models::{AppointmentError, AppointmentStatus};

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Pending => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::InProgress,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::InProgress => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
            ],
            // Terminal states
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => vec![],
        }
    }

    /// Patients may only cancel; clinical staff drive the rest.
    pub fn ensure_role_may_set(&self, role: Role, new_status: AppointmentStatus) -> Result<(), AppointmentError> {
        if role.is_worker() || new_status == AppointmentStatus::Cancelled {
            Ok(())
        } else {
            Err(AppointmentError::Unauthorized)
        }
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn happy_path_transitions() {
        let lifecycle = AppointmentLifecycleService::new();
        assert!(lifecycle.validate_status_transition(AppointmentStatus::Pending, AppointmentStatus::Confirmed).is_ok());
        assert!(lifecycle.validate_status_transition(AppointmentStatus::Confirmed, AppointmentStatus::InProgress).is_ok());
        assert!(lifecycle.validate_status_transition(AppointmentStatus::InProgress, AppointmentStatus::Completed).is_ok());
        assert!(lifecycle.validate_status_transition(AppointmentStatus::Confirmed, AppointmentStatus::NoShow).is_ok());
    }

    #[test]
    fn terminal_states_are_final() {
        let lifecycle = AppointmentLifecycleService::new();
        for terminal in [AppointmentStatus::Completed, AppointmentStatus::Cancelled, AppointmentStatus::NoShow] {
            assert!(lifecycle.get_valid_transitions(terminal).is_empty());
        }
        assert_matches!(
            lifecycle.validate_status_transition(AppointmentStatus::Completed, AppointmentStatus::Cancelled),
            Err(AppointmentError::InvalidStatusTransition { .. })
        );
    }

    #[test]
    fn pending_cannot_skip_to_in_progress() {
        let lifecycle = AppointmentLifecycleService::new();
        assert_matches!(
            lifecycle.validate_status_transition(AppointmentStatus::Pending, AppointmentStatus::InProgress),
            Err(AppointmentError::InvalidStatusTransition {
                from: AppointmentStatus::Pending,
                to: AppointmentStatus::InProgress
            })
        );
    }

    #[test]
    fn patients_only_cancel() {
        let lifecycle = AppointmentLifecycleService::new();
        assert!(lifecycle.ensure_role_may_set(Role::Patient, AppointmentStatus::Cancelled).is_ok());
        assert_matches!(
            lifecycle.ensure_role_may_set(Role::Patient, AppointmentStatus::Completed),
            Err(AppointmentError::Unauthorized)
        );
        assert!(lifecycle.ensure_role_may_set(Role::Doctor, AppointmentStatus::Completed).is_ok());
    }
}
