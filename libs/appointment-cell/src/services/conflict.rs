use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, ConflictCheckResponse};
use crate::services::repository::AppointmentRepository;

/// Half-open interval overlap: touching ranges do not conflict.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Active appointments from `candidates` that overlap `[start, end)`.
pub fn overlapping<'a>(
    candidates: &'a [Appointment],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Vec<&'a Appointment> {
    candidates
        .iter()
        .filter(|a| Some(a.id) != exclude)
        .filter(|a| a.status.is_active())
        .filter(|a| intervals_overlap(start, end, a.start_time, a.end_time))
        .collect()
}

pub struct ConflictDetectionService<'a> {
    repository: &'a AppointmentRepository,
}

impl<'a> ConflictDetectionService<'a> {
    pub fn new(repository: &'a AppointmentRepository) -> Self {
        Self { repository }
    }

    pub async fn check_doctor(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        debug!("Checking conflicts for doctor {} from {} to {}", doctor_id, start, end);

        let existing = self.repository
            .active_appointments_between("doctor_id", doctor_id, start, end, auth_token)
            .await?;
        let conflicting_appointments: Vec<Appointment> = overlapping(&existing, start, end, exclude)
            .into_iter()
            .cloned()
            .collect();

        if !conflicting_appointments.is_empty() {
            warn!("Conflict detected for doctor {} - {} conflicting appointments",
                  doctor_id, conflicting_appointments.len());
        }

        Ok(ConflictCheckResponse {
            has_conflict: !conflicting_appointments.is_empty(),
            conflicting_appointments,
        })
    }

    /// Rejects the range when either party is already busy.
    pub async fn ensure_free(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        if self.check_doctor(doctor_id, start, end, exclude, auth_token).await?.has_conflict {
            return Err(AppointmentError::DoctorConflict);
        }

        let patient_appointments = self.repository
            .active_appointments_between("patient_id", patient_id, start, end, auth_token)
            .await?;
        if !overlapping(&patient_appointments, start, end, exclude).is_empty() {
            warn!("Patient {} is already booked between {} and {}", patient_id, start, end);
            return Err(AppointmentError::PatientConflict);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use crate::models::{AppointmentStatus, AppointmentType, BookingSource};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 1, hour, minute, 0).unwrap()
    }

    fn appointment(start: DateTime<Utc>, minutes: i64, status: AppointmentStatus) -> Appointment {
        let patient = Uuid::new_v4();
        Appointment {
            id: Uuid::new_v4(),
            patient_id: patient,
            doctor_id: Uuid::new_v4(),
            slot_id: None,
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            status,
            appointment_type: AppointmentType::GeneralConsultation,
            reason: None,
            doctor_notes: None,
            cancellation_reason: None,
            prescription_issued: false,
            booked_by: patient,
            source: BookingSource::PatientPortal,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn adjacent_ranges_do_not_overlap() {
        assert!(!intervals_overlap(at(1, 0), at(1, 30), at(1, 30), at(2, 0)));
        assert!(intervals_overlap(at(1, 0), at(1, 31), at(1, 30), at(2, 0)));
        assert!(intervals_overlap(at(1, 0), at(3, 0), at(1, 30), at(2, 0)));
    }

    #[test]
    fn inactive_and_excluded_appointments_are_ignored() {
        let cancelled = appointment(at(1, 0), 30, AppointmentStatus::Cancelled);
        let confirmed = appointment(at(1, 15), 30, AppointmentStatus::Confirmed);
        let in_progress = appointment(at(1, 0), 30, AppointmentStatus::InProgress);
        let all = vec![cancelled, confirmed.clone(), in_progress.clone()];

        let hits = overlapping(&all, at(1, 0), at(1, 30), None);
        assert_eq!(hits.len(), 2);

        let hits = overlapping(&all, at(1, 0), at(1, 30), Some(confirmed.id));
        assert_eq!(hits, vec![&in_progress]);
    }
}
