use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::{AppointmentError, AppointmentStatus};
use shared_models::error::AppError;
use shared_utils::timezone::{jst_date_of, jst_day_bounds, ClinicTime, TimeParseError};

pub const MAX_ITEMS: usize = 20;
pub const MAX_DURATION_DAYS: u32 = 90;
/// Days a prescription can be filled after issue.
pub const VALIDITY_DAYS: i64 = 28;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrescriptionItem {
    pub medication_name: String,
    pub dosage: String,
    pub frequency: String,
    pub duration_days: u32,
    pub quantity: Option<u32>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Active,
    Revoked,
}

/// Stored status plus expiry, which is never written back.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveStatus {
    Active,
    Revoked,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub items: Vec<PrescriptionItem>,
    pub notes: Option<String>,
    pub status: PrescriptionStatus,
    pub issued_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub revoked_reason: Option<String>,
}

impl Prescription {
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        match self.status {
            PrescriptionStatus::Revoked => EffectiveStatus::Revoked,
            PrescriptionStatus::Active if self.valid_until < now => EffectiveStatus::Expired,
            PrescriptionStatus::Active => EffectiveStatus::Active,
        }
    }

    pub fn can_view(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id || self.doctor_id.to_string() == user_id
    }
}

/// Last second of the JST day `VALIDITY_DAYS` after issue.
pub fn valid_until(issued_at: DateTime<Utc>) -> Result<DateTime<Utc>, TimeParseError> {
    let issued_on = jst_date_of(issued_at);
    let last_day = issued_on
        .checked_add_signed(Duration::days(VALIDITY_DAYS))
        .ok_or_else(|| TimeParseError { input: issued_on.to_string() })?;
    let (_, next_midnight) = jst_day_bounds(last_day)?;
    Ok(next_midnight - Duration::seconds(1))
}

#[derive(Debug, Clone, Serialize)]
pub struct PrescriptionView {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub effective_status: EffectiveStatus,
    pub valid_until_jst: ClinicTime,
}

impl From<Prescription> for PrescriptionView {
    fn from(prescription: Prescription) -> Self {
        Self {
            effective_status: prescription.effective_status(Utc::now()),
            valid_until_jst: ClinicTime::from(prescription.valid_until),
            prescription,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuePrescriptionRequest {
    pub appointment_id: Uuid,
    pub items: Vec<PrescriptionItem>,
    pub notes: Option<String>,
}

impl IssuePrescriptionRequest {
    pub fn validate(&self) -> Result<(), PrescriptionError> {
        if self.items.is_empty() || self.items.len() > MAX_ITEMS {
            return Err(PrescriptionError::ValidationError(format!(
                "A prescription needs between 1 and {} items",
                MAX_ITEMS
            )));
        }

        for item in &self.items {
            if item.medication_name.trim().is_empty()
                || item.dosage.trim().is_empty()
                || item.frequency.trim().is_empty()
            {
                return Err(PrescriptionError::ValidationError(
                    "Medication name, dosage and frequency are required".to_string(),
                ));
            }
            if !(1..=MAX_DURATION_DAYS).contains(&item.duration_days) {
                return Err(PrescriptionError::ValidationError(format!(
                    "{}: duration_days must be between 1 and {}",
                    item.medication_name, MAX_DURATION_DAYS
                )));
            }
            if item.quantity == Some(0) {
                return Err(PrescriptionError::ValidationError(format!(
                    "{}: quantity must be positive",
                    item.medication_name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokePrescriptionRequest {
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PrescriptionError {
    #[error("Prescription not found")]
    NotFound,

    #[error("Only the doctor of the appointment may prescribe")]
    NotPrescriber,

    #[error("Cannot prescribe for an appointment that is {0}")]
    AppointmentNotEligible(AppointmentStatus),

    #[error("Prescription is already revoked")]
    AlreadyRevoked,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error(transparent)]
    Appointment(#[from] AppointmentError),
}

impl From<PrescriptionError> for AppError {
    fn from(err: PrescriptionError) -> Self {
        match err {
            PrescriptionError::NotFound => AppError::NotFound(err.to_string()),
            PrescriptionError::NotPrescriber => AppError::Forbidden(err.to_string()),
            PrescriptionError::AppointmentNotEligible(_) | PrescriptionError::AlreadyRevoked => {
                AppError::Conflict(err.to_string())
            }
            PrescriptionError::ValidationError(msg) => AppError::ValidationError(msg),
            PrescriptionError::DatabaseError(msg) => AppError::Database(msg),
            PrescriptionError::Appointment(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn item(duration_days: u32) -> PrescriptionItem {
        PrescriptionItem {
            medication_name: "ロキソプロフェン".to_string(),
            dosage: "60mg".to_string(),
            frequency: "1日3回 毎食後".to_string(),
            duration_days,
            quantity: Some(21),
            instructions: None,
        }
    }

    fn request(items: Vec<PrescriptionItem>) -> IssuePrescriptionRequest {
        IssuePrescriptionRequest {
            appointment_id: Uuid::new_v4(),
            items,
            notes: None,
        }
    }

    #[test]
    fn item_rules() {
        assert!(request(vec![item(7)]).validate().is_ok());
        assert_matches!(request(vec![]).validate(), Err(PrescriptionError::ValidationError(_)));
        assert_matches!(request(vec![item(0)]).validate(), Err(PrescriptionError::ValidationError(_)));
        assert_matches!(request(vec![item(91)]).validate(), Err(PrescriptionError::ValidationError(_)));
        assert_matches!(
            request((0..=MAX_ITEMS).map(|_| item(7)).collect()).validate(),
            Err(PrescriptionError::ValidationError(_))
        );
    }

    #[test]
    fn validity_ends_at_jst_midnight() {
        // 2030-05-01 23:30 JST.
        let issued = Utc.with_ymd_and_hms(2030, 5, 1, 14, 30, 0).unwrap();
        // 2030-05-29 23:59:59 JST.
        assert_eq!(valid_until(issued).unwrap(), Utc.with_ymd_and_hms(2030, 5, 29, 14, 59, 59).unwrap());

        // 2030-05-02 00:30 JST is already the next clinic day.
        let after_midnight = Utc.with_ymd_and_hms(2030, 5, 1, 15, 30, 0).unwrap();
        assert_eq!(valid_until(after_midnight).unwrap(), Utc.with_ymd_and_hms(2030, 5, 30, 14, 59, 59).unwrap());
    }

    #[test]
    fn expiry_is_derived() {
        let issued = Utc.with_ymd_and_hms(2030, 5, 1, 1, 0, 0).unwrap();
        let prescription = Prescription {
            id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            items: vec![item(7)],
            notes: None,
            status: PrescriptionStatus::Active,
            issued_at: issued,
            valid_until: valid_until(issued).unwrap(),
            revoked_reason: None,
        };

        assert_eq!(prescription.effective_status(issued), EffectiveStatus::Active);
        assert_eq!(
            prescription.effective_status(issued + Duration::days(40)),
            EffectiveStatus::Expired
        );

        let revoked = Prescription { status: PrescriptionStatus::Revoked, ..prescription };
        assert_eq!(revoked.effective_status(issued), EffectiveStatus::Revoked);
    }
}
