use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate};

use shared_models::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub first_name_kana: Option<String>,
    pub last_name_kana: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub current_medications: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.last_name, self.first_name)
    }

    pub fn age_on(&self, date: NaiveDate) -> u32 {
        date.years_since(self.date_of_birth).unwrap_or(0)
    }
}

/// The slice of a patient record shown on boards and lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSummary {
    pub id: Uuid,
    pub display_name: String,
    pub kana: Option<String>,
    pub age: u32,
}

impl PatientSummary {
    pub fn of(patient: &Patient, today: NaiveDate) -> Self {
        let kana = match (&patient.last_name_kana, &patient.first_name_kana) {
            (Some(last), Some(first)) => Some(format!("{} {}", last, first)),
            _ => None,
        };
        Self {
            id: patient.id,
            display_name: patient.display_name(),
            kana,
            age: patient.age_on(today),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePatientRequest {
    /// Set by workers registering someone else; patients get their own id.
    pub id: Option<Uuid>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub first_name_kana: Option<String>,
    pub last_name_kana: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub current_medications: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub first_name_kana: Option<String>,
    pub last_name_kana: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub allergies: Option<Vec<String>>,
    pub current_medications: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientSearchQuery {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found")]
    NotFound,

    #[error("Patient with email {0} already exists")]
    DuplicateEmail(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<PatientError> for AppError {
    fn from(err: PatientError) -> Self {
        match err {
            PatientError::NotFound => AppError::NotFound(err.to_string()),
            PatientError::DuplicateEmail(_) => AppError::Conflict(err.to_string()),
            PatientError::ValidationError(msg) => AppError::ValidationError(msg),
            PatientError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient() -> Patient {
        Patient {
            id: Uuid::new_v4(),
            email: "hanako@example.jp".to_string(),
            first_name: "花子".to_string(),
            last_name: "山田".to_string(),
            first_name_kana: Some("ハナコ".to_string()),
            last_name_kana: Some("ヤマダ".to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 6, 15).unwrap(),
            gender: None,
            phone: None,
            address: None,
            allergies: vec![],
            current_medications: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn age_turns_over_on_birthday() {
        let p = patient();
        assert_eq!(p.age_on(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()), 33);
        assert_eq!(p.age_on(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()), 34);
    }

    #[test]
    fn summary_uses_family_name_first() {
        let summary = PatientSummary::of(&patient(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(summary.display_name, "山田 花子");
        assert_eq!(summary.kana.as_deref(), Some("ヤマダ ハナコ"));
    }

    #[test]
    fn missing_arrays_default_to_empty() {
        let value = serde_json::json!({
            "id": Uuid::new_v4(),
            "email": "x@example.jp",
            "first_name": "a",
            "last_name": "b",
            "first_name_kana": null,
            "last_name_kana": null,
            "date_of_birth": "2000-01-01",
            "gender": null,
            "phone": null,
            "address": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        });
        let parsed: Patient = serde_json::from_value(value).unwrap();
        assert!(parsed.allergies.is_empty());
    }
}
