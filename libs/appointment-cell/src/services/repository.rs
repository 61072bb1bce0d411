use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{is_conflict, SupabaseClient};
use shared_utils::timezone::query_timestamp;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, DoctorSlot, FollowedWaitingEntry, SlotStatus};

const SLOTS: &str = "/rest/v1/doctor_slots";
const APPOINTMENTS: &str = "/rest/v1/appointments";
const WAITING_LIST: &str = "/rest/v1/waiting_list";

/// Row access for `doctor_slots` and `appointments`. Conditional updates
/// return `None` when the filter matched nothing, which is how callers detect
/// that another writer got there first.
#[derive(Clone)]
pub struct AppointmentRepository {
    supabase: SupabaseClient,
}

impl AppointmentRepository {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn get_slot(&self, slot_id: Uuid, auth_token: &str) -> Result<DoctorSlot, AppointmentError> {
        let path = format!("{}?id=eq.{}", SLOTS, slot_id);
        let row = self.supabase.select_one(&path, auth_token).await
            .map_err(db_error)?
            .ok_or(AppointmentError::SlotNotFound)?;
        parse_row(row)
    }

    pub async fn list_slots(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        doctor_id: Option<Uuid>,
        status: Option<SlotStatus>,
        auth_token: &str,
    ) -> Result<Vec<DoctorSlot>, AppointmentError> {
        let mut filters = vec![
            format!("start_time=gte.{}", query_timestamp(from)),
            format!("start_time=lt.{}", query_timestamp(to)),
        ];
        if let Some(doctor_id) = doctor_id {
            filters.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(status) = status {
            filters.push(format!("status=eq.{}", status));
        }
        filters.push("order=start_time.asc".to_string());

        self.select_many(&format!("{}?{}", SLOTS, filters.join("&")), auth_token).await
    }

    pub async fn insert_slots(&self, rows: Vec<Value>, auth_token: &str) -> Result<Vec<DoctorSlot>, AppointmentError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let written = self.supabase.write_returning(Method::POST, SLOTS, auth_token, Value::Array(rows)).await
            .map_err(db_error)?;
        written.into_iter().map(parse_row).collect()
    }

    /// Compare-and-set on the slot's current status.
    pub async fn update_slot_if(
        &self,
        slot_id: Uuid,
        expected: SlotStatus,
        expected_appointment: Option<Uuid>,
        changes: Value,
        auth_token: &str,
    ) -> Result<Option<DoctorSlot>, AppointmentError> {
        let mut path = format!("{}?id=eq.{}&status=eq.{}", SLOTS, slot_id, expected);
        if let Some(appointment_id) = expected_appointment {
            path.push_str(&format!("&appointment_id=eq.{}", appointment_id));
        }
        self.patch_first(&path, changes, auth_token).await
    }

    pub async fn get_appointment(&self, appointment_id: Uuid, auth_token: &str) -> Result<Appointment, AppointmentError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS, appointment_id);
        let row = self.supabase.select_one(&path, auth_token).await
            .map_err(db_error)?
            .ok_or(AppointmentError::NotFound)?;
        parse_row(row)
    }

    pub async fn list_appointments(&self, filters: &[String], auth_token: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query = filters.to_vec();
        query.push("order=start_time.asc".to_string());
        self.select_many(&format!("{}?{}", APPOINTMENTS, query.join("&")), auth_token).await
    }

    /// Active appointments for `column` (`doctor_id` or `patient_id`) whose
    /// stored range intersects `[start, end)`.
    pub async fn active_appointments_between(
        &self,
        column: &str,
        id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.list_appointments(
            &[
                format!("{}=eq.{}", column, id),
                format!("status={}", AppointmentStatus::active_filter()),
                format!("start_time=lt.{}", query_timestamp(end)),
                format!("end_time=gt.{}", query_timestamp(start)),
            ],
            auth_token,
        ).await
    }

    pub async fn insert_appointment(&self, row: Value, auth_token: &str) -> Result<Appointment, AppointmentError> {
        let written = self.supabase.write_returning(Method::POST, APPOINTMENTS, auth_token, row).await
            .map_err(|e| {
                // The partial unique index on active appointments per slot.
                if is_conflict(&e) {
                    AppointmentError::SlotTaken
                } else {
                    db_error(e)
                }
            })?;
        let row = written.into_iter().next()
            .ok_or_else(|| AppointmentError::DatabaseError("Insert returned no row".to_string()))?;
        parse_row(row)
    }

    /// Compare-and-set on the appointment's current status.
    pub async fn update_appointment_if(
        &self,
        appointment_id: Uuid,
        expected: &[AppointmentStatus],
        changes: Value,
        auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let names: Vec<String> = expected.iter().map(ToString::to_string).collect();
        let path = format!(
            "{}?id=eq.{}&status=in.({})",
            APPOINTMENTS,
            appointment_id,
            names.join(",")
        );
        self.patch_first(&path, changes, auth_token).await
    }

    pub async fn mark_prescription_issued(&self, appointment_id: Uuid, auth_token: &str) -> Result<Appointment, AppointmentError> {
        let path = format!("{}?id=eq.{}", APPOINTMENTS, appointment_id);
        self.patch_first(
            &path,
            json!({ "prescription_issued": true, "updated_at": Utc::now().to_rfc3339() }),
            auth_token,
        ).await?
        .ok_or(AppointmentError::NotFound)
    }

    /// Re-point the assigned waiting entry of `previous` at `replacement`.
    pub async fn follow_waiting_entry(
        &self,
        previous: Uuid,
        replacement: Uuid,
        auth_token: &str,
    ) -> Result<Option<FollowedWaitingEntry>, AppointmentError> {
        let path = format!("{}?appointment_id=eq.{}&status=eq.assigned", WAITING_LIST, previous);
        self.patch_first(
            &path,
            json!({ "appointment_id": replacement, "updated_at": Utc::now().to_rfc3339() }),
            auth_token,
        ).await
    }

    async fn patch_first<T: DeserializeOwned>(
        &self,
        path: &str,
        changes: Value,
        auth_token: &str,
    ) -> Result<Option<T>, AppointmentError> {
        debug!("Conditional update {}", path);
        let written = self.supabase.write_returning(Method::PATCH, path, auth_token, changes).await
            .map_err(db_error)?;
        written.into_iter().next().map(parse_row).transpose()
    }

    async fn select_many<T: DeserializeOwned>(&self, path: &str, auth_token: &str) -> Result<Vec<T>, AppointmentError> {
        let rows: Vec<Value> = self.supabase.request(Method::GET, path, Some(auth_token), None).await
            .map_err(db_error)?;
        rows.into_iter().map(parse_row).collect()
    }
}

fn parse_row<T: DeserializeOwned>(row: Value) -> Result<T, AppointmentError> {
    serde_json::from_value(row)
        .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse row: {}", e)))
}

fn db_error(err: anyhow::Error) -> AppointmentError {
    AppointmentError::DatabaseError(err.to_string())
}
