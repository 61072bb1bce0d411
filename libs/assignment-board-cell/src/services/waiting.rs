use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use appointment_cell::services::events::ScheduleEvent;
use shared_config::AppConfig;
use shared_database::supabase::{is_conflict, SupabaseClient};

use crate::error::BoardError;
use crate::models::{sort_for_board, CreateWaitingEntryRequest, WaitingEntry, WaitingStatus};

const WAITING_LIST: &str = "/rest/v1/waiting_list";
const MAX_COMPLAINT_CHARS: usize = 1000;

pub struct WaitingListService {
    supabase: SupabaseClient,
}

impl WaitingListService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn add_entry(
        &self,
        request: CreateWaitingEntryRequest,
        auth_token: &str,
    ) -> Result<WaitingEntry, BoardError> {
        let complaint = request.chief_complaint.trim();
        if complaint.is_empty() {
            return Err(BoardError::ValidationError("Chief complaint is required".to_string()));
        }
        if complaint.chars().count() > MAX_COMPLAINT_CHARS {
            return Err(BoardError::ValidationError(format!(
                "Chief complaint must be at most {} characters",
                MAX_COMPLAINT_CHARS
            )));
        }

        let existing = self.select(
            &format!("{}?patient_id=eq.{}&status=eq.waiting", WAITING_LIST, request.patient_id),
            auth_token,
        ).await?;
        if !existing.is_empty() {
            return Err(BoardError::AlreadyWaiting);
        }

        let now = Utc::now().to_rfc3339();
        let row = json!({
            "id": Uuid::new_v4(),
            "patient_id": request.patient_id,
            "chief_complaint": complaint,
            "preferred_date": request.preferred_date,
            "priority": request.priority,
            "status": WaitingStatus::Waiting,
            "appointment_id": null,
            "requested_at": now,
            "updated_at": now
        });

        let written = self.supabase.write_returning(Method::POST, WAITING_LIST, auth_token, row).await
            .map_err(|e| {
                // Partial unique index: one waiting entry per patient.
                if is_conflict(&e) {
                    BoardError::AlreadyWaiting
                } else {
                    BoardError::DatabaseError(e.to_string())
                }
            })?;

        let entry = first_entry(written)?
            .ok_or_else(|| BoardError::DatabaseError("Insert returned no row".to_string()))?;
        info!("Patient {} joined the waiting list ({:?})", entry.patient_id, entry.priority);
        Ok(entry)
    }

    pub async fn get_entry(&self, entry_id: Uuid, auth_token: &str) -> Result<WaitingEntry, BoardError> {
        let path = format!("{}?id=eq.{}", WAITING_LIST, entry_id);
        let row = self.supabase.select_one(&path, auth_token).await
            .map_err(|e| BoardError::DatabaseError(e.to_string()))?
            .ok_or(BoardError::WaitingEntryNotFound)?;
        parse_entry(row)
    }

    /// Waiting entries in board order. With a date, entries preferring
    /// another day are left out; entries without a preference always show.
    pub async fn list_waiting(
        &self,
        date: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<Vec<WaitingEntry>, BoardError> {
        let mut path = format!("{}?status=eq.waiting", WAITING_LIST);
        if let Some(date) = date {
            path.push_str(&format!("&or=(preferred_date.is.null,preferred_date.eq.{})", date));
        }

        let mut entries = self.select(&path, auth_token).await?;
        sort_for_board(&mut entries);
        debug!("{} patients waiting", entries.len());
        Ok(entries)
    }

    pub async fn find_by_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<WaitingEntry>, BoardError> {
        let path = format!("{}?appointment_id=eq.{}", WAITING_LIST, appointment_id);
        Ok(self.select(&path, auth_token).await?.into_iter().next())
    }

    pub async fn cancel_entry(&self, entry_id: Uuid, auth_token: &str) -> Result<WaitingEntry, BoardError> {
        let cancelled = self.transition(
            entry_id,
            WaitingStatus::Waiting,
            None,
            json!({ "status": WaitingStatus::Cancelled, "updated_at": Utc::now().to_rfc3339() }),
            auth_token,
        ).await?;

        match cancelled {
            Some(entry) => Ok(entry),
            None => Err(BoardError::EntryNotWaiting(self.get_entry(entry_id, auth_token).await?.status)),
        }
    }

    /// `waiting -> assigned`. `None` when the entry left `waiting` meanwhile.
    pub async fn mark_assigned(
        &self,
        entry_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<WaitingEntry>, BoardError> {
        self.transition(
            entry_id,
            WaitingStatus::Waiting,
            None,
            json!({
                "status": WaitingStatus::Assigned,
                "appointment_id": appointment_id,
                "updated_at": Utc::now().to_rfc3339()
            }),
            auth_token,
        ).await
    }

    /// `assigned -> waiting`, only while still linked to `appointment_id`.
    pub async fn return_to_waiting(
        &self,
        entry_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<WaitingEntry>, BoardError> {
        self.transition(
            entry_id,
            WaitingStatus::Assigned,
            Some(appointment_id),
            json!({
                "status": WaitingStatus::Waiting,
                "appointment_id": null,
                "updated_at": Utc::now().to_rfc3339()
            }),
            auth_token,
        ).await
    }

    async fn transition(
        &self,
        entry_id: Uuid,
        expected: WaitingStatus,
        expected_appointment: Option<Uuid>,
        changes: Value,
        auth_token: &str,
    ) -> Result<Option<WaitingEntry>, BoardError> {
        let mut path = format!("{}?id=eq.{}&status=eq.{}", WAITING_LIST, entry_id, expected);
        if let Some(appointment_id) = expected_appointment {
            path.push_str(&format!("&appointment_id=eq.{}", appointment_id));
        }

        let written = self.supabase.write_returning(Method::PATCH, &path, auth_token, changes).await
            .map_err(|e| BoardError::DatabaseError(e.to_string()))?;
        let entry = first_entry(written)?;
        if entry.is_none() {
            warn!("Waiting entry {} was not {}", entry_id, expected);
        }
        Ok(entry)
    }

    async fn select(&self, path: &str, auth_token: &str) -> Result<Vec<WaitingEntry>, BoardError> {
        let rows: Vec<Value> = self.supabase.request(Method::GET, path, Some(auth_token), None).await
            .map_err(|e| BoardError::DatabaseError(e.to_string()))?;
        rows.into_iter().map(parse_entry).collect()
    }
}

pub fn waiting_changed(entry: &WaitingEntry) -> ScheduleEvent {
    ScheduleEvent::WaitingListChanged {
        date: entry.preferred_date,
        entry_id: entry.id,
        status: entry.status.to_string(),
    }
}

fn first_entry(rows: Vec<Value>) -> Result<Option<WaitingEntry>, BoardError> {
    rows.into_iter().next().map(parse_entry).transpose()
}

fn parse_entry(row: Value) -> Result<WaitingEntry, BoardError> {
    serde_json::from_value(row)
        .map_err(|e| BoardError::DatabaseError(format!("Failed to parse waiting entry: {}", e)))
}
