use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::{Appointment, AppointmentError, AppointmentStatus};
use shared_models::auth::Role;
use shared_models::error::AppError;
use shared_utils::timezone::ClinicTime;

/// How early participants may enter before the appointment starts.
pub const JOIN_OPENS_BEFORE_MINUTES: i64 = 15;
/// How long the room stays joinable after the appointment ends.
pub const JOIN_CLOSES_AFTER_MINUTES: i64 = 30;

// ==============================================================================
// SESSIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VideoSessionStatus {
    Scheduled,
    Active,
    Ended,
}

/// One consultation room per appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSession {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub room_name: String,
    pub status: VideoSessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VideoSession {
    pub fn room_name_for(appointment_id: Uuid) -> String {
        format!("consult-{}", appointment_id.simple())
    }
}

/// A single join. Rejoining after a dropped connection adds a new row with
/// a fresh realtime session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoParticipant {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub realtime_session_id: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinWindow {
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

impl JoinWindow {
    pub fn for_appointment(appointment: &Appointment) -> Self {
        Self {
            opens_at: appointment.start_time - Duration::minutes(JOIN_OPENS_BEFORE_MINUTES),
            closes_at: appointment.end_time + Duration::minutes(JOIN_CLOSES_AFTER_MINUTES),
        }
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.opens_at <= now && now < self.closes_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinWindowView {
    pub opens_at: ClinicTime,
    pub closes_at: ClinicTime,
    pub open_now: bool,
}

impl JoinWindowView {
    pub fn at(window: JoinWindow, now: DateTime<Utc>) -> Self {
        Self {
            opens_at: window.opens_at.into(),
            closes_at: window.closes_at.into(),
            open_now: window.contains(now),
        }
    }
}

/// Room state as shown to the waiting-room screen.
#[derive(Debug, Clone, Serialize)]
pub struct VideoStatusView {
    pub appointment_id: Uuid,
    pub appointment_status: AppointmentStatus,
    pub session: Option<VideoSession>,
    pub window: JoinWindowView,
    pub joinable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinVideoRequest {
    pub offer_sdp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinVideoResponse {
    pub session: VideoSession,
    pub participant: VideoParticipant,
    pub answer_sdp: String,
    pub ice_servers: Vec<IceServer>,
}

// ==============================================================================
// REALTIME API WIRE TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRealtimeSessionRequest {
    #[serde(rename = "sessionDescription")]
    pub session_description: SessionDescription,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRealtimeSessionResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "sessionDescription")]
    pub session_description: Option<SessionDescription>,
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
    #[serde(rename = "errorDescription")]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("Video consultations are not configured")]
    NotConfigured,

    #[error("Only the patient and doctor of the appointment may join")]
    NotParticipant,

    #[error("Appointment is {0} and cannot be joined")]
    AppointmentNotJoinable(AppointmentStatus),

    #[error("The consultation room is open from {opens_at} until {closes_at}")]
    OutsideJoinWindow { opens_at: String, closes_at: String },

    #[error("Video session not found")]
    SessionNotFound,

    #[error("Video session has ended")]
    SessionEnded,

    #[error("Realtime API error: {0}")]
    RealtimeApiError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error(transparent)]
    Appointment(#[from] AppointmentError),
}

impl From<VideoError> for AppError {
    fn from(err: VideoError) -> Self {
        match err {
            VideoError::NotConfigured | VideoError::RealtimeApiError(_) => {
                AppError::ExternalService(err.to_string())
            }
            VideoError::NotParticipant => AppError::Forbidden(err.to_string()),
            VideoError::AppointmentNotJoinable(_)
            | VideoError::OutsideJoinWindow { .. }
            | VideoError::SessionEnded => AppError::Conflict(err.to_string()),
            VideoError::SessionNotFound => AppError::NotFound(err.to_string()),
            VideoError::ValidationError(msg) => AppError::ValidationError(msg),
            VideoError::DatabaseError(msg) => AppError::Database(msg),
            VideoError::Appointment(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> JoinWindow {
        JoinWindow {
            opens_at: Utc.with_ymd_and_hms(2030, 5, 1, 0, 45, 0).unwrap(),
            closes_at: Utc.with_ymd_and_hms(2030, 5, 1, 2, 0, 0).unwrap(),
        }
    }

    #[test]
    fn window_is_half_open() {
        let w = window();
        assert!(!w.contains(w.opens_at - Duration::seconds(1)));
        assert!(w.contains(w.opens_at));
        assert!(w.contains(w.closes_at - Duration::seconds(1)));
        assert!(!w.contains(w.closes_at));
    }

    #[test]
    fn room_names_are_stable() {
        let id = Uuid::new_v4();
        let name = VideoSession::room_name_for(id);
        assert_eq!(name, VideoSession::room_name_for(id));
        assert_eq!(name, format!("consult-{}", id.to_string().replace('-', "")));
    }

    #[test]
    fn realtime_errors_surface_as_bad_gateway() {
        let app: AppError = VideoError::RealtimeApiError("boom".to_string()).into();
        assert_eq!(app.status_code(), axum::http::StatusCode::BAD_GATEWAY);

        let app: AppError = VideoError::SessionEnded.into();
        assert_eq!(app.status_code(), axum::http::StatusCode::CONFLICT);
    }
}
