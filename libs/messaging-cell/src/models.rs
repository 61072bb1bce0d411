use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::timezone::ClientTimestamp;

pub const MAX_MESSAGE_CHARS: usize = 4000;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// A thread between one patient and one worker, optionally about a specific
/// appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub worker_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.patient_id.to_string() == user_id || self.worker_id.to_string() == user_id
    }

    /// Participants plus operators and admins, who triage patient inquiries.
    pub fn can_access(&self, user: &User) -> bool {
        self.is_participant(&user.id) || user.clinic_role().can_dispatch()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: Role,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartConversationRequest {
    pub patient_id: Uuid,
    pub worker_id: Uuid,
    pub appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePageQuery {
    pub before: Option<ClientTimestamp>,
    pub limit: Option<u32>,
}

impl MessagePageQuery {
    pub fn page_size(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// Trimmed message body, or why it was refused.
pub fn normalize_body(body: &str) -> Result<String, MessagingError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(MessagingError::ValidationError("Message must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(MessagingError::ValidationError(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("Conversation not found")]
    ConversationNotFound,

    #[error("Not a participant of this conversation")]
    NotParticipant,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::ConversationNotFound => AppError::NotFound(err.to_string()),
            MessagingError::NotParticipant => AppError::Forbidden(err.to_string()),
            MessagingError::ValidationError(msg) => AppError::ValidationError(msg),
            MessagingError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bodies_are_trimmed_and_bounded() {
        assert_eq!(normalize_body("  お大事に  ").unwrap(), "お大事に");
        assert_matches!(normalize_body(" \n "), Err(MessagingError::ValidationError(_)));

        // Counted in characters, not bytes.
        assert!(normalize_body(&"あ".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert_matches!(
            normalize_body(&"あ".repeat(MAX_MESSAGE_CHARS + 1)),
            Err(MessagingError::ValidationError(_))
        );
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(MessagePageQuery::default().page_size(), 50);
        assert_eq!(MessagePageQuery { before: None, limit: Some(0) }.page_size(), 1);
        assert_eq!(MessagePageQuery { before: None, limit: Some(500) }.page_size(), 100);
    }
}
