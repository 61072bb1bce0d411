use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{is_conflict, SupabaseClient};
use shared_models::auth::User;
use shared_utils::timezone::query_timestamp;

use crate::models::{normalize_body, Conversation, Message, MessagingError, StartConversationRequest};

const CONVERSATIONS: &str = "/rest/v1/conversations";
const MESSAGES: &str = "/rest/v1/messages";

pub struct MessagingService {
    supabase: SupabaseClient,
}

impl MessagingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Returns the conversation and whether it was created by this call.
    pub async fn get_or_create_conversation(
        &self,
        request: StartConversationRequest,
        auth_token: &str,
    ) -> Result<(Conversation, bool), MessagingError> {
        if let Some(existing) = self.find_conversation(&request, auth_token).await? {
            return Ok((existing, false));
        }

        let row = json!({
            "id": Uuid::new_v4(),
            "patient_id": request.patient_id,
            "worker_id": request.worker_id,
            "appointment_id": request.appointment_id,
            "created_at": Utc::now().to_rfc3339(),
            "last_message_at": null
        });

        match self.supabase.write_returning(Method::POST, CONVERSATIONS, auth_token, row).await {
            Ok(rows) => {
                let conversation: Conversation = first(rows)?
                    .ok_or_else(|| MessagingError::DatabaseError("Insert returned no row".to_string()))?;
                info!("Conversation {} opened between patient {} and worker {}",
                      conversation.id, conversation.patient_id, conversation.worker_id);
                Ok((conversation, true))
            }
            // Someone opened the same conversation first.
            Err(e) if is_conflict(&e) => {
                let existing = self.find_conversation(&request, auth_token).await?
                    .ok_or_else(|| MessagingError::DatabaseError(e.to_string()))?;
                Ok((existing, false))
            }
            Err(e) => Err(MessagingError::DatabaseError(e.to_string())),
        }
    }

    pub async fn get_conversation(&self, conversation_id: Uuid, auth_token: &str) -> Result<Conversation, MessagingError> {
        let path = format!("{}?id=eq.{}", CONVERSATIONS, conversation_id);
        let row = self.supabase.select_one(&path, auth_token).await
            .map_err(|e| MessagingError::DatabaseError(e.to_string()))?
            .ok_or(MessagingError::ConversationNotFound)?;
        parse(row)
    }

    /// The caller's conversations, most recently active first.
    pub async fn list_conversations(&self, user: &User, auth_token: &str) -> Result<Vec<Conversation>, MessagingError> {
        let column = if user.is_worker() { "worker_id" } else { "patient_id" };
        let path = format!(
            "{}?{}=eq.{}&order=last_message_at.desc.nullslast,created_at.desc",
            CONVERSATIONS, column, user.id
        );
        self.select(&path, auth_token).await
    }

    /// Newest-first page of messages older than `before`.
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
        auth_token: &str,
    ) -> Result<Vec<Message>, MessagingError> {
        let mut path = format!("{}?conversation_id=eq.{}", MESSAGES, conversation_id);
        if let Some(before) = before {
            path.push_str(&format!("&created_at=lt.{}", query_timestamp(before)));
        }
        path.push_str(&format!("&order=created_at.desc&limit={}", limit));
        self.select(&path, auth_token).await
    }

    pub async fn send_message(
        &self,
        conversation: &Conversation,
        sender: &User,
        body: &str,
        auth_token: &str,
    ) -> Result<Message, MessagingError> {
        let body = normalize_body(body)?;
        let sender_id = Uuid::parse_str(&sender.id).map_err(|_| MessagingError::NotParticipant)?;
        let now = Utc::now();

        let rows = self.supabase.write_returning(Method::POST, MESSAGES, auth_token, json!({
            "id": Uuid::new_v4(),
            "conversation_id": conversation.id,
            "sender_id": sender_id,
            "sender_role": sender.clinic_role(),
            "body": body,
            "created_at": now.to_rfc3339(),
            "read_at": null
        })).await
        .map_err(|e| MessagingError::DatabaseError(e.to_string()))?;
        let message: Message = first(rows)?
            .ok_or_else(|| MessagingError::DatabaseError("Insert returned no row".to_string()))?;

        self.supabase.write_returning(
            Method::PATCH,
            &format!("{}?id=eq.{}", CONVERSATIONS, conversation.id),
            auth_token,
            json!({ "last_message_at": now.to_rfc3339() }),
        ).await
        .map_err(|e| MessagingError::DatabaseError(e.to_string()))?;

        debug!("Message {} posted to conversation {}", message.id, conversation.id);
        Ok(message)
    }

    /// Marks the other party's unread messages as read. Returns how many.
    pub async fn mark_read(&self, conversation_id: Uuid, reader_id: &str, auth_token: &str) -> Result<usize, MessagingError> {
        let path = format!(
            "{}?conversation_id=eq.{}&sender_id=neq.{}&read_at=is.null",
            MESSAGES, conversation_id, reader_id
        );
        let rows = self.supabase.write_returning(
            Method::PATCH,
            &path,
            auth_token,
            json!({ "read_at": Utc::now().to_rfc3339() }),
        ).await
        .map_err(|e| MessagingError::DatabaseError(e.to_string()))?;

        Ok(rows.len())
    }

    pub async fn unread_count(&self, user: &User, auth_token: &str) -> Result<usize, MessagingError> {
        let conversations = self.list_conversations(user, auth_token).await?;
        if conversations.is_empty() {
            return Ok(0);
        }

        let ids = conversations.iter().map(|c| c.id.to_string()).collect::<Vec<_>>().join(",");
        let path = format!(
            "{}?conversation_id=in.({})&sender_id=neq.{}&read_at=is.null&select=id",
            MESSAGES, ids, user.id
        );
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, Some(auth_token), None).await
            .map_err(|e| MessagingError::DatabaseError(e.to_string()))?;
        Ok(rows.len())
    }

    async fn find_conversation(
        &self,
        request: &StartConversationRequest,
        auth_token: &str,
    ) -> Result<Option<Conversation>, MessagingError> {
        let appointment_filter = match request.appointment_id {
            Some(id) => format!("eq.{}", id),
            None => "is.null".to_string(),
        };
        let path = format!(
            "{}?patient_id=eq.{}&worker_id=eq.{}&appointment_id={}",
            CONVERSATIONS, request.patient_id, request.worker_id, appointment_filter
        );
        Ok(self.select(&path, auth_token).await?.into_iter().next())
    }

    async fn select<T: DeserializeOwned>(&self, path: &str, auth_token: &str) -> Result<Vec<T>, MessagingError> {
        let rows: Vec<Value> = self.supabase.request(Method::GET, path, Some(auth_token), None).await
            .map_err(|e| MessagingError::DatabaseError(e.to_string()))?;
        rows.into_iter().map(parse).collect()
    }
}

fn first<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Option<T>, MessagingError> {
    rows.into_iter().next().map(parse).transpose()
}

fn parse<T: DeserializeOwned>(row: Value) -> Result<T, MessagingError> {
    serde_json::from_value(row).map_err(|e| MessagingError::DatabaseError(e.to_string()))
}
