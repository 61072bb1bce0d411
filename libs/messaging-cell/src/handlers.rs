use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_self_or_worker;

use crate::models::{Conversation, MessagePageQuery, MessagingError, SendMessageRequest, StartConversationRequest};
use crate::services::MessagingService;

async fn accessible_conversation(
    service: &MessagingService,
    user: &User,
    conversation_id: Uuid,
    auth_token: &str,
) -> Result<Conversation, AppError> {
    let conversation = service.get_conversation(conversation_id, auth_token).await?;
    if !conversation.can_access(user) {
        return Err(MessagingError::NotParticipant.into());
    }
    Ok(conversation)
}

#[axum::debug_handler]
pub async fn start_conversation(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<StartConversationRequest>,
) -> Result<Json<Value>, AppError> {
    require_self_or_worker(&user, request.patient_id)?;

    let (conversation, created) = MessagingService::new(&config)
        .get_or_create_conversation(request, auth.token())
        .await?;

    Ok(Json(json!({
        "conversation": conversation,
        "created": created
    })))
}

#[axum::debug_handler]
pub async fn list_conversations(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let conversations = MessagingService::new(&config)
        .list_conversations(&user, auth.token())
        .await?;

    Ok(Json(json!({
        "conversations": conversations,
        "total": conversations.len()
    })))
}

#[axum::debug_handler]
pub async fn list_messages(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessagePageQuery>,
) -> Result<Json<Value>, AppError> {
    let service = MessagingService::new(&config);
    accessible_conversation(&service, &user, conversation_id, auth.token()).await?;

    let limit = query.page_size();
    let messages = service
        .list_messages(conversation_id, query.before.map(|t| t.utc()), limit, auth.token())
        .await?;

    Ok(Json(json!({
        "messages": messages,
        "has_more": messages.len() == limit as usize
    })))
}

#[axum::debug_handler]
pub async fn send_message(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Value>, AppError> {
    let service = MessagingService::new(&config);
    let conversation = accessible_conversation(&service, &user, conversation_id, auth.token()).await?;

    let message = service
        .send_message(&conversation, &user, &request.body, auth.token())
        .await?;

    Ok(Json(json!(message)))
}

#[axum::debug_handler]
pub async fn mark_conversation_read(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = MessagingService::new(&config);
    accessible_conversation(&service, &user, conversation_id, auth.token()).await?;

    let marked = service.mark_read(conversation_id, &user.id, auth.token()).await?;
    Ok(Json(json!({ "marked_read": marked })))
}

#[axum::debug_handler]
pub async fn unread_count(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let unread = MessagingService::new(&config)
        .unread_count(&user, auth.token())
        .await?;

    Ok(Json(json!({ "unread": unread })))
}
