use std::sync::Arc;

use axum::{
    extract::{Extension, State, Json},
    http::HeaderMap,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::{Role, TokenResponse, User};
use shared_models::error::AppError;
use shared_utils::jwt;

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    auth_header
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

/// Which client portal a signed-in user belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Portal {
    Patient,
    Doctor,
    Operator,
}

impl Portal {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Patient => Portal::Patient,
            Role::Doctor => Portal::Doctor,
            Role::Operator | Role::Admin => Portal::Operator,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Role,
    pub portal: Portal,
    pub can_manage_workers: bool,
}

impl SessionInfo {
    pub fn for_user(user: &User) -> Self {
        let role = user.clinic_role();
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role,
            portal: Portal::for_role(role),
            can_manage_workers: role == Role::Admin,
        }
    }
}

pub async fn validate_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = extract_bearer_token(&headers)?;
    let user = jwt::validate_token(token, &config.supabase_jwt_secret)
        .map_err(AppError::Auth)?;

    Ok(Json(TokenResponse {
        valid: true,
        role: user.clinic_role(),
        user_id: user.id,
        email: user.email,
    }))
}

pub async fn verify_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Json<Value> {
    debug!("Verifying token");

    let valid = extract_bearer_token(&headers)
        .ok()
        .is_some_and(|token| jwt::validate_token(token, &config.supabase_jwt_secret).is_ok());

    Json(json!({ "valid": valid }))
}

pub async fn get_session(
    Extension(user): Extension<User>,
) -> Json<SessionInfo> {
    debug!("Resolving portal for user: {}", user.id);
    Json(SessionInfo::for_user(&user))
}
