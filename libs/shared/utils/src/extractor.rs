use std::sync::Arc;

use axum::{
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
    body::Body,
};

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_config::AppConfig;

use crate::jwt::validate_token;

pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = match request.headers().get("Authorization") {
        Some(auth_header) => {
            let auth_value = auth_header
                .to_str()
                .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

            auth_value
                .strip_prefix("Bearer ")
                .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))?
                .to_string()
        }
        // Browsers cannot set headers on a WebSocket handshake.
        None if is_websocket_upgrade(&request) => query_access_token(&request)
            .ok_or_else(|| AppError::Auth("Missing access_token".to_string()))?,
        None => return Err(AppError::Auth("Missing authorization header".to_string())),
    };

    let user = validate_token(&token, &config.supabase_jwt_secret)
        .map_err(AppError::Auth)?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn is_websocket_upgrade<B>(request: &Request<B>) -> bool {
    request
        .headers()
        .get("Upgrade")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn query_access_token<B>(request: &Request<B>) -> Option<String> {
    request
        .uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("access_token="))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

pub async fn extract_user<B>(request: &Request<B>) -> Result<User, AppError> {
    request
        .extensions()
        .get::<User>()
        .cloned()
        .ok_or_else(|| AppError::Auth("User not found in request extensions".to_string()))
}

/// Reject the request unless the caller holds one of `allowed`.
pub fn require_role(user: &User, allowed: &[Role]) -> Result<Role, AppError> {
    let role = user.clinic_role();
    if allowed.contains(&role) {
        Ok(role)
    } else {
        Err(AppError::Forbidden(format!(
            "Role '{}' is not permitted to perform this action",
            role
        )))
    }
}

pub fn require_worker(user: &User) -> Result<Role, AppError> {
    require_role(user, &[Role::Doctor, Role::Operator, Role::Admin])
}

pub fn require_dispatcher(user: &User) -> Result<Role, AppError> {
    require_role(user, &[Role::Operator, Role::Admin])
}

/// Patients may act on their own records; workers on anyone's.
pub fn require_self_or_worker(user: &User, subject_id: impl std::fmt::Display) -> Result<(), AppError> {
    if user.is_worker() || user.is_self(subject_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not authorized to access this record".to_string()))
    }
}
