use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
    middleware,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn worker_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", post(handlers::create_worker).get(handlers::list_workers))
        .route("/{worker_id}", get(handlers::get_worker).put(handlers::update_worker))
        .route("/{worker_id}/deactivate", post(handlers::deactivate_worker))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
