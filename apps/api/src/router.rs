use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::{appointment_routes, SchedulingState};
use assignment_board_cell::board_routes;
use auth_cell::auth_routes;
use messaging_cell::messaging_routes;
use patient_cell::create_patient_router;
use prescription_cell::prescription_routes;
use shared_config::AppConfig;
use video_conferencing_cell::video_routes;
use worker_cell::worker_routes;

pub fn create_router(config: Arc<AppConfig>, scheduling: SchedulingState) -> Router {
    Router::new()
        .route("/", get(|| async { "Telemedicine API is running" }))
        .nest("/auth", auth_routes(config.clone()))
        .nest("/patients", create_patient_router(config.clone()))
        .nest("/workers", worker_routes(config.clone()))
        .nest("/appointments", appointment_routes(scheduling.clone()))
        .nest("/board", board_routes(scheduling.clone()))
        .nest("/messages", messaging_routes(config.clone()))
        .nest("/prescriptions", prescription_routes(config))
        .nest("/video", video_routes(scheduling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    fn app() -> Router {
        let config = Arc::new(AppConfig::default());
        create_router(config.clone(), SchedulingState::in_memory(config))
    }

    #[tokio::test]
    async fn root_answers() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cell_routes_require_a_token() {
        let response = app()
            .oneshot(Request::builder().uri("/messages/unread").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
