use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::SchedulingState;
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};
use video_conferencing_cell::video_routes;

const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n";
const ANSWER: &str = "v=0\r\no=- 3 4 IN IP4 10.0.0.1\r\n";

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn request(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token));
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn session_row(appointment_id: &str, status: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "appointment_id": appointment_id,
        "room_name": format!("consult-{}", appointment_id.replace('-', "")),
        "status": status,
        "started_at": null,
        "ended_at": null,
        "created_at": "2024-01-01T00:00:00Z"
    })
}

struct Fixture {
    server: MockServer,
    app: Router,
    secret: String,
    appointment_id: String,
    patient: TestUser,
    doctor: TestUser,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_realtime(true).await
    }

    async fn with_realtime(configured: bool) -> Self {
        let server = MockServer::start().await;
        let mut config: AppConfig = TestConfig::with_supabase_url(&server.uri());
        if configured {
            config.realtime_app_id = "clinic-app".to_string();
            config.realtime_api_token = "rt-token".to_string();
            config.realtime_base_url = server.uri();
        }
        let secret = config.supabase_jwt_secret.clone();
        let app = video_routes(SchedulingState::in_memory(Arc::new(config)));

        Self {
            server,
            app,
            secret,
            appointment_id: Uuid::new_v4().to_string(),
            patient: TestUser::patient("p@example.jp"),
            doctor: TestUser::doctor("doc@clinic.jp"),
        }
    }

    fn token(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.secret, None)
    }

    fn appointment(&self, start: DateTime<Utc>, status: &str) -> Value {
        MockSupabaseResponses::appointment_response(
            &self.appointment_id,
            &self.patient.id,
            &self.doctor.id,
            None,
            start,
            status,
        )
    }

    async fn mount_appointment(&self, start: DateTime<Utc>, status: &str) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("id", format!("eq.{}", self.appointment_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([self.appointment(start, status)])))
            .mount(&self.server)
            .await;
    }

    async fn mount_session(&self, rows: Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/video_sessions"))
            .and(query_param("appointment_id", format!("eq.{}", self.appointment_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows))
            .mount(&self.server)
            .await;
    }

    async fn mount_realtime(&self, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/apps/clinic-app/sessions/new"))
            .and(body_partial_json(json!({ "sessionDescription": { "type": "offer" } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "sessionId": "rt-session-1",
                "sessionDescription": { "type": "answer", "sdp": ANSWER }
            })))
            .expect(expected)
            .mount(&self.server)
            .await;
    }

    async fn mount_participant_insert(&self, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/rest/v1/video_participants"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
            .expect(expected)
            .mount(&self.server)
            .await;
    }

    fn join_uri(&self) -> String {
        format!("/appointments/{}/join", self.appointment_id)
    }
}

#[tokio::test]
async fn doctor_join_starts_the_consultation() {
    let fx = Fixture::new().await;
    let start = Utc::now() + Duration::minutes(5);

    fx.mount_appointment(start, "confirmed").await;
    fx.mount_session(json!([])).await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/video_sessions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            session_row(&fx.appointment_id, "scheduled")
        ])))
        .expect(1)
        .mount(&fx.server)
        .await;
    fx.mount_realtime(1).await;
    fx.mount_participant_insert(1).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "in.(confirmed)"))
        .and(body_partial_json(json!({ "status": "in_progress" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            fx.appointment(start, "in_progress")
        ])))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/video_sessions"))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            session_row(&fx.appointment_id, "active")
        ])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let token = fx.token(&fx.doctor);
    let (status, body) = send(fx.app.clone(), request("POST", &fx.join_uri(), &token, Some(json!({
        "offer_sdp": OFFER
    })))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer_sdp"], ANSWER);
    assert_eq!(body["session"]["status"], "active");
    assert_eq!(body["participant"]["role"], "doctor");
    assert_eq!(body["participant"]["realtime_session_id"], "rt-session-1");
}

#[tokio::test]
async fn patient_join_does_not_start_the_consultation() {
    let fx = Fixture::new().await;
    let start = Utc::now() + Duration::minutes(10);

    fx.mount_appointment(start, "confirmed").await;
    fx.mount_session(json!([session_row(&fx.appointment_id, "scheduled")])).await;
    fx.mount_realtime(1).await;
    fx.mount_participant_insert(1).await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;

    let token = fx.token(&fx.patient);
    let (status, body) = send(fx.app.clone(), request("POST", &fx.join_uri(), &token, Some(json!({
        "offer_sdp": OFFER
    })))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], "scheduled");
    assert_eq!(body["participant"]["role"], "patient");
}

#[tokio::test]
async fn only_participants_may_join() {
    let fx = Fixture::new().await;
    fx.mount_appointment(Utc::now(), "in_progress").await;
    fx.mount_realtime(0).await;

    let other_doctor = TestUser::doctor("other@clinic.jp");
    let token = fx.token(&other_doctor);
    let (status, _) = send(fx.app.clone(), request("POST", &fx.join_uri(), &token, Some(json!({
        "offer_sdp": OFFER
    })))).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn room_opens_fifteen_minutes_before_start() {
    let fx = Fixture::new().await;
    fx.mount_appointment(Utc::now() + Duration::minutes(20), "confirmed").await;
    fx.mount_realtime(0).await;

    let token = fx.token(&fx.patient);
    let (status, _) = send(fx.app.clone(), request("POST", &fx.join_uri(), &token, Some(json!({
        "offer_sdp": OFFER
    })))).await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn pending_appointment_cannot_be_joined() {
    let fx = Fixture::new().await;
    fx.mount_appointment(Utc::now(), "pending").await;
    fx.mount_realtime(0).await;

    let token = fx.token(&fx.patient);
    let (status, _) = send(fx.app.clone(), request("POST", &fx.join_uri(), &token, Some(json!({
        "offer_sdp": OFFER
    })))).await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn ended_session_cannot_be_rejoined() {
    let fx = Fixture::new().await;
    fx.mount_appointment(Utc::now() - Duration::minutes(10), "in_progress").await;
    fx.mount_session(json!([session_row(&fx.appointment_id, "ended")])).await;
    fx.mount_realtime(0).await;

    let token = fx.token(&fx.patient);
    let (status, _) = send(fx.app.clone(), request("POST", &fx.join_uri(), &token, Some(json!({
        "offer_sdp": OFFER
    })))).await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn realtime_failure_records_no_participant() {
    let fx = Fixture::new().await;
    fx.mount_appointment(Utc::now(), "in_progress").await;
    fx.mount_session(json!([session_row(&fx.appointment_id, "active")])).await;
    Mock::given(method("POST"))
        .and(path("/apps/clinic-app/sessions/new"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
        .mount(&fx.server)
        .await;
    fx.mount_participant_insert(0).await;

    let token = fx.token(&fx.patient);
    let (status, _) = send(fx.app.clone(), request("POST", &fx.join_uri(), &token, Some(json!({
        "offer_sdp": OFFER
    })))).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn join_fails_cleanly_without_realtime_credentials() {
    let fx = Fixture::with_realtime(false).await;
    fx.mount_appointment(Utc::now(), "in_progress").await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/video_sessions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&fx.server)
        .await;

    let token = fx.token(&fx.doctor);
    let (status, _) = send(fx.app.clone(), request("POST", &fx.join_uri(), &token, Some(json!({
        "offer_sdp": OFFER
    })))).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn status_reports_the_join_window() {
    let fx = Fixture::new().await;
    fx.mount_appointment(Utc::now() + Duration::minutes(5), "confirmed").await;
    fx.mount_session(json!([])).await;

    let token = fx.token(&fx.patient);
    let (status, body) = send(fx.app.clone(), request(
        "GET",
        &format!("/appointments/{}", fx.appointment_id),
        &token,
        None,
    )).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["joinable"], true);
    assert_eq!(body["window"]["open_now"], true);
    assert!(body["session"].is_null());
}

#[tokio::test]
async fn only_the_doctor_ends_the_session() {
    let fx = Fixture::new().await;
    fx.mount_appointment(Utc::now() - Duration::minutes(20), "in_progress").await;
    fx.mount_session(json!([session_row(&fx.appointment_id, "active")])).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/video_sessions"))
        .and(query_param("status", "in.(scheduled,active)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            session_row(&fx.appointment_id, "ended")
        ])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let end_uri = format!("/appointments/{}/end", fx.appointment_id);

    let token = fx.token(&fx.patient);
    let (status, _) = send(fx.app.clone(), request("POST", &end_uri, &token, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let token = fx.token(&fx.doctor);
    let (status, body) = send(fx.app.clone(), request("POST", &end_uri, &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ended");
}

#[tokio::test]
async fn health_needs_no_token() {
    let fx = Fixture::new().await;
    let response = fx.app.clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
