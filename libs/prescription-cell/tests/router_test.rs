use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use prescription_cell::prescription_routes;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

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

fn items() -> Value {
    json!([{
        "medication_name": "カロナール",
        "dosage": "200mg",
        "frequency": "頓服",
        "duration_days": 5,
        "quantity": 10,
        "instructions": "発熱時"
    }])
}

fn prescription(id: &str, appointment_id: &str, patient_id: &str, doctor_id: &str, status: &str, valid_days: i64) -> Value {
    let issued = Utc::now() - Duration::days(1);
    json!({
        "id": id,
        "appointment_id": appointment_id,
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "items": items(),
        "notes": null,
        "status": status,
        "issued_at": issued.to_rfc3339(),
        "valid_until": (issued + Duration::days(valid_days)).to_rfc3339(),
        "revoked_reason": null
    })
}

struct Fixture {
    server: MockServer,
    app: Router,
    secret: String,
}

impl Fixture {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&server.uri());
        let secret = config.supabase_jwt_secret.clone();
        let app = prescription_routes(Arc::new(config));
        Self { server, app, secret }
    }

    fn token(&self, user: &TestUser) -> String {
        JwtTestUtils::create_test_token(user, &self.secret, None)
    }

    async fn mount_appointment(&self, appointment_id: &str, patient_id: &str, doctor_id: &str, status: &str) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("id", format!("eq.{}", appointment_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::appointment_response(
                    appointment_id,
                    patient_id,
                    doctor_id,
                    None,
                    Utc::now() - Duration::minutes(10),
                    status,
                )
            ])))
            .mount(&self.server)
            .await;
    }

    async fn mount_prescription(&self, row: Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/prescriptions"))
            .and(query_param("id", format!("eq.{}", row["id"].as_str().unwrap())))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
            .mount(&self.server)
            .await;
    }
}

#[tokio::test]
async fn doctor_prescribes_during_consultation() {
    let fx = Fixture::new().await;
    let doctor = TestUser::doctor("doc@clinic.jp");
    let patient_id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let prescription_id = Uuid::new_v4().to_string();

    fx.mount_appointment(&appointment_id, &patient_id, &doctor.id, "in_progress").await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/prescriptions"))
        .and(body_partial_json(json!({ "status": "active", "patient_id": patient_id })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            prescription(&prescription_id, &appointment_id, &patient_id, &doctor.id, "active", 28)
        ])))
        .expect(1)
        .mount(&fx.server)
        .await;
    let mut flagged = MockSupabaseResponses::appointment_response(
        &appointment_id, &patient_id, &doctor.id, None, Utc::now(), "in_progress",
    );
    flagged["prescription_issued"] = json!(true);
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "prescription_issued": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([flagged])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let token = fx.token(&doctor);
    let (status, body) = send(fx.app.clone(), request("POST", "/", &token, Some(json!({
        "appointment_id": appointment_id,
        "items": items(),
        "notes": "  水分をよく取ってください "
    })))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], prescription_id.as_str());
    assert_eq!(body["effective_status"], "active");
}

#[tokio::test]
async fn only_the_consulting_doctor_may_prescribe() {
    let fx = Fixture::new().await;
    let doctor = TestUser::doctor("doc@clinic.jp");
    let appointment_id = Uuid::new_v4().to_string();

    fx.mount_appointment(&appointment_id, &Uuid::new_v4().to_string(), &Uuid::new_v4().to_string(), "in_progress").await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/prescriptions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&fx.server)
        .await;

    let token = fx.token(&doctor);
    let (status, _) = send(fx.app.clone(), request("POST", "/", &token, Some(json!({
        "appointment_id": appointment_id,
        "items": items()
    })))).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn consultation_must_have_started() {
    let fx = Fixture::new().await;
    let doctor = TestUser::doctor("doc@clinic.jp");
    let appointment_id = Uuid::new_v4().to_string();

    fx.mount_appointment(&appointment_id, &Uuid::new_v4().to_string(), &doctor.id, "confirmed").await;

    let token = fx.token(&doctor);
    let (status, _) = send(fx.app.clone(), request("POST", "/", &token, Some(json!({
        "appointment_id": appointment_id,
        "items": items()
    })))).await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn empty_prescription_is_rejected() {
    let fx = Fixture::new().await;
    let doctor = TestUser::doctor("doc@clinic.jp");

    let token = fx.token(&doctor);
    let (status, _) = send(fx.app.clone(), request("POST", "/", &token, Some(json!({
        "appointment_id": Uuid::new_v4(),
        "items": []
    })))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn patient_sees_expired_prescription() {
    let fx = Fixture::new().await;
    let patient = TestUser::patient("p@example.jp");
    let id = Uuid::new_v4().to_string();

    // Issued yesterday, valid until an hour after issue.
    let mut row = prescription(&id, &Uuid::new_v4().to_string(), &patient.id, &Uuid::new_v4().to_string(), "active", 0);
    row["valid_until"] = json!((Utc::now() - Duration::hours(23)).to_rfc3339());
    fx.mount_prescription(row).await;

    let token = fx.token(&patient);
    let (status, body) = send(fx.app.clone(), request("GET", &format!("/{}", id), &token, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert_eq!(body["effective_status"], "expired");
}

#[tokio::test]
async fn patients_cannot_read_others_prescriptions() {
    let fx = Fixture::new().await;
    let patient = TestUser::patient("p@example.jp");
    let id = Uuid::new_v4().to_string();

    fx.mount_prescription(prescription(
        &id, &Uuid::new_v4().to_string(), &Uuid::new_v4().to_string(), &Uuid::new_v4().to_string(), "active", 28,
    )).await;

    let token = fx.token(&patient);
    let (status, _) = send(fx.app.clone(), request("GET", &format!("/{}", id), &token, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(fx.app.clone(), request(
        "GET",
        &format!("/patients/{}", Uuid::new_v4()),
        &token,
        None,
    )).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn prescriber_revokes_once() {
    let fx = Fixture::new().await;
    let doctor = TestUser::doctor("doc@clinic.jp");
    let id = Uuid::new_v4().to_string();
    let appointment_id = Uuid::new_v4().to_string();
    let patient_id = Uuid::new_v4().to_string();

    fx.mount_prescription(prescription(&id, &appointment_id, &patient_id, &doctor.id, "active", 28)).await;
    let mut revoked = prescription(&id, &appointment_id, &patient_id, &doctor.id, "revoked", 28);
    revoked["revoked_reason"] = json!("用量の誤り");
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/prescriptions"))
        .and(query_param("status", "eq.active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([revoked])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let token = fx.token(&doctor);
    let (status, body) = send(fx.app.clone(), request(
        "POST",
        &format!("/{}/revoke", id),
        &token,
        Some(json!({ "reason": "用量の誤り" })),
    )).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["effective_status"], "revoked");
}

#[tokio::test]
async fn revoked_prescription_stays_revoked() {
    let fx = Fixture::new().await;
    let admin = TestUser::admin("admin@clinic.jp");
    let id = Uuid::new_v4().to_string();

    fx.mount_prescription(prescription(
        &id, &Uuid::new_v4().to_string(), &Uuid::new_v4().to_string(), &Uuid::new_v4().to_string(), "revoked", 28,
    )).await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/prescriptions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;

    let token = fx.token(&admin);
    let (status, _) = send(fx.app.clone(), request(
        "POST",
        &format!("/{}/revoke", id),
        &token,
        Some(json!({ "reason": "重複" })),
    )).await;

    assert_eq!(status, StatusCode::CONFLICT);
}
