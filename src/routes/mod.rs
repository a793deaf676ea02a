use crate::models::AppState;
use axum::Router;

pub mod activity_routes;
pub mod ai_routes;
pub mod ambulance_routes;
pub mod appointment_routes;
pub mod attendance_routes;
pub mod billing_routes;
pub mod blood_bank_routes;
pub mod dashboard_routes;
pub mod department_routes;
pub mod doctor_routes;
pub mod feedback_routes;
pub mod inventory_alert_routes;
pub mod medicine_routes;
pub mod meta_routes;
pub mod patient_routes;
pub mod prescription_routes;
pub mod prescription_template_routes;
pub mod record_routes;
pub mod report_routes;
pub mod room_routes;
pub mod specialization_routes;
pub mod staff_routes;
pub mod supplier_routes;
pub mod user_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/users", user_routes::router())
        .nest("/api/patients", patient_routes::router())
        .nest("/api/doctors", doctor_routes::router())
        .nest("/api/appointments", appointment_routes::router())
        .nest("/api/departments", department_routes::router())
        .nest("/api/records", record_routes::router())
        .nest("/api/reports", report_routes::router())
        .nest("/api/ai", ai_routes::router())
        .nest("/api/specializations", specialization_routes::router())
        .nest("/api/medicines", medicine_routes::router())
        .nest("/api/inventory-alerts", inventory_alert_routes::router())
        .nest("/api/suppliers", supplier_routes::router())
        .nest("/api/prescriptions", prescription_routes::router())
        .nest("/api/prescription-templates", prescription_template_routes::router())
        .nest("/api/invoices", billing_routes::invoice_router())
        .nest("/api/insurance-claims", billing_routes::claim_router())
        .nest("/api/ambulances", ambulance_routes::ambulance_router())
        .nest("/api/emergency-calls", ambulance_routes::call_router())
        .nest("/api/staff", staff_routes::router())
        .nest("/api/attendance", attendance_routes::router())
        .nest("/api/rooms", room_routes::room_router())
        .nest("/api/room-allotments", room_routes::allotment_router())
        .nest("/api/blood-bank", blood_bank_routes::router())
        .nest("/api/reviews", feedback_routes::review_router())
        .nest("/api/feedback", feedback_routes::feedback_router())
        .nest("/api/dashboard", dashboard_routes::router())
        .nest("/api/activity-logs", activity_routes::router())
        .merge(meta_routes::router())
        .fallback(meta_routes::not_found)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use sqlx::mysql::MySqlPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::llm::testing::FakeCompletion;

    // Nothing below reaches the pool; every request is answered before any query runs.
    fn app_with(llm: Arc<FakeCompletion>) -> Router {
        let db = MySqlPoolOptions::new()
            .connect_lazy("mysql://root@127.0.0.1:1/hospital_test")
            .unwrap();
        router(AppState { db, llm })
    }

    async fn send(method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        send_to(app_with(Arc::new(FakeCompletion::replying("ok"))), method, uri, body).await
    }

    async fn send_to(app: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let res = app.oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = send(Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn docs_list_endpoint_groups() {
        let (status, body) = send(Method::GET, "/api/docs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Healthcare CRM API");
        assert!(body["endpoints"]["blood_bank"].is_object());
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let (status, body) = send(Method::GET, "/api/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["path"], "/api/nope");
        assert_eq!(body["method"], "GET");
        assert_eq!(body["available_routes"], "/api/docs");
    }

    #[tokio::test]
    async fn empty_patient_is_rejected_with_field_details() {
        let (status, body) = send(Method::POST, "/api/patients", Some("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["error"]["details"].as_array().is_some_and(|d| !d.is_empty()));
    }

    #[tokio::test]
    async fn appointment_with_bad_time_is_rejected() {
        let payload = r#"{"patient_id":1,"doctor_id":1,"appointment_date":"2030-01-01","appointment_time":"25:99"}"#;
        let (status, body) = send(Method::POST, "/api/appointments", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn oversized_page_limit_is_rejected() {
        let (status, body) = send(Method::GET, "/api/staff?limit=500", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"][0]["field"], "limit");
    }

    #[tokio::test]
    async fn mistyped_body_field_is_a_validation_error() {
        let payload = r#"{"patient_id":"abc","doctor_id":1,"appointment_date":"2030-01-01","appointment_time":"09:00"}"#;
        let (status, body) = send(Method::POST, "/api/appointments", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"][0]["field"], "patient_id");
    }

    #[tokio::test]
    async fn malformed_json_gets_the_error_envelope() {
        let (status, body) = send(Method::POST, "/api/patients", Some("{\"first_name\":")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_JSON");
    }

    #[tokio::test]
    async fn non_numeric_page_is_a_validation_error() {
        let (status, body) = send(Method::GET, "/api/staff?page=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["error"]["details"].as_array().is_some_and(|d| !d.is_empty()));
    }

    #[tokio::test]
    async fn non_numeric_id_is_a_validation_error() {
        let (status, body) = send(Method::GET, "/api/patients/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn supplier_without_contact_details_is_rejected() {
        let (status, body) = send(Method::POST, "/api/suppliers", Some(r#"{"name":"MedSupply"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields: Vec<_> = body["error"]["details"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["field"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(fields, ["category", "email"]);
    }

    #[tokio::test]
    async fn stock_alert_needs_a_medicine() {
        let (status, body) = send(Method::POST, "/api/inventory-alerts", Some(r#"{"min_level":5}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"][0]["field"], "medicine_id");
    }

    #[tokio::test]
    async fn template_with_empty_medication_list_is_rejected() {
        let payload = r#"{"name":"Flu","medications":[]}"#;
        let (status, body) = send(Method::POST, "/api/prescription-templates", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"][0]["field"], "medications");
    }

    #[tokio::test]
    async fn attendance_check_out_before_check_in_is_rejected() {
        let payload = r#"{"staff_id":1,"attendance_date":"2030-03-01","check_in":"17:00","check_out":"09:00"}"#;
        let (status, body) = send(Method::POST, "/api/attendance", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"][0]["field"], "check_out");
    }

    #[tokio::test]
    async fn review_rating_above_five_is_rejected() {
        let payload = r#"{"subject_type":"doctor","subject_name":"Dr. Grey","rating":9}"#;
        let (status, body) = send(Method::POST, "/api/reviews", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"][0]["field"], "rating");
    }

    #[tokio::test]
    async fn dashboard_chart_window_is_bounded() {
        let (status, body) = send(Method::GET, "/api/dashboard/revenue-chart?months=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"][0]["field"], "months");
    }

    #[tokio::test]
    async fn chat_forwards_the_message_and_returns_the_reply() {
        let llm = Arc::new(FakeCompletion::replying("Drink plenty of fluids."));
        let (status, body) = send_to(app_with(llm.clone()), Method::POST, "/api/ai/chat", Some(r#"{"message":"hi"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["response"], "Drink plenty of fluids.");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].user, "hi");
        assert_eq!(seen[0].max_tokens, 1000);
        assert_eq!(seen[0].temperature, 0.5);
        assert!(seen[0].system.starts_with("You are an AI assistant"));
    }

    #[tokio::test]
    async fn chat_without_message_never_calls_the_llm() {
        let llm = Arc::new(FakeCompletion::replying("unused"));
        let (status, body) = send_to(app_with(llm.clone()), Method::POST, "/api/ai/chat", Some("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"][0]["field"], "message");
        assert!(llm.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn custom_report_is_unavailable_without_an_llm_key() {
        let llm = Arc::new(FakeCompletion::default());
        let payload = r#"{"report_type":"custom","title":"Bed usage","parameters":{"custom_prompt":"Summarize bed usage"}}"#;
        let (status, body) = send_to(app_with(llm.clone()), Method::POST, "/api/ai/generate-report", Some(payload)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "AI_NOT_CONFIGURED");

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].user, "Summarize bed usage");
        assert_eq!(seen[0].max_tokens, 2000);
        assert_eq!(seen[0].temperature, 0.3);
    }
}
