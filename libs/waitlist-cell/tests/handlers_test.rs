use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::{AppConfig, RebookingConfig};
use waitlist_cell::handlers::*;
use waitlist_cell::models::JoinWaitlistRequest;

fn test_config(mock_server: &MockServer) -> AppConfig {
    AppConfig {
        supabase_url: mock_server.uri(),
        supabase_anon_key: "test-anon-key".to_string(),
        notifier_webhook_url: String::new(),
        notifier_timeout_seconds: 10,
        rebooking: RebookingConfig::default(),
    }
}

fn entry_row(entry_id: Uuid, status: &str) -> serde_json::Value {
    let now = chrono::Utc::now();
    json!({
        "id": entry_id,
        "patient_id": Uuid::new_v4(),
        "patient_name": "Ana Silva",
        "email": "ana@example.com",
        "phone": null,
        "preference_note": null,
        "status": status,
        "invitation_count": 0,
        "last_invitation_sent_at": null,
        "consent_automated_notifications": true,
        "created_at": now.to_rfc3339(),
        "updated_at": now.to_rfc3339(),
    })
}

#[tokio::test]
async fn test_join_waitlist_success() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);

    Mock::given(method("POST"))
        .and(path("/rest/v1/waitlist_entries"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([entry_row(Uuid::new_v4(), "active")])))
        .mount(&mock_server)
        .await;

    let request = JoinWaitlistRequest {
        patient_id: Uuid::new_v4(),
        patient_name: "Ana Silva".to_string(),
        email: Some("ana@example.com".to_string()),
        phone: None,
        preference_note: None,
        consent_automated_notifications: true,
    };

    let result = join_waitlist(State(Arc::new(config)), Json(request)).await;
    assert!(result.is_ok(), "join handler should succeed");

    let Json(body) = result.unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["entry"]["status"], json!("active"));
}

#[tokio::test]
async fn test_join_waitlist_validation_failure_is_client_error() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);

    // No contact channel at all; the handler rejects before any DB call
    let request = JoinWaitlistRequest {
        patient_id: Uuid::new_v4(),
        patient_name: "Ana Silva".to_string(),
        email: None,
        phone: None,
        preference_note: None,
        consent_automated_notifications: true,
    };

    let result = join_waitlist(State(Arc::new(config)), Json(request)).await;
    assert!(result.is_err(), "join without contact channel must fail");
}

#[tokio::test]
async fn test_list_eligible_entries_success() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);

    Mock::given(method("GET"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("status", "eq.active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            entry_row(Uuid::new_v4(), "active"),
            entry_row(Uuid::new_v4(), "active"),
        ])))
        .mount(&mock_server)
        .await;

    let result = list_eligible_entries(State(Arc::new(config))).await;
    assert!(result.is_ok());

    let Json(body) = result.unwrap();
    assert_eq!(body["count"], json!(2));
}

#[tokio::test]
async fn test_cancel_entry_success() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);
    let entry_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("id", format!("eq.{}", entry_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry_row(entry_id, "active")])))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("id", format!("eq.{}", entry_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry_row(entry_id, "cancelled")])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("id", format!("eq.{}", entry_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry_row(entry_id, "cancelled")])))
        .mount(&mock_server)
        .await;

    let result = cancel_entry(State(Arc::new(config)), Path(entry_id)).await;
    assert!(result.is_ok());

    let Json(body) = result.unwrap();
    assert_eq!(body["entry"]["status"], json!("cancelled"));
}

#[tokio::test]
async fn test_mark_entry_scheduled_unknown_entry_fails() {
    let mock_server = MockServer::start().await;
    let config = test_config(&mock_server);
    let entry_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/waitlist_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let result = mark_entry_scheduled(State(Arc::new(config)), Path(entry_id)).await;
    assert!(result.is_err(), "unknown entry must not be schedulable");
}
