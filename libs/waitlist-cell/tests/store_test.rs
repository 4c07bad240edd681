use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_database::SupabaseClient;
use waitlist_cell::*;

fn store_for(server: &MockServer) -> SupabaseWaitlistStore {
    let client = Arc::new(SupabaseClient::with_base_url(&server.uri(), "test-anon-key"));
    SupabaseWaitlistStore::with_client(client)
}

fn entry_row(entry_id: Uuid, invitation_count: i32) -> serde_json::Value {
    let now = Utc::now();
    json!({
        "id": entry_id,
        "patient_id": Uuid::new_v4(),
        "patient_name": "Ana Silva",
        "email": "ana@example.com",
        "phone": null,
        "preference_note": null,
        "status": "active",
        "invitation_count": invitation_count,
        "last_invitation_sent_at": null,
        "consent_automated_notifications": true,
        "created_at": now.to_rfc3339(),
        "updated_at": now.to_rfc3339(),
    })
}

#[tokio::test]
async fn test_record_invitation_sent_guards_on_current_count() {
    let server = MockServer::start().await;
    let store = store_for(&server);
    let entry_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("id", format!("eq.{}", entry_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry_row(entry_id, 2)])))
        .mount(&server)
        .await;

    // The conditional PATCH filters on the count that was read
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("id", format!("eq.{}", entry_id)))
        .and(query_param("invitation_count", "eq.2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry_row(entry_id, 3)])))
        .mount(&server)
        .await;

    store
        .record_invitation_sent(entry_id, Utc::now())
        .await
        .expect("guarded increment should succeed");
}

#[tokio::test]
async fn test_record_invitation_sent_retries_after_losing_the_increment_race() {
    let server = MockServer::start().await;
    let store = store_for(&server);
    let entry_id = Uuid::new_v4();

    // First read sees count 0; a concurrent bump lands before the PATCH
    Mock::given(method("GET"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("id", format!("eq.{}", entry_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry_row(entry_id, 0)])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("invitation_count", "eq.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // Retry re-reads the moved counter and lands on it
    Mock::given(method("GET"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("id", format!("eq.{}", entry_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry_row(entry_id, 1)])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/waitlist_entries"))
        .and(query_param("invitation_count", "eq.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([entry_row(entry_id, 2)])))
        .mount(&server)
        .await;

    store
        .record_invitation_sent(entry_id, Utc::now())
        .await
        .expect("retry should land on the moved counter");
}

#[tokio::test]
async fn test_record_invitation_sent_unknown_entry_is_not_found() {
    let server = MockServer::start().await;
    let store = store_for(&server);

    Mock::given(method("GET"))
        .and(path("/rest/v1/waitlist_entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = store.record_invitation_sent(Uuid::new_v4(), Utc::now()).await;
    assert!(matches!(result, Err(WaitlistError::NotFound(_))));
}
