use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;

use crate::handlers::{
    cancel_entry, join_waitlist, list_eligible_entries, mark_entry_contacted,
    mark_entry_scheduled,
};

pub fn create_waitlist_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/entries", post(join_waitlist))
        .route("/entries/eligible", get(list_eligible_entries))
        .route("/entries/{entry_id}/scheduled", post(mark_entry_scheduled))
        .route("/entries/{entry_id}/contacted", post(mark_entry_contacted))
        .route("/entries/{entry_id}/cancel", post(cancel_entry))
        .with_state(state)
}
