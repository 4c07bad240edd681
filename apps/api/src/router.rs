use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use rebooking_cell::create_rebooking_router;
use shared_config::AppConfig;
use waitlist_cell::create_waitlist_router;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic rebooking API is running!" }))
        .nest("/waitlist", create_waitlist_router(state.clone()))
        .nest("/rebooking", create_rebooking_router(state.clone()))
}
