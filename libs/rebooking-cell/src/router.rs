use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;

use crate::handlers::{
    cancel_offer, create_offer, dispatch_offer, expire_offer, get_offer, get_stats, open_offer,
    respond_to_invitation, run_sweep,
};

pub fn create_rebooking_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/offers", post(create_offer))
        .route("/offers/{offer_id}", get(get_offer))
        .route("/offers/{offer_id}/open", post(open_offer))
        .route("/offers/{offer_id}/dispatch", post(dispatch_offer))
        .route("/offers/{offer_id}/cancel", post(cancel_offer))
        .route("/offers/{offer_id}/expire", post(expire_offer))
        .route("/invitations/{invitation_id}/respond", post(respond_to_invitation))
        .route("/sweep", post(run_sweep))
        .route("/stats", get(get_stats))
        .with_state(state)
}
