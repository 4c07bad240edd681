use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::AppError;
use waitlist_cell::WaitlistError;

use crate::models::{CreateOfferRequest, RespondRequest};
use crate::services::{
    ClaimResolverService, InvitationDispatchService, RebookingMonitorService, SlotOfferService,
};
use crate::RebookingError;

fn map_error(e: RebookingError) -> AppError {
    match e {
        RebookingError::InvalidSlot(msg) => AppError::BadRequest(msg),
        RebookingError::IllegalState { .. } => AppError::Conflict(e.to_string()),
        RebookingError::CapacityExceeded { .. } => AppError::Conflict(e.to_string()),
        RebookingError::AlreadyResponded(msg) => AppError::Conflict(msg),
        RebookingError::NotFound(msg) => AppError::NotFound(msg),
        RebookingError::NotifierFailure(msg) => AppError::ExternalService(msg),
        RebookingError::SchedulingError(msg) => AppError::ExternalService(msg),
        RebookingError::DatabaseError(msg) => AppError::Database(msg),
        RebookingError::Waitlist(inner) => match inner {
            WaitlistError::NotFound(msg) => AppError::NotFound(msg),
            WaitlistError::ValidationError(msg) => AppError::ValidationError(msg),
            WaitlistError::DatabaseError(msg) => AppError::Database(msg),
        },
    }
}

/// Create a slot offer for a freed appointment slot
pub async fn create_offer(
    State(config): State<Arc<AppConfig>>,
    Json(request): Json<CreateOfferRequest>,
) -> Result<Json<Value>, AppError> {
    info!(
        "Slot offer requested for appointment {}",
        request.appointment_id
    );

    let service = SlotOfferService::from_config(&config);
    let offer = service.create_offer(request).await.map_err(|e| {
        error!("Failed to create slot offer: {}", e);
        map_error(e)
    })?;

    Ok(Json(json!({
        "success": true,
        "offer": offer
    })))
}

/// Fetch a slot offer by id
pub async fn get_offer(
    State(config): State<Arc<AppConfig>>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = SlotOfferService::from_config(&config);
    let offer = service.get_offer(offer_id).await.map_err(map_error)?;

    Ok(Json(json!({ "offer": offer })))
}

/// Open a pending offer so invitations can go out
pub async fn open_offer(
    State(config): State<Arc<AppConfig>>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = SlotOfferService::from_config(&config);
    let offer = service
        .open_for_invitations(offer_id)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({ "success": true, "offer": offer })))
}

/// Fan invitations out to eligible waitlist entries
pub async fn dispatch_offer(
    State(config): State<Arc<AppConfig>>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let dispatcher = InvitationDispatchService::from_config(&config);
    let attempts = dispatcher.dispatch(offer_id).await.map_err(|e| {
        error!("Dispatch failed for slot offer {}: {}", offer_id, e);
        map_error(e)
    })?;

    Ok(Json(json!({
        "count": attempts.len(),
        "attempts": attempts
    })))
}

/// Cancel an offer that has not been claimed
pub async fn cancel_offer(
    State(config): State<Arc<AppConfig>>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = SlotOfferService::from_config(&config);
    let offer = service.cancel_offer(offer_id).await.map_err(map_error)?;

    Ok(Json(json!({ "success": true, "offer": offer })))
}

/// Expire an offer whose response deadline has passed
pub async fn expire_offer(
    State(config): State<Arc<AppConfig>>,
    Path(offer_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = SlotOfferService::from_config(&config);
    let offer = service
        .expire_if_past_deadline(offer_id, Utc::now())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({ "offer": offer })))
}

/// Record a patient's accept or decline of an invitation
pub async fn respond_to_invitation(
    State(config): State<Arc<AppConfig>>,
    Path(invitation_id): Path<Uuid>,
    Json(request): Json<RespondRequest>,
) -> Result<Json<Value>, AppError> {
    info!(
        "Response {:?} received for invitation {}",
        request.decision, invitation_id
    );

    let resolver = ClaimResolverService::from_config(&config);
    let outcome = resolver
        .respond(invitation_id, request.decision)
        .await
        .map_err(|e| {
            error!("Failed to resolve invitation {}: {}", invitation_id, e);
            map_error(e)
        })?;

    Ok(Json(json!({
        "won": outcome.won(),
        "outcome": outcome
    })))
}

/// Expire sent invitations and available offers past their deadlines
pub async fn run_sweep(State(config): State<Arc<AppConfig>>) -> Result<Json<Value>, AppError> {
    let dispatcher = InvitationDispatchService::from_config(&config);
    let outcome = dispatcher
        .expire_stale_invitations(Utc::now())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({ "success": true, "sweep": outcome })))
}

/// Operational stats across waitlist, offers and invitations
pub async fn get_stats(State(config): State<Arc<AppConfig>>) -> Result<Json<Value>, AppError> {
    let monitor = RebookingMonitorService::from_config(&config);
    let stats = monitor.stats().await.map_err(map_error)?;

    Ok(Json(json!({ "stats": stats })))
}
