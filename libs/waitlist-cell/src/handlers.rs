use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::AppError;

use crate::models::{EligibilityFilters, JoinWaitlistRequest};
use crate::services::WaitlistRegistryService;
use crate::WaitlistError;

fn map_error(e: WaitlistError) -> AppError {
    match e {
        WaitlistError::NotFound(msg) => AppError::NotFound(msg),
        WaitlistError::ValidationError(msg) => AppError::ValidationError(msg),
        WaitlistError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Register a patient on the waitlist
pub async fn join_waitlist(
    State(config): State<Arc<AppConfig>>,
    Json(request): Json<JoinWaitlistRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Waitlist join request for patient {}", request.patient_id);

    let registry = WaitlistRegistryService::from_config(&config);
    let entry = registry.join(request).await.map_err(|e| {
        error!("Failed to create waitlist entry: {}", e);
        map_error(e)
    })?;

    Ok(Json(json!({
        "success": true,
        "entry": entry
    })))
}

/// List entries currently eligible for automated invitations
pub async fn list_eligible_entries(
    State(config): State<Arc<AppConfig>>,
) -> Result<Json<Value>, AppError> {
    let registry = WaitlistRegistryService::from_config(&config);
    let filters = EligibilityFilters::new(
        50,
        config.rebooking.fatigue_max_invitations,
        config.rebooking.fatigue_window_hours,
    );

    let entries = registry.list_eligible(&filters).await.map_err(|e| {
        error!("Failed to list eligible entries: {}", e);
        map_error(e)
    })?;

    Ok(Json(json!({
        "count": entries.len(),
        "entries": entries
    })))
}

/// Mark an entry as scheduled (rebooked into a slot)
pub async fn mark_entry_scheduled(
    State(config): State<Arc<AppConfig>>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let registry = WaitlistRegistryService::from_config(&config);
    let entry = registry.mark_scheduled(entry_id).await.map_err(map_error)?;

    Ok(Json(json!({ "success": true, "entry": entry })))
}

/// Mark an entry as contacted outside the automated flow
pub async fn mark_entry_contacted(
    State(config): State<Arc<AppConfig>>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let registry = WaitlistRegistryService::from_config(&config);
    let entry = registry.mark_contacted(entry_id).await.map_err(map_error)?;

    Ok(Json(json!({ "success": true, "entry": entry })))
}

/// Take an entry off the waitlist (status transition, never a delete)
pub async fn cancel_entry(
    State(config): State<Arc<AppConfig>>,
    Path(entry_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let registry = WaitlistRegistryService::from_config(&config);
    let entry = registry.mark_cancelled(entry_id).await.map_err(map_error)?;

    Ok(Json(json!({ "success": true, "entry": entry })))
}
