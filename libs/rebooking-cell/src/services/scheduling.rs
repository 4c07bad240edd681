use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::return_representation_headers;
use shared_database::SupabaseClient;

use crate::models::Appointment;
use crate::RebookingError;

/// Scheduling collaborator invoked from the claim winner path. The core
/// only needs to create the replacement appointment and read it back.
#[async_trait]
pub trait SchedulingClient: Send + Sync {
    async fn book_appointment(
        &self,
        patient_id: Uuid,
        slot_start_time: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<Appointment, RebookingError>;

    async fn get_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, RebookingError>;
}

pub struct SupabaseSchedulingClient {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSchedulingClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl SchedulingClient for SupabaseSchedulingClient {
    async fn book_appointment(
        &self,
        patient_id: Uuid,
        slot_start_time: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<Appointment, RebookingError> {
        let now = Utc::now();
        let appointment_data = json!({
            "patient_id": patient_id,
            "appointment_date": slot_start_time.to_rfc3339(),
            "duration_minutes": duration_minutes,
            "status": "confirmed",
            "created_at": now.to_rfc3339(),
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(appointment_data),
                Some(return_representation_headers()),
            )
            .await
            .map_err(|e| RebookingError::SchedulingError(e.to_string()))?;

        let row = result.into_iter().next().ok_or_else(|| {
            RebookingError::SchedulingError("Failed to create appointment".to_string())
        })?;

        let appointment: Appointment = serde_json::from_value(row).map_err(|e| {
            RebookingError::SchedulingError(format!("Failed to parse created appointment: {}", e))
        })?;

        info!(
            "Appointment {} booked for patient {} at {}",
            appointment.id, patient_id, slot_start_time
        );
        Ok(appointment)
    }

    async fn get_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, RebookingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| RebookingError::SchedulingError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => {
                let appointment: Appointment = serde_json::from_value(row).map_err(|e| {
                    RebookingError::SchedulingError(format!("Failed to parse appointment: {}", e))
                })?;
                Ok(Some(appointment))
            }
            None => Ok(None),
        }
    }
}

/// In-memory scheduling collaborator used by tests and local development.
#[derive(Default)]
pub struct InMemorySchedulingClient {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemorySchedulingClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchedulingClient for InMemorySchedulingClient {
    async fn book_appointment(
        &self,
        patient_id: Uuid,
        slot_start_time: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<Appointment, RebookingError> {
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            appointment_date: slot_start_time,
            duration_minutes,
            status: "confirmed".to_string(),
            created_at: Utc::now(),
        };

        let mut appointments = self.appointments.write().await;
        appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn get_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, RebookingError> {
        let appointments = self.appointments.read().await;
        Ok(appointments.get(&appointment_id).cloned())
    }
}
