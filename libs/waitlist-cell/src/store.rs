use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::return_representation_headers;
use shared_database::SupabaseClient;

use crate::models::{WaitlistEntry, WaitlistStatus};
use crate::WaitlistError;

/// Persistence seam for the waitlist registry. Implemented against Supabase
/// in production and in memory for tests and local development.
#[async_trait]
pub trait WaitlistStore: Send + Sync {
    async fn insert_entry(&self, entry: &WaitlistEntry) -> Result<(), WaitlistError>;

    async fn get_entry(&self, entry_id: Uuid) -> Result<Option<WaitlistEntry>, WaitlistError>;

    /// Active, consented entries ordered oldest `created_at` first. Fatigue
    /// filtering is applied by the registry service on top of this.
    async fn list_active_consented(&self) -> Result<Vec<WaitlistEntry>, WaitlistError>;

    async fn update_status(
        &self,
        entry_id: Uuid,
        status: WaitlistStatus,
    ) -> Result<(), WaitlistError>;

    /// Increments the invitation counter and stamps the send time in one
    /// update.
    async fn record_invitation_sent(
        &self,
        entry_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), WaitlistError>;

    async fn count_by_status(&self) -> Result<HashMap<String, i64>, WaitlistError>;
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

pub struct SupabaseWaitlistStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseWaitlistStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch_entry(&self, entry_id: Uuid) -> Result<Option<WaitlistEntry>, WaitlistError> {
        let path = format!("/rest/v1/waitlist_entries?id=eq.{}", entry_id);
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| WaitlistError::DatabaseError(e.to_string()))?;

        match result.into_iter().next() {
            Some(row) => {
                let entry: WaitlistEntry = serde_json::from_value(row).map_err(|e| {
                    WaitlistError::DatabaseError(format!("Failed to parse waitlist entry: {}", e))
                })?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl WaitlistStore for SupabaseWaitlistStore {
    async fn insert_entry(&self, entry: &WaitlistEntry) -> Result<(), WaitlistError> {
        let body = serde_json::to_value(entry)
            .map_err(|e| WaitlistError::DatabaseError(e.to_string()))?;

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/waitlist_entries",
                Some(body),
                Some(return_representation_headers()),
            )
            .await
            .map_err(|e| WaitlistError::DatabaseError(e.to_string()))?;

        debug!("Waitlist entry {} persisted", entry.id);
        Ok(())
    }

    async fn get_entry(&self, entry_id: Uuid) -> Result<Option<WaitlistEntry>, WaitlistError> {
        self.fetch_entry(entry_id).await
    }

    async fn list_active_consented(&self) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        let path = format!(
            "/rest/v1/waitlist_entries?status=eq.{}&consent_automated_notifications=eq.true&order=created_at.asc",
            WaitlistStatus::Active
        );

        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| WaitlistError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<WaitlistEntry>, _>>()
            .map_err(|e| {
                WaitlistError::DatabaseError(format!("Failed to parse waitlist entries: {}", e))
            })
    }

    async fn update_status(
        &self,
        entry_id: Uuid,
        status: WaitlistStatus,
    ) -> Result<(), WaitlistError> {
        let path = format!("/rest/v1/waitlist_entries?id=eq.{}", entry_id);
        let body = json!({
            "status": status.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(body),
                Some(return_representation_headers()),
            )
            .await
            .map_err(|e| WaitlistError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(WaitlistError::NotFound(entry_id.to_string()));
        }

        Ok(())
    }

    async fn record_invitation_sent(
        &self,
        entry_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), WaitlistError> {
        // Guarded increment: the count filter makes the PATCH conditional,
        // so a concurrent bump is never overwritten. Zero affected rows
        // means the counter moved; re-read and try again.
        for _ in 0..3 {
            let current = self
                .fetch_entry(entry_id)
                .await?
                .ok_or_else(|| WaitlistError::NotFound(entry_id.to_string()))?;

            let path = format!(
                "/rest/v1/waitlist_entries?id=eq.{}&invitation_count=eq.{}",
                entry_id, current.invitation_count
            );
            let body = json!({
                "invitation_count": current.invitation_count + 1,
                "last_invitation_sent_at": sent_at.to_rfc3339(),
                "updated_at": Utc::now().to_rfc3339(),
            });

            let result: Vec<Value> = self
                .supabase
                .request_with_headers(
                    Method::PATCH,
                    &path,
                    Some(body),
                    Some(return_representation_headers()),
                )
                .await
                .map_err(|e| WaitlistError::DatabaseError(e.to_string()))?;

            if !result.is_empty() {
                return Ok(());
            }
        }

        Err(WaitlistError::DatabaseError(format!(
            "invitation counter for entry {} kept changing",
            entry_id
        )))
    }

    async fn count_by_status(&self) -> Result<HashMap<String, i64>, WaitlistError> {
        let result: Vec<Value> = self
            .supabase
            .request(Method::GET, "/rest/v1/waitlist_entries?select=status", None)
            .await
            .map_err(|e| WaitlistError::DatabaseError(e.to_string()))?;

        let mut counts = HashMap::new();
        for row in result {
            if let Some(status) = row["status"].as_str() {
                *counts.entry(status.to_string()).or_insert(0) += 1;
            }
        }

        Ok(counts)
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

/// In-memory store used by tests and local development.
#[derive(Default)]
pub struct InMemoryWaitlistStore {
    entries: RwLock<HashMap<Uuid, WaitlistEntry>>,
}

impl InMemoryWaitlistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WaitlistStore for InMemoryWaitlistStore {
    async fn insert_entry(&self, entry: &WaitlistEntry) -> Result<(), WaitlistError> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get_entry(&self, entry_id: Uuid) -> Result<Option<WaitlistEntry>, WaitlistError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&entry_id).cloned())
    }

    async fn list_active_consented(&self) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        let entries = self.entries.read().await;
        let mut eligible: Vec<WaitlistEntry> = entries
            .values()
            .filter(|e| e.status == WaitlistStatus::Active && e.consent_automated_notifications)
            .cloned()
            .collect();
        eligible.sort_by_key(|e| e.created_at);
        Ok(eligible)
    }

    async fn update_status(
        &self,
        entry_id: Uuid,
        status: WaitlistStatus,
    ) -> Result<(), WaitlistError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| WaitlistError::NotFound(entry_id.to_string()))?;
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn record_invitation_sent(
        &self,
        entry_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), WaitlistError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| WaitlistError::NotFound(entry_id.to_string()))?;
        entry.invitation_count += 1;
        entry.last_invitation_sent_at = Some(sent_at);
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn count_by_status(&self) -> Result<HashMap<String, i64>, WaitlistError> {
        let entries = self.entries.read().await;
        let mut counts = HashMap::new();
        for entry in entries.values() {
            *counts.entry(entry.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
