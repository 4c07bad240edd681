use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{EligibilityFilters, JoinWaitlistRequest, WaitlistEntry, WaitlistStatus};
use crate::store::{InMemoryWaitlistStore, SupabaseWaitlistStore, WaitlistStore};
use crate::WaitlistError;

/// Source of truth for who may be invited when a slot frees up.
pub struct WaitlistRegistryService {
    store: Arc<dyn WaitlistStore>,
}

impl WaitlistRegistryService {
    pub fn new(store: Arc<dyn WaitlistStore>) -> Self {
        Self { store }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(Arc::new(SupabaseWaitlistStore::new(config)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryWaitlistStore::new()))
    }

    pub fn store(&self) -> Arc<dyn WaitlistStore> {
        Arc::clone(&self.store)
    }

    /// Register a patient who opted in for an earlier/alternate slot.
    pub async fn join(&self, request: JoinWaitlistRequest) -> Result<WaitlistEntry, WaitlistError> {
        if request.patient_name.trim().is_empty() {
            return Err(WaitlistError::ValidationError(
                "Patient name is required".to_string(),
            ));
        }

        let has_contact = request.email.as_deref().is_some_and(|e| !e.is_empty())
            || request.phone.as_deref().is_some_and(|p| !p.is_empty());
        if !has_contact {
            return Err(WaitlistError::ValidationError(
                "At least one contact channel (email or phone) is required".to_string(),
            ));
        }

        let now = Utc::now();
        let entry = WaitlistEntry {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            patient_name: request.patient_name,
            email: request.email,
            phone: request.phone,
            preference_note: request.preference_note,
            status: WaitlistStatus::Active,
            invitation_count: 0,
            last_invitation_sent_at: None,
            consent_automated_notifications: request.consent_automated_notifications,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_entry(&entry).await?;

        info!("Waitlist entry {} created for patient {}", entry.id, entry.patient_id);
        Ok(entry)
    }

    pub async fn get_entry(&self, entry_id: Uuid) -> Result<WaitlistEntry, WaitlistError> {
        self.store
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| WaitlistError::NotFound(entry_id.to_string()))
    }

    /// Entries eligible for an automated invitation, longest-waiting first.
    ///
    /// The consent gate is absolute; the fatigue cap excludes an entry that
    /// already received `fatigue_max_invitations` invitations until its last
    /// send falls out of the rolling window.
    pub async fn list_eligible(
        &self,
        filters: &EligibilityFilters,
    ) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        let now = Utc::now();
        let window_start = now - ChronoDuration::hours(filters.fatigue_window_hours);

        let candidates = self.store.list_active_consented().await?;
        let total = candidates.len();

        let eligible: Vec<WaitlistEntry> = candidates
            .into_iter()
            .filter(|entry| !Self::is_fatigued(entry, filters, window_start))
            .take(filters.limit)
            .collect();

        debug!(
            "Eligibility scan: {} of {} active consented entries selected (limit {})",
            eligible.len(),
            total,
            filters.limit
        );

        Ok(eligible)
    }

    /// Bump the invitation counter and stamp the send time. Called by the
    /// dispatcher right after an invitation reaches `sent`.
    pub async fn record_invitation_sent(
        &self,
        entry_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), WaitlistError> {
        self.store.record_invitation_sent(entry_id, sent_at).await?;
        debug!("Recorded invitation sent for waitlist entry {}", entry_id);
        Ok(())
    }

    pub async fn mark_scheduled(&self, entry_id: Uuid) -> Result<WaitlistEntry, WaitlistError> {
        self.transition(entry_id, WaitlistStatus::Scheduled).await
    }

    pub async fn mark_contacted(&self, entry_id: Uuid) -> Result<WaitlistEntry, WaitlistError> {
        self.transition(entry_id, WaitlistStatus::Contacted).await
    }

    pub async fn mark_cancelled(&self, entry_id: Uuid) -> Result<WaitlistEntry, WaitlistError> {
        self.transition(entry_id, WaitlistStatus::Cancelled).await
    }

    pub async fn count_by_status(&self) -> Result<HashMap<String, i64>, WaitlistError> {
        self.store.count_by_status().await
    }

    async fn transition(
        &self,
        entry_id: Uuid,
        target: WaitlistStatus,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let entry = self.get_entry(entry_id).await?;

        // Idempotent: re-applying the current status is a no-op.
        if entry.status == target {
            debug!("Waitlist entry {} already {}", entry_id, target);
            return Ok(entry);
        }

        self.store.update_status(entry_id, target.clone()).await?;
        info!("Waitlist entry {} transitioned {} -> {}", entry_id, entry.status, target);

        self.get_entry(entry_id).await
    }

    fn is_fatigued(
        entry: &WaitlistEntry,
        filters: &EligibilityFilters,
        window_start: DateTime<Utc>,
    ) -> bool {
        if entry.invitation_count < filters.fatigue_max_invitations {
            return false;
        }

        match entry.last_invitation_sent_at {
            Some(last_sent) if last_sent >= window_start => {
                warn!(
                    "Waitlist entry {} excluded by fatigue cap ({} invitations)",
                    entry.id, entry.invitation_count
                );
                true
            }
            // Counter is at the cap but the last send fell out of the
            // rolling window, so the entry is contactable again.
            _ => false,
        }
    }
}
