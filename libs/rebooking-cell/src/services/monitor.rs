use std::sync::Arc;

use tracing::debug;

use shared_config::AppConfig;
use waitlist_cell::WaitlistRegistryService;

use crate::models::RebookingStats;
use crate::services::offer::SlotOfferService;
use crate::store::OfferStore;
use crate::RebookingError;

const RECENT_INVITATIONS_LIMIT: usize = 20;

/// Read-only operational view over the rebooking pipeline.
pub struct RebookingMonitorService {
    registry: Arc<WaitlistRegistryService>,
    store: Arc<dyn OfferStore>,
}

impl RebookingMonitorService {
    pub fn new(offer_service: Arc<SlotOfferService>, registry: Arc<WaitlistRegistryService>) -> Self {
        Self {
            registry,
            store: offer_service.store(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(SlotOfferService::from_config(config)),
            Arc::new(WaitlistRegistryService::from_config(config)),
        )
    }

    pub async fn stats(&self) -> Result<RebookingStats, RebookingError> {
        let waitlist_by_status = self.registry.count_by_status().await?;
        let offers_by_status = self.store.count_offers_by_status().await?;
        let invitations_by_status = self.store.count_invitations_by_status().await?;
        let recent_invitations = self
            .store
            .recent_invitations(RECENT_INVITATIONS_LIMIT)
            .await?;

        debug!(
            "Collected rebooking stats ({} offer buckets, {} invitation buckets)",
            offers_by_status.len(),
            invitations_by_status.len()
        );

        Ok(RebookingStats {
            waitlist_by_status,
            offers_by_status,
            invitations_by_status,
            recent_invitations,
        })
    }
}
