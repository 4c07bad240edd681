use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::return_representation_headers;
use shared_database::SupabaseClient;

use crate::models::{Invitation, InvitationStatus, SlotOffer, SlotOfferStatus};
use crate::RebookingError;

/// Persistence seam for offers and invitations. The compare-and-swap
/// methods are the concurrency contract: they return `true` only when the
/// row was in the expected status and is now in the new one.
#[async_trait]
pub trait OfferStore: Send + Sync {
    async fn insert_offer(&self, offer: &SlotOffer) -> Result<(), RebookingError>;

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<SlotOffer>, RebookingError>;

    async fn get_offer_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<SlotOffer>, RebookingError>;

    /// Atomic conditional status update; the arbitration primitive for the
    /// claim race.
    async fn cas_update_offer_status(
        &self,
        offer_id: Uuid,
        expected: SlotOfferStatus,
        new: SlotOfferStatus,
    ) -> Result<bool, RebookingError>;

    /// Bumps the fan-out counter only if it currently equals `expected_count`
    /// and stays within `max`. Returns `false` when the guard fails.
    async fn cas_increment_invitation_count(
        &self,
        offer_id: Uuid,
        expected_count: i32,
        max: i32,
    ) -> Result<bool, RebookingError>;

    async fn record_rebooked_appointment(
        &self,
        offer_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<(), RebookingError>;

    async fn list_available_offers_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<SlotOffer>, RebookingError>;

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), RebookingError>;

    async fn get_invitation(
        &self,
        invitation_id: Uuid,
    ) -> Result<Option<Invitation>, RebookingError>;

    async fn list_invitations_for_offer(
        &self,
        offer_id: Uuid,
    ) -> Result<Vec<Invitation>, RebookingError>;

    /// Conditional invitation transition. Implementations stamp `sent_at`
    /// when the new status is `sent` and `responded_at` when it is
    /// `accepted` or `declined`.
    async fn cas_update_invitation_status(
        &self,
        invitation_id: Uuid,
        expected: InvitationStatus,
        new: InvitationStatus,
    ) -> Result<bool, RebookingError>;

    async fn list_sent_invitations_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, RebookingError>;

    async fn count_offers_by_status(&self) -> Result<HashMap<String, i64>, RebookingError>;

    async fn count_invitations_by_status(&self) -> Result<HashMap<String, i64>, RebookingError>;

    async fn recent_invitations(&self, limit: usize) -> Result<Vec<Invitation>, RebookingError>;
}

fn transition_stamps(new: &InvitationStatus, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let sent_at = matches!(new, InvitationStatus::Sent).then_some(now);
    let responded_at =
        matches!(new, InvitationStatus::Accepted | InvitationStatus::Declined).then_some(now);
    (sent_at, responded_at)
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

pub struct SupabaseOfferStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseOfferStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn get_rows(&self, path: &str) -> Result<Vec<Value>, RebookingError> {
        self.supabase
            .request(Method::GET, path, None)
            .await
            .map_err(|e| RebookingError::DatabaseError(e.to_string()))
    }

    async fn patch_rows(&self, path: &str, body: Value) -> Result<Vec<Value>, RebookingError> {
        self.supabase
            .request_with_headers(
                Method::PATCH,
                path,
                Some(body),
                Some(return_representation_headers()),
            )
            .await
            .map_err(|e| RebookingError::DatabaseError(e.to_string()))
    }

    fn parse_offers(rows: Vec<Value>) -> Result<Vec<SlotOffer>, RebookingError> {
        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<SlotOffer>, _>>()
            .map_err(|e| RebookingError::DatabaseError(format!("Failed to parse slot offer: {}", e)))
    }

    fn parse_invitations(rows: Vec<Value>) -> Result<Vec<Invitation>, RebookingError> {
        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Invitation>, _>>()
            .map_err(|e| RebookingError::DatabaseError(format!("Failed to parse invitation: {}", e)))
    }
}

#[async_trait]
impl OfferStore for SupabaseOfferStore {
    async fn insert_offer(&self, offer: &SlotOffer) -> Result<(), RebookingError> {
        let body = serde_json::to_value(offer)
            .map_err(|e| RebookingError::DatabaseError(e.to_string()))?;

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/slot_offers",
                Some(body),
                Some(return_representation_headers()),
            )
            .await
            .map_err(|e| RebookingError::DatabaseError(e.to_string()))?;

        debug!("Slot offer {} persisted", offer.id);
        Ok(())
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<SlotOffer>, RebookingError> {
        let path = format!("/rest/v1/slot_offers?id=eq.{}", offer_id);
        Ok(Self::parse_offers(self.get_rows(&path).await?)?.into_iter().next())
    }

    async fn get_offer_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<SlotOffer>, RebookingError> {
        let path = format!("/rest/v1/slot_offers?appointment_id=eq.{}", appointment_id);
        Ok(Self::parse_offers(self.get_rows(&path).await?)?.into_iter().next())
    }

    async fn cas_update_offer_status(
        &self,
        offer_id: Uuid,
        expected: SlotOfferStatus,
        new: SlotOfferStatus,
    ) -> Result<bool, RebookingError> {
        // The status filter makes this a conditional update: zero returned
        // rows means another caller changed the status first.
        let path = format!(
            "/rest/v1/slot_offers?id=eq.{}&status=eq.{}",
            offer_id, expected
        );
        let body = json!({
            "status": new.to_string(),
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows = self.patch_rows(&path, body).await?;
        Ok(!rows.is_empty())
    }

    async fn cas_increment_invitation_count(
        &self,
        offer_id: Uuid,
        expected_count: i32,
        max: i32,
    ) -> Result<bool, RebookingError> {
        if expected_count >= max {
            return Ok(false);
        }

        let path = format!(
            "/rest/v1/slot_offers?id=eq.{}&invitation_count=eq.{}",
            offer_id, expected_count
        );
        let body = json!({
            "invitation_count": expected_count + 1,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows = self.patch_rows(&path, body).await?;
        Ok(!rows.is_empty())
    }

    async fn record_rebooked_appointment(
        &self,
        offer_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<(), RebookingError> {
        let path = format!("/rest/v1/slot_offers?id=eq.{}", offer_id);
        let body = json!({
            "rebooked_appointment_id": appointment_id,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let rows = self.patch_rows(&path, body).await?;
        if rows.is_empty() {
            return Err(RebookingError::NotFound(offer_id.to_string()));
        }
        Ok(())
    }

    async fn list_available_offers_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<SlotOffer>, RebookingError> {
        let encoded = urlencoding::encode(&deadline.to_rfc3339()).into_owned();
        let path = format!(
            "/rest/v1/slot_offers?status=eq.{}&expires_at=lt.{}",
            SlotOfferStatus::Available,
            encoded
        );
        Self::parse_offers(self.get_rows(&path).await?)
    }

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), RebookingError> {
        let body = serde_json::to_value(invitation)
            .map_err(|e| RebookingError::DatabaseError(e.to_string()))?;

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/invitations",
                Some(body),
                Some(return_representation_headers()),
            )
            .await
            .map_err(|e| RebookingError::DatabaseError(e.to_string()))?;

        debug!("Invitation {} persisted", invitation.id);
        Ok(())
    }

    async fn get_invitation(
        &self,
        invitation_id: Uuid,
    ) -> Result<Option<Invitation>, RebookingError> {
        let path = format!("/rest/v1/invitations?id=eq.{}", invitation_id);
        Ok(Self::parse_invitations(self.get_rows(&path).await?)?.into_iter().next())
    }

    async fn list_invitations_for_offer(
        &self,
        offer_id: Uuid,
    ) -> Result<Vec<Invitation>, RebookingError> {
        let path = format!("/rest/v1/invitations?slot_offer_id=eq.{}", offer_id);
        Self::parse_invitations(self.get_rows(&path).await?)
    }

    async fn cas_update_invitation_status(
        &self,
        invitation_id: Uuid,
        expected: InvitationStatus,
        new: InvitationStatus,
    ) -> Result<bool, RebookingError> {
        let now = Utc::now();
        let (sent_at, responded_at) = transition_stamps(&new, now);

        let mut body = serde_json::Map::new();
        body.insert("status".to_string(), json!(new.to_string()));
        body.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        if let Some(sent_at) = sent_at {
            body.insert("sent_at".to_string(), json!(sent_at.to_rfc3339()));
        }
        if let Some(responded_at) = responded_at {
            body.insert("responded_at".to_string(), json!(responded_at.to_rfc3339()));
        }

        let path = format!(
            "/rest/v1/invitations?id=eq.{}&status=eq.{}",
            invitation_id, expected
        );

        let rows = self.patch_rows(&path, Value::Object(body)).await?;
        Ok(!rows.is_empty())
    }

    async fn list_sent_invitations_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, RebookingError> {
        let encoded = urlencoding::encode(&deadline.to_rfc3339()).into_owned();
        let path = format!(
            "/rest/v1/invitations?status=eq.{}&expires_at=lt.{}",
            InvitationStatus::Sent,
            encoded
        );
        Self::parse_invitations(self.get_rows(&path).await?)
    }

    async fn count_offers_by_status(&self) -> Result<HashMap<String, i64>, RebookingError> {
        let rows = self.get_rows("/rest/v1/slot_offers?select=status").await?;
        let mut counts = HashMap::new();
        for row in rows {
            if let Some(status) = row["status"].as_str() {
                *counts.entry(status.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn count_invitations_by_status(&self) -> Result<HashMap<String, i64>, RebookingError> {
        let rows = self.get_rows("/rest/v1/invitations?select=status").await?;
        let mut counts = HashMap::new();
        for row in rows {
            if let Some(status) = row["status"].as_str() {
                *counts.entry(status.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn recent_invitations(&self, limit: usize) -> Result<Vec<Invitation>, RebookingError> {
        let path = format!(
            "/rest/v1/invitations?order=updated_at.desc&limit={}",
            limit
        );
        Self::parse_invitations(self.get_rows(&path).await?)
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
struct MemoryState {
    offers: HashMap<Uuid, SlotOffer>,
    invitations: HashMap<Uuid, Invitation>,
}

/// In-memory store used by tests and local development. A single lock
/// guards both maps, so the CAS methods are atomic.
#[derive(Default)]
pub struct InMemoryOfferStore {
    state: Mutex<MemoryState>,
}

impl InMemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OfferStore for InMemoryOfferStore {
    async fn insert_offer(&self, offer: &SlotOffer) -> Result<(), RebookingError> {
        let mut state = self.state.lock().await;
        state.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<SlotOffer>, RebookingError> {
        let state = self.state.lock().await;
        Ok(state.offers.get(&offer_id).cloned())
    }

    async fn get_offer_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<SlotOffer>, RebookingError> {
        let state = self.state.lock().await;
        Ok(state
            .offers
            .values()
            .find(|o| o.appointment_id == appointment_id)
            .cloned())
    }

    async fn cas_update_offer_status(
        &self,
        offer_id: Uuid,
        expected: SlotOfferStatus,
        new: SlotOfferStatus,
    ) -> Result<bool, RebookingError> {
        let mut state = self.state.lock().await;
        let offer = state
            .offers
            .get_mut(&offer_id)
            .ok_or_else(|| RebookingError::NotFound(offer_id.to_string()))?;

        if offer.status != expected {
            return Ok(false);
        }

        offer.status = new;
        offer.updated_at = Utc::now();
        Ok(true)
    }

    async fn cas_increment_invitation_count(
        &self,
        offer_id: Uuid,
        expected_count: i32,
        max: i32,
    ) -> Result<bool, RebookingError> {
        let mut state = self.state.lock().await;
        let offer = state
            .offers
            .get_mut(&offer_id)
            .ok_or_else(|| RebookingError::NotFound(offer_id.to_string()))?;

        if offer.invitation_count != expected_count || expected_count >= max {
            return Ok(false);
        }

        offer.invitation_count += 1;
        offer.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_rebooked_appointment(
        &self,
        offer_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<(), RebookingError> {
        let mut state = self.state.lock().await;
        let offer = state
            .offers
            .get_mut(&offer_id)
            .ok_or_else(|| RebookingError::NotFound(offer_id.to_string()))?;

        offer.rebooked_appointment_id = Some(appointment_id);
        offer.updated_at = Utc::now();
        Ok(())
    }

    async fn list_available_offers_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<SlotOffer>, RebookingError> {
        let state = self.state.lock().await;
        Ok(state
            .offers
            .values()
            .filter(|o| o.status == SlotOfferStatus::Available && o.expires_at < deadline)
            .cloned()
            .collect())
    }

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), RebookingError> {
        let mut state = self.state.lock().await;
        state.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn get_invitation(
        &self,
        invitation_id: Uuid,
    ) -> Result<Option<Invitation>, RebookingError> {
        let state = self.state.lock().await;
        Ok(state.invitations.get(&invitation_id).cloned())
    }

    async fn list_invitations_for_offer(
        &self,
        offer_id: Uuid,
    ) -> Result<Vec<Invitation>, RebookingError> {
        let state = self.state.lock().await;
        let mut invitations: Vec<Invitation> = state
            .invitations
            .values()
            .filter(|i| i.slot_offer_id == offer_id)
            .cloned()
            .collect();
        invitations.sort_by_key(|i| i.created_at);
        Ok(invitations)
    }

    async fn cas_update_invitation_status(
        &self,
        invitation_id: Uuid,
        expected: InvitationStatus,
        new: InvitationStatus,
    ) -> Result<bool, RebookingError> {
        let mut state = self.state.lock().await;
        let invitation = state
            .invitations
            .get_mut(&invitation_id)
            .ok_or_else(|| RebookingError::NotFound(invitation_id.to_string()))?;

        if invitation.status != expected {
            return Ok(false);
        }

        let now = Utc::now();
        let (sent_at, responded_at) = transition_stamps(&new, now);

        invitation.status = new;
        invitation.updated_at = now;
        if sent_at.is_some() {
            invitation.sent_at = sent_at;
        }
        if responded_at.is_some() {
            invitation.responded_at = responded_at;
        }

        Ok(true)
    }

    async fn list_sent_invitations_expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, RebookingError> {
        let state = self.state.lock().await;
        Ok(state
            .invitations
            .values()
            .filter(|i| i.status == InvitationStatus::Sent && i.expires_at < deadline)
            .cloned()
            .collect())
    }

    async fn count_offers_by_status(&self) -> Result<HashMap<String, i64>, RebookingError> {
        let state = self.state.lock().await;
        let mut counts = HashMap::new();
        for offer in state.offers.values() {
            *counts.entry(offer.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_invitations_by_status(&self) -> Result<HashMap<String, i64>, RebookingError> {
        let state = self.state.lock().await;
        let mut counts = HashMap::new();
        for invitation in state.invitations.values() {
            *counts.entry(invitation.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn recent_invitations(&self, limit: usize) -> Result<Vec<Invitation>, RebookingError> {
        let state = self.state.lock().await;
        let mut invitations: Vec<Invitation> = state.invitations.values().cloned().collect();
        invitations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        invitations.truncate(limit);
        Ok(invitations)
    }
}
