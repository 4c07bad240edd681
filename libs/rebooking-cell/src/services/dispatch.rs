use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, RebookingConfig};
use waitlist_cell::{EligibilityFilters, WaitlistEntry, WaitlistRegistryService};

use crate::models::{
    DispatchAttempt, DispatchAttemptOutcome, Invitation, InvitationStatus, SlotOffer,
    SlotOfferStatus, SweepOutcome,
};
use crate::services::events::{EventPublisher, RebookingEvent};
use crate::services::notifier::{Notifier, OfferNotification, WebhookNotifier};
use crate::services::offer::SlotOfferService;
use crate::store::OfferStore;
use crate::RebookingError;

/// Fans invitations out to eligible waitlist entries and hands delivery to
/// the notifier. Delivery and state mutation are two phases: an invitation
/// only moves past `pending` after the notifier call has resolved.
pub struct InvitationDispatchService {
    offer_service: Arc<SlotOfferService>,
    registry: Arc<WaitlistRegistryService>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn OfferStore>,
    events: Arc<EventPublisher>,
    config: RebookingConfig,
}

impl InvitationDispatchService {
    pub fn new(
        offer_service: Arc<SlotOfferService>,
        registry: Arc<WaitlistRegistryService>,
        notifier: Arc<dyn Notifier>,
        config: RebookingConfig,
    ) -> Self {
        let store = offer_service.store();
        let events = offer_service.events();
        Self {
            offer_service,
            registry,
            notifier,
            store,
            events,
            config,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(SlotOfferService::from_config(config)),
            Arc::new(WaitlistRegistryService::from_config(config)),
            Arc::new(WebhookNotifier::new(config)),
            config.rebooking.clone(),
        )
    }

    /// Fan out invitations for an `available` offer, up to its remaining
    /// capacity. Invitations stuck in `pending` from an earlier notifier
    /// failure are retried first; they already hold fan-out capacity, so no
    /// new invitation is created for those entries. Notifier failures are
    /// recorded per attempt and never abort the rest of the run.
    pub async fn dispatch(&self, offer_id: Uuid) -> Result<Vec<DispatchAttempt>, RebookingError> {
        let mut offer = self.offer_service.get_offer(offer_id).await?;

        if offer.status != SlotOfferStatus::Available {
            return Err(RebookingError::illegal_state(
                "dispatch",
                format!("offer is {}", offer.status),
            ));
        }

        let existing = self.store.list_invitations_for_offer(offer_id).await?;
        let mut attempts = Vec::new();

        // Retry undelivered invitations from earlier runs.
        for invitation in existing.iter().filter(|i| i.status == InvitationStatus::Pending) {
            let entry = self.registry.get_entry(invitation.waitlist_entry_id).await?;
            attempts.push(self.deliver(&offer, &entry, invitation.clone()).await?);
        }

        let remaining = offer.remaining_invitations();
        if remaining <= 0 {
            // Fully fanned out is a steady state, not a failure.
            debug!("Slot offer {} has no remaining invitation capacity", offer_id);
            return Ok(attempts);
        }

        let selected = self
            .select_entries(&offer, &existing, remaining as usize)
            .await?;
        if selected.is_empty() && attempts.is_empty() {
            info!("No eligible waitlist entries for slot offer {}", offer_id);
            return Ok(attempts);
        }

        for entry in selected {
            match self.offer_service.reserve_invitation_slot(&offer).await {
                Ok(()) => offer.invitation_count += 1,
                Err(RebookingError::CapacityExceeded { max }) => {
                    // A concurrent dispatch won the remaining capacity.
                    warn!(
                        "Slot offer {} reached its cap of {} mid-dispatch",
                        offer_id, max
                    );
                    break;
                }
                Err(e) => return Err(e),
            }

            let now = Utc::now();
            let invitation = Invitation {
                id: Uuid::new_v4(),
                slot_offer_id: offer.id,
                waitlist_entry_id: entry.id,
                status: InvitationStatus::Pending,
                sent_at: None,
                expires_at: offer.expires_at,
                responded_at: None,
                created_at: now,
                updated_at: now,
            };
            self.store.insert_invitation(&invitation).await?;

            attempts.push(self.deliver(&offer, &entry, invitation).await?);
        }

        info!(
            "Dispatch for slot offer {} attempted {} invitations ({} delivered)",
            offer_id,
            attempts.len(),
            attempts
                .iter()
                .filter(|a| a.outcome == DispatchAttemptOutcome::Sent)
                .count()
        );

        Ok(attempts)
    }

    /// Time-driven sweep: expires `sent` invitations past their deadline
    /// and `available` offers past theirs. Safe to run repeatedly and
    /// concurrently with dispatch or claims; a transition that already
    /// happened counts as success.
    pub async fn expire_stale_invitations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, RebookingError> {
        let mut outcome = SweepOutcome::default();

        for invitation in self
            .store
            .list_sent_invitations_expiring_before(now)
            .await?
        {
            let swapped = self
                .store
                .cas_update_invitation_status(
                    invitation.id,
                    InvitationStatus::Sent,
                    InvitationStatus::Expired,
                )
                .await?;

            if swapped {
                outcome.invitations_expired += 1;
                self.events.publish(RebookingEvent::InvitationExpired {
                    invitation_id: invitation.id,
                });
            }
        }

        for offer in self
            .store
            .list_available_offers_expiring_before(now)
            .await?
        {
            let expired = self
                .offer_service
                .expire_if_past_deadline(offer.id, now)
                .await?;
            if expired.status == SlotOfferStatus::Expired {
                outcome.offers_expired += 1;
            }
        }

        if outcome.invitations_expired > 0 || outcome.offers_expired > 0 {
            info!(
                "Timeout sweep expired {} invitations and {} offers",
                outcome.invitations_expired, outcome.offers_expired
            );
        }

        Ok(outcome)
    }

    /// Eligible entries in fairness order, minus anyone already holding a
    /// live invitation for this offer.
    async fn select_entries(
        &self,
        offer: &SlotOffer,
        existing: &[Invitation],
        remaining: usize,
    ) -> Result<Vec<WaitlistEntry>, RebookingError> {
        let blocked: HashSet<Uuid> = existing
            .iter()
            .filter(|i| !i.status.is_terminal())
            .map(|i| i.waitlist_entry_id)
            .collect();

        let filters = EligibilityFilters::new(
            remaining + blocked.len(),
            self.config.fatigue_max_invitations,
            self.config.fatigue_window_hours,
        );

        let eligible = self.registry.list_eligible(&filters).await?;
        let offer_id = offer.id;
        debug!(
            "Selecting up to {} of {} eligible entries for offer {}",
            remaining,
            eligible.len(),
            offer_id
        );

        Ok(eligible
            .into_iter()
            .filter(|entry| !blocked.contains(&entry.id))
            .take(remaining)
            .collect())
    }

    /// Two-phase delivery: call the notifier, then mutate state based on
    /// the outcome. A failed delivery leaves the invitation `pending` for a
    /// later dispatch run.
    async fn deliver(
        &self,
        offer: &SlotOffer,
        entry: &WaitlistEntry,
        invitation: Invitation,
    ) -> Result<DispatchAttempt, RebookingError> {
        let delivery = match entry.preferred_channel() {
            Some(channel) => {
                let notification = OfferNotification {
                    invitation_id: invitation.id,
                    slot_offer_id: offer.id,
                    patient_name: entry.patient_name.clone(),
                    slot_start_time: offer.slot_start_time,
                    duration_minutes: offer.duration_minutes,
                    expires_at: offer.expires_at,
                };
                self.notifier.notify(&channel, &notification).await
            }
            None => Err(RebookingError::NotifierFailure(format!(
                "Waitlist entry {} has no contact channel on file",
                entry.id
            ))),
        };

        let outcome = match delivery {
            Ok(()) => {
                // The counter bump and the event belong to whichever run
                // wins this swap; a concurrent dispatch may have delivered
                // the same invitation already.
                let swapped = self
                    .store
                    .cas_update_invitation_status(
                        invitation.id,
                        InvitationStatus::Pending,
                        InvitationStatus::Sent,
                    )
                    .await?;

                if swapped {
                    self.registry
                        .record_invitation_sent(entry.id, Utc::now())
                        .await?;

                    self.events.publish(RebookingEvent::InvitationSent {
                        invitation_id: invitation.id,
                        offer_id: offer.id,
                        waitlist_entry_id: entry.id,
                    });
                } else {
                    debug!(
                        "Invitation {} was delivered by a concurrent dispatch run",
                        invitation.id
                    );
                }

                DispatchAttemptOutcome::Sent
            }
            Err(e) => {
                warn!(
                    "Notifier failed for invitation {} (entry {}): {}",
                    invitation.id, entry.id, e
                );
                DispatchAttemptOutcome::NotifierFailed(e.to_string())
            }
        };

        let invitation = self
            .store
            .get_invitation(invitation.id)
            .await?
            .unwrap_or(invitation);

        Ok(DispatchAttempt { invitation, outcome })
    }
}
