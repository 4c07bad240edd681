use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::{AppConfig, RebookingConfig};

use crate::models::{
    Appointment, CreateOfferRequest, Invitation, InvitationStatus, SlotOffer, SlotOfferStatus,
};
use crate::services::events::{EventPublisher, RebookingEvent};
use crate::services::scheduling::{SchedulingClient, SupabaseSchedulingClient};
use crate::store::{OfferStore, SupabaseOfferStore};
use crate::RebookingError;

/// Owns the slot offer lifecycle and the invitation fan-out cap.
pub struct SlotOfferService {
    store: Arc<dyn OfferStore>,
    scheduling: Arc<dyn SchedulingClient>,
    events: Arc<EventPublisher>,
    defaults: RebookingConfig,
}

impl SlotOfferService {
    pub fn new(
        store: Arc<dyn OfferStore>,
        scheduling: Arc<dyn SchedulingClient>,
        events: Arc<EventPublisher>,
        defaults: RebookingConfig,
    ) -> Self {
        Self {
            store,
            scheduling,
            events,
            defaults,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(SupabaseOfferStore::new(config)),
            Arc::new(SupabaseSchedulingClient::new(config)),
            Arc::new(EventPublisher::new()),
            config.rebooking.clone(),
        )
    }

    pub fn store(&self) -> Arc<dyn OfferStore> {
        Arc::clone(&self.store)
    }

    pub fn events(&self) -> Arc<EventPublisher> {
        Arc::clone(&self.events)
    }

    /// Create an offer for a freed appointment slot. The offer starts in
    /// `pending`; it accepts invitations only after `open_for_invitations`.
    pub async fn create_offer(
        &self,
        request: CreateOfferRequest,
    ) -> Result<SlotOffer, RebookingError> {
        let now = Utc::now();

        if request.candidate_slots.is_empty() {
            return Err(RebookingError::InvalidSlot(
                "At least one candidate time slot is required".to_string(),
            ));
        }

        // Earliest candidate still in the future wins.
        let slot_start_time = request
            .candidate_slots
            .iter()
            .filter(|slot| **slot > now)
            .min()
            .copied()
            .ok_or_else(|| {
                RebookingError::InvalidSlot("No candidate time slot is in the future".to_string())
            })?;

        if request.duration_minutes <= 0 {
            return Err(RebookingError::InvalidSlot(
                "Slot duration must be positive".to_string(),
            ));
        }

        let expires_in_hours = request
            .expires_in_hours
            .unwrap_or(self.defaults.default_offer_expiry_hours);
        if expires_in_hours <= 0 {
            return Err(RebookingError::InvalidSlot(
                "Offer expiry must be a positive number of hours".to_string(),
            ));
        }

        let max_invitations = request
            .max_invitations
            .unwrap_or(self.defaults.default_max_invitations);
        if max_invitations <= 0 {
            return Err(RebookingError::InvalidSlot(
                "Invitation cap must be positive".to_string(),
            ));
        }

        // One offer per freed appointment.
        if let Some(existing) = self
            .store
            .get_offer_by_appointment(request.appointment_id)
            .await?
        {
            return Err(RebookingError::illegal_state(
                "create_offer",
                format!(
                    "appointment {} already has offer {} ({})",
                    request.appointment_id, existing.id, existing.status
                ),
            ));
        }

        let offer = SlotOffer {
            id: Uuid::new_v4(),
            appointment_id: request.appointment_id,
            slot_start_time,
            duration_minutes: request.duration_minutes,
            status: SlotOfferStatus::Pending,
            invitation_count: 0,
            max_invitations,
            expires_at: now + ChronoDuration::hours(expires_in_hours),
            rebooked_appointment_id: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_offer(&offer).await?;
        self.events.publish(RebookingEvent::OfferCreated {
            offer_id: offer.id,
            appointment_id: offer.appointment_id,
        });

        info!(
            "Slot offer {} created for appointment {} (slot {}, cap {})",
            offer.id, offer.appointment_id, offer.slot_start_time, offer.max_invitations
        );
        Ok(offer)
    }

    /// Read back a previously booked appointment, used when a settled
    /// accept is replayed.
    pub async fn lookup_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, RebookingError> {
        self.scheduling.get_appointment(appointment_id).await
    }

    pub async fn get_offer(&self, offer_id: Uuid) -> Result<SlotOffer, RebookingError> {
        self.store
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| RebookingError::NotFound(format!("slot offer {}", offer_id)))
    }

    /// `pending -> available`; the only transition that admits invitations.
    pub async fn open_for_invitations(&self, offer_id: Uuid) -> Result<SlotOffer, RebookingError> {
        let swapped = self
            .store
            .cas_update_offer_status(offer_id, SlotOfferStatus::Pending, SlotOfferStatus::Available)
            .await?;

        if !swapped {
            let offer = self.get_offer(offer_id).await?;
            return Err(RebookingError::illegal_state(
                "open_for_invitations",
                format!("offer is {}", offer.status),
            ));
        }

        self.events
            .publish(RebookingEvent::OfferOpened { offer_id });
        info!("Slot offer {} opened for invitations", offer_id);

        self.get_offer(offer_id).await
    }

    /// Claim the offer for the winning invitation. The `available ->
    /// claimed` CAS is the arbitration point: under concurrent accepts
    /// exactly one caller gets past it.
    pub async fn close_as_claimed(
        &self,
        offer_id: Uuid,
        winning_invitation_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Appointment, RebookingError> {
        let offer = self.get_offer(offer_id).await?;

        let invitation = self
            .store
            .get_invitation(winning_invitation_id)
            .await?
            .ok_or_else(|| {
                RebookingError::NotFound(format!("invitation {}", winning_invitation_id))
            })?;
        if invitation.slot_offer_id != offer_id {
            return Err(RebookingError::illegal_state(
                "close_as_claimed",
                format!(
                    "invitation {} does not belong to offer {}",
                    winning_invitation_id, offer_id
                ),
            ));
        }

        let won = self
            .store
            .cas_update_offer_status(
                offer_id,
                SlotOfferStatus::Available,
                SlotOfferStatus::Claimed,
            )
            .await?;

        if !won {
            let current = self.get_offer(offer_id).await?;
            return Err(RebookingError::illegal_state(
                "close_as_claimed",
                format!("offer is {}", current.status),
            ));
        }

        // Mark the winner accepted before booking so a claimed offer always
        // has its accepted invitation on record. A timeout sweep may have
        // expired the invitation in the gap; that case is reinstated. Any
        // other settled state means a concurrent response beat this claim,
        // and the offer must be handed back rather than booked.
        let accepted = self
            .store
            .cas_update_invitation_status(
                winning_invitation_id,
                InvitationStatus::Sent,
                InvitationStatus::Accepted,
            )
            .await?;
        if !accepted {
            let raced = self
                .store
                .cas_update_invitation_status(
                    winning_invitation_id,
                    InvitationStatus::Expired,
                    InvitationStatus::Accepted,
                )
                .await?;
            if raced {
                warn!(
                    "Invitation {} was expired by the sweep while winning the claim; reinstated",
                    winning_invitation_id
                );
            } else {
                let current = self
                    .store
                    .get_invitation(winning_invitation_id)
                    .await?
                    .ok_or_else(|| {
                        RebookingError::NotFound(format!("invitation {}", winning_invitation_id))
                    })?;

                if current.status != InvitationStatus::Accepted {
                    let restored = self
                        .store
                        .cas_update_offer_status(
                            offer_id,
                            SlotOfferStatus::Claimed,
                            SlotOfferStatus::Available,
                        )
                        .await?;
                    if !restored {
                        warn!(
                            "Could not hand slot offer {} back after invitation {} settled",
                            offer_id, winning_invitation_id
                        );
                    }
                    return Err(RebookingError::AlreadyResponded(format!(
                        "invitation {} is {}",
                        winning_invitation_id, current.status
                    )));
                }
            }
        }

        let appointment = self
            .scheduling
            .book_appointment(patient_id, offer.slot_start_time, offer.duration_minutes)
            .await?;

        self.store
            .record_rebooked_appointment(offer_id, appointment.id)
            .await?;

        self.events.publish(RebookingEvent::OfferClaimed {
            offer_id,
            winning_invitation_id,
            appointment_id: appointment.id,
        });

        info!(
            "Slot offer {} claimed by invitation {} (appointment {})",
            offer_id, winning_invitation_id, appointment.id
        );
        Ok(appointment)
    }

    /// `available -> expired` once the deadline has passed and nobody
    /// accepted. Idempotent: a terminal offer is returned unchanged.
    pub async fn expire_if_past_deadline(
        &self,
        offer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SlotOffer, RebookingError> {
        let offer = self.get_offer(offer_id).await?;

        if offer.status.is_terminal() {
            debug!("Slot offer {} already terminal ({})", offer_id, offer.status);
            return Ok(offer);
        }

        if offer.status != SlotOfferStatus::Available || !offer.is_past_deadline(now) {
            return Ok(offer);
        }

        if self.has_accepted_invitation(&offer).await? {
            warn!(
                "Slot offer {} past deadline but holds an accepted invitation; not expiring",
                offer_id
            );
            return Ok(offer);
        }

        let swapped = self
            .store
            .cas_update_offer_status(
                offer_id,
                SlotOfferStatus::Available,
                SlotOfferStatus::Expired,
            )
            .await?;

        if swapped {
            self.events
                .publish(RebookingEvent::OfferExpired { offer_id });
            info!("Slot offer {} expired", offer_id);
        }
        // A lost CAS means a claim or another sweep got there first; both
        // are success from the expiry's point of view.

        self.get_offer(offer_id).await
    }

    /// `pending|available -> cancelled`.
    pub async fn cancel_offer(&self, offer_id: Uuid) -> Result<SlotOffer, RebookingError> {
        let offer = self.get_offer(offer_id).await?;

        if offer.status == SlotOfferStatus::Cancelled {
            return Ok(offer);
        }

        if !offer.status.can_transition_to(&SlotOfferStatus::Cancelled) {
            return Err(RebookingError::illegal_state(
                "cancel_offer",
                format!("offer is {}", offer.status),
            ));
        }

        let swapped = self
            .store
            .cas_update_offer_status(offer_id, offer.status.clone(), SlotOfferStatus::Cancelled)
            .await?;

        if !swapped {
            let current = self.get_offer(offer_id).await?;
            return Err(RebookingError::illegal_state(
                "cancel_offer",
                format!("offer is {}", current.status),
            ));
        }

        self.events
            .publish(RebookingEvent::OfferCancelled { offer_id });
        info!("Slot offer {} cancelled", offer_id);

        self.get_offer(offer_id).await
    }

    /// Reserve one unit of fan-out. Fails with `CapacityExceeded` instead
    /// of silently truncating when the cap is reached.
    pub async fn reserve_invitation_slot(&self, offer: &SlotOffer) -> Result<(), RebookingError> {
        let reserved = self
            .store
            .cas_increment_invitation_count(offer.id, offer.invitation_count, offer.max_invitations)
            .await?;

        if !reserved {
            return Err(RebookingError::CapacityExceeded {
                max: offer.max_invitations,
            });
        }

        Ok(())
    }

    async fn has_accepted_invitation(&self, offer: &SlotOffer) -> Result<bool, RebookingError> {
        let invitations: Vec<Invitation> =
            self.store.list_invitations_for_offer(offer.id).await?;
        Ok(invitations
            .iter()
            .any(|i| i.status == InvitationStatus::Accepted))
    }
}
