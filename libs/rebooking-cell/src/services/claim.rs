use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use waitlist_cell::WaitlistRegistryService;

use crate::models::{
    ClaimDecision, ClaimOutcome, Invitation, InvitationStatus, LossReason, SlotOfferStatus,
};
use crate::services::events::{EventPublisher, RebookingEvent};
use crate::services::offer::SlotOfferService;
use crate::store::OfferStore;
use crate::RebookingError;

/// Resolves patient responses to invitations. Concurrent accepts for the
/// same offer are arbitrated by the offer's `available -> claimed` swap;
/// every caller that loses that swap gets a `Lost` outcome, never an error.
pub struct ClaimResolverService {
    offer_service: Arc<SlotOfferService>,
    registry: Arc<WaitlistRegistryService>,
    store: Arc<dyn OfferStore>,
    events: Arc<EventPublisher>,
}

impl ClaimResolverService {
    pub fn new(
        offer_service: Arc<SlotOfferService>,
        registry: Arc<WaitlistRegistryService>,
    ) -> Self {
        let store = offer_service.store();
        let events = offer_service.events();
        Self {
            offer_service,
            registry,
            store,
            events,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(SlotOfferService::from_config(config)),
            Arc::new(WaitlistRegistryService::from_config(config)),
        )
    }

    /// Apply a patient's accept or decline to their invitation.
    ///
    /// Repeating a response the invitation already holds replays the prior
    /// outcome; any other response to a settled invitation is rejected with
    /// `AlreadyResponded`.
    pub async fn respond(
        &self,
        invitation_id: Uuid,
        decision: ClaimDecision,
    ) -> Result<ClaimOutcome, RebookingError> {
        let invitation = self
            .store
            .get_invitation(invitation_id)
            .await?
            .ok_or_else(|| RebookingError::NotFound(format!("invitation {}", invitation_id)))?;

        if invitation.status.is_terminal() {
            return self.replay_settled(&invitation, decision).await;
        }

        if invitation.status == InvitationStatus::Pending {
            // Never delivered; the patient cannot have seen it.
            return Err(RebookingError::illegal_state(
                "respond",
                "invitation was never delivered",
            ));
        }

        match decision {
            ClaimDecision::Decline => self.decline(&invitation).await,
            ClaimDecision::Accept => self.accept(&invitation).await,
        }
    }

    async fn decline(&self, invitation: &Invitation) -> Result<ClaimOutcome, RebookingError> {
        let swapped = self
            .store
            .cas_update_invitation_status(
                invitation.id,
                InvitationStatus::Sent,
                InvitationStatus::Declined,
            )
            .await?;

        if !swapped {
            // A sweep or a concurrent response settled it under us.
            let current = self.current_status(invitation.id).await?;
            return Err(RebookingError::AlreadyResponded(format!(
                "invitation {} is {}",
                invitation.id, current
            )));
        }

        self.events.publish(RebookingEvent::InvitationDeclined {
            invitation_id: invitation.id,
            at: Utc::now(),
        });

        info!("Invitation {} declined", invitation.id);
        Ok(ClaimOutcome::Lost {
            reason: LossReason::Declined,
        })
    }

    async fn accept(&self, invitation: &Invitation) -> Result<ClaimOutcome, RebookingError> {
        let now = Utc::now();
        if now > invitation.expires_at {
            // Deadline passed before the sweep caught it; settle it now.
            let _ = self
                .store
                .cas_update_invitation_status(
                    invitation.id,
                    InvitationStatus::Sent,
                    InvitationStatus::Expired,
                )
                .await?;
            self.events.publish(RebookingEvent::InvitationExpired {
                invitation_id: invitation.id,
            });
            return Err(RebookingError::AlreadyResponded(format!(
                "invitation {} expired at {}",
                invitation.id, invitation.expires_at
            )));
        }

        let entry = self.registry.get_entry(invitation.waitlist_entry_id).await?;

        match self
            .offer_service
            .close_as_claimed(invitation.slot_offer_id, invitation.id, entry.patient_id)
            .await
        {
            Ok(appointment) => {
                self.settle_losing_invitations(invitation.slot_offer_id, invitation.id)
                    .await?;
                self.registry.mark_scheduled(entry.id).await?;

                info!(
                    "Invitation {} won slot offer {}; patient {} rebooked as appointment {}",
                    invitation.id, invitation.slot_offer_id, entry.patient_id, appointment.id
                );
                Ok(ClaimOutcome::Won { appointment })
            }
            Err(e @ RebookingError::IllegalState { .. }) => {
                // Only a claimed offer means the race was lost; a cancelled
                // or expired offer is reported as what it is.
                let offer = self.offer_service.get_offer(invitation.slot_offer_id).await?;
                if offer.status != SlotOfferStatus::Claimed {
                    return Err(e);
                }

                // Lost the claim race. Settle the invitation and report the
                // loss as a normal outcome.
                let swapped = self
                    .store
                    .cas_update_invitation_status(
                        invitation.id,
                        InvitationStatus::Sent,
                        InvitationStatus::Declined,
                    )
                    .await?;
                if swapped {
                    self.events.publish(RebookingEvent::InvitationDeclined {
                        invitation_id: invitation.id,
                        at: Utc::now(),
                    });
                }

                info!(
                    "Invitation {} lost the claim race for slot offer {}",
                    invitation.id, invitation.slot_offer_id
                );
                Ok(ClaimOutcome::Lost {
                    reason: LossReason::SlotAlreadyClaimed,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Replay the stored outcome when the patient repeats their response;
    /// reject everything else.
    async fn replay_settled(
        &self,
        invitation: &Invitation,
        decision: ClaimDecision,
    ) -> Result<ClaimOutcome, RebookingError> {
        match (&invitation.status, decision) {
            (InvitationStatus::Accepted, ClaimDecision::Accept) => {
                let offer = self.offer_service.get_offer(invitation.slot_offer_id).await?;
                let appointment_id = offer.rebooked_appointment_id.ok_or_else(|| {
                    RebookingError::DatabaseError(format!(
                        "offer {} accepted but no rebooked appointment on record",
                        offer.id
                    ))
                })?;
                let appointment = self
                    .offer_service
                    .lookup_appointment(appointment_id)
                    .await?
                    .ok_or_else(|| {
                        RebookingError::SchedulingError(format!(
                            "appointment {} not found",
                            appointment_id
                        ))
                    })?;
                Ok(ClaimOutcome::Won { appointment })
            }
            (InvitationStatus::Declined, ClaimDecision::Decline) => Ok(ClaimOutcome::Lost {
                reason: LossReason::Declined,
            }),
            _ => Err(RebookingError::AlreadyResponded(format!(
                "invitation {} is {}",
                invitation.id, invitation.status
            ))),
        }
    }

    /// Expire every sibling invitation still open after the offer was
    /// claimed. A lost swap means the sibling settled on its own.
    async fn settle_losing_invitations(
        &self,
        offer_id: Uuid,
        winning_invitation_id: Uuid,
    ) -> Result<(), RebookingError> {
        let siblings = self.store.list_invitations_for_offer(offer_id).await?;

        for sibling in siblings {
            if sibling.id == winning_invitation_id || sibling.status.is_terminal() {
                continue;
            }

            let from = sibling.status.clone();
            let swapped = self
                .store
                .cas_update_invitation_status(sibling.id, from, InvitationStatus::Expired)
                .await?;

            if swapped {
                self.events.publish(RebookingEvent::InvitationExpired {
                    invitation_id: sibling.id,
                });
            } else {
                warn!(
                    "Invitation {} settled concurrently while closing offer {}",
                    sibling.id, offer_id
                );
            }
        }

        Ok(())
    }

    async fn current_status(&self, invitation_id: Uuid) -> Result<InvitationStatus, RebookingError> {
        let invitation = self
            .store
            .get_invitation(invitation_id)
            .await?
            .ok_or_else(|| RebookingError::NotFound(format!("invitation {}", invitation_id)))?;
        Ok(invitation.status)
    }
}
