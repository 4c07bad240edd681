use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Domain event fired on every state transition. How events reach a UI
/// (push channel, polling) is an external concern; the core only emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum RebookingEvent {
    OfferCreated {
        offer_id: Uuid,
        appointment_id: Uuid,
    },
    OfferOpened {
        offer_id: Uuid,
    },
    OfferClaimed {
        offer_id: Uuid,
        winning_invitation_id: Uuid,
        appointment_id: Uuid,
    },
    OfferExpired {
        offer_id: Uuid,
    },
    OfferCancelled {
        offer_id: Uuid,
    },
    InvitationSent {
        invitation_id: Uuid,
        offer_id: Uuid,
        waitlist_entry_id: Uuid,
    },
    InvitationDeclined {
        invitation_id: Uuid,
        at: DateTime<Utc>,
    },
    InvitationExpired {
        invitation_id: Uuid,
    },
}

pub type EventReceiver = broadcast::Receiver<RebookingEvent>;

pub struct EventPublisher {
    sender: broadcast::Sender<RebookingEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: RebookingEvent) {
        debug!("Publishing rebooking event: {:?}", event);
        // No subscribers is a normal condition.
        let _ = self.sender.send(event);
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
