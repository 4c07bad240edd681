#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use rebooking_cell::*;
use shared_config::RebookingConfig;
use waitlist_cell::{ContactChannel, JoinWaitlistRequest, WaitlistEntry, WaitlistRegistryService};

/// Notifier that records deliveries and can be told to fail for specific
/// recipients, standing in for a webhook endpoint with partial outages.
pub struct RecordingNotifier {
    failing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, OfferNotification)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            failing: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_recipient(&self, recipient: &str) {
        self.failing.lock().unwrap().insert(recipient.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(r, _)| r.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        channel: &ContactChannel,
        notification: &OfferNotification,
    ) -> Result<(), RebookingError> {
        let recipient = match channel {
            ContactChannel::Email(email) => email.clone(),
            ContactChannel::Sms(phone) => phone.clone(),
        };

        if self.failing.lock().unwrap().contains(&recipient) {
            return Err(RebookingError::NotifierFailure(
                "delivery endpoint unavailable".to_string(),
            ));
        }

        self.sent
            .lock()
            .unwrap()
            .push((recipient, notification.clone()));
        Ok(())
    }
}

/// Everything wired over in-memory collaborators.
pub struct TestHarness {
    pub offer_service: Arc<SlotOfferService>,
    pub registry: Arc<WaitlistRegistryService>,
    pub scheduling: Arc<InMemorySchedulingClient>,
    pub notifier: Arc<RecordingNotifier>,
    pub dispatcher: Arc<InvitationDispatchService>,
    pub resolver: Arc<ClaimResolverService>,
}

pub fn harness() -> TestHarness {
    let store = Arc::new(InMemoryOfferStore::new());
    let scheduling = Arc::new(InMemorySchedulingClient::new());
    let events = Arc::new(EventPublisher::new());
    let config = RebookingConfig::default();

    let offer_service = Arc::new(SlotOfferService::new(
        store,
        scheduling.clone(),
        events,
        config.clone(),
    ));
    let registry = Arc::new(WaitlistRegistryService::in_memory());
    let notifier = Arc::new(RecordingNotifier::new());
    let dispatcher = Arc::new(InvitationDispatchService::new(
        offer_service.clone(),
        registry.clone(),
        notifier.clone(),
        config,
    ));
    let resolver = Arc::new(ClaimResolverService::new(
        offer_service.clone(),
        registry.clone(),
    ));

    TestHarness {
        offer_service,
        registry,
        scheduling,
        notifier,
        dispatcher,
        resolver,
    }
}

pub fn offer_request(max_invitations: i32) -> CreateOfferRequest {
    CreateOfferRequest {
        appointment_id: Uuid::new_v4(),
        candidate_slots: vec![Utc::now() + Duration::hours(2)],
        duration_minutes: 30,
        expires_in_hours: Some(24),
        max_invitations: Some(max_invitations),
    }
}

/// Create an offer and open it for invitations.
pub async fn open_offer(harness: &TestHarness, max_invitations: i32) -> SlotOffer {
    let offer = harness
        .offer_service
        .create_offer(offer_request(max_invitations))
        .await
        .expect("offer creation should succeed");
    harness
        .offer_service
        .open_for_invitations(offer.id)
        .await
        .expect("offer should open")
}

pub async fn join_patient(
    registry: &WaitlistRegistryService,
    name: &str,
    email: &str,
) -> WaitlistEntry {
    registry
        .join(JoinWaitlistRequest {
            patient_id: Uuid::new_v4(),
            patient_name: name.to_string(),
            email: Some(email.to_string()),
            phone: None,
            preference_note: None,
            consent_automated_notifications: true,
        })
        .await
        .expect("waitlist join should succeed")
}

/// Rewind an invitation's deadline so expiry paths can be exercised.
pub async fn force_invitation_deadline(
    harness: &TestHarness,
    invitation_id: Uuid,
    hours_ago: i64,
) -> Invitation {
    let store = harness.offer_service.store();
    let mut invitation = store
        .get_invitation(invitation_id)
        .await
        .unwrap()
        .expect("invitation should exist");
    invitation.expires_at = Utc::now() - Duration::hours(hours_ago);
    store.insert_invitation(&invitation).await.unwrap();
    invitation
}

/// Rewind an offer's deadline the same way.
pub async fn force_offer_deadline(
    harness: &TestHarness,
    offer_id: Uuid,
    hours_ago: i64,
) -> SlotOffer {
    let store = harness.offer_service.store();
    let mut offer = store
        .get_offer(offer_id)
        .await
        .unwrap()
        .expect("offer should exist");
    offer.expires_at = Utc::now() - Duration::hours(hours_ago);
    store.insert_offer(&offer).await.unwrap();
    offer
}
