use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use uuid::Uuid;

use rebooking_cell::*;

mod common;
use common::{force_offer_deadline, harness, offer_request, open_offer};

#[tokio::test]
async fn test_create_offer_picks_earliest_future_candidate() {
    let h = harness();
    let now = Utc::now();

    let soonest = now + Duration::hours(3);
    let request = CreateOfferRequest {
        appointment_id: Uuid::new_v4(),
        candidate_slots: vec![
            now + Duration::hours(8),
            now - Duration::hours(1),
            soonest,
        ],
        duration_minutes: 45,
        expires_in_hours: Some(12),
        max_invitations: None,
    };

    let offer = h.offer_service.create_offer(request).await.unwrap();

    assert_eq!(offer.slot_start_time, soonest);
    assert_eq!(offer.status, SlotOfferStatus::Pending);
    assert_eq!(offer.invitation_count, 0);
    // Cap falls back to the configured default
    assert_eq!(offer.max_invitations, 3);
    assert!(offer.expires_at > now + Duration::hours(11));
}

#[tokio::test]
async fn test_create_offer_rejects_empty_candidates() {
    let h = harness();
    let mut request = offer_request(3);
    request.candidate_slots = vec![];

    let result = h.offer_service.create_offer(request).await;
    assert_matches!(result, Err(RebookingError::InvalidSlot(_)));
}

#[tokio::test]
async fn test_create_offer_rejects_all_past_candidates() {
    let h = harness();
    let mut request = offer_request(3);
    request.candidate_slots = vec![Utc::now() - Duration::hours(1)];

    let result = h.offer_service.create_offer(request).await;
    assert_matches!(result, Err(RebookingError::InvalidSlot(_)));
}

#[tokio::test]
async fn test_create_offer_rejects_nonpositive_duration() {
    let h = harness();
    let mut request = offer_request(3);
    request.duration_minutes = 0;

    let result = h.offer_service.create_offer(request).await;
    assert_matches!(result, Err(RebookingError::InvalidSlot(_)));
}

#[tokio::test]
async fn test_create_offer_rejects_duplicate_appointment() {
    let h = harness();
    let request = offer_request(3);

    h.offer_service
        .create_offer(request.clone())
        .await
        .expect("first offer should succeed");

    let result = h.offer_service.create_offer(request).await;
    assert_matches!(result, Err(RebookingError::IllegalState { .. }));
}

#[tokio::test]
async fn test_open_for_invitations_moves_pending_to_available() {
    let h = harness();
    let offer = h
        .offer_service
        .create_offer(offer_request(3))
        .await
        .unwrap();

    let opened = h
        .offer_service
        .open_for_invitations(offer.id)
        .await
        .unwrap();
    assert_eq!(opened.status, SlotOfferStatus::Available);

    // Opening twice is rejected
    let result = h.offer_service.open_for_invitations(offer.id).await;
    assert_matches!(result, Err(RebookingError::IllegalState { .. }));
}

#[tokio::test]
async fn test_cancel_offer_is_idempotent() {
    let h = harness();
    let offer = open_offer(&h, 3).await;

    let cancelled = h.offer_service.cancel_offer(offer.id).await.unwrap();
    assert_eq!(cancelled.status, SlotOfferStatus::Cancelled);

    let again = h.offer_service.cancel_offer(offer.id).await.unwrap();
    assert_eq!(again.status, SlotOfferStatus::Cancelled);
}

#[tokio::test]
async fn test_expire_leaves_offer_before_deadline_untouched() {
    let h = harness();
    let offer = open_offer(&h, 3).await;

    let unchanged = h
        .offer_service
        .expire_if_past_deadline(offer.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(unchanged.status, SlotOfferStatus::Available);
}

#[tokio::test]
async fn test_expire_past_deadline_and_idempotent_rerun() {
    let h = harness();
    let offer = open_offer(&h, 3).await;
    force_offer_deadline(&h, offer.id, 1).await;

    let expired = h
        .offer_service
        .expire_if_past_deadline(offer.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(expired.status, SlotOfferStatus::Expired);

    // Terminal offers are returned unchanged
    let again = h
        .offer_service
        .expire_if_past_deadline(offer.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(again.status, SlotOfferStatus::Expired);
}

#[tokio::test]
async fn test_reserve_invitation_slot_enforces_cap() {
    let h = harness();
    let offer = open_offer(&h, 1).await;

    h.offer_service
        .reserve_invitation_slot(&offer)
        .await
        .expect("first reservation should succeed");

    let full = h.offer_service.get_offer(offer.id).await.unwrap();
    let result = h.offer_service.reserve_invitation_slot(&full).await;
    assert_matches!(result, Err(RebookingError::CapacityExceeded { max: 1 }));
}

#[tokio::test]
async fn test_get_offer_unknown_id_is_not_found() {
    let h = harness();
    let result = h.offer_service.get_offer(Uuid::new_v4()).await;
    assert_matches!(result, Err(RebookingError::NotFound(_)));
}
