use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use uuid::Uuid;

use rebooking_cell::*;
use waitlist_cell::WaitlistStatus;

mod common;
use common::{force_invitation_deadline, harness, join_patient, open_offer, TestHarness};

/// Offer with every invitation delivered, ready to be claimed.
async fn dispatched_offer(h: &TestHarness, invitees: usize) -> (SlotOffer, Vec<DispatchAttempt>) {
    for i in 0..invitees {
        join_patient(
            &h.registry,
            &format!("Patient {}", i),
            &format!("patient{}@example.com", i),
        )
        .await;
    }

    let offer = open_offer(h, invitees as i32).await;
    let attempts = h.dispatcher.dispatch(offer.id).await.unwrap();
    assert_eq!(attempts.len(), invitees);
    (offer, attempts)
}

#[tokio::test]
async fn test_accept_wins_and_books_replacement_appointment() {
    let h = harness();
    let (offer, attempts) = dispatched_offer(&h, 3).await;

    let winner = &attempts[1].invitation;
    let outcome = h
        .resolver
        .respond(winner.id, ClaimDecision::Accept)
        .await
        .unwrap();

    let appointment = match outcome {
        ClaimOutcome::Won { appointment } => appointment,
        ClaimOutcome::Lost { reason } => panic!("expected a win, lost with {}", reason),
    };

    let entry = h
        .registry
        .get_entry(winner.waitlist_entry_id)
        .await
        .unwrap();
    assert_eq!(appointment.patient_id, entry.patient_id);
    assert_eq!(appointment.duration_minutes, offer.duration_minutes);
    assert_eq!(entry.status, WaitlistStatus::Scheduled);

    let offer = h.offer_service.get_offer(offer.id).await.unwrap();
    assert_eq!(offer.status, SlotOfferStatus::Claimed);
    assert_eq!(offer.rebooked_appointment_id, Some(appointment.id));

    // Winner is accepted; every sibling invitation is closed out
    let invitations = h
        .offer_service
        .store()
        .list_invitations_for_offer(offer.id)
        .await
        .unwrap();
    for invitation in invitations {
        if invitation.id == winner.id {
            assert_eq!(invitation.status, InvitationStatus::Accepted);
            assert!(invitation.responded_at.is_some());
        } else {
            assert_eq!(invitation.status, InvitationStatus::Expired);
        }
    }
}

#[tokio::test]
async fn test_late_accept_loses_to_earlier_claim() {
    let h = harness();
    let (_, attempts) = dispatched_offer(&h, 2).await;

    let outcome = h
        .resolver
        .respond(attempts[0].invitation.id, ClaimDecision::Accept)
        .await
        .unwrap();
    assert!(outcome.won());

    // The second patient accepts after the slot is gone
    let outcome = h
        .resolver
        .respond(attempts[1].invitation.id, ClaimDecision::Accept)
        .await
        .unwrap();
    assert_matches!(
        outcome,
        ClaimOutcome::Lost {
            reason: LossReason::SlotAlreadyClaimed
        }
    );
}

#[tokio::test]
async fn test_concurrent_accepts_produce_exactly_one_winner() {
    let h = harness();
    let (_, attempts) = dispatched_offer(&h, 2).await;

    let first = attempts[0].invitation.id;
    let second = attempts[1].invitation.id;

    let resolver_a = h.resolver.clone();
    let resolver_b = h.resolver.clone();
    let task_a = tokio::spawn(async move { resolver_a.respond(first, ClaimDecision::Accept).await });
    let task_b = tokio::spawn(async move { resolver_b.respond(second, ClaimDecision::Accept).await });

    let outcome_a = task_a.await.unwrap().unwrap();
    let outcome_b = task_b.await.unwrap().unwrap();

    let wins = [&outcome_a, &outcome_b].iter().filter(|o| o.won()).count();
    assert_eq!(wins, 1, "exactly one accept may claim the slot");

    let loser = if outcome_a.won() { outcome_b } else { outcome_a };
    assert_matches!(
        loser,
        ClaimOutcome::Lost {
            reason: LossReason::SlotAlreadyClaimed
        }
    );
}

#[tokio::test]
async fn test_decline_settles_invitation_and_leaves_offer_open() {
    let h = harness();
    let (offer, attempts) = dispatched_offer(&h, 2).await;

    let outcome = h
        .resolver
        .respond(attempts[0].invitation.id, ClaimDecision::Decline)
        .await
        .unwrap();
    assert_matches!(
        outcome,
        ClaimOutcome::Lost {
            reason: LossReason::Declined
        }
    );

    // The other invitee can still claim
    let offer = h.offer_service.get_offer(offer.id).await.unwrap();
    assert_eq!(offer.status, SlotOfferStatus::Available);

    let outcome = h
        .resolver
        .respond(attempts[1].invitation.id, ClaimDecision::Accept)
        .await
        .unwrap();
    assert!(outcome.won());
}

#[tokio::test]
async fn test_repeating_a_response_replays_the_outcome() {
    let h = harness();
    let (_, attempts) = dispatched_offer(&h, 2).await;

    let winner = attempts[0].invitation.id;
    let first = h
        .resolver
        .respond(winner, ClaimDecision::Accept)
        .await
        .unwrap();
    let replay = h
        .resolver
        .respond(winner, ClaimDecision::Accept)
        .await
        .unwrap();

    match (first, replay) {
        (ClaimOutcome::Won { appointment: a }, ClaimOutcome::Won { appointment: b }) => {
            assert_eq!(a.id, b.id, "replay must return the original booking");
        }
        _ => panic!("both responses should report a win"),
    }
}

#[tokio::test]
async fn test_repeating_a_decline_replays_the_outcome() {
    let h = harness();
    let (_, attempts) = dispatched_offer(&h, 1).await;

    let invitation = attempts[0].invitation.id;
    let first = h
        .resolver
        .respond(invitation, ClaimDecision::Decline)
        .await
        .unwrap();
    assert_matches!(first, ClaimOutcome::Lost { reason: LossReason::Declined });

    let replay = h
        .resolver
        .respond(invitation, ClaimDecision::Decline)
        .await
        .unwrap();
    assert_matches!(replay, ClaimOutcome::Lost { reason: LossReason::Declined });
}

#[tokio::test]
async fn test_contradicting_a_settled_response_is_rejected() {
    let h = harness();
    let (_, attempts) = dispatched_offer(&h, 1).await;

    let invitation = attempts[0].invitation.id;
    h.resolver
        .respond(invitation, ClaimDecision::Decline)
        .await
        .unwrap();

    let result = h.resolver.respond(invitation, ClaimDecision::Accept).await;
    assert_matches!(result, Err(RebookingError::AlreadyResponded(_)));
}

#[tokio::test]
async fn test_accept_after_deadline_expires_the_invitation() {
    let h = harness();
    let (_, attempts) = dispatched_offer(&h, 1).await;

    let invitation = force_invitation_deadline(&h, attempts[0].invitation.id, 1).await;

    let result = h.resolver.respond(invitation.id, ClaimDecision::Accept).await;
    assert_matches!(result, Err(RebookingError::AlreadyResponded(_)));

    let invitation = h
        .offer_service
        .store()
        .get_invitation(invitation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invitation.status, InvitationStatus::Expired);
}

#[tokio::test]
async fn test_undelivered_invitation_cannot_be_responded_to() {
    let h = harness();
    let entry = join_patient(&h.registry, "Ana", "ana@example.com").await;
    let offer = open_offer(&h, 1).await;

    let now = Utc::now();
    let invitation = Invitation {
        id: Uuid::new_v4(),
        slot_offer_id: offer.id,
        waitlist_entry_id: entry.id,
        status: InvitationStatus::Pending,
        sent_at: None,
        expires_at: now + Duration::hours(24),
        responded_at: None,
        created_at: now,
        updated_at: now,
    };
    h.offer_service
        .store()
        .insert_invitation(&invitation)
        .await
        .unwrap();

    let result = h.resolver.respond(invitation.id, ClaimDecision::Accept).await;
    assert_matches!(result, Err(RebookingError::IllegalState { .. }));
}

#[tokio::test]
async fn test_claim_with_concurrently_declined_winner_hands_the_slot_back() {
    let h = harness();
    let (offer, attempts) = dispatched_offer(&h, 1).await;
    let invitation = &attempts[0].invitation;

    let entry = h
        .registry
        .get_entry(invitation.waitlist_entry_id)
        .await
        .unwrap();

    // A decline settles the invitation after an accept's terminal check
    // but before the offer swap
    h.resolver
        .respond(invitation.id, ClaimDecision::Decline)
        .await
        .unwrap();

    let result = h
        .offer_service
        .close_as_claimed(offer.id, invitation.id, entry.patient_id)
        .await;
    assert_matches!(result, Err(RebookingError::AlreadyResponded(_)));

    // No booking, and the slot is offerable again
    let offer = h.offer_service.get_offer(offer.id).await.unwrap();
    assert_eq!(offer.status, SlotOfferStatus::Available);
    assert_eq!(offer.rebooked_appointment_id, None);

    let invitation = h
        .offer_service
        .store()
        .get_invitation(invitation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invitation.status, InvitationStatus::Declined);
}

#[tokio::test]
async fn test_accept_against_cancelled_offer_names_the_real_state() {
    let h = harness();
    let (offer, attempts) = dispatched_offer(&h, 1).await;

    h.offer_service.cancel_offer(offer.id).await.unwrap();

    let err = h
        .resolver
        .respond(attempts[0].invitation.id, ClaimDecision::Accept)
        .await
        .expect_err("accepting a cancelled offer must not claim it");
    assert_matches!(err, RebookingError::IllegalState { .. });
    assert!(err.to_string().contains("cancelled"));
}

#[tokio::test]
async fn test_respond_unknown_invitation_is_not_found() {
    let h = harness();
    let result = h
        .resolver
        .respond(Uuid::new_v4(), ClaimDecision::Accept)
        .await;
    assert_matches!(result, Err(RebookingError::NotFound(_)));
}
