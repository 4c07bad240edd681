use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// SLOT OFFER MODELS
// ==============================================================================

/// A single freed appointment slot being offered to the waitlist. Maps 1:1
/// to the appointment that was cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotOffer {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub slot_start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: SlotOfferStatus,
    pub invitation_count: i32,
    pub max_invitations: i32,
    pub expires_at: DateTime<Utc>,
    /// Appointment created for the winner; set when the offer is claimed.
    pub rebooked_appointment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SlotOffer {
    pub fn remaining_invitations(&self) -> i32 {
        self.max_invitations - self.invitation_count
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SlotOfferStatus {
    Pending,
    Available,
    Claimed,
    Expired,
    Cancelled,
}

impl SlotOfferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SlotOfferStatus::Claimed | SlotOfferStatus::Expired | SlotOfferStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, target: &SlotOfferStatus) -> bool {
        use SlotOfferStatus::*;
        match (self, target) {
            (Pending, Available) => true,
            (Available, Claimed) => true,
            (Available, Expired) => true,
            (Pending, Cancelled) | (Available, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SlotOfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotOfferStatus::Pending => write!(f, "pending"),
            SlotOfferStatus::Available => write!(f, "available"),
            SlotOfferStatus::Claimed => write!(f, "claimed"),
            SlotOfferStatus::Expired => write!(f, "expired"),
            SlotOfferStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOfferRequest {
    pub appointment_id: Uuid,
    /// Candidate times for the freed slot; the earliest future one is used.
    pub candidate_slots: Vec<DateTime<Utc>>,
    pub duration_minutes: i32,
    pub expires_in_hours: Option<i64>,
    pub max_invitations: Option<i32>,
}

// ==============================================================================
// INVITATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    pub slot_offer_id: Uuid,
    pub waitlist_entry_id: Uuid,
    pub status: InvitationStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Sent,
    Accepted,
    Declined,
    Expired,
}

impl InvitationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvitationStatus::Accepted | InvitationStatus::Declined | InvitationStatus::Expired
        )
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvitationStatus::Pending => write!(f, "pending"),
            InvitationStatus::Sent => write!(f, "sent"),
            InvitationStatus::Accepted => write!(f, "accepted"),
            InvitationStatus::Declined => write!(f, "declined"),
            InvitationStatus::Expired => write!(f, "expired"),
        }
    }
}

// ==============================================================================
// DISPATCH MODELS
// ==============================================================================

/// One invitation attempt from a dispatch run, tagged with its outcome.
/// Notifier failures are retryable: re-running dispatch skips entries that
/// already hold a non-terminal invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAttempt {
    pub invitation: Invitation,
    pub outcome: DispatchAttemptOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "result", content = "detail")]
pub enum DispatchAttemptOutcome {
    Sent,
    NotifierFailed(String),
}

/// Summary of a timeout sweep run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub invitations_expired: u32,
    pub offers_expired: u32,
}

// ==============================================================================
// CLAIM MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDecision {
    Accept,
    Decline,
}

/// Outcome of a claim attempt. Losing the race is a normal outcome, not an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ClaimOutcome {
    Won { appointment: Appointment },
    Lost { reason: LossReason },
}

impl ClaimOutcome {
    pub fn won(&self) -> bool {
        matches!(self, ClaimOutcome::Won { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LossReason {
    SlotAlreadyClaimed,
    Declined,
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LossReason::SlotAlreadyClaimed => write!(f, "slot_already_claimed"),
            LossReason::Declined => write!(f, "declined"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondRequest {
    pub decision: ClaimDecision,
}

// ==============================================================================
// SCHEDULING COLLABORATOR MODELS
// ==============================================================================

/// Narrow view of the appointment row the scheduling collaborator owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// ==============================================================================
// MONITOR MODELS
// ==============================================================================

/// Read-only aggregates for the operator dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebookingStats {
    pub waitlist_by_status: std::collections::HashMap<String, i64>,
    pub offers_by_status: std::collections::HashMap<String, i64>,
    pub invitations_by_status: std::collections::HashMap<String, i64>,
    pub recent_invitations: Vec<Invitation>,
}
