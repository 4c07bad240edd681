use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub preference_note: Option<String>,
    pub status: WaitlistStatus,
    pub invitation_count: i32,
    pub last_invitation_sent_at: Option<DateTime<Utc>>,
    pub consent_automated_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaitlistEntry {
    /// Preferred contact channel for automated invitations. Email wins when
    /// both are on file.
    pub fn preferred_channel(&self) -> Option<ContactChannel> {
        if let Some(email) = &self.email {
            if !email.is_empty() {
                return Some(ContactChannel::Email(email.clone()));
            }
        }
        if let Some(phone) = &self.phone {
            if !phone.is_empty() {
                return Some(ContactChannel::Sms(phone.clone()));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    Active,
    Contacted,
    Scheduled,
    Cancelled,
}

impl fmt::Display for WaitlistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitlistStatus::Active => write!(f, "active"),
            WaitlistStatus::Contacted => write!(f, "contacted"),
            WaitlistStatus::Scheduled => write!(f, "scheduled"),
            WaitlistStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Contact channel handed to the notifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "channel", content = "recipient")]
pub enum ContactChannel {
    Email(String),
    Sms(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinWaitlistRequest {
    pub patient_id: Uuid,
    pub patient_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub preference_note: Option<String>,
    pub consent_automated_notifications: bool,
}

/// Filters applied when selecting invitees. Fairness ordering (oldest entry
/// first) is fixed; the fatigue cap is configurable.
#[derive(Debug, Clone)]
pub struct EligibilityFilters {
    pub limit: usize,
    pub fatigue_max_invitations: i32,
    pub fatigue_window_hours: i64,
}

impl EligibilityFilters {
    pub fn new(limit: usize, fatigue_max_invitations: i32, fatigue_window_hours: i64) -> Self {
        Self {
            limit,
            fatigue_max_invitations,
            fatigue_window_hours,
        }
    }
}
