use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub notifier_webhook_url: String,
    pub notifier_timeout_seconds: u64,
    pub rebooking: RebookingConfig,
}

/// Tunables for the waitlist rebooking workflow.
#[derive(Debug, Clone)]
pub struct RebookingConfig {
    /// Default invitation fan-out cap for a new slot offer.
    pub default_max_invitations: i32,
    /// Default offer lifetime when the caller does not provide one.
    pub default_offer_expiry_hours: i64,
    /// An entry that received this many invitations within the rolling
    /// window is excluded from eligibility until the window passes.
    pub fatigue_max_invitations: i32,
    pub fatigue_window_hours: i64,
}

impl Default for RebookingConfig {
    fn default() -> Self {
        Self {
            default_max_invitations: 3,
            default_offer_expiry_hours: 24,
            fatigue_max_invitations: 3,
            fatigue_window_hours: 168,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = RebookingConfig::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            notifier_webhook_url: env::var("NOTIFIER_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("NOTIFIER_WEBHOOK_URL not set, using empty value");
                    String::new()
                }),
            notifier_timeout_seconds: parse_env("NOTIFIER_TIMEOUT_SECONDS", 10),
            rebooking: RebookingConfig {
                default_max_invitations: parse_env(
                    "REBOOKING_DEFAULT_MAX_INVITATIONS",
                    defaults.default_max_invitations,
                ),
                default_offer_expiry_hours: parse_env(
                    "REBOOKING_DEFAULT_OFFER_EXPIRY_HOURS",
                    defaults.default_offer_expiry_hours,
                ),
                fatigue_max_invitations: parse_env(
                    "WAITLIST_FATIGUE_MAX_INVITATIONS",
                    defaults.fatigue_max_invitations,
                ),
                fatigue_window_hours: parse_env(
                    "WAITLIST_FATIGUE_WINDOW_HOURS",
                    defaults.fatigue_window_hours,
                ),
            },
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn is_notifier_configured(&self) -> bool {
        !self.notifier_webhook_url.is_empty()
    }
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid value, using default", key);
            default
        }),
        Err(_) => default,
    }
}
