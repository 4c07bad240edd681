use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;
use waitlist_cell::ContactChannel;

use crate::RebookingError;

/// Offer details handed to the delivery transport. Message templates and
/// provider selection live on the other side of the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferNotification {
    pub invitation_id: Uuid,
    pub slot_offer_id: Uuid,
    pub patient_name: String,
    pub slot_start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub expires_at: DateTime<Utc>,
}

/// Opaque delivery capability consumed by the dispatcher. Failures are
/// transient: the caller retries by re-running dispatch.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        channel: &ContactChannel,
        notification: &OfferNotification,
    ) -> Result<(), RebookingError>;
}

/// Webhook-based notifier posting offer details to the configured delivery
/// endpoint. The request timeout is bounded so a hung transport can never
/// stall a dispatch run.
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.notifier_timeout_seconds))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            webhook_url: config.notifier_webhook_url.clone(),
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    channel: &'a ContactChannel,
    #[serde(flatten)]
    notification: &'a OfferNotification,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        channel: &ContactChannel,
        notification: &OfferNotification,
    ) -> Result<(), RebookingError> {
        if self.webhook_url.is_empty() {
            return Err(RebookingError::NotifierFailure(
                "Notifier webhook URL not configured".to_string(),
            ));
        }

        debug!(
            "Delivering invitation {} for offer {}",
            notification.invitation_id, notification.slot_offer_id
        );

        let payload = WebhookPayload {
            channel,
            notification,
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("Notifier request failed: {}", e);
                RebookingError::NotifierFailure(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Notifier rejected delivery ({}): {}", status, body);
            return Err(RebookingError::NotifierFailure(format!(
                "Delivery endpoint returned {}",
                status
            )));
        }

        info!(
            "Invitation {} delivered for offer {}",
            notification.invitation_id, notification.slot_offer_id
        );
        Ok(())
    }
}
