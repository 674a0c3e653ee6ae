// libs/appointment-cell/src/services/notifications.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

use shared_config::AppConfig;

use crate::models::AppointmentEvent;

/// Upper bound for one delivery attempt.
pub const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Notification transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Notification endpoint answered {0}")]
    Rejected(u16),
}

/// Receives appointment events after the write has committed.
/// Failures are reported but never undo the write.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: &AppointmentEvent) -> Result<(), NotificationError>;
}

/// Writes events to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn dispatch(&self, event: &AppointmentEvent) -> Result<(), NotificationError> {
        let appointment = event.appointment();
        info!(
            "Appointment {} {} (patient {}, professional {}, at {})",
            appointment.id,
            event.name(),
            appointment.patient_id,
            appointment.professional_id,
            appointment.scheduled_at
        );
        Ok(())
    }
}

/// Posts events as JSON to the e-mail provider's hook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, NOTIFICATION_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn dispatch(&self, event: &AppointmentEvent) -> Result<(), NotificationError> {
        debug!("Posting {} event for {} to notification hook", event.name(), event.appointment().id);

        let response = self.client
            .post(&self.url)
            .json(&json!({
                "type": format!("appointment.{}", event.name()),
                "data": event,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// Webhook when one is configured, log otherwise.
pub fn dispatcher_for(config: &AppConfig) -> Arc<dyn NotificationDispatcher> {
    match config.notification_webhook_url.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(LogNotifier),
    }
}
