//! Outbound notifications.
//!
//! Services commit their state change first and only then hand the outcome to
//! [`Notifications`], which delivers it through a [`Notifier`] and swallows any failure. A
//! notification can therefore never undo or block the transition it describes.
//!
//! Two notifiers ship with the crate:
//!
//! - [`WebhookNotifier`] posts a JSON envelope to the chat gateway configured at
//!   `notifications.webhook_url`, which renders and delivers it.
//! - [`LogNotifier`] only logs, and is used when no gateway is configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::db::models::licenses::LicenseKind;
use crate::types::{OrderId, TopupId, UserId};

/// Outcome of a state transition, as delivered to users and channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An order was queued and needs to be delivered by an administrator
    FulfillmentRequested {
        order_id: OrderId,
        buyer: UserId,
        quantity: i64,
        fulfillment_method: String,
        recipient_handle: String,
    },
    OrderFulfilled {
        order_id: OrderId,
        quantity: i64,
        charged: i64,
    },
    OrderCanceled {
        order_id: OrderId,
        restocked: i64,
    },
    TopupRequested {
        topup_id: TopupId,
        user_id: UserId,
        depositor_name: String,
        amount: i64,
    },
    TopupResolved {
        topup_id: TopupId,
        amount: i64,
        approved: bool,
        balance: i64,
    },
    LicenseActivated {
        kind: LicenseKind,
        expires_at: Option<DateTime<Utc>>,
    },
    LicenseExpired {
        expired_at: DateTime<Utc>,
    },
    GrantConfigured {
        user_id: UserId,
        display_name: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::FulfillmentRequested { .. } => "fulfillment_requested",
            Event::OrderFulfilled { .. } => "order_fulfilled",
            Event::OrderCanceled { .. } => "order_canceled",
            Event::TopupRequested { .. } => "topup_requested",
            Event::TopupResolved { .. } => "topup_resolved",
            Event::LicenseActivated { .. } => "license_activated",
            Event::LicenseExpired { .. } => "license_expired",
            Event::GrantConfigured { .. } => "grant_configured",
        }
    }
}

/// Recipient of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    User(UserId),
    Channel(String),
}

/// Delivery gateway for notifications.
///
/// Implementations report failures; [`Notifications`] decides to ignore them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Direct message to a user
    async fn notify(&self, user: &UserId, event: &Event) -> anyhow::Result<()>;

    /// Post to a channel
    async fn notify_channel(&self, channel: &str, event: &Event) -> anyhow::Result<()>;
}

/// Body posted by [`WebhookNotifier`].
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub target: Target,
    pub event: &'a Event,
    pub sent_at: DateTime<Utc>,
}

pub struct WebhookNotifier {
    url: Url,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    /// The process must have installed a rustls crypto provider first; reqwest is built without one.
    pub fn new(url: Url, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self { url, http_client })
    }

    async fn post(&self, target: Target, event: &Event) -> anyhow::Result<()> {
        let envelope = Envelope {
            target,
            event,
            sent_at: Utc::now(),
        };

        let response = self.http_client.post(self.url.clone()).json(&envelope).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("notification gateway returned HTTP {}", status.as_u16());
        }

        debug!(event = event.name(), status = status.as_u16(), "Notification delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, user: &UserId, event: &Event) -> anyhow::Result<()> {
        self.post(Target::User(user.clone()), event).await
    }

    async fn notify_channel(&self, channel: &str, event: &Event) -> anyhow::Result<()> {
        self.post(Target::Channel(channel.to_string()), event).await
    }
}

/// Notifier that only writes the event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user: &UserId, event: &Event) -> anyhow::Result<()> {
        info!(user_id = %user, event = event.name(), payload = ?event, "Notification (not delivered)");
        Ok(())
    }

    async fn notify_channel(&self, channel: &str, event: &Event) -> anyhow::Result<()> {
        info!(channel = %channel, event = event.name(), payload = ?event, "Channel notification (not delivered)");
        Ok(())
    }
}

/// Build the notifier described by the configuration.
pub fn from_config(config: &crate::config::NotificationConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => {
            info!(url = %url, "Delivering notifications through webhook gateway");
            Ok(Arc::new(WebhookNotifier::new(url.clone(), config.timeout)?))
        }
        None => {
            info!("No notification gateway configured, notifications will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Fire-and-forget front for a [`Notifier`].
#[derive(Clone)]
pub struct Notifications {
    notifier: Arc<dyn Notifier>,
}

impl Notifications {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub async fn user(&self, user: &UserId, event: Event) {
        if let Err(e) = self.notifier.notify(user, &event).await {
            metrics::counter!("shopctl_notifications_failed_total", "target" => "user").increment(1);
            warn!(user_id = %user, event = event.name(), error = %e, "Failed to notify user");
        }
    }

    /// Post to `channel` if one is configured.
    pub async fn channel(&self, channel: Option<&str>, event: Event) {
        let Some(channel) = channel else {
            debug!(event = event.name(), "No channel configured, skipping notification");
            return;
        };

        if let Err(e) = self.notifier.notify_channel(channel, &event).await {
            metrics::counter!("shopctl_notifications_failed_total", "target" => "channel").increment(1);
            warn!(channel = %channel, event = event.name(), error = %e, "Failed to notify channel");
        }
    }
}
