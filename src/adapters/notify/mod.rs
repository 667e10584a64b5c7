//! Notification transports
//!
//! - `LogNotifier`: every notification goes to the tracing log
//! - `WebhookNotifier`: Discord or Telegram, posted on a background task
//! - `FanoutNotifier`: delivers to several transports
//!
//! Webhook failures are logged and dropped; they never reach the engine.

use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AlertsSection;
use crate::ports::{Notification, NotificationCategory, Notifier};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        let Notification {
            category,
            venue,
            message,
        } = notification;
        match category {
            NotificationCategory::Error => tracing::error!("[{}] {}: {}", venue, category, message),
            NotificationCategory::Warning => tracing::warn!("[{}] {}: {}", venue, category, message),
            _ => tracing::info!("[{}] {}: {}", venue, category, message),
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookTarget {
    Discord { url: String },
    Telegram { token: String, chat_id: String },
}

pub struct WebhookNotifier {
    client: Client,
    target: WebhookTarget,
    categories: HashSet<NotificationCategory>,
}

impl WebhookNotifier {
    pub fn new(target: WebhookTarget, categories: &[NotificationCategory]) -> Self {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            target,
            categories: categories.iter().copied().collect(),
        }
    }

    pub fn accepts(&self, category: NotificationCategory) -> bool {
        self.categories.contains(&category)
    }

    /// Endpoint and JSON body for one notification
    pub fn request(&self, notification: &Notification) -> (String, Value) {
        let text = format!(
            "[{}] {}\n{}",
            notification.venue, notification.category, notification.message
        );
        match &self.target {
            WebhookTarget::Discord { url } => (url.clone(), json!({ "content": text })),
            WebhookTarget::Telegram { token, chat_id } => (
                format!("https://api.telegram.org/bot{}/sendMessage", token),
                json!({ "chat_id": chat_id, "text": text }),
            ),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: Notification) {
        if !self.accepts(notification.category) {
            return;
        }
        let (url, body) = self.request(&notification);
        let client = self.client.clone();
        let transport = self.name().to_string();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("{} notification dropped, no async runtime", transport);
            return;
        };
        runtime.spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!("{} webhook returned {}", transport, response.status());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("{} webhook failed: {}", transport, e),
            }
        });
    }

    fn name(&self) -> &str {
        match self.target {
            WebhookTarget::Discord { .. } => "discord",
            WebhookTarget::Telegram { .. } => "telegram",
        }
    }
}

#[derive(Default)]
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, notification: Notification) {
        for notifier in &self.notifiers {
            notifier.notify(notification.clone());
        }
    }

    fn name(&self) -> &str {
        "fanout"
    }
}

/// Log output always, plus whichever webhooks `alerts` enables
pub fn build_notifier(alerts: &AlertsSection) -> FanoutNotifier {
    let mut fanout = FanoutNotifier::new().with(Arc::new(LogNotifier));

    if alerts.discord_enabled {
        match alerts.discord_url() {
            Some(url) => {
                fanout = fanout.with(Arc::new(WebhookNotifier::new(
                    WebhookTarget::Discord { url },
                    &alerts.categories,
                )));
            }
            None => tracing::warn!("Discord alerts enabled but no webhook URL configured"),
        }
    }

    if alerts.telegram_enabled {
        match (alerts.telegram_token(), alerts.telegram_chat()) {
            (Some(token), Some(chat_id)) => {
                fanout = fanout.with(Arc::new(WebhookNotifier::new(
                    WebhookTarget::Telegram { token, chat_id },
                    &alerts.categories,
                )));
            }
            _ => tracing::warn!("Telegram alerts enabled but bot token or chat id missing"),
        }
    }

    fanout
}
