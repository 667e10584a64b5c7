//! Notifier port
//!
//! Fire-and-forget delivery of entry/close/warning/error events. `notify`
//! is synchronous and must return immediately; transports that do I/O hand
//! the work off and log their own failures.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{ClosedPosition, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Entry,
    Close,
    Warning,
    Error,
    Info,
}

impl NotificationCategory {
    pub fn all() -> Vec<NotificationCategory> {
        vec![
            NotificationCategory::Entry,
            NotificationCategory::Close,
            NotificationCategory::Warning,
            NotificationCategory::Error,
            NotificationCategory::Info,
        ]
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NotificationCategory::Entry => "ENTRY",
            NotificationCategory::Close => "CLOSE",
            NotificationCategory::Warning => "WARNING",
            NotificationCategory::Error => "ERROR",
            NotificationCategory::Info => "INFO",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub category: NotificationCategory,
    pub venue: String,
    pub message: String,
}

impl Notification {
    pub fn new(category: NotificationCategory, venue: &str, message: impl Into<String>) -> Self {
        Self {
            category,
            venue: venue.to_string(),
            message: message.into(),
        }
    }

    pub fn info(venue: &str, message: impl Into<String>) -> Self {
        Self::new(NotificationCategory::Info, venue, message)
    }

    pub fn warning(venue: &str, message: impl Into<String>) -> Self {
        Self::new(NotificationCategory::Warning, venue, message)
    }

    pub fn error(venue: &str, message: impl Into<String>) -> Self {
        Self::new(NotificationCategory::Error, venue, message)
    }

    /// New position summary, with detection-to-fill latency
    pub fn entry(position: &Position, latency: Duration) -> Self {
        let message = format!(
            "NEW POSITION\n{}\nLatency: {} ms",
            describe_position(position, position.entry_price),
            latency.num_milliseconds()
        );
        Self::new(NotificationCategory::Entry, &position.venue, message)
    }

    pub fn close(closed: &ClosedPosition) -> Self {
        let message = format!(
            "POSITION CLOSED ({})\n{}\nProfit: {:.2}$ ({:+.2}%)",
            closed.reason,
            describe_position(&closed.position, closed.exit_price),
            closed.realized_profit,
            closed.realized_profit_percent
        );
        Self::new(NotificationCategory::Close, &closed.position.venue, message)
    }
}

fn describe_position(position: &Position, price: f64) -> String {
    format!(
        "Broker: {}\nDatetime: {}\nStatus: {:?}\n\nTicker: {}\nAmount: {:.8}\nPrice: {:.8}\nDollars: {:.2}",
        position.venue,
        position.opened_at.format("%Y-%m-%d %H:%M:%S"),
        position.status,
        position.symbol,
        position.size,
        price,
        position.size * price
    )
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);

    fn name(&self) -> &str {
        "Notifier"
    }
}
