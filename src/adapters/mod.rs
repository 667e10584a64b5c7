//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Paper: simulated venue with scheduled listings
//! - Announcement: JSON file of announced listings
//! - Notify: log, Discord and Telegram transports
//! - CLI: Command-line interface handlers

pub mod announcement;
pub mod cli;
pub mod notify;
pub mod paper;

pub use announcement::FileAnnouncementSource;
pub use cli::CliApp;
pub use notify::{build_notifier, FanoutNotifier, LogNotifier, WebhookNotifier, WebhookTarget};
pub use paper::PaperVenue;
