//! Announcement source port
//!
//! Reports the next announced listing. Discovery itself (scraping, feeds)
//! lives behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnnouncementError {
    #[error("Announcement source unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed announcement: {0}")]
    Malformed(String),
}

/// An announced future listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub base_asset: String,
    pub listing_instant: DateTime<Utc>,
}

#[async_trait]
pub trait AnnouncementSource: Send + Sync {
    /// The nearest upcoming listing, or `None` when nothing is announced.
    async fn poll_for_new_listing(&self) -> Result<Option<Announcement>, AnnouncementError>;

    fn name(&self) -> &str {
        "AnnouncementSource"
    }
}
