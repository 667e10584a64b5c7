//! File Announcement Source
//!
//! Reads announced listings from a JSON file that an external scraper keeps
//! up to date. Accepted shapes:
//!
//! - `["ANKR", "2021-11-18 14:08"]`
//! - `{"symbol": "ANKR", "listing_time": "2021-11-18 14:08"}`
//! - a list of such objects
//! - `{}`, `[]` or `null` for "nothing announced"
//!
//! Times are UTC, either `%Y-%m-%d %H:%M` or RFC 3339. The nearest listing
//! still in the future is reported.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ports::{Announcement, AnnouncementError, AnnouncementSource, Clock};

pub const LISTING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Deserialize)]
struct ListingEntry {
    #[serde(alias = "coin", alias = "base_asset")]
    symbol: String,
    #[serde(alias = "time", alias = "listing_instant")]
    listing_time: String,
}

pub struct FileAnnouncementSource {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileAnnouncementSource {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every announcement in the file, past ones included. A missing file is
    /// an empty list.
    pub async fn read_all(&self) -> Result<Vec<Announcement>, AnnouncementError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AnnouncementError::Unavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        parse_announcements(&content)
    }
}

#[async_trait]
impl AnnouncementSource for FileAnnouncementSource {
    async fn poll_for_new_listing(&self) -> Result<Option<Announcement>, AnnouncementError> {
        let now = self.clock.now();
        let next = self
            .read_all()
            .await?
            .into_iter()
            .filter(|a| a.listing_instant > now)
            .min_by_key(|a| a.listing_instant);
        Ok(next)
    }

    fn name(&self) -> &str {
        "FileAnnouncementSource"
    }
}

pub fn parse_announcements(content: &str) -> Result<Vec<Announcement>, AnnouncementError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| AnnouncementError::Malformed(e.to_string()))?;

    match &value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        Value::Array(items) => match items.as_slice() {
            [Value::String(base), Value::String(time)] => Ok(vec![announcement(base, time)?]),
            _ => {
                let entries: Vec<ListingEntry> = entries_from(&value)?;
                entries
                    .iter()
                    .map(|e| announcement(&e.symbol, &e.listing_time))
                    .collect()
            }
        },
        Value::Object(_) => {
            let entry: ListingEntry = entries_from(&value)?;
            Ok(vec![announcement(&entry.symbol, &entry.listing_time)?])
        }
        other => Err(AnnouncementError::Malformed(format!(
            "unexpected announcement document: {}",
            other
        ))),
    }
}

fn entries_from<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, AnnouncementError> {
    T::deserialize(value).map_err(|e| AnnouncementError::Malformed(e.to_string()))
}

fn announcement(base_asset: &str, listing_time: &str) -> Result<Announcement, AnnouncementError> {
    let base_asset = base_asset.trim().to_uppercase();
    if base_asset.is_empty() {
        return Err(AnnouncementError::Malformed("empty symbol".to_string()));
    }
    Ok(Announcement {
        base_asset,
        listing_instant: parse_listing_time(listing_time)?,
    })
}

pub fn parse_listing_time(value: &str) -> Result<DateTime<Utc>, AnnouncementError> {
    let value = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, LISTING_TIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| AnnouncementError::Malformed(format!("bad listing time '{}': {}", value, e)))
}
