//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml structure.
//! Each `[[venues]]` entry becomes the `VenueConfig` handed to that venue's
//! engine; nothing reads configuration globally.

use chrono::Duration;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::{BracketConfig, EntryWindow, ExitDeadlines, ExitPricing, WarningSchedule};
use crate::ports::NotificationCategory;

/// Percent values above this are treated as typos
pub const MAX_PERCENT: f64 = 1_000_000.0;

/// Longest deadline or lead time accepted, in seconds
const MAX_SECONDS: u64 = 7 * 24 * 3600;

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub announcements: AnnouncementsSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub alerts: AlertsSection,
    #[serde(default)]
    pub venues: Vec<VenueConfig>,
}

/// Scheduler and storage settings shared by all venues
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Seconds between ticks, per venue
    #[serde(default = "default_frequency_seconds")]
    pub frequency_seconds: u64,
    /// Minutes between announcement polls and config reloads
    #[serde(default = "default_housekeeping_interval_minutes")]
    pub housekeeping_interval_minutes: u64,
    /// Directory for `{venue}_orders.json` and friends (supports `~`)
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Trade against the simulated venue
    #[serde(default = "default_true")]
    pub paper: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            frequency_seconds: default_frequency_seconds(),
            housekeeping_interval_minutes: default_housekeeping_interval_minutes(),
            data_dir: default_data_dir(),
            paper: true,
        }
    }
}

impl EngineSection {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).to_string())
    }

    pub fn frequency(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.frequency_seconds)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::minutes(self.housekeeping_interval_minutes as i64)
    }
}

/// Where upcoming listings are read from
#[derive(Debug, Clone, Deserialize)]
pub struct AnnouncementsSection {
    #[serde(default = "default_announcements_path")]
    pub path: String,
}

impl Default for AnnouncementsSection {
    fn default() -> Self {
        Self {
            path: default_announcements_path(),
        }
    }
}

impl AnnouncementsSection {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to file (in addition to stdout)
    #[serde(default)]
    pub log_to_file: bool,
    /// Log file path
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_to_file: false,
            log_file: default_log_file(),
        }
    }
}

/// Alerts configuration section (optional)
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsSection {
    /// Enable Discord webhook notifications
    #[serde(default)]
    pub discord_enabled: bool,
    /// Discord webhook URL
    #[serde(default)]
    pub discord_webhook_url: String,
    /// Enable Telegram notifications
    #[serde(default)]
    pub telegram_enabled: bool,
    /// Telegram bot token
    #[serde(default)]
    pub telegram_bot_token: String,
    /// Telegram chat ID
    #[serde(default)]
    pub telegram_chat_id: String,
    /// Categories forwarded to webhooks; logs always get everything
    #[serde(default = "NotificationCategory::all")]
    pub categories: Vec<NotificationCategory>,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            discord_enabled: false,
            discord_webhook_url: String::new(),
            telegram_enabled: false,
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            categories: NotificationCategory::all(),
        }
    }
}

impl AlertsSection {
    /// Discord URL with `DISCORD_WEBHOOK_URL` env fallback
    pub fn discord_url(&self) -> Option<String> {
        non_empty(&self.discord_webhook_url).or_else(|| std::env::var("DISCORD_WEBHOOK_URL").ok())
    }

    /// Telegram token with `TELEGRAM_BOT_TOKEN` env fallback
    pub fn telegram_token(&self) -> Option<String> {
        non_empty(&self.telegram_bot_token).or_else(|| std::env::var("TELEGRAM_BOT_TOKEN").ok())
    }

    pub fn telegram_chat(&self) -> Option<String> {
        non_empty(&self.telegram_chat_id).or_else(|| std::env::var("TELEGRAM_CHAT_ID").ok())
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Per-venue trading parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VenueConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Quote-asset amount spent on each entry
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: f64,
    #[serde(default = "default_take_profit_percent")]
    pub take_profit_percent: f64,
    #[serde(default = "default_true")]
    pub enable_trailing_stop_loss: bool,
    #[serde(default = "default_trailing_stop_loss_percent")]
    pub trailing_stop_loss_percent: f64,
    /// Close immediately when price crosses the bracket
    #[serde(default)]
    pub enable_bracket_exits: bool,
    #[serde(default = "default_slow_exit_percent")]
    pub slow_exit_percent: f64,
    #[serde(default)]
    pub fast_exit_percent: f64,
    #[serde(default = "default_slow_exit_seconds")]
    pub slow_exit_seconds: u64,
    #[serde(default = "default_fast_exit_seconds")]
    pub fast_exit_seconds: u64,
    #[serde(default = "default_market_fill_seconds")]
    pub market_fill_seconds: u64,
    #[serde(default = "default_entry_fill_seconds")]
    pub entry_fill_seconds: u64,
    /// Pause between fill polls and transient retries
    #[serde(default = "default_sell_retry_seconds")]
    pub sell_retry_seconds: f64,
    #[serde(default = "default_entry_window_before_seconds")]
    pub entry_window_before_seconds: u64,
    #[serde(default = "default_entry_window_after_seconds")]
    pub entry_window_after_seconds: u64,
    #[serde(default = "default_first_warning_minutes")]
    pub first_warning_minutes: u64,
    #[serde(default = "default_second_warning_minutes")]
    pub second_warning_minutes: u64,
    #[serde(default = "default_third_warning_seconds")]
    pub third_warning_seconds: u64,
    /// Retries for transient failures outside a deadline-bounded stage
    #[serde(default = "default_transient_retry_attempts")]
    pub transient_retry_attempts: u32,
    /// Held size is the filled size minus this share
    #[serde(default = "default_fee_haircut_percent")]
    pub fee_haircut_percent: f64,
}

fn default_true() -> bool { true }
fn default_frequency_seconds() -> u64 { 10 }
fn default_housekeeping_interval_minutes() -> u64 { 2 }
fn default_data_dir() -> String { "data".to_string() }
fn default_announcements_path() -> String { "new_listing.json".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_file() -> String { "logs/listing-sniper.log".to_string() }
fn default_quote_asset() -> String { "USDT".to_string() }
fn default_quantity() -> f64 { 30.0 }
fn default_stop_loss_percent() -> f64 { 20.0 }
fn default_take_profit_percent() -> f64 { 30.0 }
fn default_trailing_stop_loss_percent() -> f64 { 10.0 }
fn default_slow_exit_percent() -> f64 { 1.0 }
fn default_slow_exit_seconds() -> u64 { 10 }
fn default_fast_exit_seconds() -> u64 { 30 }
fn default_market_fill_seconds() -> u64 { 10 }
fn default_entry_fill_seconds() -> u64 { 10 }
fn default_sell_retry_seconds() -> f64 { 0.5 }
fn default_entry_window_before_seconds() -> u64 { 60 }
fn default_entry_window_after_seconds() -> u64 { 6000 }
fn default_first_warning_minutes() -> u64 { 60 }
fn default_second_warning_minutes() -> u64 { 5 }
fn default_third_warning_seconds() -> u64 { 30 }
fn default_transient_retry_attempts() -> u32 { 3 }
fn default_fee_haircut_percent() -> f64 { 0.5 }

impl VenueConfig {
    /// Defaults for `name`, as if only `name` were given in the file
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            quote_asset: default_quote_asset(),
            quantity: default_quantity(),
            stop_loss_percent: default_stop_loss_percent(),
            take_profit_percent: default_take_profit_percent(),
            enable_trailing_stop_loss: true,
            trailing_stop_loss_percent: default_trailing_stop_loss_percent(),
            enable_bracket_exits: false,
            slow_exit_percent: default_slow_exit_percent(),
            fast_exit_percent: 0.0,
            slow_exit_seconds: default_slow_exit_seconds(),
            fast_exit_seconds: default_fast_exit_seconds(),
            market_fill_seconds: default_market_fill_seconds(),
            entry_fill_seconds: default_entry_fill_seconds(),
            sell_retry_seconds: default_sell_retry_seconds(),
            entry_window_before_seconds: default_entry_window_before_seconds(),
            entry_window_after_seconds: default_entry_window_after_seconds(),
            first_warning_minutes: default_first_warning_minutes(),
            second_warning_minutes: default_second_warning_minutes(),
            third_warning_seconds: default_third_warning_seconds(),
            transient_retry_attempts: default_transient_retry_attempts(),
            fee_haircut_percent: default_fee_haircut_percent(),
        }
    }

    /// Bracket percents are magnitudes; a sign in the file is ignored.
    pub fn normalize(&mut self) {
        self.stop_loss_percent = self.stop_loss_percent.abs();
        self.take_profit_percent = self.take_profit_percent.abs();
        self.trailing_stop_loss_percent = self.trailing_stop_loss_percent.abs();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "venue name cannot be empty".to_string(),
            ));
        }

        if self.quote_asset.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "[{}] quote_asset cannot be empty",
                self.name
            )));
        }

        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "[{}] quantity must be > 0, got {}",
                self.name, self.quantity
            )));
        }

        for (field, value) in [
            ("stop_loss_percent", self.stop_loss_percent),
            ("take_profit_percent", self.take_profit_percent),
            ("trailing_stop_loss_percent", self.trailing_stop_loss_percent),
        ] {
            if !value.is_finite() || value.abs() > MAX_PERCENT {
                return Err(ConfigError::ValidationError(format!(
                    "[{}] invalid value for {}: {}",
                    self.name, field, value
                )));
            }
        }

        for (field, value) in [
            ("slow_exit_percent", self.slow_exit_percent),
            ("fast_exit_percent", self.fast_exit_percent),
        ] {
            if !value.is_finite() || value <= -100.0 || value > MAX_PERCENT {
                return Err(ConfigError::ValidationError(format!(
                    "[{}] {} must be > -100, got {}",
                    self.name, field, value
                )));
            }
        }

        if !(0.0..100.0).contains(&self.fee_haircut_percent) {
            return Err(ConfigError::ValidationError(format!(
                "[{}] fee_haircut_percent must be 0-100, got {}",
                self.name, self.fee_haircut_percent
            )));
        }

        if self.slow_exit_seconds == 0 || self.slow_exit_seconds >= self.fast_exit_seconds {
            return Err(ConfigError::ValidationError(format!(
                "[{}] need 0 < slow_exit_seconds < fast_exit_seconds, got {} and {}",
                self.name, self.slow_exit_seconds, self.fast_exit_seconds
            )));
        }

        let first = self.first_warning_minutes.saturating_mul(60);
        let second = self.second_warning_minutes.saturating_mul(60);

        for (field, value) in [
            ("fast_exit_seconds", self.fast_exit_seconds),
            ("market_fill_seconds", self.market_fill_seconds),
            ("entry_fill_seconds", self.entry_fill_seconds),
            ("entry_window_before_seconds", self.entry_window_before_seconds),
            ("entry_window_after_seconds", self.entry_window_after_seconds),
            ("first_warning_minutes", first),
        ] {
            if value == 0 || value > MAX_SECONDS {
                return Err(ConfigError::ValidationError(format!(
                    "[{}] {} out of range: {}",
                    self.name, field, value
                )));
            }
        }

        if self.entry_window_after_seconds <= self.fast_exit_seconds {
            return Err(ConfigError::ValidationError(format!(
                "[{}] entry_window_after_seconds ({}) must exceed fast_exit_seconds ({})",
                self.name, self.entry_window_after_seconds, self.fast_exit_seconds
            )));
        }

        if !(first > second && second > self.third_warning_seconds) {
            return Err(ConfigError::ValidationError(format!(
                "[{}] warning lead times must decrease: {}m > {}m > {}s",
                self.name,
                self.first_warning_minutes,
                self.second_warning_minutes,
                self.third_warning_seconds
            )));
        }

        if !self.sell_retry_seconds.is_finite()
            || self.sell_retry_seconds <= 0.0
            || self.sell_retry_seconds > self.slow_exit_seconds as f64
        {
            return Err(ConfigError::ValidationError(format!(
                "[{}] sell_retry_seconds must be in (0, slow_exit_seconds], got {}",
                self.name, self.sell_retry_seconds
            )));
        }

        if self.transient_retry_attempts == 0 {
            return Err(ConfigError::ValidationError(format!(
                "[{}] transient_retry_attempts must be > 0",
                self.name
            )));
        }

        Ok(())
    }

    /// `+inf` while trailing is enabled, since the trailing stop replaces it
    pub fn effective_take_profit_percent(&self) -> f64 {
        if self.enable_trailing_stop_loss {
            f64::INFINITY
        } else {
            self.take_profit_percent
        }
    }

    pub fn retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.sell_retry_seconds)
    }

    pub fn entry_fill_timeout(&self) -> Duration {
        Duration::seconds(self.entry_fill_seconds as i64)
    }
}

impl From<&VenueConfig> for BracketConfig {
    fn from(config: &VenueConfig) -> Self {
        BracketConfig {
            take_profit_percent: config.take_profit_percent,
            stop_loss_percent: config.stop_loss_percent,
            trailing_stop_loss_percent: config.trailing_stop_loss_percent,
            enable_trailing_stop_loss: config.enable_trailing_stop_loss,
        }
    }
}

impl From<&VenueConfig> for ExitDeadlines {
    fn from(config: &VenueConfig) -> Self {
        ExitDeadlines::new(
            Duration::seconds(config.slow_exit_seconds as i64),
            Duration::seconds(config.fast_exit_seconds as i64),
            Duration::seconds(config.market_fill_seconds as i64),
        )
    }
}

impl From<&VenueConfig> for ExitPricing {
    fn from(config: &VenueConfig) -> Self {
        ExitPricing {
            slow_exit_percent: config.slow_exit_percent,
            fast_exit_percent: config.fast_exit_percent,
        }
    }
}

impl From<&VenueConfig> for WarningSchedule {
    fn from(config: &VenueConfig) -> Self {
        WarningSchedule {
            first: Duration::minutes(config.first_warning_minutes as i64),
            second: Duration::minutes(config.second_warning_minutes as i64),
            third: Duration::seconds(config.third_warning_seconds as i64),
        }
    }
}

impl From<&VenueConfig> for EntryWindow {
    fn from(config: &VenueConfig) -> Self {
        EntryWindow {
            before: Duration::seconds(config.entry_window_before_seconds as i64),
            after: Duration::seconds(config.entry_window_after_seconds as i64),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse, normalize and validate a TOML document
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(content)?;
    for venue in &mut config.venues {
        venue.normalize();
    }
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.frequency_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "frequency_seconds must be > 0".to_string(),
            ));
        }

        if self.engine.housekeeping_interval_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "housekeeping_interval_minutes must be > 0".to_string(),
            ));
        }

        if self.engine.data_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "data_dir cannot be empty".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for venue in &self.venues {
            if !names.insert(venue.name.to_uppercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate venue name: {}",
                    venue.name
                )));
            }
        }

        if self.alerts.discord_enabled && self.alerts.discord_url().is_none() {
            return Err(ConfigError::ValidationError(
                "discord_enabled requires discord_webhook_url".to_string(),
            ));
        }

        if self.alerts.telegram_enabled
            && (self.alerts.telegram_token().is_none() || self.alerts.telegram_chat().is_none())
        {
            return Err(ConfigError::ValidationError(
                "telegram_enabled requires telegram_bot_token and telegram_chat_id".to_string(),
            ));
        }

        Ok(())
    }

    pub fn enabled_venues(&self) -> impl Iterator<Item = &VenueConfig> {
        self.venues.iter().filter(|venue| venue.enabled)
    }

    pub fn venue(&self, name: &str) -> Option<&VenueConfig> {
        self.venues
            .iter()
            .find(|venue| venue.name.eq_ignore_ascii_case(name))
    }
}
