//! Listing Countdown
//!
//! One per venue. Holds the tracked listing event, its three sticky
//! pre-listing warnings, and the escalation stage of every position opened
//! for it. Recording a new event or clearing the current one resets all of
//! that state, except positions already at `Done`: those stay there until
//! the engine forgets them on removal.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::escalation::EscalationStage;
use super::symbol::Symbol;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingEvent {
    pub target_symbol: Option<Symbol>,
    pub listing_instant: Option<DateTime<Utc>>,
    pub warned_first: bool,
    pub warned_second: bool,
    pub warned_third: bool,
}

impl ListingEvent {
    pub fn is_empty(&self) -> bool {
        self.target_symbol.is_none() || self.listing_instant.is_none()
    }
}

/// Lead times before the listing instant at which warnings fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningSchedule {
    pub first: Duration,
    pub second: Duration,
    pub third: Duration,
}

impl Default for WarningSchedule {
    fn default() -> Self {
        Self {
            first: Duration::minutes(60),
            second: Duration::minutes(5),
            third: Duration::seconds(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningLevel {
    First,
    Second,
    Third,
}

/// A warning that just fired
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub level: WarningLevel,
    pub symbol: Symbol,
    pub listing_instant: DateTime<Utc>,
    /// The configured lead time that was crossed
    pub lead: Duration,
}

impl Warning {
    pub fn describe_lead(&self) -> String {
        if self.lead.num_seconds() < 120 {
            format!("{} seconds", self.lead.num_seconds())
        } else {
            format!("{} minutes", self.lead.num_minutes())
        }
    }
}

/// Bounds of the active window around the listing instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryWindow {
    pub before: Duration,
    pub after: Duration,
}

impl Default for EntryWindow {
    fn default() -> Self {
        Self {
            before: Duration::seconds(60),
            after: Duration::seconds(6000),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingCountdown {
    event: ListingEvent,
    stages: HashMap<String, EscalationStage>,
}

impl ListingCountdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(&self) -> &ListingEvent {
        &self.event
    }

    pub fn target(&self) -> Option<&Symbol> {
        self.event.target_symbol.as_ref()
    }

    pub fn listing_instant(&self) -> Option<DateTime<Utc>> {
        self.event.listing_instant
    }

    pub fn has_event(&self) -> bool {
        !self.event.is_empty()
    }

    /// Overwrite the tracked event; warnings and unfinished stages start over.
    pub fn record_event(&mut self, symbol: Symbol, listing_instant: DateTime<Utc>) {
        self.event = ListingEvent {
            target_symbol: Some(symbol),
            listing_instant: Some(listing_instant),
            ..ListingEvent::default()
        };
        self.stages.retain(|_, stage| stage.is_terminal());
    }

    /// Rebuild a minimal event for positions recovered without one. Warnings
    /// are marked sent so a restart does not replay them.
    pub fn restore_event(&mut self, symbol: Symbol, listing_instant: DateTime<Utc>) {
        self.event = ListingEvent {
            target_symbol: Some(symbol),
            listing_instant: Some(listing_instant),
            warned_first: true,
            warned_second: true,
            warned_third: true,
        };
    }

    /// True when `symbol`'s assets and `listing_instant` equal the tracked event.
    pub fn is_tracking(&self, symbol: &Symbol, listing_instant: DateTime<Utc>) -> bool {
        match (&self.event.target_symbol, self.event.listing_instant) {
            (Some(target), Some(instant)) => target.matches(symbol) && instant == listing_instant,
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.event = ListingEvent::default();
        self.stages.retain(|_, stage| stage.is_terminal());
    }

    /// Drop the stage of a position that left the ledger.
    pub fn forget_stage(&mut self, symbol_id: &str) {
        self.stages.remove(symbol_id);
    }

    /// True if `symbol_id` still has exit attempts ahead of it.
    pub fn awaits_exit(&self, symbol_id: &str) -> bool {
        !self.stage(symbol_id).is_terminal()
    }

    /// Warnings whose lead time has been crossed and that have not fired yet,
    /// in first/second/third order. Each fires at most once per event.
    pub fn check_warnings(&mut self, now: DateTime<Utc>, schedule: &WarningSchedule) -> Vec<Warning> {
        let (symbol, instant) = match (&self.event.target_symbol, self.event.listing_instant) {
            (Some(symbol), Some(instant)) => (symbol.clone(), instant),
            _ => return Vec::new(),
        };
        let remaining = instant - now;
        let mut fired = Vec::new();

        let levels = [
            (WarningLevel::First, schedule.first, &mut self.event.warned_first),
            (WarningLevel::Second, schedule.second, &mut self.event.warned_second),
            (WarningLevel::Third, schedule.third, &mut self.event.warned_third),
        ];
        for (level, lead, flag) in levels {
            if !*flag && remaining < lead {
                *flag = true;
                fired.push(Warning {
                    level,
                    symbol: symbol.clone(),
                    listing_instant: instant,
                    lead,
                });
            }
        }
        fired
    }

    /// Time since the listing instant; negative before it.
    pub fn elapsed_since_listing(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.event.listing_instant.map(|instant| now - instant)
    }

    /// Whether `now` lies strictly inside the active window.
    pub fn in_entry_window(&self, now: DateTime<Utc>, window: &EntryWindow) -> bool {
        match self.elapsed_since_listing(now) {
            Some(elapsed) => -window.before < elapsed && elapsed < window.after,
            None => false,
        }
    }

    pub fn stage(&self, symbol_id: &str) -> EscalationStage {
        self.stages.get(symbol_id).copied().unwrap_or_default()
    }

    /// Move `symbol_id` to `stage`. Returns false, leaving the stage as is,
    /// when that would move backwards.
    pub fn advance_stage(&mut self, symbol_id: &str, stage: EscalationStage) -> bool {
        let current = self.stage(symbol_id);
        if stage < current {
            return false;
        }
        self.stages.insert(symbol_id.to_string(), stage);
        true
    }

    pub fn stages(&self) -> &HashMap<String, EscalationStage> {
        &self.stages
    }
}
