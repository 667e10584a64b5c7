//! Position Ledger
//!
//! Owns the open and closed position maps for one venue, plus the durable
//! store that round-trips them (and the venue's countdown) through JSON files
//! named after the venue:
//!
//! - `{venue}_orders.json`: open positions keyed by symbol id
//! - `{venue}_sold.json`: closed positions keyed by symbol id
//! - `{venue}_countdown.json`: tracked event, warning flags, escalation stages
//!
//! Removal from the open map is deferred: `mark_closed` queues the symbol and
//! `sweep_pending_removals` applies the queue once the pass over open
//! positions is finished.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::bracket::{initial_bracket, update_trailing, BracketConfig};
use super::countdown::ListingCountdown;
use super::position::{
    ClosedPosition, CloseReason, ExternalOrderId, OrderKind, Position, Side, Status,
};
use super::symbol::Symbol;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Position already open for {0}")]
    DuplicateEntry(String),

    #[error("Position for {0} is already closed")]
    AlreadyClosed(String),

    #[error("No open position for {0}")]
    UnknownPosition(String),

    #[error("Entry order for {symbol} rejected: {reason}")]
    EntryOrderRejected { symbol: String, reason: String },

    #[error("Exit size {size} is not valid for {symbol} holding {held}")]
    InvalidExitSize { symbol: String, size: f64, held: f64 },
}

#[derive(Error, Debug, Clone)]
pub enum PersistError {
    #[error("Failed to serialize ledger: {0}")]
    SerializationError(String),

    #[error("Failed to write ledger file: {0}")]
    WriteError(String),

    #[error("Failed to read ledger file: {0}")]
    ReadError(String),

    #[error("Ledger file is corrupted: {0}")]
    CorruptedFile(String),

    #[error("Failed to create directory: {0}")]
    DirectoryError(String),
}

/// A filled entry order, as reported by the venue
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFill {
    pub entry_price: f64,
    pub size: f64,
    pub order_kind: OrderKind,
    pub external_order_id: ExternalOrderId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionLedger {
    venue: String,
    open: BTreeMap<String, Position>,
    closed: BTreeMap<String, ClosedPosition>,
    pending_removals: Vec<String>,
}

impl PositionLedger {
    pub fn new(venue: impl Into<String>) -> Self {
        Self {
            venue: venue.into(),
            ..Self::default()
        }
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn holds(&self, symbol_id: &str) -> bool {
        self.open.contains_key(symbol_id)
    }

    pub fn is_closed(&self, symbol_id: &str) -> bool {
        self.closed.contains_key(symbol_id)
    }

    pub fn get(&self, symbol_id: &str) -> Option<&Position> {
        self.open.get(symbol_id)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn closed_positions(&self) -> impl Iterator<Item = &ClosedPosition> {
        self.closed.values()
    }

    /// Open symbols without a close recorded in this run
    pub fn symbols_awaiting_exit(&self) -> Vec<String> {
        self.open
            .keys()
            .filter(|id| !self.closed.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }

    /// Duplicate-entry guard, checked before any order goes out.
    pub fn ensure_can_open(&self, symbol_id: &str) -> Result<(), LedgerError> {
        if self.holds(symbol_id) {
            return Err(LedgerError::DuplicateEntry(symbol_id.to_string()));
        }
        Ok(())
    }

    pub fn open(
        &mut self,
        symbol: Symbol,
        fill: EntryFill,
        opened_at: DateTime<Utc>,
        cfg: &BracketConfig,
    ) -> Result<Position, LedgerError> {
        self.ensure_can_open(&symbol.symbol_id)?;

        let bracket = initial_bracket(fill.entry_price, cfg);
        let position = Position {
            venue: self.venue.clone(),
            symbol,
            opened_at,
            entry_price: fill.entry_price,
            side: Side::Buy,
            size: fill.size,
            order_kind: fill.order_kind,
            status: Status::Open,
            take_profit: bracket.take_profit,
            stop_loss: bracket.stop_loss,
            trailing_stop_max: bracket.trailing_stop_max,
            trailing_stop: bracket.trailing_stop,
            external_order_id: fill.external_order_id,
        };
        self.open
            .insert(position.symbol.symbol_id.clone(), position.clone());
        Ok(position)
    }

    /// Ratchet the trailing stop of an open position. Returns true if it moved.
    pub fn apply_trailing(
        &mut self,
        symbol_id: &str,
        current_price: f64,
        cfg: &BracketConfig,
    ) -> Result<bool, LedgerError> {
        let position = self
            .open
            .get_mut(symbol_id)
            .ok_or_else(|| LedgerError::UnknownPosition(symbol_id.to_string()))?;
        if current_price <= position.trailing_stop_max {
            return Ok(false);
        }
        *position = update_trailing(position, current_price, cfg);
        Ok(true)
    }

    /// Shrink an open position after part of an exit order filled. Returns the
    /// size still held.
    pub fn reduce_size(&mut self, symbol_id: &str, sold_qty: f64) -> Result<f64, LedgerError> {
        if self.closed.contains_key(symbol_id) {
            return Err(LedgerError::AlreadyClosed(symbol_id.to_string()));
        }
        let position = self
            .open
            .get_mut(symbol_id)
            .ok_or_else(|| LedgerError::UnknownPosition(symbol_id.to_string()))?;
        if !(sold_qty.is_finite() && sold_qty > 0.0 && sold_qty < position.size) {
            return Err(LedgerError::InvalidExitSize {
                symbol: symbol_id.to_string(),
                size: sold_qty,
                held: position.size,
            });
        }
        position.size -= sold_qty;
        Ok(position.size)
    }

    /// Record the exit of `closed_size` units of `symbol_id`; profit is
    /// computed on that size, capped at what is held. The open entry stays in
    /// place until the next sweep.
    pub fn mark_closed(
        &mut self,
        symbol_id: &str,
        exit_price: f64,
        closed_size: f64,
        exit_order_id: ExternalOrderId,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Result<ClosedPosition, LedgerError> {
        if self.closed.contains_key(symbol_id) {
            return Err(LedgerError::AlreadyClosed(symbol_id.to_string()));
        }
        let mut snapshot = self
            .open
            .get(symbol_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownPosition(symbol_id.to_string()))?;
        if !(closed_size.is_finite() && closed_size > 0.0) {
            return Err(LedgerError::InvalidExitSize {
                symbol: symbol_id.to_string(),
                size: closed_size,
                held: snapshot.size,
            });
        }
        snapshot.size = closed_size.min(snapshot.size);
        snapshot.status = Status::Closed;

        let cost_basis = snapshot.cost_basis();
        let realized_profit = exit_price * snapshot.size - cost_basis;
        let realized_profit_percent = if cost_basis > 0.0 {
            realized_profit / cost_basis * 100.0
        } else {
            0.0
        };

        let closed = ClosedPosition {
            position: snapshot,
            closed_at,
            exit_price,
            realized_profit,
            realized_profit_percent,
            reason,
            external_order_id: exit_order_id,
        };
        self.closed.insert(symbol_id.to_string(), closed.clone());
        self.pending_removals.push(symbol_id.to_string());
        Ok(closed)
    }

    /// Apply queued removals; returns the ids actually removed.
    pub fn sweep_pending_removals(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        for symbol_id in self.pending_removals.drain(..) {
            if self.open.remove(&symbol_id).is_some() {
                removed.push(symbol_id);
            }
        }
        removed
    }

    pub fn pending_removals(&self) -> &[String] {
        &self.pending_removals
    }

    /// Earliest-opened position, used to rebuild a lost countdown.
    pub fn earliest_open(&self) -> Option<&Position> {
        self.open.values().min_by_key(|position| position.opened_at)
    }

    /// Drop open entries that already have a close record, which happens when
    /// the process stopped between `mark_closed` and the sweep.
    fn reconcile(&mut self) -> Vec<String> {
        let stale: Vec<String> = self
            .open
            .keys()
            .filter(|id| self.closed.contains_key(*id))
            .cloned()
            .collect();
        for symbol_id in &stale {
            self.open.remove(symbol_id);
        }
        stale
    }
}

/// Outcome of loading a venue's store
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStatus {
    /// Nothing on disk yet
    Fresh,
    Recovered { open: usize, closed: usize },
    /// At least one file was unreadable and was replaced by an empty map
    Corrupted(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct LoadedState {
    pub ledger: PositionLedger,
    pub countdown: ListingCountdown,
    pub status: RecoveryStatus,
}

#[derive(Debug, Clone)]
pub struct LedgerStore {
    dir: PathBuf,
    venue: String,
}

impl LedgerStore {
    pub fn new(dir: impl Into<PathBuf>, venue: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            venue: venue.into(),
        }
    }

    pub fn orders_path(&self) -> PathBuf {
        self.dir.join(format!("{}_orders.json", self.venue))
    }

    pub fn sold_path(&self) -> PathBuf {
        self.dir.join(format!("{}_sold.json", self.venue))
    }

    pub fn countdown_path(&self) -> PathBuf {
        self.dir.join(format!("{}_countdown.json", self.venue))
    }

    pub fn save(
        &self,
        ledger: &PositionLedger,
        countdown: &ListingCountdown,
    ) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).map_err(|e| PersistError::DirectoryError(e.to_string()))?;

        write_json_atomic(&self.orders_path(), &ledger.open)?;
        write_json_atomic(&self.sold_path(), &ledger.closed)?;
        write_json_atomic(&self.countdown_path(), countdown)?;
        Ok(())
    }

    /// Load whatever is on disk. Never fails: unreadable files are logged,
    /// quarantined, and replaced by empty state.
    pub fn load(&self) -> LoadedState {
        self.load_with(true)
    }

    /// Same as `load`, but corrupted files are left where they are.
    pub fn inspect(&self) -> LoadedState {
        self.load_with(false)
    }

    fn load_with(&self, quarantine_corrupt: bool) -> LoadedState {
        let mut problems = Vec::new();
        let mut found_any = false;

        let open: BTreeMap<String, Position> =
            self.load_part(&self.orders_path(), quarantine_corrupt, &mut problems, &mut found_any);
        let closed: BTreeMap<String, ClosedPosition> =
            self.load_part(&self.sold_path(), quarantine_corrupt, &mut problems, &mut found_any);
        let countdown: ListingCountdown = self.load_part(
            &self.countdown_path(),
            quarantine_corrupt,
            &mut problems,
            &mut found_any,
        );

        let mut ledger = PositionLedger {
            venue: self.venue.clone(),
            open,
            closed,
            pending_removals: Vec::new(),
        };
        let stale = ledger.reconcile();
        if !stale.is_empty() {
            tracing::warn!(
                "[{}] Dropped {} open position(s) that were already closed: {:?}",
                self.venue,
                stale.len(),
                stale
            );
        }

        let status = if !problems.is_empty() {
            RecoveryStatus::Corrupted(problems)
        } else if found_any {
            RecoveryStatus::Recovered {
                open: ledger.open_count(),
                closed: ledger.closed_count(),
            }
        } else {
            RecoveryStatus::Fresh
        };

        LoadedState {
            ledger,
            countdown,
            status,
        }
    }

    fn load_part<T: DeserializeOwned + Default>(
        &self,
        path: &Path,
        quarantine_corrupt: bool,
        problems: &mut Vec<String>,
        found_any: &mut bool,
    ) -> T {
        match read_json(path) {
            Ok(Some(value)) => {
                *found_any = true;
                value
            }
            Ok(None) => T::default(),
            Err(e) => {
                tracing::error!("[{}] {} - starting with empty state", self.venue, e);
                if quarantine_corrupt && matches!(e, PersistError::CorruptedFile(_)) {
                    quarantine(path);
                }
                problems.push(e.to_string());
                T::default()
            }
        }
    }
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistError> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| PersistError::SerializationError(e.to_string()))?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, content)
        .map_err(|e| PersistError::WriteError(format!("{}: {}", tmp_path.display(), e)))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| PersistError::WriteError(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .map_err(|e| PersistError::ReadError(format!("{}: {}", path.display(), e)))?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| PersistError::CorruptedFile(format!("{}: {}", path.display(), e)))
}

/// Move a corrupted file aside so the next save does not overwrite evidence.
fn quarantine(path: &Path) {
    let backup = path.with_extension(format!("corrupt-{}", Utc::now().timestamp()));
    match fs::rename(path, &backup) {
        Ok(()) => tracing::warn!("Moved corrupted file to {}", backup.display()),
        Err(e) => tracing::error!("Failed to move corrupted file {}: {}", path.display(), e),
    }
}
