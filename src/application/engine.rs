//! Venue Engine
//!
//! One engine per venue. A tick is a single sequential pass:
//!
//! 1. housekeeping (config reload, announcement poll) and pre-listing warnings
//! 2. exit escalation for every open position not yet closed
//! 3. deferred removals; any removal clears the countdown
//! 4. inside the entry window, diff the venue's symbols and buy the target
//! 5. persist the ledger, whatever happened above
//!
//! Nothing here is shared across venues. Per-position failures are logged and
//! counted; they never end the pass.

use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{load_config, ConfigError, VenueConfig};
use crate::domain::{
    evaluate_breach, plan, BracketBreach, BracketConfig, ClosedPosition, CloseReason,
    EntryFill, EntryWindow, EscalationStage, EscalationStep, ExitDeadlines, ExitPricing,
    ExitTechnique, ExternalOrderId, LedgerError, LedgerStore, ListingCountdown, OrderKind,
    PersistError, Position, PositionLedger, RecoveryStatus, Side, Symbol, TickerUniverse,
    WarningSchedule,
};
use crate::ports::{
    AnnouncementSource, Clock, Notification, Notifier, OrderFill, OrderRequest, VenueClient,
    VenueError,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("Entry order for {symbol} not filled within {seconds}s")]
    EntryNotFilled { symbol: String, seconds: i64 },

    #[error("Exit order for {symbol} not filled before its deadline")]
    ExitNotFilled { symbol: String },

    #[error("Gave up on {operation} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },
}

/// External collaborators an engine is built from
#[derive(Clone)]
pub struct EngineDeps {
    pub venue: Arc<dyn VenueClient>,
    pub announcements: Arc<dyn AnnouncementSource>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Outside the entry window, no trading attempted
    pub idle: bool,
    pub warnings: usize,
    pub entered: Vec<String>,
    pub closed: Vec<String>,
    pub stage_changes: usize,
    pub failed_forced_exits: Vec<String>,
    pub countdown_cleared: bool,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitOutcome {
    Idle,
    Advanced(EscalationStage),
    Closed,
    ForcedExitFailed,
}

pub struct VenueEngine {
    config: VenueConfig,
    config_path: Option<PathBuf>,
    housekeeping_interval: Duration,
    venue: Arc<dyn VenueClient>,
    announcements: Arc<dyn AnnouncementSource>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    store: LedgerStore,
    ledger: PositionLedger,
    countdown: ListingCountdown,
    universe: TickerUniverse,
    last_housekeeping: Option<DateTime<Utc>>,
}

impl VenueEngine {
    /// Fails only when `config` does not validate; that venue must not start.
    pub fn new(config: VenueConfig, store: LedgerStore, deps: EngineDeps) -> Result<Self, EngineError> {
        config.validate()?;

        let ledger = PositionLedger::new(config.name.clone());
        Ok(Self {
            config,
            config_path: None,
            housekeeping_interval: Duration::minutes(2),
            venue: deps.venue,
            announcements: deps.announcements,
            notifier: deps.notifier,
            clock: deps.clock,
            store,
            ledger,
            countdown: ListingCountdown::new(),
            universe: TickerUniverse::new(),
            last_housekeeping: None,
        })
    }

    /// Re-read this venue's section from `path` on every housekeeping cycle.
    pub fn with_config_reload(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &VenueConfig {
        &self.config
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn countdown(&self) -> &ListingCountdown {
        &self.countdown
    }

    pub fn universe(&self) -> &TickerUniverse {
        &self.universe
    }

    /// Load the venue's store. Positions recovered without a tracked event get
    /// one rebuilt from the earliest entry so escalation can resume.
    pub fn recover(&mut self) -> RecoveryStatus {
        let loaded = self.store.load();
        self.ledger = loaded.ledger;
        self.countdown = loaded.countdown;

        if !self.countdown.has_event() {
            if let Some(position) = self.ledger.earliest_open() {
                tracing::warn!(
                    "[{}] Recovered {} open position(s) without a listing event, resuming from {} opened at {}",
                    self.name(),
                    self.ledger.open_count(),
                    position.symbol,
                    position.opened_at
                );
                let (symbol, opened_at) = (position.symbol.clone(), position.opened_at);
                self.countdown.restore_event(symbol, opened_at);
            }
        }

        match &loaded.status {
            RecoveryStatus::Fresh => {
                tracing::info!("[{}] No saved state, starting fresh", self.name());
            }
            RecoveryStatus::Recovered { open, closed } => {
                tracing::info!(
                    "[{}] Recovered {} open and {} closed position(s)",
                    self.name(),
                    open,
                    closed
                );
            }
            RecoveryStatus::Corrupted(problems) => {
                tracing::error!(
                    "[{}] Saved state was corrupted, continuing with what could be read",
                    self.name()
                );
                self.notifier.notify(Notification::error(
                    self.name(),
                    format!("Saved state corrupted: {}", problems.join("; ")),
                ));
            }
        }
        loaded.status
    }

    pub fn persist(&self) -> Result<(), PersistError> {
        self.store.save(&self.ledger, &self.countdown)
    }

    /// One full pass. The ledger is persisted even when the pass hit errors;
    /// only a failed persist is returned as an error.
    pub async fn tick(&mut self) -> Result<TickReport, EngineError> {
        let mut report = TickReport::default();
        self.run_pass(&mut report).await;
        self.persist()?;
        Ok(report)
    }

    async fn run_pass(&mut self, report: &mut TickReport) {
        let now = self.clock.now();
        self.housekeeping(now).await;
        self.emit_warnings(now, report);

        if !self.universe.is_seeded() {
            self.seed_universe().await;
        }

        if !self.countdown.in_entry_window(now, &self.entry_window()) {
            if self.ledger.open_count() > 0 && self.countdown.has_event() {
                tracing::debug!(
                    "[{}] {} open position(s) outside the entry window",
                    self.name(),
                    self.ledger.open_count()
                );
            }
            report.idle = true;
            return;
        }

        self.run_exits(report).await;

        let removed = self.ledger.sweep_pending_removals();
        for symbol_id in &removed {
            self.countdown.forget_stage(symbol_id);
        }
        if !removed.is_empty() {
            tracing::info!(
                "[{}] Removed closed position(s) {:?}, clearing listing countdown",
                self.name(),
                removed
            );
            self.countdown.clear();
            report.countdown_cleared = true;
        }

        if self.countdown.has_event() && self.universe.is_seeded() {
            self.detect_and_enter(report).await;
        }
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    async fn housekeeping(&mut self, now: DateTime<Utc>) {
        let due = self
            .last_housekeeping
            .map_or(true, |last| now - last >= self.housekeeping_interval);
        if !due {
            return;
        }
        self.last_housekeeping = Some(now);

        self.reload_config();
        self.refresh_announcement(now).await;

        for position in self.ledger.open_positions() {
            tracing::info!(
                "[{}] Holding {} size {:.8} @ {:.8} (stage {:?}, trailing stop {:.8})",
                self.name(),
                position.symbol,
                position.size,
                position.entry_price,
                self.countdown.stage(&position.symbol.symbol_id),
                position.trailing_stop
            );
        }
    }

    fn reload_config(&mut self) {
        let Some(path) = &self.config_path else {
            return;
        };
        let reloaded = match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "[{}] Config reload failed, keeping current settings: {}",
                    self.name(),
                    e
                );
                return;
            }
        };
        let Some(venue) = reloaded.venue(&self.config.name).cloned() else {
            tracing::warn!(
                "[{}] Venue missing from reloaded config, keeping current settings",
                self.name()
            );
            return;
        };
        if venue == self.config {
            return;
        }
        match venue.validate() {
            Ok(()) => {
                tracing::info!("[{}] Applied reloaded configuration", self.name());
                self.config = venue;
            }
            Err(e) => {
                tracing::warn!(
                    "[{}] Reloaded configuration is invalid, keeping current settings: {}",
                    self.name(),
                    e
                );
            }
        }
    }

    async fn refresh_announcement(&mut self, now: DateTime<Utc>) {
        let announcement = match self.announcements.poll_for_new_listing().await {
            Ok(Some(announcement)) => announcement,
            Ok(None) => {
                tracing::debug!("[{}] No upcoming listing announced", self.name());
                return;
            }
            Err(e) => {
                tracing::warn!(
                    "[{}] Announcement poll via {} failed, retrying next cycle: {}",
                    self.name(),
                    self.announcements.name(),
                    e
                );
                return;
            }
        };

        let target = Symbol::from_assets(&announcement.base_asset, &self.config.quote_asset);
        let instant = announcement.listing_instant;

        if instant <= now {
            tracing::debug!(
                "[{}] Ignoring announcement {} at {}, already listed",
                self.name(),
                target,
                instant
            );
            return;
        }
        if self.countdown.is_tracking(&target, instant) {
            return;
        }
        // positions left at Done after a failed forced exit do not hold the venue
        let exiting = self
            .ledger
            .open_positions()
            .filter(|p| self.countdown.awaits_exit(&p.symbol.symbol_id))
            .count();
        if exiting > 0 && self.countdown.has_event() {
            tracing::warn!(
                "[{}] New announcement {} at {} deferred while {} position(s) are exiting",
                self.name(),
                target,
                instant,
                exiting
            );
            return;
        }

        tracing::info!(
            "[{}] Tracking listing of {} at {} UTC",
            self.name(),
            target,
            instant.format("%Y-%m-%d %H:%M")
        );
        self.notifier.notify(Notification::info(
            self.name(),
            format!(
                "[{}] will list {} at {} (UTC)",
                self.name(),
                target.base_asset,
                instant.format("%Y-%m-%d %H:%M")
            ),
        ));
        self.countdown.record_event(target, instant);
    }

    fn emit_warnings(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        let schedule = WarningSchedule::from(&self.config);
        for warning in self.countdown.check_warnings(now, &schedule) {
            let message = format!(
                "[{}] will list {} in {}!",
                self.name(),
                warning.symbol.base_asset,
                warning.describe_lead()
            );
            tracing::info!("{}", message);
            self.notifier.notify(Notification::warning(self.name(), message));
            report.warnings += 1;
        }
    }

    async fn seed_universe(&mut self) {
        match self.venue.list_tradable_symbols(&self.config.quote_asset).await {
            Ok(symbols) => {
                self.universe.seed(&symbols);
                tracing::info!(
                    "[{}] Seeded {} existing {} pairs",
                    self.name(),
                    symbols.len(),
                    self.config.quote_asset
                );
            }
            Err(e) => {
                tracing::warn!(
                    "[{}] Could not fetch starting symbols, retrying next tick: {}",
                    self.name(),
                    e
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Exits
    // ------------------------------------------------------------------

    async fn run_exits(&mut self, report: &mut TickReport) {
        for symbol_id in self.ledger.symbols_awaiting_exit() {
            match self.escalate(&symbol_id).await {
                Ok(ExitOutcome::Idle) => {}
                Ok(ExitOutcome::Advanced(_)) => report.stage_changes += 1,
                Ok(ExitOutcome::Closed) => {
                    report.stage_changes += 1;
                    report.closed.push(symbol_id);
                }
                Ok(ExitOutcome::ForcedExitFailed) => {
                    report.stage_changes += 1;
                    report.failed_forced_exits.push(symbol_id);
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        "[{}] Exit handling for {} failed: {}",
                        self.name(),
                        symbol_id,
                        e
                    );
                }
            }
        }
    }

    async fn escalate(&mut self, symbol_id: &str) -> Result<ExitOutcome, EngineError> {
        let stage = self.countdown.stage(symbol_id);
        if stage.is_terminal() {
            return Ok(ExitOutcome::Idle);
        }
        let Some(position) = self.ledger.get(symbol_id).cloned() else {
            return Ok(ExitOutcome::Idle);
        };

        if self.check_bracket(&position).await? {
            self.countdown.advance_stage(symbol_id, EscalationStage::Done);
            return Ok(ExitOutcome::Closed);
        }

        let (Some(listing_instant), Some(elapsed)) = (
            self.countdown.listing_instant(),
            self.countdown.elapsed_since_listing(self.clock.now()),
        ) else {
            return Ok(ExitOutcome::Idle);
        };

        match plan(stage, elapsed, &self.deadlines()) {
            EscalationStep::Wait | EscalationStep::Terminal => Ok(ExitOutcome::Idle),
            EscalationStep::Advance(next) => {
                tracing::info!(
                    "[{}] {} window for {} elapsed without an attempt, moving to {:?}",
                    self.name(),
                    stage_label(stage),
                    symbol_id,
                    next
                );
                self.countdown.advance_stage(symbol_id, next);
                Ok(ExitOutcome::Advanced(next))
            }
            EscalationStep::Attempt { technique, until } => {
                let deadline = listing_instant + until;
                let reason = close_reason(technique);
                let filled = match self.close_position(&position, technique, deadline, reason).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(
                            "[{}] {} for {} failed: {}",
                            self.name(),
                            stage_label(stage),
                            symbol_id,
                            e
                        );
                        false
                    }
                };

                let next = stage.after_attempt(filled);
                self.countdown.advance_stage(symbol_id, next);
                if filled {
                    return Ok(ExitOutcome::Closed);
                }
                if stage == EscalationStage::ForceExit {
                    tracing::error!(
                        "[{}] Forced exit of {} failed, position left open for manual handling",
                        self.name(),
                        symbol_id
                    );
                    self.notifier.notify(Notification::error(
                        self.name(),
                        format!("Forced exit of {} failed, manual intervention needed", symbol_id),
                    ));
                    return Ok(ExitOutcome::ForcedExitFailed);
                }
                tracing::info!("[{}] {} moves to {:?}", self.name(), symbol_id, next);
                Ok(ExitOutcome::Advanced(next))
            }
        }
    }

    /// Trailing update plus optional bracket exit. Returns true if the
    /// position was closed.
    async fn check_bracket(&mut self, position: &Position) -> Result<bool, EngineError> {
        let symbol_id = position.symbol.symbol_id.as_str();
        let price = match self.venue.get_price(&position.symbol).await {
            Ok(price) => price,
            Err(e) => {
                tracing::debug!("[{}] No price for {}: {}", self.name(), symbol_id, e);
                return Ok(false);
            }
        };

        let cfg = BracketConfig::from(&self.config);
        if cfg.enable_trailing_stop_loss
            && price > position.trailing_stop_max
            && self.ledger.apply_trailing(symbol_id, price, &cfg)?
        {
            if let Some(updated) = self.ledger.get(symbol_id) {
                tracing::debug!(
                    "[{}] {} new high {:.8}, trailing stop {:.8}",
                    self.name(),
                    symbol_id,
                    updated.trailing_stop_max,
                    updated.trailing_stop
                );
            }
            self.persist_logged();
        }

        if !self.config.enable_bracket_exits {
            return Ok(false);
        }
        let Some(current) = self.ledger.get(symbol_id).cloned() else {
            return Ok(false);
        };
        let Some(breach) = evaluate_breach(&current, price, &cfg) else {
            return Ok(false);
        };

        tracing::warn!(
            "[{}] {} at {:.8} crossed its {:?} threshold, exiting at market",
            self.name(),
            symbol_id,
            price,
            breach
        );
        let deadline = self.clock.now() + self.deadlines().market_fill;
        let reason = match breach {
            BracketBreach::StopLoss => CloseReason::StopLoss,
            BracketBreach::TrailingStop => CloseReason::TrailingStop,
            BracketBreach::TakeProfit => CloseReason::TakeProfit,
        };
        match self
            .close_position(&current, ExitTechnique::Market, deadline, reason)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!(
                    "[{}] Bracket exit for {} failed, continuing escalation: {}",
                    self.name(),
                    symbol_id,
                    e
                );
                Ok(false)
            }
        }
    }

    /// Submit an exit and poll it until filled or `deadline`. An unfilled
    /// order is cancelled before reporting failure; whatever part of it did
    /// fill is taken off the position so the next attempt sells only the rest.
    async fn close_position(
        &mut self,
        position: &Position,
        technique: ExitTechnique,
        deadline: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<ClosedPosition, EngineError> {
        let symbol = &position.symbol;
        let limit_price = self.pricing().limit_price(technique, position.entry_price);
        let request = match limit_price {
            Some(price) => OrderRequest::limit(symbol.clone(), Side::Sell, position.size, price),
            None => OrderRequest::market(symbol.clone(), Side::Sell, position.size),
        };

        let order_id = self.submit_until(request, deadline).await?;
        tracing::info!(
            "[{}] Submitted {:?} exit for {} size {:.8} (order {}, limit {:?})",
            self.name(),
            technique,
            symbol,
            position.size,
            order_id,
            limit_price
        );

        let mut last: Option<OrderFill> = None;
        loop {
            match self.venue.poll_order(symbol, &order_id).await {
                Ok(fill) if fill.is_filled() => {
                    return self
                        .record_exit(position, &fill, limit_price, order_id, reason)
                        .await;
                }
                Ok(fill) => {
                    tracing::debug!(
                        "[{}] Exit {} filled {:.8}/{:.8}",
                        self.name(),
                        order_id,
                        fill.filled_qty,
                        fill.requested_qty
                    );
                    last = Some(fill);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!("[{}] Polling exit {} failed: {}", self.name(), order_id, e);
                }
                Err(e) => {
                    self.cancel_quietly(symbol, &order_id).await;
                    self.keep_partial_exit(position, &order_id, last.as_ref());
                    return Err(e.into());
                }
            }

            if self.clock.now() >= deadline {
                self.cancel_quietly(symbol, &order_id).await;
                // a fill can land between the last poll and the cancel
                if let Ok(fill) = self.venue.poll_order(symbol, &order_id).await {
                    if fill.is_filled() {
                        return self
                            .record_exit(position, &fill, limit_price, order_id, reason)
                            .await;
                    }
                    last = Some(fill);
                }
                self.keep_partial_exit(position, &order_id, last.as_ref());
                return Err(EngineError::ExitNotFilled {
                    symbol: symbol.symbol_id.clone(),
                });
            }
            tokio::time::sleep(self.config.retry_interval()).await;
        }
    }

    /// Take the filled part of a cancelled exit off the held size.
    fn keep_partial_exit(
        &mut self,
        position: &Position,
        order_id: &ExternalOrderId,
        fill: Option<&OrderFill>,
    ) {
        let Some(fill) = fill.filter(|f| f.filled_qty > 0.0) else {
            return;
        };
        let symbol_id = position.symbol.symbol_id.as_str();
        match self.ledger.reduce_size(symbol_id, fill.filled_qty) {
            Ok(remaining) => {
                tracing::warn!(
                    "[{}] Exit {} for {} sold {:.8} before cancel, {:.8} left to sell",
                    self.name(),
                    order_id,
                    symbol_id,
                    fill.filled_qty,
                    remaining
                );
                self.persist_logged();
            }
            Err(e) => {
                tracing::error!(
                    "[{}] Could not apply partial exit {} for {}: {}",
                    self.name(),
                    order_id,
                    symbol_id,
                    e
                );
            }
        }
    }

    async fn record_exit(
        &mut self,
        position: &Position,
        fill: &OrderFill,
        limit_price: Option<f64>,
        order_id: ExternalOrderId,
        reason: CloseReason,
    ) -> Result<ClosedPosition, EngineError> {
        let exit_price = match fill.avg_price.or(limit_price) {
            Some(price) => price,
            None => match self.venue.get_price(&position.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    tracing::warn!(
                        "[{}] No exit price for {} ({}), recording it at entry price {:.8}",
                        self.name(),
                        position.symbol,
                        e,
                        position.entry_price
                    );
                    position.entry_price
                }
            },
        };

        let closed = self.ledger.mark_closed(
            &position.symbol.symbol_id,
            exit_price,
            fill.filled_qty,
            order_id,
            reason,
            self.clock.now(),
        )?;
        self.persist_logged();

        tracing::info!(
            "[{}] Closed {} ({}) at {:.8}, profit {:.2} ({:+.2}%)",
            self.name(),
            closed.symbol_id(),
            reason,
            exit_price,
            closed.realized_profit,
            closed.realized_profit_percent
        );
        self.notifier.notify(Notification::close(&closed));
        Ok(closed)
    }

    async fn submit_until(
        &self,
        request: OrderRequest,
        deadline: DateTime<Utc>,
    ) -> Result<ExternalOrderId, EngineError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.venue.submit_order(request.clone()).await {
                Ok(order_id) => return Ok(order_id),
                Err(e) if e.is_retryable() => {
                    if self.clock.now() >= deadline {
                        return Err(EngineError::RetriesExhausted {
                            operation: format!("exit order for {}", request.symbol),
                            attempts,
                            last_error: e.to_string(),
                        });
                    }
                    tracing::warn!(
                        "[{}] Exit submit for {} failed (attempt {}), retrying: {}",
                        self.name(),
                        request.symbol,
                        attempts,
                        e
                    );
                    tokio::time::sleep(self.config.retry_interval()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn cancel_quietly(&self, symbol: &Symbol, order_id: &ExternalOrderId) {
        if let Err(e) = self.venue.cancel_order(symbol, order_id).await {
            tracing::warn!(
                "[{}] Failed to cancel order {} for {}: {}",
                self.name(),
                order_id,
                symbol,
                e
            );
        }
    }

    // ------------------------------------------------------------------
    // Detection and entry
    // ------------------------------------------------------------------

    async fn detect_and_enter(&mut self, report: &mut TickReport) {
        let Some(target) = self.countdown.target().cloned() else {
            return;
        };
        let listed = match self.venue.list_tradable_symbols(&self.config.quote_asset).await {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(
                    "[{}] Could not fetch symbols, retrying next tick: {}",
                    self.name(),
                    e
                );
                return;
            }
        };

        for symbol in self.universe.diff(&listed) {
            let detected_at = self.clock.now();
            if !symbol.matches(&target) {
                tracing::info!(
                    "[{}] New pair {} is not the tracked target {}",
                    self.name(),
                    symbol,
                    target
                );
                continue;
            }

            tracing::info!("[{}] Detected new listing {}", self.name(), symbol);
            match self.enter(symbol.clone(), detected_at).await {
                Ok(position) => report.entered.push(position.symbol.symbol_id),
                Err(EngineError::Ledger(LedgerError::DuplicateEntry(symbol_id))) => {
                    tracing::info!(
                        "[{}] Already holding {}, skipping entry",
                        self.name(),
                        symbol_id
                    );
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!("[{}] Entry into {} failed: {}", self.name(), symbol, e);
                    self.notifier.notify(Notification::error(
                        self.name(),
                        format!("Entry into {} failed: {}", symbol, e),
                    ));
                }
            }
        }
    }

    async fn enter(
        &mut self,
        symbol: Symbol,
        detected_at: DateTime<Utc>,
    ) -> Result<Position, EngineError> {
        self.ledger.ensure_can_open(&symbol.symbol_id)?;

        let quoted = self.price_with_retries(&symbol).await?;
        if !(quoted.is_finite() && quoted > 0.0) {
            return Err(VenueError::Rejected(format!("unusable price {} for {}", quoted, symbol)).into());
        }
        let size = self.config.quantity / quoted;

        let request = OrderRequest::market(symbol.clone(), Side::Buy, size);
        let order_id = self
            .submit_with_attempts(request)
            .await
            .map_err(|e| match e {
                EngineError::Venue(VenueError::Rejected(reason)) => {
                    EngineError::Ledger(LedgerError::EntryOrderRejected {
                        symbol: symbol.symbol_id.clone(),
                        reason,
                    })
                }
                other => other,
            })?;

        let fill = self.await_entry_fill(&symbol, &order_id).await?;
        let held = fill.filled_qty * (1.0 - self.config.fee_haircut_percent / 100.0);
        let entry_price = fill.avg_price.unwrap_or(quoted);

        let position = self.ledger.open(
            symbol,
            EntryFill {
                entry_price,
                size: held,
                order_kind: OrderKind::Market,
                external_order_id: order_id,
            },
            self.clock.now(),
            &BracketConfig::from(&self.config),
        )?;
        self.countdown
            .advance_stage(&position.symbol.symbol_id, EscalationStage::AwaitingSlowExit);
        self.persist_logged();

        let latency = position.opened_at - detected_at;
        tracing::info!(
            "[{}] Bought {} size {:.8} @ {:.8} ({} ms after detection)",
            self.name(),
            position.symbol,
            position.size,
            position.entry_price,
            latency.num_milliseconds()
        );
        self.notifier.notify(Notification::entry(&position, latency));
        Ok(position)
    }

    async fn price_with_retries(&self, symbol: &Symbol) -> Result<f64, EngineError> {
        let attempts = self.config.transient_retry_attempts;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.venue.get_price(symbol).await {
                Ok(price) => return Ok(price),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        "[{}] Price for {} failed (attempt {}/{}): {}",
                        self.name(),
                        symbol,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(self.config.retry_interval()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::RetriesExhausted {
            operation: format!("price for {}", symbol),
            attempts,
            last_error,
        })
    }

    async fn submit_with_attempts(&self, request: OrderRequest) -> Result<ExternalOrderId, EngineError> {
        let attempts = self.config.transient_retry_attempts;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.venue.submit_order(request.clone()).await {
                Ok(order_id) => return Ok(order_id),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        "[{}] Entry submit for {} failed (attempt {}/{}): {}",
                        self.name(),
                        request.symbol,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    tokio::time::sleep(self.config.retry_interval()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::RetriesExhausted {
            operation: format!("entry order for {}", request.symbol),
            attempts,
            last_error,
        })
    }

    /// Poll the entry until filled. At the timeout the remainder is
    /// cancelled and any partial fill is kept.
    async fn await_entry_fill(
        &self,
        symbol: &Symbol,
        order_id: &ExternalOrderId,
    ) -> Result<OrderFill, EngineError> {
        let timeout = self.config.entry_fill_timeout();
        let deadline = self.clock.now() + timeout;
        let mut last = None;

        loop {
            match self.venue.poll_order(symbol, order_id).await {
                Ok(fill) if fill.is_filled() => return Ok(fill),
                Ok(fill) => last = Some(fill),
                Err(e) if e.is_retryable() => {
                    tracing::warn!("[{}] Polling entry {} failed: {}", self.name(), order_id, e);
                }
                Err(e) => return Err(e.into()),
            }

            if self.clock.now() >= deadline {
                self.cancel_quietly(symbol, order_id).await;
                return match last {
                    Some(fill) if fill.filled_qty > 0.0 => {
                        tracing::warn!(
                            "[{}] Entry {} only filled {:.8}/{:.8}, keeping the partial fill",
                            self.name(),
                            order_id,
                            fill.filled_qty,
                            fill.requested_qty
                        );
                        Ok(fill)
                    }
                    _ => Err(EngineError::EntryNotFilled {
                        symbol: symbol.symbol_id.clone(),
                        seconds: timeout.num_seconds(),
                    }),
                };
            }
            tokio::time::sleep(self.config.retry_interval()).await;
        }
    }

    fn persist_logged(&self) {
        if let Err(e) = self.persist() {
            tracing::error!(
                "[{}] Failed to persist ledger, retrying next tick: {}",
                self.name(),
                e
            );
        }
    }

    fn deadlines(&self) -> ExitDeadlines {
        ExitDeadlines::from(&self.config)
    }

    fn pricing(&self) -> ExitPricing {
        ExitPricing::from(&self.config)
    }

    fn entry_window(&self) -> EntryWindow {
        EntryWindow::from(&self.config)
    }
}

fn close_reason(technique: ExitTechnique) -> CloseReason {
    match technique {
        ExitTechnique::SlowLimit => CloseReason::SlowExit,
        ExitTechnique::FastLimit => CloseReason::FastExit,
        ExitTechnique::Market => CloseReason::ForcedExit,
    }
}

fn stage_label(stage: EscalationStage) -> &'static str {
    match stage {
        EscalationStage::AwaitingSlowExit => "Slow exit",
        EscalationStage::AwaitingFastExit => "Fast exit",
        EscalationStage::ForceExit => "Forced exit",
        EscalationStage::Done => "Done",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::{ManualClock, OrderScript, RecordingNotifier, ScriptedAnnouncements, ScriptedVenue};
    use crate::ports::NotificationCategory;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn listing_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 11, 18, 14, 8, 0).unwrap()
    }

    fn fast_config() -> VenueConfig {
        let mut config = VenueConfig::named("BINANCE");
        config.sell_retry_seconds = 0.001;
        config
    }

    struct Harness {
        engine: VenueEngine,
        venue: Arc<ScriptedVenue>,
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
        announcements: Arc<ScriptedAnnouncements>,
        _dir: TempDir,
    }

    fn harness(config: VenueConfig, venue: ScriptedVenue, start: DateTime<Utc>) -> Harness {
        harness_with_store(config, venue, start, |dir| LedgerStore::new(dir, "BINANCE"))
    }

    fn harness_with_store(
        config: VenueConfig,
        venue: ScriptedVenue,
        start: DateTime<Utc>,
        store: impl FnOnce(&Path) -> LedgerStore,
    ) -> Harness {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let venue = Arc::new(venue.with_clock(clock.clone(), Duration::seconds(1)));
        let notifier = Arc::new(RecordingNotifier::new());
        let announcements = Arc::new(ScriptedAnnouncements::new().with_announcement("ANKR", listing_at()));

        let deps = EngineDeps {
            venue: venue.clone(),
            announcements: announcements.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
        };
        let engine = VenueEngine::new(config, store(dir.path()), deps).unwrap();
        Harness {
            engine,
            venue,
            clock,
            notifier,
            announcements,
            _dir: dir,
        }
    }

    /// Arm the countdown and buy ANKR one second after its listing
    async fn enter_ankr(h: &mut Harness) {
        h.engine.tick().await.unwrap();
        h.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        h.clock.set(listing_at() + Duration::seconds(1));
        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.entered, vec!["ANKRUSDT".to_string()]);
    }

    fn base_venue() -> ScriptedVenue {
        ScriptedVenue::new("BINANCE").with_symbol(Symbol::from_assets("BTC", "USDT"), 40000.0)
    }

    #[test]
    fn test_invalid_config_prevents_start() {
        let mut config = fast_config();
        config.slow_exit_seconds = 60;
        config.fast_exit_seconds = 30;

        let clock = Arc::new(ManualClock::new(listing_at()));
        let deps = EngineDeps {
            venue: Arc::new(base_venue()),
            announcements: Arc::new(ScriptedAnnouncements::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            clock,
        };
        let result = VenueEngine::new(config, LedgerStore::new("unused", "BINANCE"), deps);
        assert!(matches!(result, Err(EngineError::Config(ConfigError::ValidationError(_)))));
    }

    #[tokio::test]
    async fn test_first_tick_arms_countdown_and_seeds() {
        let mut h = harness(fast_config(), base_venue(), listing_at() - Duration::hours(2));

        let report = h.engine.tick().await.unwrap();
        assert!(report.idle);
        assert!(h.engine.countdown().has_event());
        assert!(h.engine.universe().contains("BTCUSDT"));
        assert_eq!(h.notifier.of_category(NotificationCategory::Info).len(), 1);
    }

    #[tokio::test]
    async fn test_new_target_symbol_is_bought_inside_window() {
        let mut h = harness(fast_config(), base_venue(), listing_at() - Duration::seconds(30));
        h.engine.tick().await.unwrap();

        h.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        h.venue.add_symbol(Symbol::from_assets("SYS", "USDT"), 0.2);
        h.clock.set(listing_at() + Duration::seconds(1));
        let report = h.engine.tick().await.unwrap();

        assert_eq!(report.entered, vec!["ANKRUSDT".to_string()]);
        let position = h.engine.ledger().get("ANKRUSDT").unwrap();
        assert_relative_eq!(position.entry_price, 0.1);
        assert_relative_eq!(position.size, 300.0 * 0.995, epsilon = 1e-9);
        assert!(!h.engine.ledger().holds("SYSUSDT"));
        assert_eq!(h.notifier.of_category(NotificationCategory::Entry).len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_entry_is_reported_and_not_opened() {
        let venue = base_venue().with_script(OrderScript::Reject("MIN_NOTIONAL".to_string()));
        let mut h = harness(fast_config(), venue, listing_at() - Duration::seconds(30));
        h.engine.tick().await.unwrap();

        h.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        let report = h.engine.tick().await.unwrap();

        assert!(report.entered.is_empty());
        assert_eq!(report.errors, 1);
        assert_eq!(h.engine.ledger().open_count(), 0);
        let errors = h.notifier.of_category(NotificationCategory::Error);
        assert!(errors[0].message.contains("MIN_NOTIONAL"));
    }

    #[tokio::test]
    async fn test_slow_exit_fill_closes_and_clears_countdown() {
        let mut h = harness(fast_config(), base_venue(), listing_at() - Duration::seconds(30));
        h.engine.tick().await.unwrap();

        h.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        h.clock.set(listing_at() + Duration::seconds(1));
        h.engine.tick().await.unwrap();

        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);
        assert!(report.countdown_cleared);
        assert!(!h.engine.ledger().holds("ANKRUSDT"));
        assert!(!h.engine.countdown().has_event());

        let closed = h.engine.ledger().closed_positions().next().unwrap();
        assert_eq!(closed.reason, CloseReason::SlowExit);
        assert_relative_eq!(closed.exit_price, 0.101, epsilon = 1e-12);
        assert_relative_eq!(closed.realized_profit_percent, 1.0, epsilon = 1e-9);

        let sell = h.venue.submitted().pop().unwrap();
        assert_eq!(sell.side, Side::Sell);
        assert_eq!(sell.kind, OrderKind::Limit);
    }

    #[tokio::test]
    async fn test_unfilled_stages_escalate_to_failed_forced_exit() {
        let venue = base_venue()
            .with_script(OrderScript::Fill { price: None })
            .with_script(OrderScript::NeverFill)
            .with_script(OrderScript::NeverFill)
            .with_script(OrderScript::NeverFill);
        let mut h = harness(fast_config(), venue, listing_at() - Duration::seconds(30));
        h.engine.tick().await.unwrap();

        h.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        h.clock.set(listing_at() + Duration::seconds(1));
        h.engine.tick().await.unwrap();

        let mut stages = vec![h.engine.countdown().stage("ANKRUSDT")];
        for _ in 0..6 {
            h.engine.tick().await.unwrap();
            stages.push(h.engine.countdown().stage("ANKRUSDT"));
        }

        assert!(stages.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*stages.last().unwrap(), EscalationStage::Done);
        assert!(h.engine.ledger().holds("ANKRUSDT"));
        assert!(h.venue.cancelled().len() >= 3);
        assert!(h
            .notifier
            .of_category(NotificationCategory::Error)
            .iter()
            .any(|n| n.message.contains("Forced exit")));
    }

    #[tokio::test]
    async fn test_bracket_exit_on_stop_loss() {
        let mut config = fast_config();
        config.enable_bracket_exits = true;
        let venue = base_venue()
            .with_script(OrderScript::Fill { price: None })
            .with_script(OrderScript::Fill { price: Some(0.07) });
        let mut h = harness(config, venue, listing_at() - Duration::seconds(30));
        h.engine.tick().await.unwrap();

        h.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        h.clock.set(listing_at() + Duration::seconds(1));
        h.engine.tick().await.unwrap();

        h.venue.set_price("ANKRUSDT", 0.07);
        let report = h.engine.tick().await.unwrap();

        assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);
        let closed = h.engine.ledger().closed_positions().next().unwrap();
        assert_eq!(closed.reason, CloseReason::StopLoss);
        assert!(closed.realized_profit < 0.0);
    }

    #[tokio::test]
    async fn test_trailing_stop_ratchets_on_price_rise() {
        let venue = base_venue()
            .with_script(OrderScript::Fill { price: None })
            .with_script(OrderScript::NeverFill);
        let mut h = harness(fast_config(), venue, listing_at() - Duration::seconds(30));
        h.engine.tick().await.unwrap();

        h.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        h.clock.set(listing_at() + Duration::seconds(1));
        h.engine.tick().await.unwrap();

        h.venue.set_price("ANKRUSDT", 0.2);
        h.engine.tick().await.unwrap();

        let position = h.engine.ledger().get("ANKRUSDT").unwrap();
        assert_relative_eq!(position.trailing_stop_max, 0.2);
        assert_relative_eq!(position.trailing_stop, 0.18, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn test_recover_rebuilds_event_from_positions() {
        let mut h = harness(fast_config(), base_venue(), listing_at() - Duration::seconds(30));
        h.engine.tick().await.unwrap();
        h.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        h.clock.set(listing_at() + Duration::seconds(1));
        h.engine.tick().await.unwrap();

        // simulate a lost countdown file
        let countdown_path = LedgerStore::new(h._dir.path(), "BINANCE").countdown_path();
        std::fs::remove_file(countdown_path).unwrap();

        let status = h.engine.recover();
        assert_eq!(status, RecoveryStatus::Recovered { open: 1, closed: 0 });
        assert!(h.engine.countdown().has_event());
        assert_eq!(
            h.engine.countdown().target().map(|s| s.symbol_id.as_str()),
            Some("ANKRUSDT")
        );
    }

    #[tokio::test]
    async fn test_warnings_emitted_once() {
        let mut h = harness(fast_config(), base_venue(), listing_at() - Duration::minutes(30));
        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.warnings, 1);

        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.warnings, 0);
        assert!(h.notifier.of_category(NotificationCategory::Warning)[0]
            .message
            .contains("will list ANKR in 60 minutes!"));
    }

    #[tokio::test]
    async fn test_failed_forced_exit_does_not_block_next_listing() {
        let venue = base_venue()
            .with_script(OrderScript::Fill { price: None })
            .with_script(OrderScript::NeverFill)
            .with_script(OrderScript::NeverFill)
            .with_script(OrderScript::NeverFill);
        let mut h = harness(fast_config(), venue, listing_at() - Duration::seconds(30));
        enter_ankr(&mut h).await;
        for _ in 0..6 {
            h.engine.tick().await.unwrap();
        }
        assert_eq!(h.engine.countdown().stage("ANKRUSDT"), EscalationStage::Done);

        let next_listing = listing_at() + Duration::days(1);
        h.announcements.set("SYS", next_listing);
        h.clock.set(next_listing - Duration::seconds(30));
        h.engine.tick().await.unwrap();
        assert_eq!(
            h.engine.countdown().target().map(|s| s.symbol_id.as_str()),
            Some("SYSUSDT")
        );
        assert_eq!(h.engine.countdown().stage("ANKRUSDT"), EscalationStage::Done);

        h.venue.add_symbol(Symbol::from_assets("SYS", "USDT"), 0.2);
        h.clock.set(next_listing + Duration::seconds(1));
        let report = h.engine.tick().await.unwrap();

        assert_eq!(report.entered, vec!["SYSUSDT".to_string()]);
        assert!(h.engine.ledger().holds("ANKRUSDT"));
        assert_eq!(h.engine.countdown().stage("SYSUSDT"), EscalationStage::AwaitingSlowExit);
    }

    #[tokio::test]
    async fn test_announcement_deferred_while_exit_in_progress() {
        let venue = base_venue()
            .with_script(OrderScript::Fill { price: None })
            .with_script(OrderScript::NeverFill);
        let mut h = harness(fast_config(), venue, listing_at() - Duration::seconds(30));
        enter_ankr(&mut h).await;

        h.announcements.set("SYS", listing_at() + Duration::days(1));
        h.clock.set(listing_at() + Duration::minutes(5));
        h.engine.tick().await.unwrap();

        assert_eq!(
            h.engine.countdown().target().map(|s| s.symbol_id.as_str()),
            Some("ANKRUSDT")
        );
    }

    #[tokio::test]
    async fn test_partial_exit_sells_only_the_remainder() {
        let venue = base_venue()
            .with_script(OrderScript::Fill { price: None })
            .with_script(OrderScript::Partial { ratio: 0.5 })
            .with_script(OrderScript::Fill { price: Some(0.12) });
        let mut h = harness(fast_config(), venue, listing_at() - Duration::seconds(30));
        enter_ankr(&mut h).await;

        let report = h.engine.tick().await.unwrap();
        assert!(report.closed.is_empty());
        let held = h.engine.ledger().get("ANKRUSDT").unwrap().size;
        assert_relative_eq!(held, 149.25, epsilon = 1e-9);
        let saved = LedgerStore::new(h._dir.path(), "BINANCE").load();
        assert_relative_eq!(saved.ledger.get("ANKRUSDT").unwrap().size, 149.25, epsilon = 1e-9);

        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);

        let sells: Vec<f64> = h
            .venue
            .submitted()
            .iter()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.size)
            .collect();
        assert_eq!(sells.len(), 2);
        assert_relative_eq!(sells[0], 298.5, epsilon = 1e-9);
        assert_relative_eq!(sells[1], 149.25, epsilon = 1e-9);

        let closed = h.engine.ledger().closed_positions().next().unwrap();
        assert_eq!(closed.reason, CloseReason::FastExit);
        assert_relative_eq!(closed.position.size, 149.25, epsilon = 1e-9);
        assert_relative_eq!(closed.realized_profit, 0.02 * 149.25, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_unpriced_fill_falls_back_to_entry_price() {
        let venue = base_venue()
            .with_script(OrderScript::Fill { price: None })
            .with_script(OrderScript::NeverFill)
            .with_script(OrderScript::NeverFill)
            .with_script(OrderScript::FillWithoutPrice);
        let mut h = harness(fast_config(), venue, listing_at() - Duration::seconds(30));
        enter_ankr(&mut h).await;

        for _ in 0..4 {
            if h.engine.countdown().stage("ANKRUSDT") == EscalationStage::ForceExit {
                break;
            }
            h.engine.tick().await.unwrap();
        }
        assert_eq!(h.engine.countdown().stage("ANKRUSDT"), EscalationStage::ForceExit);

        h.venue.set_price("ANKRUSDT", 0.2);
        // bracket check and exit pricing both lose their quote
        h.venue.fail_next_prices(2);
        let report = h.engine.tick().await.unwrap();

        assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);
        let closed = h.engine.ledger().closed_positions().next().unwrap();
        assert_eq!(closed.reason, CloseReason::ForcedExit);
        assert_relative_eq!(closed.exit_price, 0.1);
        assert_relative_eq!(closed.realized_profit, 0.0, epsilon = 1e-12);
    }

    #[tokio::test]
    async fn test_config_reload_applies_valid_and_ignores_invalid() {
        let config_dir = tempdir().unwrap();
        let path = config_dir.path().join("config.toml");
        let write = |body: &str| std::fs::write(&path, body).unwrap();
        write(
            r#"
[[venues]]
name = "BINANCE"
quantity = 50.0
sell_retry_seconds = 0.001
"#,
        );

        let mut h = harness(fast_config(), base_venue(), listing_at() - Duration::hours(2));
        h.engine = h
            .engine
            .with_config_reload(path.clone())
            .with_housekeeping_interval(Duration::zero());

        h.engine.tick().await.unwrap();
        assert_relative_eq!(h.engine.config().quantity, 50.0);

        write(
            r#"
[[venues]]
name = "BINANCE"
quantity = 70.0
slow_exit_seconds = 40
fast_exit_seconds = 30
"#,
        );
        h.engine.tick().await.unwrap();
        assert_relative_eq!(h.engine.config().quantity, 50.0);
        assert_eq!(h.engine.config().slow_exit_seconds, 10);

        write("not = [valid toml");
        h.engine.tick().await.unwrap();
        assert_relative_eq!(h.engine.config().quantity, 50.0);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_state_and_recovers() {
        let mut h = harness_with_store(
            fast_config(),
            base_venue(),
            listing_at() - Duration::seconds(30),
            |dir| {
                let state_dir = dir.join("state");
                std::fs::write(&state_dir, "a file where the data dir should be").unwrap();
                LedgerStore::new(state_dir, "BINANCE")
            },
        );
        let state_dir = h._dir.path().join("state");

        let result = h.engine.tick().await;
        assert!(matches!(result, Err(EngineError::Persistence(_))));
        assert!(h.engine.countdown().has_event());

        h.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        h.clock.set(listing_at() + Duration::seconds(1));
        let result = h.engine.tick().await;
        assert!(matches!(result, Err(EngineError::Persistence(_))));
        assert!(h.engine.ledger().holds("ANKRUSDT"));

        std::fs::remove_file(&state_dir).unwrap();
        std::fs::create_dir(&state_dir).unwrap();
        let report = h.engine.tick().await.unwrap();
        assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);

        let saved = LedgerStore::new(&state_dir, "BINANCE").load();
        assert!(saved.ledger.is_closed("ANKRUSDT"));
        assert!(matches!(saved.status, RecoveryStatus::Recovered { .. }));
    }
}
