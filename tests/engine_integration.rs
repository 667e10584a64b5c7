//! Venue Engine Integration Tests
//!
//! Drive a full listing lifecycle through the public API:
//! 1. announcement -> warnings -> detection -> entry
//! 2. exit escalation through slow, fast and forced stages
//! 3. restart recovery from the on-disk ledger
//!
//! All tests are deterministic: scripted venue, manual clock, temp dirs.

use std::sync::Arc;

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::{tempdir, TempDir};

use listing_sniper::application::{EngineDeps, VenueEngine};
use listing_sniper::config::VenueConfig;
use listing_sniper::domain::{
    CloseReason, EscalationStage, LedgerStore, OrderKind, RecoveryStatus, Side, Symbol,
};
use listing_sniper::ports::mocks::{
    ManualClock, OrderScript, RecordingNotifier, ScriptedAnnouncements, ScriptedVenue,
};
use listing_sniper::ports::NotificationCategory;

// ============================================================================
// Test Fixtures
// ============================================================================

fn listing_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 11, 18, 14, 8, 0).unwrap()
}

fn venue_config() -> VenueConfig {
    let mut config = VenueConfig::named("BINANCE");
    config.sell_retry_seconds = 0.001;
    config
}

struct Fixture {
    dir: TempDir,
    clock: Arc<ManualClock>,
    venue: Arc<ScriptedVenue>,
    announcements: Arc<ScriptedAnnouncements>,
    notifier: Arc<RecordingNotifier>,
}

impl Fixture {
    fn new(venue: ScriptedVenue, start: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let venue = venue
            .with_symbol(Symbol::from_assets("BTC", "USDT"), 40000.0)
            .with_symbol(Symbol::from_assets("ETH", "USDT"), 3000.0)
            .with_clock(clock.clone(), Duration::seconds(1));
        Self {
            dir: tempdir().unwrap(),
            clock,
            venue: Arc::new(venue),
            announcements: Arc::new(
                ScriptedAnnouncements::new().with_announcement("ANKR", listing_at()),
            ),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    fn engine(&self) -> VenueEngine {
        let deps = EngineDeps {
            venue: self.venue.clone(),
            announcements: self.announcements.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
        };
        VenueEngine::new(venue_config(), self.store(), deps).unwrap()
    }

    fn store(&self) -> LedgerStore {
        LedgerStore::new(self.dir.path(), "BINANCE")
    }

    /// Arm the countdown, list ANKR and tick once inside the window
    async fn enter(&self, engine: &mut VenueEngine) {
        self.clock.set(listing_at() - Duration::seconds(30));
        engine.tick().await.unwrap();
        self.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
        self.clock.set(listing_at() + Duration::seconds(1));
        let report = engine.tick().await.unwrap();
        assert_eq!(report.entered, vec!["ANKRUSDT".to_string()]);
    }

    fn buys(&self) -> usize {
        self.venue
            .submitted()
            .iter()
            .filter(|o| o.side == Side::Buy)
            .count()
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle_with_warnings() {
    let fixture = Fixture::new(ScriptedVenue::new("BINANCE"), listing_at() - Duration::hours(2));
    let mut engine = fixture.engine();

    // Before any warning threshold
    let report = engine.tick().await.unwrap();
    assert!(report.idle);
    assert_eq!(report.warnings, 0);

    // Each threshold fires exactly once
    for (offset, expected) in [
        (Duration::minutes(59), 1),
        (Duration::minutes(58), 0),
        (Duration::minutes(4), 1),
        (Duration::seconds(29), 1),
        (Duration::seconds(10), 0),
    ] {
        fixture.clock.set(listing_at() - offset);
        let report = engine.tick().await.unwrap();
        assert_eq!(report.warnings, expected, "at T-{}s", offset.num_seconds());
    }
    let warnings = fixture.notifier.of_category(NotificationCategory::Warning);
    assert_eq!(warnings.len(), 3);
    assert!(warnings[2].message.contains("30 seconds"));

    // Listing appears alongside an unrelated pair
    fixture.venue.add_symbol(Symbol::from_assets("ANKR", "USDT"), 0.1);
    fixture.venue.add_symbol(Symbol::from_assets("SYS", "USDT"), 0.3);
    fixture.clock.set(listing_at() + Duration::seconds(1));
    let report = engine.tick().await.unwrap();
    assert_eq!(report.entered, vec!["ANKRUSDT".to_string()]);

    let entry = fixture.notifier.of_category(NotificationCategory::Entry);
    assert_eq!(entry.len(), 1);
    assert!(entry[0].message.contains("Latency"));

    // Slow exit fills on the next tick
    let report = engine.tick().await.unwrap();
    assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);
    assert!(report.countdown_cleared);
    assert_eq!(fixture.notifier.of_category(NotificationCategory::Close).len(), 1);

    // Nothing left to do afterwards
    let report = engine.tick().await.unwrap();
    assert!(report.idle);
    assert_eq!(fixture.buys(), 1);

    // The closed record survives on disk
    let loaded = fixture.store().load();
    assert_eq!(loaded.ledger.open_count(), 0);
    assert_eq!(loaded.ledger.closed_count(), 1);
    assert!(!loaded.countdown.has_event());
}

#[tokio::test]
async fn test_fast_exit_after_slow_misses() {
    let venue = ScriptedVenue::new("BINANCE")
        .with_script(OrderScript::Fill { price: None })
        .with_script(OrderScript::NeverFill)
        .with_script(OrderScript::Fill { price: None });
    let fixture = Fixture::new(venue, listing_at());
    let mut engine = fixture.engine();
    fixture.enter(&mut engine).await;

    let report = engine.tick().await.unwrap();
    assert!(report.closed.is_empty());
    assert_eq!(engine.countdown().stage("ANKRUSDT"), EscalationStage::AwaitingFastExit);
    assert_eq!(fixture.venue.cancelled().len(), 1);

    let report = engine.tick().await.unwrap();
    assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);

    let closed = engine.ledger().closed_positions().next().unwrap();
    assert_eq!(closed.reason, CloseReason::FastExit);
    assert_relative_eq!(closed.exit_price, 0.1);

    let sells: Vec<_> = fixture
        .venue
        .submitted()
        .into_iter()
        .filter(|o| o.side == Side::Sell)
        .collect();
    assert_eq!(sells.len(), 2);
    assert_relative_eq!(sells[0].limit_price.unwrap(), 0.101, epsilon = 1e-12);
    assert_eq!(sells[1].kind, OrderKind::Limit);
}

#[tokio::test]
async fn test_forced_market_exit() {
    let venue = ScriptedVenue::new("BINANCE")
        .with_script(OrderScript::Fill { price: None })
        .with_script(OrderScript::NeverFill)
        .with_script(OrderScript::NeverFill)
        .with_script(OrderScript::Fill { price: Some(0.095) });
    let fixture = Fixture::new(venue, listing_at());
    let mut engine = fixture.engine();
    fixture.enter(&mut engine).await;

    engine.tick().await.unwrap();
    engine.tick().await.unwrap();
    assert_eq!(engine.countdown().stage("ANKRUSDT"), EscalationStage::ForceExit);

    let report = engine.tick().await.unwrap();
    assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);

    let closed = engine.ledger().closed_positions().next().unwrap();
    assert_eq!(closed.reason, CloseReason::ForcedExit);
    assert!(closed.realized_profit < 0.0);
    assert_eq!(fixture.venue.submitted().last().unwrap().kind, OrderKind::Market);
}

#[tokio::test]
async fn test_missed_windows_advance_one_stage_per_tick() {
    let venue = ScriptedVenue::new("BINANCE").with_script(OrderScript::Fill { price: None });
    let fixture = Fixture::new(venue, listing_at());
    let mut engine = fixture.engine();
    fixture.enter(&mut engine).await;

    // Engine stalled past both limit deadlines
    fixture.clock.set(listing_at() + Duration::seconds(45));

    engine.tick().await.unwrap();
    assert_eq!(engine.countdown().stage("ANKRUSDT"), EscalationStage::AwaitingFastExit);
    engine.tick().await.unwrap();
    assert_eq!(engine.countdown().stage("ANKRUSDT"), EscalationStage::ForceExit);

    let report = engine.tick().await.unwrap();
    assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);
    let sells = fixture
        .venue
        .submitted()
        .iter()
        .filter(|o| o.side == Side::Sell)
        .count();
    assert_eq!(sells, 1);
}

// ============================================================================
// Entry edge cases
// ============================================================================

#[tokio::test]
async fn test_entry_survives_transient_submit_failures() {
    let venue = ScriptedVenue::new("BINANCE").with_submit_failures(2);
    let fixture = Fixture::new(venue, listing_at());
    let mut engine = fixture.engine();
    fixture.enter(&mut engine).await;
    assert!(engine.ledger().holds("ANKRUSDT"));
}

#[tokio::test]
async fn test_partial_entry_fill_is_kept() {
    let venue = ScriptedVenue::new("BINANCE").with_script(OrderScript::Partial { ratio: 0.5 });
    let fixture = Fixture::new(venue, listing_at());
    let mut engine = fixture.engine();
    fixture.enter(&mut engine).await;

    let position = engine.ledger().get("ANKRUSDT").unwrap();
    assert_relative_eq!(position.size, 150.0 * 0.995, epsilon = 1e-9);
    assert_eq!(fixture.venue.cancelled().len(), 1);
}

#[tokio::test]
async fn test_symbol_list_failure_retried_next_tick() {
    let venue = ScriptedVenue::new("BINANCE").with_list_failures(1);
    let fixture = Fixture::new(venue, listing_at() - Duration::seconds(30));
    let mut engine = fixture.engine();

    engine.tick().await.unwrap();
    assert!(!engine.universe().is_seeded());

    engine.tick().await.unwrap();
    assert!(engine.universe().is_seeded());
    assert!(engine.universe().contains("BTCUSDT"));
}

#[tokio::test]
async fn test_announcement_outage_does_not_stop_ticks() {
    let fixture = Fixture::new(ScriptedVenue::new("BINANCE"), listing_at() - Duration::hours(1));
    fixture.announcements.fail_next(1);
    let mut engine = fixture.engine().with_housekeeping_interval(Duration::zero());

    engine.tick().await.unwrap();
    assert!(!engine.countdown().has_event());

    engine.tick().await.unwrap();
    assert!(engine.countdown().has_event());
    assert_eq!(fixture.announcements.poll_count(), 2);
}

// ============================================================================
// Recovery
// ============================================================================

#[tokio::test]
async fn test_restart_resumes_escalation_without_rebuying() {
    let venue = ScriptedVenue::new("BINANCE")
        .with_script(OrderScript::Fill { price: None })
        .with_script(OrderScript::NeverFill)
        .with_script(OrderScript::Fill { price: None });
    let fixture = Fixture::new(venue, listing_at());

    {
        let mut engine = fixture.engine();
        fixture.enter(&mut engine).await;
        engine.tick().await.unwrap();
        assert_eq!(engine.countdown().stage("ANKRUSDT"), EscalationStage::AwaitingFastExit);
    }

    let mut restarted = fixture.engine();
    let status = restarted.recover();
    assert_eq!(status, RecoveryStatus::Recovered { open: 1, closed: 0 });
    assert_eq!(restarted.countdown().stage("ANKRUSDT"), EscalationStage::AwaitingFastExit);

    let report = restarted.tick().await.unwrap();
    assert_eq!(report.closed, vec!["ANKRUSDT".to_string()]);
    assert!(report.entered.is_empty());
    assert_eq!(fixture.buys(), 1);
}

#[tokio::test]
async fn test_corrupted_store_is_quarantined_and_reported() {
    let fixture = Fixture::new(ScriptedVenue::new("BINANCE"), listing_at());
    std::fs::write(fixture.store().orders_path(), "{ not json").unwrap();

    let mut engine = fixture.engine();
    let status = engine.recover();

    assert!(matches!(status, RecoveryStatus::Corrupted(_)));
    assert_eq!(engine.ledger().open_count(), 0);
    assert_eq!(fixture.notifier.of_category(NotificationCategory::Error).len(), 1);
    let quarantined = std::fs::read_dir(fixture.dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().contains("corrupt-"));
    assert!(quarantined);
}

#[tokio::test]
async fn test_fresh_start_has_nothing_to_recover() {
    let fixture = Fixture::new(ScriptedVenue::new("BINANCE"), listing_at());
    let mut engine = fixture.engine();
    assert_eq!(engine.recover(), RecoveryStatus::Fresh);
    assert!(!engine.countdown().has_event());
}
