//! In-memory doubles for the ports, used by unit and integration tests.
//!
//! Every double records the calls it receives and is scripted through
//! builder methods or `&self` setters so a test can keep an `Arc` to it while
//! the engine owns another.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::announcement::{Announcement, AnnouncementError, AnnouncementSource};
use super::clock::Clock;
use super::notifier::{Notification, NotificationCategory, Notifier};
use super::venue::{OrderFill, OrderRequest, VenueClient, VenueError};
use crate::domain::{ExternalOrderId, Symbol};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }

    fn name(&self) -> &str {
        "ManualClock"
    }
}

/// How the next submitted order behaves
#[derive(Debug, Clone, PartialEq)]
pub enum OrderScript {
    /// Filled on the first poll, at `price` or the limit/quoted price
    Fill { price: Option<f64> },
    /// Filled once polled `polls` times
    FillAfter { polls: u32, price: Option<f64> },
    NeverFill,
    /// Filled on the first poll, but the venue reports no average price
    FillWithoutPrice,
    /// Only `ratio` of the requested size ever fills
    Partial { ratio: f64 },
    /// `submit_order` returns `VenueError::Rejected`
    Reject(String),
}

#[derive(Debug, Clone)]
struct ScriptedOrder {
    request: OrderRequest,
    script: OrderScript,
    polls: u32,
}

/// Venue double with a scripted order book
#[derive(Debug)]
pub struct ScriptedVenue {
    name: String,
    symbols: Mutex<Vec<Symbol>>,
    prices: Mutex<HashMap<String, f64>>,
    scripts: Mutex<VecDeque<OrderScript>>,
    orders: Mutex<HashMap<String, ScriptedOrder>>,
    submitted: Mutex<Vec<OrderRequest>>,
    cancelled: Mutex<Vec<ExternalOrderId>>,
    list_failures: Mutex<u32>,
    submit_failures: Mutex<u32>,
    price_failures: Mutex<u32>,
    clock: Option<Arc<ManualClock>>,
    poll_advance: Duration,
    next_id: AtomicU64,
}

impl ScriptedVenue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            symbols: Mutex::new(Vec::new()),
            prices: Mutex::new(HashMap::new()),
            scripts: Mutex::new(VecDeque::new()),
            orders: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            list_failures: Mutex::new(0),
            submit_failures: Mutex::new(0),
            price_failures: Mutex::new(0),
            clock: None,
            poll_advance: Duration::zero(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_symbol(self, symbol: Symbol, price: f64) -> Self {
        self.add_symbol(symbol, price);
        self
    }

    pub fn with_script(self, script: OrderScript) -> Self {
        self.push_script(script);
        self
    }

    /// Every `poll_order` call advances `clock` by `by`.
    pub fn with_clock(mut self, clock: Arc<ManualClock>, by: Duration) -> Self {
        self.clock = Some(clock);
        self.poll_advance = by;
        self
    }

    pub fn with_list_failures(self, failures: u32) -> Self {
        *lock(&self.list_failures) = failures;
        self
    }

    pub fn with_submit_failures(self, failures: u32) -> Self {
        *lock(&self.submit_failures) = failures;
        self
    }

    pub fn with_price_failures(self, failures: u32) -> Self {
        *lock(&self.price_failures) = failures;
        self
    }

    /// Fail the next `failures` price requests.
    pub fn fail_next_prices(&self, failures: u32) {
        *lock(&self.price_failures) = failures;
    }

    pub fn add_symbol(&self, symbol: Symbol, price: f64) {
        lock(&self.prices).insert(symbol.symbol_id.clone(), price);
        lock(&self.symbols).push(symbol);
    }

    pub fn set_price(&self, symbol_id: &str, price: f64) {
        lock(&self.prices).insert(symbol_id.to_string(), price);
    }

    pub fn push_script(&self, script: OrderScript) {
        lock(&self.scripts).push_back(script);
    }

    /// All accepted and rejected submissions, in order
    pub fn submitted(&self) -> Vec<OrderRequest> {
        lock(&self.submitted).clone()
    }

    pub fn cancelled(&self) -> Vec<ExternalOrderId> {
        lock(&self.cancelled).clone()
    }

    fn consume_failure(counter: &Mutex<u32>) -> bool {
        let mut remaining = lock(counter);
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }

    fn quoted_price(&self, symbol_id: &str) -> Option<f64> {
        lock(&self.prices).get(symbol_id).copied()
    }
}

#[async_trait]
impl VenueClient for ScriptedVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tradable_symbols(&self, quote_asset: &str) -> Result<Vec<Symbol>, VenueError> {
        if Self::consume_failure(&self.list_failures) {
            return Err(VenueError::Transient("exchangeInfo timed out".to_string()));
        }
        Ok(lock(&self.symbols)
            .iter()
            .filter(|s| s.quote_asset.eq_ignore_ascii_case(quote_asset))
            .cloned()
            .collect())
    }

    async fn get_price(&self, symbol: &Symbol) -> Result<f64, VenueError> {
        if Self::consume_failure(&self.price_failures) {
            return Err(VenueError::Transient("ticker timed out".to_string()));
        }
        self.quoted_price(&symbol.symbol_id)
            .ok_or_else(|| VenueError::Rejected(format!("Invalid symbol {}", symbol)))
    }

    async fn submit_order(&self, request: OrderRequest) -> Result<ExternalOrderId, VenueError> {
        if Self::consume_failure(&self.submit_failures) {
            return Err(VenueError::Transient("order endpoint timed out".to_string()));
        }
        lock(&self.submitted).push(request.clone());

        let script = lock(&self.scripts)
            .pop_front()
            .unwrap_or(OrderScript::Fill { price: None });
        if let OrderScript::Reject(reason) = script {
            return Err(VenueError::Rejected(reason));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        lock(&self.orders).insert(
            id.clone(),
            ScriptedOrder {
                request,
                script,
                polls: 0,
            },
        );
        Ok(ExternalOrderId::new(id))
    }

    async fn poll_order(
        &self,
        symbol: &Symbol,
        order_id: &ExternalOrderId,
    ) -> Result<OrderFill, VenueError> {
        if let Some(clock) = &self.clock {
            clock.advance(self.poll_advance);
        }

        let mut orders = lock(&self.orders);
        let order = orders
            .get_mut(order_id.as_str())
            .ok_or_else(|| VenueError::Rejected(format!("Unknown order {}", order_id)))?;
        order.polls += 1;

        let requested = order.request.size;
        let fallback_price = order
            .request
            .limit_price
            .or_else(|| self.quoted_price(&symbol.symbol_id));

        let (filled_qty, avg_price) = match &order.script {
            OrderScript::Fill { price } => (requested, price.or(fallback_price)),
            OrderScript::FillAfter { polls, price } if order.polls >= *polls => {
                (requested, price.or(fallback_price))
            }
            OrderScript::FillWithoutPrice => (requested, None),
            OrderScript::Partial { ratio } => (requested * ratio, fallback_price),
            _ => (0.0, None),
        };

        Ok(OrderFill {
            filled_qty,
            requested_qty: requested,
            avg_price,
        })
    }

    async fn cancel_order(
        &self,
        _symbol: &Symbol,
        order_id: &ExternalOrderId,
    ) -> Result<(), VenueError> {
        lock(&self.cancelled).push(order_id.clone());
        Ok(())
    }
}

/// Announcement source returning whatever the test last set
#[derive(Debug, Default)]
pub struct ScriptedAnnouncements {
    current: Mutex<Option<Announcement>>,
    failures: Mutex<u32>,
    polls: AtomicU64,
}

impl ScriptedAnnouncements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_announcement(self, base_asset: &str, listing_instant: DateTime<Utc>) -> Self {
        self.set(base_asset, listing_instant);
        self
    }

    pub fn set(&self, base_asset: &str, listing_instant: DateTime<Utc>) {
        *lock(&self.current) = Some(Announcement {
            base_asset: base_asset.to_string(),
            listing_instant,
        });
    }

    pub fn fail_next(&self, times: u32) {
        *lock(&self.failures) = times;
    }

    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnnouncementSource for ScriptedAnnouncements {
    async fn poll_for_new_listing(&self) -> Result<Option<Announcement>, AnnouncementError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if ScriptedVenue::consume_failure(&self.failures) {
            return Err(AnnouncementError::Unavailable("announcement page timed out".to_string()));
        }
        Ok(lock(&self.current).clone())
    }

    fn name(&self) -> &str {
        "ScriptedAnnouncements"
    }
}

/// Notifier that keeps everything it is given
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.received).clone()
    }

    pub fn of_category(&self, category: NotificationCategory) -> Vec<Notification> {
        lock(&self.received)
            .iter()
            .filter(|n| n.category == category)
            .cloned()
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        lock(&self.received).push(notification);
    }

    fn name(&self) -> &str {
        "RecordingNotifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_scripted_venue_fill_sequence() {
        let venue = ScriptedVenue::new("BINANCE")
            .with_symbol(Symbol::from_assets("BTC", "USDT"), 40000.0)
            .with_script(OrderScript::FillAfter { polls: 2, price: Some(40100.0) });
        let btc = Symbol::from_assets("BTC", "USDT");

        let id = venue
            .submit_order(OrderRequest::market(btc.clone(), Side::Buy, 0.001))
            .await
            .unwrap();
        let first = venue.poll_order(&btc, &id).await.unwrap();
        let second = venue.poll_order(&btc, &id).await.unwrap();

        assert!(!first.is_filled());
        assert!(second.is_filled());
        assert_eq!(second.avg_price, Some(40100.0));
        assert_eq!(venue.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_venue_failures_are_transient() {
        let venue = ScriptedVenue::new("FTX").with_list_failures(1);
        assert!(matches!(
            venue.list_tradable_symbols("USDT").await,
            Err(VenueError::Transient(_))
        ));
        assert!(venue.list_tradable_symbols("USDT").await.unwrap().is_empty());
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2021, 11, 18, 14, 8, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(3));
        assert_eq!(clock.now(), start + Duration::seconds(3));
    }

    #[test]
    fn test_recording_notifier_filters() {
        let notifier = RecordingNotifier::new();
        notifier.notify(Notification::info("BINANCE", "hello"));
        notifier.notify(Notification::error("BINANCE", "boom"));
        assert_eq!(notifier.notifications().len(), 2);
        assert_eq!(notifier.of_category(NotificationCategory::Error).len(), 1);
    }

    #[test]
    fn test_scripted_announcements_failure_then_value() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let source = ScriptedAnnouncements::new().with_announcement("ANKR", at);
        source.fail_next(1);

        let first = tokio_test::block_on(source.poll_for_new_listing());
        let second = tokio_test::block_on(source.poll_for_new_listing()).unwrap();
        assert!(first.is_err());
        assert_eq!(second.map(|a| a.listing_instant), Some(at));
        assert_eq!(source.poll_count(), 2);
    }
}
