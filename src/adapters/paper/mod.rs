//! Paper Venue
//!
//! A simulated exchange for dry runs. Prices follow a bounded random walk,
//! market orders fill at once, and limit orders fill on the first poll where
//! the walked price crosses the limit. Listings can be scheduled ahead of time
//! or pulled from an announcement feed so the whole lifecycle runs offline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::{ExternalOrderId, OrderKind, Side, Symbol};
use crate::ports::{AnnouncementSource, Clock, OrderFill, OrderRequest, VenueClient, VenueError};

/// Price a scheduled listing opens at unless told otherwise
pub const DEFAULT_LISTING_PRICE: f64 = 1.0;

/// Pairs every paper venue starts with
const STARTING_BOOK: &[(&str, f64)] = &[
    ("BTC", 40000.0),
    ("ETH", 3000.0),
    ("BNB", 400.0),
    ("SOL", 150.0),
    ("XRP", 0.8),
];

#[derive(Debug, Clone)]
struct Listing {
    symbol: Symbol,
    tradable_from: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    filled_qty: f64,
    avg_price: Option<f64>,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct PaperBook {
    listings: HashMap<String, Listing>,
    prices: HashMap<String, f64>,
    orders: HashMap<String, PaperOrder>,
}

pub struct PaperVenue {
    name: String,
    clock: Arc<dyn Clock>,
    volatility_percent: f64,
    listing_feed: Option<Arc<dyn AnnouncementSource>>,
    book: Mutex<PaperBook>,
    next_id: AtomicU64,
}

impl PaperVenue {
    pub fn new(name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            clock,
            volatility_percent: 2.0,
            listing_feed: None,
            book: Mutex::new(PaperBook::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Largest relative price move per quote, in percent. Zero freezes prices.
    pub fn with_volatility(mut self, percent: f64) -> Self {
        self.volatility_percent = percent.abs();
        self
    }

    pub fn with_starting_book(self, quote_asset: &str) -> Self {
        for (base, price) in STARTING_BOOK {
            self.list_symbol(Symbol::from_assets(base, quote_asset), *price);
        }
        self
    }

    /// Every symbol listing poll also checks `feed` and schedules whatever
    /// it announces.
    pub fn with_listing_feed(mut self, feed: Arc<dyn AnnouncementSource>) -> Self {
        self.listing_feed = Some(feed);
        self
    }

    /// Tradable immediately
    pub fn list_symbol(&self, symbol: Symbol, price: f64) {
        let now = self.clock.now();
        self.schedule_listing(symbol, now, price);
    }

    pub fn schedule_listing(&self, symbol: Symbol, tradable_from: DateTime<Utc>, price: f64) {
        let mut book = self.book();
        if book.listings.contains_key(&symbol.symbol_id) {
            return;
        }
        tracing::info!(
            "[{}] Paper listing {} from {} at {:.8}",
            self.name,
            symbol,
            tradable_from,
            price
        );
        book.prices.insert(symbol.symbol_id.clone(), price);
        book.listings.insert(
            symbol.symbol_id.clone(),
            Listing {
                symbol,
                tradable_from,
            },
        );
    }

    pub fn set_price(&self, symbol_id: &str, price: f64) {
        self.book().prices.insert(symbol_id.to_string(), price);
    }

    fn book(&self) -> MutexGuard<'_, PaperBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_tradable(&self, book: &PaperBook, symbol_id: &str) -> bool {
        book.listings
            .get(symbol_id)
            .is_some_and(|l| l.tradable_from <= self.clock.now())
    }

    /// Move the price one random step and return it
    fn walk(&self, book: &mut PaperBook, symbol_id: &str) -> Option<f64> {
        let price = book.prices.get_mut(symbol_id)?;
        if self.volatility_percent > 0.0 {
            let step = rand::thread_rng().gen_range(-self.volatility_percent..=self.volatility_percent);
            *price *= 1.0 + step / 100.0;
        }
        Some(*price)
    }

    async fn pull_listing_feed(&self, quote_asset: &str) {
        let Some(feed) = &self.listing_feed else {
            return;
        };
        match feed.poll_for_new_listing().await {
            Ok(Some(announcement)) => self.schedule_listing(
                Symbol::from_assets(&announcement.base_asset, quote_asset),
                announcement.listing_instant,
                DEFAULT_LISTING_PRICE,
            ),
            Ok(None) => {}
            Err(e) => tracing::debug!("[{}] Listing feed unavailable: {}", self.name, e),
        }
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tradable_symbols(&self, quote_asset: &str) -> Result<Vec<Symbol>, VenueError> {
        self.pull_listing_feed(quote_asset).await;

        let now = self.clock.now();
        let book = self.book();
        let mut symbols: Vec<Symbol> = book
            .listings
            .values()
            .filter(|l| l.tradable_from <= now && l.symbol.quote_asset.eq_ignore_ascii_case(quote_asset))
            .map(|l| l.symbol.clone())
            .collect();
        symbols.sort_by(|a, b| a.symbol_id.cmp(&b.symbol_id));
        Ok(symbols)
    }

    async fn get_price(&self, symbol: &Symbol) -> Result<f64, VenueError> {
        let mut book = self.book();
        if !self.is_tradable(&book, &symbol.symbol_id) {
            return Err(VenueError::Rejected(format!("Invalid symbol {}", symbol)));
        }
        self.walk(&mut book, &symbol.symbol_id)
            .ok_or_else(|| VenueError::Rejected(format!("No price for {}", symbol)))
    }

    async fn submit_order(&self, request: OrderRequest) -> Result<ExternalOrderId, VenueError> {
        if !(request.size.is_finite() && request.size > 0.0) {
            return Err(VenueError::Rejected(format!("Invalid quantity {}", request.size)));
        }
        if request.kind == OrderKind::Limit && request.limit_price.is_none() {
            return Err(VenueError::Rejected("Limit order without a price".to_string()));
        }

        let mut book = self.book();
        if !self.is_tradable(&book, &request.symbol.symbol_id) {
            return Err(VenueError::Rejected(format!("Invalid symbol {}", request.symbol)));
        }

        let mut order = PaperOrder {
            request: request.clone(),
            filled_qty: 0.0,
            avg_price: None,
            cancelled: false,
        };
        if request.kind == OrderKind::Market {
            let price = self.walk(&mut book, &request.symbol.symbol_id);
            order.filled_qty = request.size;
            order.avg_price = price;
        }

        let id = format!("paper-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(
            "[{}] Paper {:?} {:?} {} size {:.8} -> {}",
            self.name,
            request.kind,
            request.side,
            request.symbol,
            request.size,
            id
        );
        book.orders.insert(id.clone(), order);
        Ok(ExternalOrderId::new(id))
    }

    async fn poll_order(
        &self,
        symbol: &Symbol,
        order_id: &ExternalOrderId,
    ) -> Result<OrderFill, VenueError> {
        let mut book = self.book();
        let Some(order) = book.orders.get(order_id.as_str()).cloned() else {
            return Err(VenueError::Rejected(format!("Unknown order {}", order_id)));
        };

        let open = !order.cancelled && order.filled_qty < order.request.size;
        let mut updated = order;
        if open {
            if let (Some(limit), Some(price)) =
                (updated.request.limit_price, self.walk(&mut book, &symbol.symbol_id))
            {
                let crossed = match updated.request.side {
                    Side::Sell => price >= limit,
                    Side::Buy => price <= limit,
                };
                if crossed {
                    updated.filled_qty = updated.request.size;
                    updated.avg_price = Some(limit);
                }
            }
        }

        let fill = OrderFill {
            filled_qty: updated.filled_qty,
            requested_qty: updated.request.size,
            avg_price: updated.avg_price,
        };
        book.orders.insert(order_id.as_str().to_string(), updated);
        Ok(fill)
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: &ExternalOrderId) -> Result<(), VenueError> {
        match self.book().orders.get_mut(order_id.as_str()) {
            Some(order) => {
                order.cancelled = true;
                Ok(())
            }
            None => Err(VenueError::Rejected(format!("Unknown order {}", order_id))),
        }
    }
}
