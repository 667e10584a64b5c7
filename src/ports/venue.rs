//! Venue client port
//!
//! The capability interface every exchange integration implements. Errors are
//! split into retryable transport failures and final rejections so the engine
//! can retry the former up to a deadline and give up on the latter.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ExternalOrderId, OrderKind, Side, Symbol};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VenueError {
    /// Network failure, timeout or rate limit
    #[error("Transient venue failure: {0}")]
    Transient(String),

    /// The venue refused the request
    #[error("Rejected by venue: {0}")]
    Rejected(String),
}

impl VenueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, VenueError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub size: f64,
    pub kind: OrderKind,
    /// Required for limit orders
    pub limit_price: Option<f64>,
}

impl OrderRequest {
    pub fn market(symbol: Symbol, side: Side, size: f64) -> Self {
        Self {
            symbol,
            side,
            size,
            kind: OrderKind::Market,
            limit_price: None,
        }
    }

    pub fn limit(symbol: Symbol, side: Side, size: f64, price: f64) -> Self {
        Self {
            symbol,
            side,
            size,
            kind: OrderKind::Limit,
            limit_price: Some(price),
        }
    }
}

/// Fill state of a submitted order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderFill {
    pub filled_qty: f64,
    pub requested_qty: f64,
    /// Volume-weighted fill price, when the venue reports one
    pub avg_price: Option<f64>,
}

impl OrderFill {
    pub fn is_filled(&self) -> bool {
        self.requested_qty > 0.0 && self.filled_qty >= self.requested_qty
    }

    pub fn is_partial(&self) -> bool {
        self.filled_qty > 0.0 && !self.is_filled()
    }
}

#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Venue name, used for log prefixes and store file names
    fn name(&self) -> &str;

    async fn list_tradable_symbols(&self, quote_asset: &str) -> Result<Vec<Symbol>, VenueError>;

    async fn get_price(&self, symbol: &Symbol) -> Result<f64, VenueError>;

    async fn submit_order(&self, request: OrderRequest) -> Result<ExternalOrderId, VenueError>;

    async fn poll_order(
        &self,
        symbol: &Symbol,
        order_id: &ExternalOrderId,
    ) -> Result<OrderFill, VenueError>;

    async fn cancel_order(
        &self,
        symbol: &Symbol,
        order_id: &ExternalOrderId,
    ) -> Result<(), VenueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(VenueError::Transient("timeout".into()).is_retryable());
        assert!(!VenueError::Rejected("LOT_SIZE".into()).is_retryable());
    }

    #[test]
    fn test_fill_states() {
        let full = OrderFill { filled_qty: 2.0, requested_qty: 2.0, avg_price: Some(1.0) };
        let partial = OrderFill { filled_qty: 0.5, requested_qty: 2.0, avg_price: None };
        let none = OrderFill { filled_qty: 0.0, requested_qty: 2.0, avg_price: None };

        assert!(full.is_filled() && !full.is_partial());
        assert!(!partial.is_filled() && partial.is_partial());
        assert!(!none.is_filled() && !none.is_partial());
    }

    #[test]
    fn test_order_constructors() {
        let symbol = Symbol::from_assets("ANKR", "USDT");
        let market = OrderRequest::market(symbol.clone(), Side::Buy, 10.0);
        assert_eq!(market.kind, OrderKind::Market);
        assert!(market.limit_price.is_none());

        let limit = OrderRequest::limit(symbol, Side::Sell, 10.0, 0.12);
        assert_eq!(limit.kind, OrderKind::Limit);
        assert_eq!(limit.limit_price, Some(0.12));
    }
}
