//! Open and closed positions
//!
//! `Position` is an open holding created on a filled entry. `ClosedPosition`
//! is the write-once record produced when an exit fills.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::symbol::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Open,
    Closed,
}

/// Why a position left the open set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    SlowExit,
    FastExit,
    ForcedExit,
    StopLoss,
    TrailingStop,
    TakeProfit,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseReason::SlowExit => "slow exit",
            CloseReason::FastExit => "fast exit",
            CloseReason::ForcedExit => "forced exit",
            CloseReason::StopLoss => "stop loss",
            CloseReason::TrailingStop => "trailing stop",
            CloseReason::TakeProfit => "take profit",
        };
        f.write_str(label)
    }
}

/// Order id assigned by the venue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalOrderId(pub String);

impl ExternalOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub venue: String,
    pub symbol: Symbol,
    pub opened_at: DateTime<Utc>,
    pub entry_price: f64,
    pub side: Side,
    /// Held base-asset quantity after fees
    pub size: f64,
    pub order_kind: OrderKind,
    pub status: Status,
    /// `+inf` while trailing management is enabled
    #[serde(with = "float_repr")]
    pub take_profit: f64,
    pub stop_loss: f64,
    /// Highest price seen since entry, `-inf` until the first update
    #[serde(with = "float_repr")]
    pub trailing_stop_max: f64,
    pub trailing_stop: f64,
    pub external_order_id: ExternalOrderId,
}

impl Position {
    /// Quote-asset amount paid for the held size
    pub fn cost_basis(&self) -> f64 {
        self.entry_price * self.size
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_seconds()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub closed_at: DateTime<Utc>,
    pub exit_price: f64,
    pub realized_profit: f64,
    pub realized_profit_percent: f64,
    pub reason: CloseReason,
    /// Id of the exit order that filled
    pub external_order_id: ExternalOrderId,
}

impl ClosedPosition {
    pub fn symbol_id(&self) -> &str {
        &self.position.symbol.symbol_id
    }

    pub fn held_seconds(&self) -> i64 {
        (self.closed_at - self.position.opened_at).num_seconds()
    }
}

/// JSON has no infinities, so non-finite values round-trip as strings.
mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("nan")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.to_ascii_lowercase().as_str() {
                "inf" | "infinity" | "+inf" => Ok(f64::INFINITY),
                "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                "nan" => Ok(f64::NAN),
                other => Err(serde::de::Error::custom(format!(
                    "invalid float value: {}",
                    other
                ))),
            },
        }
    }
}
