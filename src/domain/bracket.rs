//! Bracket Calculator
//!
//! Take-profit, stop-loss and trailing-stop arithmetic. Everything here is
//! pure; callers persist whatever they get back.

use serde::{Deserialize, Serialize};

use super::position::Position;

/// Percent parameters for a position's bracket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BracketConfig {
    pub take_profit_percent: f64,
    pub stop_loss_percent: f64,
    pub trailing_stop_loss_percent: f64,
    pub enable_trailing_stop_loss: bool,
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            take_profit_percent: 30.0,
            stop_loss_percent: 20.0,
            trailing_stop_loss_percent: 10.0,
            enable_trailing_stop_loss: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub take_profit: f64,
    pub stop_loss: f64,
    pub trailing_stop_max: f64,
    pub trailing_stop: f64,
}

/// Which side of the bracket a price crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketBreach {
    StopLoss,
    TrailingStop,
    TakeProfit,
}

/// `value + value * percent / 100`
pub fn apply_percent(value: f64, percent: f64) -> f64 {
    value + value * percent / 100.0
}

pub fn initial_bracket(entry_price: f64, cfg: &BracketConfig) -> Bracket {
    let take_profit = if cfg.enable_trailing_stop_loss {
        f64::INFINITY
    } else {
        apply_percent(entry_price, cfg.take_profit_percent)
    };

    Bracket {
        take_profit,
        stop_loss: apply_percent(entry_price, -cfg.stop_loss_percent),
        trailing_stop_max: f64::NEG_INFINITY,
        trailing_stop: apply_percent(entry_price, -cfg.trailing_stop_loss_percent),
    }
}

/// Ratchet the trailing floor up to `current_price`.
///
/// Only meaningful when `current_price > position.trailing_stop_max`; lower
/// prices leave the position unchanged so the max never decreases.
pub fn update_trailing(position: &Position, current_price: f64, cfg: &BracketConfig) -> Position {
    let mut updated = position.clone();
    if current_price <= position.trailing_stop_max {
        return updated;
    }
    updated.trailing_stop_max = current_price.max(position.entry_price);
    updated.trailing_stop = apply_percent(updated.trailing_stop_max, -cfg.trailing_stop_loss_percent);
    updated
}

/// Returns the first threshold `price` has crossed, stop loss first.
pub fn evaluate_breach(position: &Position, price: f64, cfg: &BracketConfig) -> Option<BracketBreach> {
    if price < position.stop_loss {
        return Some(BracketBreach::StopLoss);
    }
    if cfg.enable_trailing_stop_loss && price < position.trailing_stop {
        return Some(BracketBreach::TrailingStop);
    }
    if price > position.take_profit {
        return Some(BracketBreach::TakeProfit);
    }
    None
}
