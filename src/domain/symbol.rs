//! Tradable pair identity
//!
//! A `Symbol` is the venue-native pair id plus its base/quote split.
//! Matching a freshly listed pair against an announced target compares the
//! assets, not the venue-native id, since every venue spells ids differently
//! (`ANKRUSDT`, `ANKR/USDT`, `ANKR-USDT`).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    /// Venue-native identifier, used as the ledger key
    pub symbol_id: String,
    pub base_asset: String,
    pub quote_asset: String,
}

impl Symbol {
    pub fn new(
        symbol_id: impl Into<String>,
        base_asset: impl Into<String>,
        quote_asset: impl Into<String>,
    ) -> Self {
        Self {
            symbol_id: symbol_id.into(),
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
        }
    }

    /// Build a target from an announced base asset, using the concatenated
    /// `BASEQUOTE` form for the id.
    pub fn from_assets(base_asset: &str, quote_asset: &str) -> Self {
        let base = base_asset.trim().to_uppercase();
        let quote = quote_asset.trim().to_uppercase();
        Self::new(format!("{}{}", base, quote), base, quote)
    }

    /// True when both assets match, ignoring case.
    pub fn matches(&self, target: &Symbol) -> bool {
        self.base_asset.eq_ignore_ascii_case(&target.base_asset)
            && self.quote_asset.eq_ignore_ascii_case(&target.quote_asset)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol_id)
    }
}
