//! Ticker Universe Tracker
//!
//! Keeps the set of symbol ids already seen on a venue. The set only grows;
//! a pair that was ever observed is never reported as new again.

use std::collections::HashSet;

use super::symbol::Symbol;

#[derive(Debug, Clone, Default)]
pub struct TickerUniverse {
    seen: HashSet<String>,
    seeded: bool,
}

impl TickerUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the venue's starting list without reporting anything as new.
    pub fn seed(&mut self, symbols: &[Symbol]) {
        self.seen
            .extend(symbols.iter().map(|symbol| symbol.symbol_id.clone()));
        self.seeded = true;
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Returns every symbol in `current` whose id has not been seen, and marks
    /// them seen. Repeated ids within `current` are reported once.
    pub fn diff(&mut self, current: &[Symbol]) -> Vec<Symbol> {
        current
            .iter()
            .filter(|symbol| self.seen.insert(symbol.symbol_id.clone()))
            .cloned()
            .collect()
    }

    pub fn contains(&self, symbol_id: &str) -> bool {
        self.seen.contains(symbol_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
