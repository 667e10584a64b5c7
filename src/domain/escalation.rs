//! Exit Escalation
//!
//! Decides, from the time elapsed since listing, which exit technique an open
//! position should try next. Stages only move forward:
//!
//! ```text
//! AwaitingSlowExit -> AwaitingFastExit -> ForceExit -> Done
//! ```
//!
//! A filled exit at any stage jumps straight to `Done`. An unfilled attempt
//! still advances, because the deadline governs urgency, not the outcome.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::bracket::apply_percent;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EscalationStage {
    #[default]
    AwaitingSlowExit,
    AwaitingFastExit,
    ForceExit,
    Done,
}

impl EscalationStage {
    /// The following stage; `Done` is absorbing.
    pub fn next(self) -> Self {
        match self {
            EscalationStage::AwaitingSlowExit => EscalationStage::AwaitingFastExit,
            EscalationStage::AwaitingFastExit => EscalationStage::ForceExit,
            EscalationStage::ForceExit | EscalationStage::Done => EscalationStage::Done,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == EscalationStage::Done
    }

    /// Stage reached after an attempt made in this stage.
    pub fn after_attempt(self, filled: bool) -> Self {
        if filled {
            EscalationStage::Done
        } else {
            self.next()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTechnique {
    /// Limit sell at `slow_exit_percent` over entry
    SlowLimit,
    /// Limit sell at `fast_exit_percent` over entry
    FastLimit,
    Market,
}

/// Elapsed-since-listing cutoffs for each stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitDeadlines {
    pub slow: Duration,
    pub fast: Duration,
    /// How long a market exit may wait for its fill
    pub market_fill: Duration,
}

impl ExitDeadlines {
    pub fn new(slow: Duration, fast: Duration, market_fill: Duration) -> Self {
        Self {
            slow,
            fast,
            market_fill,
        }
    }
}

/// Limit offsets used by the two passive stages
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitPricing {
    pub slow_exit_percent: f64,
    pub fast_exit_percent: f64,
}

impl ExitPricing {
    /// Limit price for `technique`, `None` for market orders.
    pub fn limit_price(&self, technique: ExitTechnique, entry_price: f64) -> Option<f64> {
        match technique {
            ExitTechnique::SlowLimit => Some(apply_percent(entry_price, self.slow_exit_percent)),
            ExitTechnique::FastLimit => Some(apply_percent(entry_price, self.fast_exit_percent)),
            ExitTechnique::Market => None,
        }
    }
}

/// What the engine should do for a position this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStep {
    /// Submit an exit and poll for its fill until `until` has elapsed since listing
    Attempt {
        technique: ExitTechnique,
        until: Duration,
    },
    /// The stage window closed without an attempt; move on
    Advance(EscalationStage),
    /// The stage window has not opened yet
    Wait,
    Terminal,
}

pub fn plan(stage: EscalationStage, elapsed: Duration, deadlines: &ExitDeadlines) -> EscalationStep {
    match stage {
        EscalationStage::AwaitingSlowExit => {
            if elapsed < deadlines.slow {
                EscalationStep::Attempt {
                    technique: ExitTechnique::SlowLimit,
                    until: deadlines.slow,
                }
            } else {
                EscalationStep::Advance(stage.next())
            }
        }
        EscalationStage::AwaitingFastExit => {
            if elapsed < deadlines.slow {
                EscalationStep::Wait
            } else if elapsed < deadlines.fast {
                EscalationStep::Attempt {
                    technique: ExitTechnique::FastLimit,
                    until: deadlines.fast,
                }
            } else {
                EscalationStep::Advance(stage.next())
            }
        }
        EscalationStage::ForceExit => {
            if elapsed < deadlines.fast {
                EscalationStep::Wait
            } else {
                EscalationStep::Attempt {
                    technique: ExitTechnique::Market,
                    until: elapsed + deadlines.market_fill,
                }
            }
        }
        EscalationStage::Done => EscalationStep::Terminal,
    }
}
