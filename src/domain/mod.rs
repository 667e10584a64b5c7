//! Domain Layer - Core listing lifecycle logic
//!
//! Pure types and state machines with no I/O beyond the ledger's JSON store.
//! Venue access, announcements and notifications come in through `ports`.
//!
//! - `bracket`: take-profit / stop-loss / trailing-stop arithmetic
//! - `universe`: seen-set diffing to detect newly listed pairs
//! - `countdown`: tracked listing event, warnings, entry window, stages
//! - `escalation`: deadline-driven exit stage planning
//! - `ledger`: open/closed positions and their durable store

pub mod bracket;
pub mod countdown;
pub mod escalation;
pub mod ledger;
pub mod position;
pub mod symbol;
pub mod universe;

pub use bracket::{apply_percent, evaluate_breach, initial_bracket, update_trailing, Bracket, BracketBreach, BracketConfig};
pub use countdown::{EntryWindow, ListingCountdown, ListingEvent, Warning, WarningLevel, WarningSchedule};
pub use escalation::{plan, EscalationStage, EscalationStep, ExitDeadlines, ExitPricing, ExitTechnique};
pub use ledger::{EntryFill, LedgerError, LedgerStore, LoadedState, PersistError, PositionLedger, RecoveryStatus};
pub use position::{ClosedPosition, CloseReason, ExternalOrderId, OrderKind, Position, Side, Status};
pub use symbol::Symbol;
pub use universe::TickerUniverse;
