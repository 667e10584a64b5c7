//! Status rendering for saved venue ledgers

use serde_json::{json, Value};
use std::fmt::Write;

use crate::domain::{LoadedState, RecoveryStatus};

fn describe_recovery(status: &RecoveryStatus) -> String {
    match status {
        RecoveryStatus::Fresh => "no saved state".to_string(),
        RecoveryStatus::Recovered { open, closed } => format!("{} open, {} closed", open, closed),
        RecoveryStatus::Corrupted(problems) => format!("CORRUPTED: {}", problems.join("; ")),
    }
}

pub fn render_text(venue: &str, state: &LoadedState) -> String {
    let mut out = String::new();
    let ledger = &state.ledger;
    let countdown = &state.countdown;

    let _ = writeln!(out, "{} ({})", venue, describe_recovery(&state.status));
    match (countdown.target(), countdown.listing_instant()) {
        (Some(target), Some(instant)) => {
            let _ = writeln!(
                out,
                "  Tracking: {} at {} UTC",
                target,
                instant.format("%Y-%m-%d %H:%M")
            );
        }
        _ => {
            let _ = writeln!(out, "  Tracking: nothing");
        }
    }

    for position in ledger.open_positions() {
        let _ = writeln!(
            out,
            "  OPEN   {:<12} size {:.8} @ {:.8}  stage {:?}  stop {:.8}  trailing {:.8}",
            position.symbol.symbol_id,
            position.size,
            position.entry_price,
            countdown.stage(&position.symbol.symbol_id),
            position.stop_loss,
            position.trailing_stop
        );
    }

    let mut realized = 0.0;
    for closed in ledger.closed_positions() {
        realized += closed.realized_profit;
        let _ = writeln!(
            out,
            "  CLOSED {:<12} {:<13} profit {:.2} ({:+.2}%)",
            closed.symbol_id(),
            closed.reason.to_string(),
            closed.realized_profit,
            closed.realized_profit_percent
        );
    }
    let _ = write!(out, "  Realized profit: {:.2}", realized);
    out
}

pub fn render_json(venue: &str, state: &LoadedState) -> Result<Value, serde_json::Error> {
    let ledger = &state.ledger;
    let open: Vec<&_> = ledger.open_positions().collect();
    let closed: Vec<&_> = ledger.closed_positions().collect();
    let realized: f64 = closed.iter().map(|c| c.realized_profit).sum();

    Ok(json!({
        "venue": venue,
        "recovery": describe_recovery(&state.status),
        "tracking": state.countdown.event(),
        "stages": state.countdown.stages(),
        "open": serde_json::to_value(open)?,
        "closed": serde_json::to_value(closed)?,
        "realized_profit": realized,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BracketConfig, CloseReason, EntryFill, ExternalOrderId, ListingCountdown, OrderKind,
        PositionLedger, Symbol,
    };
    use chrono::{Duration, TimeZone, Utc};

    fn state() -> LoadedState {
        let listing = Utc.with_ymd_and_hms(2021, 11, 18, 14, 8, 0).unwrap();
        let mut ledger = PositionLedger::new("BINANCE");
        let mut countdown = ListingCountdown::new();
        countdown.record_event(Symbol::from_assets("ANKR", "USDT"), listing);

        for (base, price) in [("ANKR", 0.1), ("SYS", 0.2)] {
            ledger
                .open(
                    Symbol::from_assets(base, "USDT"),
                    EntryFill {
                        entry_price: price,
                        size: 100.0,
                        order_kind: OrderKind::Market,
                        external_order_id: ExternalOrderId::new(base),
                    },
                    listing,
                    &BracketConfig::default(),
                )
                .unwrap();
        }
        ledger
            .mark_closed(
                "SYSUSDT",
                0.202,
                100.0,
                ExternalOrderId::new("x"),
                CloseReason::SlowExit,
                listing + Duration::seconds(5),
            )
            .unwrap();
        ledger.sweep_pending_removals();

        LoadedState {
            ledger,
            countdown,
            status: RecoveryStatus::Recovered { open: 1, closed: 1 },
        }
    }

    #[test]
    fn test_render_text() {
        let text = render_text("BINANCE", &state());
        assert!(text.starts_with("BINANCE (1 open, 1 closed)"));
        assert!(text.contains("Tracking: ANKRUSDT at 2021-11-18 14:08 UTC"));
        assert!(text.contains("OPEN   ANKRUSDT"));
        assert!(text.contains("CLOSED SYSUSDT"));
        assert!(text.contains("slow exit"));
        assert!(text.ends_with("Realized profit: 0.20"));
    }

    #[test]
    fn test_render_json() {
        let value = render_json("BINANCE", &state()).unwrap();
        assert_eq!(value["venue"], "BINANCE");
        assert_eq!(value["open"].as_array().unwrap().len(), 1);
        assert_eq!(value["closed"].as_array().unwrap().len(), 1);
        assert!((value["realized_profit"].as_f64().unwrap() - 0.2).abs() < 1e-9);
    }
}
