//! Wall clock port
//!
//! Every time-dependent decision reads the clock through this trait so
//! tests can drive deadlines without sleeping.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn name(&self) -> &str {
        "Clock"
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn name(&self) -> &str {
        "SystemClock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_tracks_utc_now() {
        let clock = SystemClock::new();
        let before = Utc::now();
        let now = clock.now();
        assert!(now >= before);
        assert_eq!(clock.name(), "SystemClock");
    }
}
