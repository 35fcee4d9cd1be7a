//! Per-adapter minimum inter-call interval enforcement. Deliberately
//! just a last-call timestamp — no failure counting, no tripwire. Adapters
//! never circuit-break; that's a Collector Loop concern and the core
//! explicitly has none.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::SourceError;

pub struct RateGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Returns `Ok(())` and records `now` as the last call iff the
    /// minimum interval has elapsed since the previous call; otherwise
    /// refuses with `RateLimited(remaining)` and records nothing.
    pub fn check_and_record(&self) -> Result<(), SourceError> {
        let now = Instant::now();
        let mut last_call = self.last_call.lock();

        if let Some(last) = *last_call {
            let elapsed = now.duration_since(last);
            if elapsed < self.min_interval {
                return Err(SourceError::RateLimited(self.min_interval - elapsed));
            }
        }

        *last_call = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_always_allowed() {
        let gate = RateGate::new(Duration::from_secs(5));
        assert!(gate.check_and_record().is_ok());
    }

    #[test]
    fn second_call_within_floor_is_refused() {
        let gate = RateGate::new(Duration::from_millis(50));
        assert!(gate.check_and_record().is_ok());
        assert!(matches!(gate.check_and_record(), Err(SourceError::RateLimited(_))));
    }

    #[test]
    fn call_after_floor_elapses_is_allowed() {
        let gate = RateGate::new(Duration::from_millis(10));
        assert!(gate.check_and_record().is_ok());
        std::thread::sleep(Duration::from_millis(15));
        assert!(gate.check_and_record().is_ok());
    }
}
