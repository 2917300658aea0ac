//! Token bucket governing `QUEUED → RUNNING`.
//!
//! Classic token bucket with continuous refill: `requests_per_window` tokens
//! per `window`, burst capacity equal to one full window.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct RateGate {
    capacity: f64,
    /// Tokens added per second.
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateGate {
    pub(crate) fn new(requests_per_window: u32, window: Duration) -> Self {
        let capacity = f64::from(requests_per_window.max(1));
        let window = window.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_rate: capacity / window,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes a token, or reports how long until one is available.
    pub(crate) fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::try_from_secs_f64(missing / self.refill_rate).unwrap_or(Duration::MAX))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_then_wait() {
        let mut gate = RateGate::new(2, Duration::from_secs(1));
        let now = Instant::now();

        assert!(gate.try_take(now).is_ok());
        assert!(gate.try_take(now).is_ok());

        let wait = gate.try_take(now).unwrap_err();
        assert_eq!(wait, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn enormous_window_saturates_the_wait() {
        let mut gate = RateGate::new(1, Duration::MAX);
        let now = Instant::now();

        assert!(gate.try_take(now).is_ok());
        let wait = gate.try_take(now).unwrap_err();
        assert!(wait >= Duration::from_secs(u64::MAX / 2), "{wait:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn refills_continuously_up_to_capacity() {
        let mut gate = RateGate::new(4, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..4 {
            gate.try_take(start).unwrap();
        }

        assert!(gate.try_take(start + Duration::from_millis(250)).is_ok());
        assert!(gate.try_take(start + Duration::from_millis(250)).is_err());

        // A long idle period never banks more than one window of tokens.
        let later = start + Duration::from_secs(60);
        for _ in 0..4 {
            assert!(gate.try_take(later).is_ok());
        }
        assert!(gate.try_take(later).is_err());
    }
}
