//! Reconnect backoff timing.

use std::time::Duration;

/// Delay before the first reconnect attempt.
const INITIAL_DELAY: Duration = Duration::from_millis(500);
/// Ceiling for the exponential growth.
const MAX_DELAY: Duration = Duration::from_millis(12_000);
const GROWTH_FACTOR: f64 = 1.6;
/// Total jitter window as a fraction of the current delay (±10 %).
const JITTER_SPAN: f64 = 0.2;

/// Exponential backoff with jitter for reconnect attempts.
///
/// Each failed attempt grows the stored delay by ×1.6 up to 12 s; any
/// successful connect resets it. The returned delay carries ±10 %
/// uniform jitter, rounded to whole milliseconds, so a fleet of clients
/// does not reconnect in lockstep.
pub(crate) struct ReconnectBackoff {
    current: Duration,
}

impl ReconnectBackoff {
    pub(crate) fn new() -> Self {
        Self {
            current: INITIAL_DELAY,
        }
    }

    /// The jittered delay to sleep before the next attempt; grows the
    /// stored delay for the attempt after it.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let grown = base.as_millis() as f64 * GROWTH_FACTOR;
        let capped = grown.min(MAX_DELAY.as_millis() as f64);
        self.current = Duration::from_millis(capped.round() as u64);
        jitter(base)
    }

    pub(crate) fn reset(&mut self) { self.current = INITIAL_DELAY; }
}

fn jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as f64;
    let offset = (rand::random::<f64>() - 0.5) * JITTER_SPAN * millis;
    Duration::from_millis((millis + offset).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_jitter(observed: Duration, base_millis: u64) -> bool {
        let base = base_millis as f64;
        let millis = observed.as_millis() as f64;
        (base * 0.9 - 1.0..=base * 1.1 + 1.0).contains(&millis)
    }

    #[test]
    fn delays_grow_geometrically_up_to_the_cap() {
        let mut backoff = ReconnectBackoff::new();
        let expected = [500u64, 800, 1280, 2048, 3277, 5243, 8389, 12000, 12000];
        for base in expected {
            let delay = backoff.next_delay();
            assert!(
                within_jitter(delay, base),
                "delay {delay:?} outside jitter window of {base} ms"
            );
        }
    }

    #[test]
    fn reset_returns_to_the_initial_delay() {
        let mut backoff = ReconnectBackoff::new();
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert!(within_jitter(backoff.next_delay(), 500));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        for _ in 0..100 {
            let jittered = jitter(Duration::from_millis(1000));
            assert!((900..=1100).contains(&(jittered.as_millis() as u64)));
        }
    }
}
