//! Periodic timer that reports how many periods expired since it was last read.
//!
//! If the task is scheduled late, several expirations are reported at once so
//! that the caller can replay one probe per expiration instead of silently
//! coalescing them.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

// Roughly 30 years, same horizon tokio uses for "never".
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

pub struct ProbeTimer {
    start: Instant,
    period: Duration,
    fired: u64,
}

impl ProbeTimer {
    /// Arms the timer. The first expiration happens one period from now.
    pub fn new(period: Duration) -> Self {
        Self::starting_at(Instant::now(), period)
    }

    pub fn starting_at(start: Instant, period: Duration) -> Self {
        ProbeTimer {
            start,
            period,
            fired: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next expiration and returns the number of expirations
    /// accumulated since the previous call (always at least one).
    ///
    /// Cancel safe: the expiration count is only updated after the sleep completes.
    pub async fn wait(&mut self) -> u64 {
        sleep_until(self.deadline(self.fired + 1)).await;
        self.collect(Instant::now())
    }

    /// Accounts for all expirations that happened up to `now`.
    fn collect(&mut self, now: Instant) -> u64 {
        let total = expirations(now.saturating_duration_since(self.start), self.period);
        let new = total.saturating_sub(self.fired);
        self.fired = total.max(self.fired);
        new
    }

    fn deadline(&self, tick: u64) -> Instant {
        let nanos = self.period.as_nanos().saturating_mul(tick as u128);
        let offset = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        self.start
            .checked_add(offset)
            .unwrap_or_else(|| self.start + FAR_FUTURE)
    }
}

/// Number of whole periods contained in `elapsed`.
fn expirations(elapsed: Duration, period: Duration) -> u64 {
    let period = period.as_nanos().max(1);
    u64::try_from(elapsed.as_nanos() / period).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(100);

    #[test]
    fn expirations_counts_whole_periods() {
        assert_eq!(expirations(Duration::ZERO, PERIOD), 0);
        assert_eq!(expirations(Duration::from_millis(99), PERIOD), 0);
        assert_eq!(expirations(Duration::from_millis(100), PERIOD), 1);
        assert_eq!(expirations(Duration::from_millis(450), PERIOD), 4);
    }

    #[test]
    fn collect_reports_each_expiration_once() {
        let start = Instant::now();
        let mut timer = ProbeTimer::starting_at(start, PERIOD);

        assert_eq!(timer.collect(start + Duration::from_millis(100)), 1);
        // Scheduled late: three more periods accumulated.
        assert_eq!(timer.collect(start + Duration::from_millis(420)), 3);
        // Nothing new within the same period.
        assert_eq!(timer.collect(start + Duration::from_millis(480)), 0);
        assert_eq!(timer.collect(start + Duration::from_millis(500)), 1);
        assert_eq!(timer.fired, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_one_per_period_when_on_time() {
        let mut timer = ProbeTimer::new(PERIOD);
        for _ in 0..5 {
            assert_eq!(timer.wait().await, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_replays_missed_expirations() {
        let mut timer = ProbeTimer::new(PERIOD);
        assert_eq!(timer.wait().await, 1);

        // Simulate the task being descheduled for 3.5 periods.
        tokio::time::advance(Duration::from_millis(350)).await;
        assert_eq!(timer.wait().await, 3);

        // Back in phase with the original schedule.
        assert_eq!(timer.wait().await, 1);
        assert_eq!(timer.fired, 5);
    }
}
