// ── Poll scheduler ──
//
// One timer, re-armed only after a full poll pass has issued its requests.
// Per-device polls never touch it.

use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct PollScheduler {
    interval: Duration,
    deadline: Instant,
}

impl PollScheduler {
    /// The first wait ends one `interval` from now.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now() + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Resolves when the current wait elapses. Stays resolved until
    /// [`reset`](Self::reset) is called.
    pub async fn wait(&self) {
        tokio::time::sleep_until(self.deadline).await;
    }

    /// Start the next wait from now.
    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.interval;
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_elapses_after_interval() {
        let start = Instant::now();
        let scheduler = PollScheduler::new(Duration::from_secs(10));
        scheduler.wait().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_rearms_from_now() {
        let mut scheduler = PollScheduler::new(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(4)).await;
        scheduler.reset();

        let start = Instant::now();
        scheduler.wait().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_not_ready_before_deadline() {
        let scheduler = PollScheduler::new(Duration::from_secs(10));
        let mut wait = tokio_test::task::spawn(scheduler.wait());
        tokio_test::assert_pending!(wait.poll());

        tokio::time::advance(Duration::from_secs(9)).await;
        tokio_test::assert_pending!(wait.poll());

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio_test::assert_ready!(wait.poll());
    }
}
