use std::time::Duration;

use parley_common::retry::RetryPolicy;

/// Flush tuning for one stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Upper bound on content fragments folded into one interim update.
    pub batch_size: usize,
    /// Delay before the first flush after the session went idle.
    pub flush_interval: Duration,
    /// Retry policy for interim updates. The final message is never retried.
    pub retry: RetryPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_millis(500),
            retry: RetryPolicy::fixed(5, Duration::from_millis(500)),
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
