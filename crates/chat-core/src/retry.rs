use std::time::Duration;

/// Exponential backoff bounds for push-channel reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    /// Bounds are clamped so that `1 <= base <= max`.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Delay after `failures` consecutive failed links (zero-based):
    /// `base * 2^failures`, capped.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let doubled = self.base_delay_ms.saturating_mul(1_u64 << failures.min(32));
        Duration::from_millis(doubled.min(self.max_delay_ms))
    }

    /// Fresh per-link backoff state.
    pub fn backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff {
            policy: *self,
            failures: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(500, 30_000)
    }
}

/// Consecutive-failure counter driven by the transport's reconnect loop.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: RetryPolicy,
    failures: u32,
}

impl ReconnectBackoff {
    /// Record one lost or refused link and return how long to wait.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_after(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// A link came up; the next failure starts from the base delay again.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
