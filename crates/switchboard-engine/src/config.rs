use std::time::Duration;

/// Per-session dispatch limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Calls allowed to run at once per session (`M`).
    pub max_concurrent_calls: usize,
    /// Pending calls allowed to wait for a slot before `Overloaded`.
    pub queue_bound: usize,
    /// Default deadline for a call or a stream open.
    pub call_timeout: Duration,
    /// How long a terminal record stays queryable if never acknowledged.
    pub record_grace: Duration,
    /// Capacity of the per-session outbound event channel.
    pub outbound_buffer: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
            queue_bound: 16,
            call_timeout: Duration::from_secs(30),
            record_grace: Duration::from_secs(60),
            outbound_buffer: 256,
        }
    }
}

impl DispatchConfig {
    pub fn with_max_concurrent_calls(mut self, m: usize) -> Self {
        self.max_concurrent_calls = m.max(1);
        self
    }

    pub fn with_queue_bound(mut self, bound: usize) -> Self {
        self.queue_bound = bound;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_record_grace(mut self, grace: Duration) -> Self {
        self.record_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = DispatchConfig::default();
        assert_eq!(c.max_concurrent_calls, 4);
        assert_eq!(c.queue_bound, 16);
        assert_eq!(c.call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn cap_never_zero() {
        let c = DispatchConfig::default().with_max_concurrent_calls(0);
        assert_eq!(c.max_concurrent_calls, 1);
    }
}
