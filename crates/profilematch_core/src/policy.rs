use std::time::Duration;

/// Exponential backoff for reconnecting a dropped progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Retries allowed between two successful connects.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            cap_delay: Duration::from_millis(10_000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt + 1`: `min(base * 2^attempt, cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.cap_delay, |delay| delay.min(self.cap_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (0..6).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn huge_attempt_counts_saturate_at_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(31), policy.cap_delay);
        assert_eq!(policy.delay_for(40), policy.cap_delay);
    }
}
