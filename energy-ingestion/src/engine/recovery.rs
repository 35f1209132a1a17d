/// How many times a unit of work may be attempted when it is rejected
/// because a day partition is missing.
///
/// At most one re-provisioning cycle runs before the error surfaces to the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    max_attempts: u32,
}

impl RecoveryPolicy {
    /// The first attempt plus one retry.
    pub const RETRY_ONCE: Self = Self { max_attempts: 2 };

    pub const fn max_attempts(self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may follow the failed attempt number
    /// `attempt` (1-based).
    pub const fn allows_retry(self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::RETRY_ONCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_once_allows_exactly_one_retry() {
        let policy = RecoveryPolicy::RETRY_ONCE;
        assert_eq!(policy.max_attempts(), 2);
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
    }
}
