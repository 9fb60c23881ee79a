use std::time::Duration;

/// What to do with an entry after its Nth failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded backoff schedule.
///
/// `delays[n - 1]` is the wait after the nth failure; the last delay repeats
/// when `max_attempts` outgrows the list. The nth failure with
/// `n >= max_attempts` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::ZERO,
                Duration::from_secs(5 * 60),
                Duration::from_secs(15 * 60),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn decide(&self, failures: i64) -> RetryDecision {
        if failures >= i64::from(self.max_attempts) {
            return RetryDecision::GiveUp;
        }
        let idx = usize::try_from(failures.max(1) - 1).unwrap_or(0);
        let delay = self
            .delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO);
        RetryDecision::RetryAfter(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_policy_is_immediate_then_five_minutes_then_terminal() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(1), RetryDecision::RetryAfter(Duration::ZERO));
        assert_eq!(
            policy.decide(2),
            RetryDecision::RetryAfter(Duration::from_secs(300))
        );
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(7), RetryDecision::GiveUp);
    }

    #[test]
    fn raised_budget_reaches_the_longer_delay_and_then_repeats_it() {
        let policy = RetryPolicy {
            max_attempts: 6,
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.decide(3),
            RetryDecision::RetryAfter(Duration::from_secs(900))
        );
        assert_eq!(
            policy.decide(5),
            RetryDecision::RetryAfter(Duration::from_secs(900))
        );
        assert_eq!(policy.decide(6), RetryDecision::GiveUp);
    }

    #[test]
    fn empty_schedule_retries_immediately() {
        let policy = RetryPolicy {
            max_attempts: 2,
            delays: vec![],
        };
        assert_eq!(policy.decide(1), RetryDecision::RetryAfter(Duration::ZERO));
        assert_eq!(policy.decide(2), RetryDecision::GiveUp);
    }
}
