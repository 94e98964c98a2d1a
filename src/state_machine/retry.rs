//! Retry policy: how long a failed job waits and when it is dead-lettered.

use tracing::warn;

use crate::store::ConfigStore;

pub const MAX_RETRIES_KEY: &str = "max_retries";
pub const BACKOFF_BASE_KEY: &str = "backoff_base";

/// Outcome of applying the retry policy to a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempts: u32, delay_secs: u64 },
    DeadLetter { attempts: u32 },
}

/// Exponential backoff without cap or jitter: `delay = backoff_base ^ attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: u64,
    /// Budget given to newly enqueued jobs. A job's own `max_retries` always wins.
    pub default_max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: 2,
            default_max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Read the policy from the config store. Called per finalization so that
    /// operators can retune a running queue.
    pub fn load(config: &impl ConfigStore) -> Self {
        let defaults = Self::default();
        let backoff_base = read_int(config, BACKOFF_BASE_KEY, defaults.backoff_base);
        let default_max_retries = read_int(
            config,
            MAX_RETRIES_KEY,
            u64::from(defaults.default_max_retries),
        );
        Self {
            backoff_base,
            default_max_retries: u32::try_from(default_max_retries)
                .unwrap_or(defaults.default_max_retries),
        }
    }

    /// Integer power; saturates at `u64::MAX` rather than wrapping.
    pub fn delay_secs(&self, attempts: u32) -> u64 {
        self.backoff_base.saturating_pow(attempts)
    }

    pub fn decide(&self, prior_attempts: u32, max_retries: u32) -> RetryDecision {
        let attempts = prior_attempts.saturating_add(1);
        if attempts >= max_retries {
            RetryDecision::DeadLetter { attempts }
        } else {
            RetryDecision::Retry {
                attempts,
                delay_secs: self.delay_secs(attempts),
            }
        }
    }
}

fn read_int(config: &impl ConfigStore, key: &str, default: u64) -> u64 {
    match config.get_int(key, default) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "failed to read config, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_base, 2);
        assert_eq!(policy.default_max_retries, 3);
    }

    #[test]
    fn delay_is_exact_power() {
        let policy = RetryPolicy {
            backoff_base: 3,
            default_max_retries: 10,
        };
        assert_eq!(policy.delay_secs(1), 3);
        assert_eq!(policy.delay_secs(2), 9);
        assert_eq!(policy.delay_secs(5), 243);
        assert_eq!(policy.delay_secs(0), 1);
    }

    #[test]
    fn delay_has_no_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_secs(20), 1 << 20);
        assert_eq!(policy.delay_secs(63), 1 << 63);
        assert_eq!(policy.delay_secs(64), u64::MAX);
    }

    #[test]
    fn three_failures_with_budget_three() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(0, 3),
            RetryDecision::Retry {
                attempts: 1,
                delay_secs: 2
            }
        );
        assert_eq!(
            policy.decide(1, 3),
            RetryDecision::Retry {
                attempts: 2,
                delay_secs: 4
            }
        );
        assert_eq!(policy.decide(2, 3), RetryDecision::DeadLetter { attempts: 3 });
    }

    #[test]
    fn zero_or_one_budget_dead_letters_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(0, 0), RetryDecision::DeadLetter { attempts: 1 });
        assert_eq!(policy.decide(0, 1), RetryDecision::DeadLetter { attempts: 1 });
    }

    #[test]
    fn load_reads_config_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(RetryPolicy::load(&store), RetryPolicy::default());

        store.set_config(BACKOFF_BASE_KEY, "5").unwrap();
        store.set_config(MAX_RETRIES_KEY, "7").unwrap();
        let policy = RetryPolicy::load(&store);
        assert_eq!(policy.backoff_base, 5);
        assert_eq!(policy.default_max_retries, 7);
    }
}
