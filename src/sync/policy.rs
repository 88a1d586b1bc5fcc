//! Retry and eviction policy.
//!
//! Decides, per failed dispatch, whether an item stays at the head of the
//! queue for another attempt or is evicted.

use std::time::Duration;

use serde::Serialize;

use crate::config::SyncConfig;
use crate::remote::FailureClass;

/// Outcome of a failed dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Keep the item; `attempt_count` is the new count to persist.
    Retry { attempt_count: u32 },
    /// Remove the item and report it.
    Evict { reason: EvictReason },
}

/// Why an item was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvictReason {
    /// The failure can never succeed on retry.
    Permanent { class: FailureClass },
    /// Transient failures hit the attempt ceiling.
    AttemptsExhausted { attempts: u32, class: FailureClass },
}

impl EvictReason {
    /// Human-readable reason, combined with the remote's message.
    #[must_use]
    pub fn describe(&self, detail: &str) -> String {
        match self {
            Self::Permanent { class } => format!("{}: {detail}", class.user_message()),
            Self::AttemptsExhausted { attempts, class } => {
                format!("{} after {attempts} attempts: {detail}", class.user_message())
            }
        }
    }
}

/// Retry ceiling and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt ceiling and default backoff.
    ///
    /// A ceiling of zero is treated as one: every item gets at least one try.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            backoff_max: Duration::from_secs(config.backoff_max_secs.max(config.backoff_base_secs)),
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what happens to an item that has already failed
    /// `attempt_count` times and just failed again with `class`.
    #[must_use]
    pub fn decide(&self, attempt_count: u32, class: FailureClass) -> Verdict {
        if !class.is_transient() {
            return Verdict::Evict {
                reason: EvictReason::Permanent { class },
            };
        }

        let attempts = attempt_count.saturating_add(1);
        if attempts >= self.max_attempts {
            Verdict::Evict {
                reason: EvictReason::AttemptsExhausted { attempts, class },
            }
        } else {
            Verdict::Retry {
                attempt_count: attempts,
            }
        }
    }

    /// Delay before the next automatic pass after `attempt_count` failures.
    ///
    /// Doubles from the base delay and is capped at the maximum.
    #[must_use]
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(2_u32.pow(exponent));
        delay.min(self.backoff_max)
    }
}
