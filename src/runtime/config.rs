//! Runtime configuration
//!
//! `LedgerConfig` gathers every tunable of a running ledger. Values come from
//! CLI flags or `LEDGER_*` environment variables (see [`crate::cli`]); zero
//! values are rejected with a warning and replaced by the default.

use std::time::Duration;

use crate::core::processor::ProcessorPolicies;
use crate::core::retry::{Backoff, RetryPolicy};
use crate::telemetry::LogFormat;

pub const DEFAULT_TOPIC: &str = "transactions";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Dispatch topic carrying transaction requests
    pub topic: String,
    /// Number of concurrent queue consumers
    pub workers: usize,
    /// Redelivery of a message whose handling failed with a retryable error
    pub message_retry: RetryPolicy,
    /// Read-compute-write cycles on a version conflict
    pub cas_retry: RetryPolicy,
    /// Attempts to credit a transfer source back
    pub compensation_retry: RetryPolicy,
    /// Attempts to write a final journal status
    pub journal_retry: RetryPolicy,
    pub recovery_interval: Duration,
    /// Age after which an intent is considered abandoned
    pub recovery_stale_after: Duration,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            workers: num_cpus::get(),
            message_retry: RetryPolicy::exponential(
                3,
                Duration::from_secs(1),
                Duration::from_secs(30),
            ),
            cas_retry: RetryPolicy::exponential(
                5,
                Duration::from_millis(10),
                Duration::from_millis(200),
            ),
            compensation_retry: RetryPolicy::exponential(
                10,
                Duration::from_millis(25),
                Duration::from_secs(1),
            ),
            journal_retry: RetryPolicy::exponential(
                5,
                Duration::from_millis(10),
                Duration::from_millis(500),
            ),
            recovery_interval: Duration::from_secs(5),
            recovery_stale_after: Duration::from_secs(30),
            log_format: LogFormat::Text,
        }
    }
}

impl LedgerConfig {
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        if topic.is_empty() {
            tracing::warn!(default = DEFAULT_TOPIC, "Invalid empty topic, using default");
        } else {
            self.topic = topic;
        }
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = or_default("workers", workers, self.workers);
        self
    }

    /// Message retry attempts and the base delay of its exponential backoff
    pub fn with_message_retry(mut self, attempts: u32, base_delay: Duration) -> Self {
        let attempts = or_default("message_attempts", attempts, self.message_retry.max_attempts);
        let backoff = match self.message_retry.backoff {
            Backoff::Exponential { max, .. } => Backoff::Exponential {
                base: base_delay,
                max: max.max(base_delay),
            },
            _ if base_delay.is_zero() => Backoff::None,
            _ => Backoff::Fixed(base_delay),
        };
        self.message_retry = RetryPolicy::new(attempts, backoff);
        self
    }

    pub fn with_cas_attempts(mut self, attempts: u32) -> Self {
        let attempts = or_default("cas_attempts", attempts, self.cas_retry.max_attempts);
        self.cas_retry = RetryPolicy::new(attempts, self.cas_retry.backoff);
        self
    }

    pub fn with_compensation_attempts(mut self, attempts: u32) -> Self {
        let attempts = or_default(
            "compensation_attempts",
            attempts,
            self.compensation_retry.max_attempts,
        );
        self.compensation_retry = RetryPolicy::new(attempts, self.compensation_retry.backoff);
        self
    }

    pub fn with_recovery_stale_after(mut self, stale_after: Duration) -> Self {
        self.recovery_stale_after = stale_after;
        self
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    /// Same attempt limits with every delay removed
    pub fn immediate_retries(mut self) -> Self {
        for policy in [
            &mut self.message_retry,
            &mut self.cas_retry,
            &mut self.compensation_retry,
            &mut self.journal_retry,
        ] {
            policy.backoff = Backoff::None;
        }
        self
    }

    pub fn processor_policies(&self) -> ProcessorPolicies {
        ProcessorPolicies {
            cas: self.cas_retry,
            compensation: self.compensation_retry,
            journal: self.journal_retry,
        }
    }
}

fn or_default<T>(name: &str, value: T, default: T) -> T
where
    T: PartialEq + Default + std::fmt::Display + Copy,
{
    if value == T::default() {
        tracing::warn!("Invalid {} ({}), using default ({})", name, value, default);
        default
    } else {
        value
    }
}
