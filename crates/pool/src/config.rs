//! Pool configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::error::{PoolError, PoolResult};

/// When resources are validated before being handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ValidatePolicy {
    /// Validate freshly created and reused resources
    #[default]
    Always,
    /// Validate freshly created resources only
    NewOnly,
    /// Validate resources taken from the idle set only
    IdleOnly,
    /// Never validate
    Never,
}

impl ValidatePolicy {
    /// Whether a freshly created resource must be validated.
    #[must_use]
    pub fn validates_new(self) -> bool {
        matches!(self, Self::Always | Self::NewOnly)
    }

    /// Whether a resource reused from the idle set must be validated.
    #[must_use]
    pub fn validates_idle(self) -> bool {
        matches!(self, Self::Always | Self::IdleOnly)
    }
}

/// Whether released resources are reset before returning to the idle set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ResetPolicy {
    /// Run `Factory::reset` on every release
    Always,
    /// Return released resources to the idle set as they are
    #[default]
    Never,
}

/// Configuration for a resource pool
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Minimum number of resources kept in the pool
    pub min_size: usize,
    /// Maximum number of resources in the pool
    pub max_size: usize,
    /// Minimum number of idle resources kept ready for callers
    pub min_idle: usize,
    /// Maximum number of callers waiting in the queue
    pub max_queue_size: usize,
    /// Maximum number of resources being created at once
    pub max_concurrency: usize,
    /// Time budget for `Pool::start`
    pub start_timeout: Duration,
    /// Time budget for `Pool::stop`
    pub stop_timeout: Duration,
    /// Time budget for a single `Pool::acquire`
    pub acquire_timeout: Duration,
    /// Time budget for `Factory::create`
    pub create_timeout: Duration,
    /// Time budget for `Factory::validate`
    pub validate_timeout: Duration,
    /// Time budget for `Factory::reset`
    pub reset_timeout: Duration,
    /// Time budget for `Factory::destroy`
    pub destroy_timeout: Duration,
    /// Retry pacing after failed creation or validation
    pub backoff: BackoffConfig,
    /// When resources are validated
    pub validate: ValidatePolicy,
    /// Whether released resources are reset
    pub reset: ResetPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            min_idle: 0,
            max_queue_size: usize::MAX,
            max_concurrency: usize::MAX,
            start_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            create_timeout: Duration::from_secs(10),
            validate_timeout: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(5),
            destroy_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            validate: ValidatePolicy::default(),
            reset: ResetPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 {
            return Err(PoolError::configuration("max_size must be greater than 0"));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::configuration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.min_idle > self.max_size {
            return Err(PoolError::configuration(format!(
                "min_idle ({}) must not exceed max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.max_queue_size == 0 {
            return Err(PoolError::configuration(
                "max_queue_size must be greater than 0",
            ));
        }
        if self.max_concurrency == 0 {
            return Err(PoolError::configuration(
                "max_concurrency must be greater than 0",
            ));
        }
        for (name, timeout) in [
            ("start_timeout", self.start_timeout),
            ("stop_timeout", self.stop_timeout),
            ("acquire_timeout", self.acquire_timeout),
            ("create_timeout", self.create_timeout),
            ("validate_timeout", self.validate_timeout),
            ("reset_timeout", self.reset_timeout),
            ("destroy_timeout", self.destroy_timeout),
        ] {
            if timeout.is_zero() {
                return Err(PoolError::configuration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.backoff.initial.is_zero() {
            return Err(PoolError::configuration(
                "backoff.initial must be greater than zero",
            ));
        }
        if self.backoff.initial > self.backoff.max {
            return Err(PoolError::configuration(format!(
                "backoff.initial ({:?}) must not exceed backoff.max ({:?})",
                self.backoff.initial, self.backoff.max
            )));
        }
        if !self.backoff.factor.is_finite() || self.backoff.factor < 1.0 {
            return Err(PoolError::configuration(
                "backoff.factor must be a finite number of at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.min_size, 0);
        assert_eq!(config.max_size, 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
        assert_eq!(config.validate, ValidatePolicy::Always);
        assert_eq!(config.reset, ResetPolicy::Never);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::zero_max(PoolConfig { max_size: 0, ..Default::default() })]
    #[case::min_above_max(PoolConfig { min_size: 11, max_size: 10, ..Default::default() })]
    #[case::min_idle_above_max(PoolConfig { min_idle: 11, max_size: 10, ..Default::default() })]
    #[case::zero_queue(PoolConfig { max_queue_size: 0, ..Default::default() })]
    #[case::zero_concurrency(PoolConfig { max_concurrency: 0, ..Default::default() })]
    #[case::zero_acquire_timeout(PoolConfig { acquire_timeout: Duration::ZERO, ..Default::default() })]
    #[case::zero_destroy_timeout(PoolConfig { destroy_timeout: Duration::ZERO, ..Default::default() })]
    #[case::zero_backoff(PoolConfig {
        backoff: BackoffConfig { initial: Duration::ZERO, ..Default::default() },
        ..Default::default()
    })]
    #[case::backoff_initial_above_max(PoolConfig {
        backoff: BackoffConfig {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(1),
            factor: 2.0,
        },
        ..Default::default()
    })]
    #[case::shrinking_backoff(PoolConfig {
        backoff: BackoffConfig { factor: 0.5, ..Default::default() },
        ..Default::default()
    })]
    fn invalid_configs_are_rejected(#[case] config: PoolConfig) {
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PoolError::Configuration { .. }), "{err}");
    }

    #[rstest]
    #[case(ValidatePolicy::Always, true, true)]
    #[case(ValidatePolicy::NewOnly, true, false)]
    #[case(ValidatePolicy::IdleOnly, false, true)]
    #[case(ValidatePolicy::Never, false, false)]
    fn validate_policy_gates(
        #[case] policy: ValidatePolicy,
        #[case] new: bool,
        #[case] idle: bool,
    ) {
        assert_eq!(policy.validates_new(), new);
        assert_eq!(policy.validates_idle(), idle);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_deserializes_with_defaults() {
        let config: PoolConfig =
            serde_json::from_str(r#"{ "max_size": 3, "validate": "idle_only" }"#).unwrap();
        assert_eq!(config.max_size, 3);
        assert_eq!(config.validate, ValidatePolicy::IdleOnly);
        assert_eq!(config.min_size, 0);
    }
}
