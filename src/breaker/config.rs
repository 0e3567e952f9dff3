//! Circuit breaker tuning.

use std::time::Duration;

use thiserror::Error;

const DEFAULT_FAILURE_MONITOR_TIMEOUT_SECS: u64 = 60;
const DEFAULT_FAILURE_RATE_TRIGGER: f64 = 0.5;
const DEFAULT_MIN_CALLS_TRIGGER: u32 = 10;
const DEFAULT_OPEN_TIMEOUT_SECS: u64 = 60;
const DEFAULT_HALF_OPEN_PASSTHROUGH_RATE: f64 = 0.5;
const DEFAULT_RECOVER_RATE: f64 = 0.1;
const DEFAULT_MIN_CALLS_RECOVER: u32 = 10;

/// Thresholds for one [`CircuitBreaker`](super::CircuitBreaker).
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Length of the observation window while closed.
    pub failure_monitor_timeout: Duration,
    /// Failure fraction above which the breaker opens.
    pub failure_rate_trigger: f64,
    /// Calls required in a window before the breaker may open.
    pub min_calls_trigger: u32,
    /// Time since the last failure before an open breaker starts probing.
    pub open_timeout: Duration,
    /// Fraction of calls let through while half-open.
    pub half_open_passthrough_rate: f64,
    /// Failure fraction below which a half-open breaker closes.
    pub recover_rate: f64,
    /// Probe calls required before a half-open breaker may close.
    pub min_calls_recover: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_monitor_timeout: Duration::from_secs(DEFAULT_FAILURE_MONITOR_TIMEOUT_SECS),
            failure_rate_trigger: DEFAULT_FAILURE_RATE_TRIGGER,
            min_calls_trigger: DEFAULT_MIN_CALLS_TRIGGER,
            open_timeout: Duration::from_secs(DEFAULT_OPEN_TIMEOUT_SECS),
            half_open_passthrough_rate: DEFAULT_HALF_OPEN_PASSTHROUGH_RATE,
            recover_rate: DEFAULT_RECOVER_RATE,
            min_calls_recover: DEFAULT_MIN_CALLS_RECOVER,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BreakerConfigError {
    #[error("`{field}` must be a fraction between 0 and 1, got {value}")]
    Rate { field: &'static str, value: f64 },
    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), BreakerConfigError> {
        check_rate("failure_rate_trigger", self.failure_rate_trigger)?;
        check_rate("half_open_passthrough_rate", self.half_open_passthrough_rate)?;
        check_rate("recover_rate", self.recover_rate)?;

        if self.min_calls_trigger == 0 {
            return Err(BreakerConfigError::Zero {
                field: "min_calls_trigger",
            });
        }
        if self.min_calls_recover == 0 {
            return Err(BreakerConfigError::Zero {
                field: "min_calls_recover",
            });
        }
        if self.failure_monitor_timeout.is_zero() {
            return Err(BreakerConfigError::Zero {
                field: "failure_monitor_timeout",
            });
        }
        if self.open_timeout.is_zero() {
            return Err(BreakerConfigError::Zero {
                field: "open_timeout",
            });
        }
        Ok(())
    }
}

impl From<&crate::config::BreakerSettings> for BreakerConfig {
    fn from(settings: &crate::config::BreakerSettings) -> Self {
        Self {
            failure_monitor_timeout: settings.failure_monitor_timeout,
            failure_rate_trigger: settings.failure_rate_trigger,
            min_calls_trigger: settings.min_calls_trigger.get(),
            open_timeout: settings.open_timeout,
            half_open_passthrough_rate: settings.half_open_passthrough_rate,
            recover_rate: settings.recover_rate,
            min_calls_recover: settings.min_calls_recover.get(),
        }
    }
}

fn check_rate(field: &'static str, value: f64) -> Result<(), BreakerConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(BreakerConfigError::Rate { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BreakerConfig::default();
        assert_eq!(config.min_calls_trigger, 10);
        assert_eq!(config.open_timeout, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_rates_outside_unit_interval() {
        let config = BreakerConfig {
            recover_rate: 1.5,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(BreakerConfigError::Rate {
                field: "recover_rate",
                value: 1.5
            })
        );

        let config = BreakerConfig {
            failure_rate_trigger: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_minimums() {
        let config = BreakerConfig {
            min_calls_recover: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(BreakerConfigError::Zero {
                field: "min_calls_recover"
            })
        );
    }
}
