//! Timing and environment configuration for the harness
//!
//! Every component receives its configuration explicitly; nothing here is
//! process-global, so scenarios can run side by side with different budgets.

use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Retry interval and overall budget for one convergence wait
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub retry_interval: Duration,
    pub timeout: Duration,
}

impl PollConfig {
    /// Build a validated poll configuration
    ///
    /// The interval must be non-zero and strictly shorter than the timeout so at
    /// least one re-evaluation fits in the budget.
    pub fn new(retry_interval: Duration, timeout: Duration) -> Result<Self> {
        let cfg = Self {
            retry_interval,
            timeout,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "retry interval must be greater than zero".to_string(),
            ));
        }
        if self.timeout <= self.retry_interval {
            return Err(Error::InvalidConfig(format!(
                "timeout ({:?}) must be greater than retry interval ({:?})",
                self.timeout, self.retry_interval
            )));
        }
        Ok(())
    }

    /// Upper bound on evaluations before the deadline
    ///
    /// The final sleep is clipped to the deadline, so a partial interval still
    /// buys one more evaluation.
    pub fn max_attempts(&self) -> u32 {
        let ratio = self
            .timeout
            .as_nanos()
            .div_ceil(self.retry_interval.as_nanos().max(1));
        u32::try_from(ratio).unwrap_or(u32::MAX).saturating_add(1)
    }
}

/// Defaults used by the runtime-component-operator e2e suite
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(240);
pub const DEFAULT_OPERATOR_TIMEOUT: Duration = Duration::from_secs(240);
pub const DEFAULT_CLEANUP_RETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OPERATOR_NAME: &str = "runtime-component-operator";
pub const DEFAULT_KNATIVE_NAMESPACE: &str = "knative-serving";
pub const DEFAULT_NAMESPACE_PREFIX: &str = "runtime-e2e";
pub const DEFAULT_APPLICATION_IMAGE: &str = "navidsh/demo-day";

/// Full harness configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Interval between convergence checks
    pub retry_interval: Duration,
    /// Budget for one scenario step to converge
    pub timeout: Duration,
    /// Budget for the operator Deployment to become available
    pub operator_timeout: Duration,
    /// Interval between checks while waiting for a deleted resource to disappear
    pub cleanup_retry_interval: Duration,
    /// Budget for a deleted resource to disappear
    pub cleanup_timeout: Duration,
    /// Name of the operator Deployment checked before scenarios start
    pub operator_name: String,
    /// Available replicas the operator Deployment must report
    pub operator_replicas: i32,
    /// Namespace holding the operator; `None` means the test namespace
    pub operator_namespace: Option<String>,
    /// Namespace whose presence signals an installed Knative Serving
    pub knative_namespace: String,
    /// Prefix for generated test namespaces
    pub namespace_prefix: String,
    /// Image used by the scenario components
    pub application_image: String,
    /// Run scenarios concurrently instead of one after another
    pub parallel: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            operator_timeout: DEFAULT_OPERATOR_TIMEOUT,
            cleanup_retry_interval: DEFAULT_CLEANUP_RETRY_INTERVAL,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            operator_name: DEFAULT_OPERATOR_NAME.to_string(),
            operator_replicas: 1,
            operator_namespace: None,
            knative_namespace: DEFAULT_KNATIVE_NAMESPACE.to_string(),
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            application_image: DEFAULT_APPLICATION_IMAGE.to_string(),
            parallel: false,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from `E2E_*` environment variables
    ///
    /// Durations are whole seconds. Unparsable values are logged and the
    /// default is kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Duration {
            match lookup(key) {
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(v) => Duration::from_secs(v),
                    Err(_) => {
                        warn!(key, value = %raw, "Ignoring unparsable duration, using default");
                        default
                    }
                },
                None => default,
            }
        };

        let operator_replicas = match lookup("E2E_OPERATOR_REPLICAS") {
            Some(raw) => raw.trim().parse::<i32>().unwrap_or_else(|_| {
                warn!(value = %raw, "Ignoring unparsable E2E_OPERATOR_REPLICAS, using default");
                defaults.operator_replicas
            }),
            None => defaults.operator_replicas,
        };

        let parallel = match lookup("E2E_PARALLEL") {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" | "" => false,
                _ => {
                    warn!(value = %raw, "Ignoring unparsable E2E_PARALLEL, running sequentially");
                    defaults.parallel
                }
            },
            None => defaults.parallel,
        };

        Self {
            retry_interval: secs("E2E_RETRY_INTERVAL_SECS", defaults.retry_interval),
            timeout: secs("E2E_TIMEOUT_SECS", defaults.timeout),
            operator_timeout: secs("E2E_OPERATOR_TIMEOUT_SECS", defaults.operator_timeout),
            cleanup_retry_interval: secs(
                "E2E_CLEANUP_RETRY_INTERVAL_SECS",
                defaults.cleanup_retry_interval,
            ),
            cleanup_timeout: secs("E2E_CLEANUP_TIMEOUT_SECS", defaults.cleanup_timeout),
            operator_name: lookup("E2E_OPERATOR_NAME").unwrap_or(defaults.operator_name),
            operator_replicas,
            operator_namespace: lookup("E2E_OPERATOR_NAMESPACE").filter(|ns| !ns.is_empty()),
            knative_namespace: lookup("E2E_KNATIVE_NAMESPACE")
                .unwrap_or(defaults.knative_namespace),
            namespace_prefix: lookup("E2E_NAMESPACE_PREFIX").unwrap_or(defaults.namespace_prefix),
            application_image: lookup("E2E_APPLICATION_IMAGE")
                .unwrap_or(defaults.application_image),
            parallel,
        }
    }

    /// Poll configuration for scenario steps
    pub fn poll(&self) -> PollConfig {
        PollConfig {
            retry_interval: self.retry_interval,
            timeout: self.timeout,
        }
    }

    /// Poll configuration for the operator readiness precondition
    pub fn operator_poll(&self) -> PollConfig {
        PollConfig {
            retry_interval: self.retry_interval,
            timeout: self.operator_timeout,
        }
    }

    /// Poll configuration for waiting on deleted resources during cleanup
    pub fn cleanup_poll(&self) -> PollConfig {
        PollConfig {
            retry_interval: self.cleanup_retry_interval,
            timeout: self.cleanup_timeout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.poll().validate()?;
        self.operator_poll().validate()?;
        self.cleanup_poll().validate()?;
        if self.operator_replicas < 0 {
            return Err(Error::InvalidConfig(format!(
                "operator replicas must not be negative, got {}",
                self.operator_replicas
            )));
        }
        if self.namespace_prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "namespace prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
