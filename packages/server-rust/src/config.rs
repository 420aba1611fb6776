//! Probe configuration types.

use std::time::Duration;

use crate::error::ProbeError;

/// Configuration for a [`Probe`](crate::Probe) handle.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Deliver records on a background thread instead of the caller's thread.
    pub async_delivery: bool,
    /// Upper bound on how long the delivery thread sleeps between drains.
    pub park_interval: Duration,
    /// Name given to the delivery thread.
    pub thread_name: String,
    /// Retry behaviour for completion-hook registration.
    pub hook_retry: HookRetryPolicy,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            async_delivery: false,
            park_interval: Duration::from_secs(10),
            thread_name: "async-probe".to_string(),
            hook_retry: HookRetryPolicy::default(),
        }
    }
}

impl ProbeConfig {
    /// Checks the configuration for values the dispatcher cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidConfig`] for a zero park interval or an
    /// empty or NUL-containing thread name.
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.park_interval.is_zero() {
            return Err(ProbeError::InvalidConfig {
                reason: "park_interval must be non-zero".to_string(),
            });
        }
        if self.thread_name.is_empty() || self.thread_name.contains('\0') {
            return Err(ProbeError::InvalidConfig {
                reason: format!("thread_name {:?} is not a usable thread name", self.thread_name),
            });
        }
        Ok(())
    }
}

/// Controls how hard lifecycle attachment tries to register completion hooks.
///
/// With `enabled = false` a failed registration is logged once and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookRetryPolicy {
    pub enabled: bool,
    /// Retry once while holding the request context's monitor.
    pub synchronized_retry: bool,
    /// Retry once more on the request's executor.
    pub executor_retry: bool,
}

impl Default for HookRetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            synchronized_retry: true,
            executor_retry: true,
        }
    }
}

impl HookRetryPolicy {
    /// Single attempt, no retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            synchronized_retry: false,
            executor_retry: false,
        }
    }
}
