//! Registration-time assembly of a [`Probe`].

use std::sync::Arc;
use std::time::Duration;

use reqprobe_core::{Observer, Operation};

use crate::config::{HookRetryPolicy, ProbeConfig};
use crate::error::ProbeError;
use crate::probe::Probe;

/// Collects observers and delivery settings, then builds a [`Probe`].
///
/// ```
/// use reqprobe_core::Operation;
/// use reqprobe_server::{ProbeBuilder, StderrObserver};
///
/// #[derive(Debug, Clone, Copy)]
/// struct Ping;
///
/// impl Operation for Ping {
///     fn name(&self) -> &'static str {
///         "PING"
///     }
/// }
///
/// let probe = ProbeBuilder::<Ping>::new()
///     .with_observer(StderrObserver::new())
///     .async_delivery()
///     .build()
///     .unwrap();
/// assert!(probe.is_async());
/// probe.shutdown();
/// ```
pub struct ProbeBuilder<O: Operation> {
    config: ProbeConfig,
    observers: Vec<Arc<dyn Observer<O>>>,
}

impl<O: Operation> ProbeBuilder<O> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ProbeConfig::default(),
            observers: Vec::new(),
        }
    }

    /// Replaces every delivery setting with `config`.
    #[must_use]
    pub fn with_config(mut self, config: ProbeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_observer(self, observer: impl Observer<O> + 'static) -> Self {
        self.with_shared_observer(Arc::new(observer))
    }

    /// Registers an observer the caller keeps a handle to.
    #[must_use]
    pub fn with_shared_observer(mut self, observer: Arc<dyn Observer<O>>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Deliver on a background thread.
    #[must_use]
    pub fn async_delivery(mut self) -> Self {
        self.config.async_delivery = true;
        self
    }

    #[must_use]
    pub fn park_interval(mut self, interval: Duration) -> Self {
        self.config.park_interval = interval;
        self
    }

    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    #[must_use]
    pub fn hook_retry(mut self, policy: HookRetryPolicy) -> Self {
        self.config.hook_retry = policy;
        self
    }

    /// Builds the probe. With no observers the result is a no-op probe.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidConfig`] if the configuration fails
    /// [`ProbeConfig::validate`].
    pub fn build(self) -> Result<Probe<O>, ProbeError> {
        self.config.validate()?;
        let probe = Probe::from_observers(self.observers).with_hook_retry(self.config.hook_retry);
        Ok(if self.config.async_delivery {
            probe.into_async_with(&self.config)
        } else {
            probe
        })
    }
}

impl<O: Operation> Default for ProbeBuilder<O> {
    fn default() -> Self {
        Self::new()
    }
}
