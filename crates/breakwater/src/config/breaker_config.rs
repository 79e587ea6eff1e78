// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Display;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ERROR_THRESHOLD_PERCENT, DEFAULT_FALLBACK_MAX_CONCURRENT_REQUESTS, DEFAULT_MAX_CONCURRENT_REQUESTS,
    DEFAULT_POOL_CORE_SIZE, DEFAULT_POOL_MAXIMUM_SIZE, DEFAULT_POOL_MAX_QUEUE_SIZE, DEFAULT_REQUEST_VOLUME_THRESHOLD,
    DEFAULT_SLEEP_WINDOW, DEFAULT_TIMEOUT,
};

/// How calls for a key are isolated from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationStrategy {
    /// Calls run on a bounded worker pool shared by all methods of the same interface.
    Thread,

    /// Calls run on the caller's task and consume one of a fixed number of permits.
    #[default]
    Semaphore,
}

impl IsolationStrategy {
    /// Parses a strategy name, ignoring ASCII case.
    ///
    /// Unrecognized names normalize to [`IsolationStrategy::Semaphore`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breakwater::IsolationStrategy;
    ///
    /// assert_eq!(IsolationStrategy::from_name("thread"), IsolationStrategy::Thread);
    /// assert_eq!(IsolationStrategy::from_name("SEMAPHORE"), IsolationStrategy::Semaphore);
    /// assert_eq!(IsolationStrategy::from_name("fibers"), IsolationStrategy::Semaphore);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("THREAD") {
            Self::Thread
        } else {
            Self::Semaphore
        }
    }

    /// Returns the canonical name of the strategy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thread => "THREAD",
            Self::Semaphore => "SEMAPHORE",
        }
    }
}

impl Display for IsolationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sizing of the worker pool used by [`IsolationStrategy::Thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPoolConfig {
    /// Number of workers kept available for the interface.
    pub core_size: u32,

    /// Upper bound on concurrently executing calls. Values below `core_size` are ignored.
    pub maximum_size: u32,

    /// Number of calls allowed to wait for a free worker. Zero or less means no waiting: a call
    /// that finds every worker busy is rejected immediately.
    pub max_queue_size: i32,
}

impl ThreadPoolConfig {
    /// Maximum number of calls executing at the same time.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.core_size.max(self.maximum_size).max(1) as usize
    }

    /// Maximum number of calls waiting for a worker, or zero for synchronous hand-off.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        usize::try_from(self.max_queue_size).unwrap_or(0)
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            core_size: DEFAULT_POOL_CORE_SIZE,
            maximum_size: DEFAULT_POOL_MAXIMUM_SIZE,
            max_queue_size: DEFAULT_POOL_MAX_QUEUE_SIZE,
        }
    }
}

/// Breaker, isolation, and timeout parameters of one command key.
///
/// A running breaker reads these values on every call, so replacing the configuration of a key
/// changes thresholds immediately while the accumulated rolling statistics are kept.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use breakwater::BreakerConfig;
///
/// let config = BreakerConfig {
///     request_volume_threshold: 5,
///     timeout: Duration::from_millis(300),
///     ..BreakerConfig::default()
/// };
///
/// assert_eq!(config.error_threshold_percent, 50);
/// assert_eq!(config.sleep_window, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Time the circuit stays open before a single trial call is admitted.
    pub sleep_window: Duration,

    /// Error percentage, from 0 to 100, at or above which the circuit opens.
    pub error_threshold_percent: u32,

    /// Minimum number of samples in the rolling window before the error percentage is evaluated.
    pub request_volume_threshold: u32,

    /// How calls are isolated from the caller.
    pub isolation_strategy: IsolationStrategy,

    /// Permits available to concurrent calls under [`IsolationStrategy::Semaphore`].
    pub max_concurrent_requests: u32,

    /// Maximum duration of a single call.
    pub timeout: Duration,

    /// When `false` calls are never cancelled by the dispatcher.
    pub timeout_enabled: bool,

    /// When `true` a call running on a worker is aborted once it times out. Otherwise the worker
    /// runs it to completion in the background and its result is discarded.
    pub interrupt_on_timeout: bool,

    /// Maximum number of fallback handlers running at the same time for the key.
    pub fallback_max_concurrent_requests: u32,

    /// Worker pool sizing under [`IsolationStrategy::Thread`].
    pub thread_pool: ThreadPoolConfig,
}

impl BreakerConfig {
    /// Error threshold clamped to the valid percentage range.
    #[must_use]
    pub(crate) fn error_threshold(&self) -> u32 {
        self.error_threshold_percent.min(100)
    }

    /// Returns `true` when `errors` out of `total` samples should open the circuit.
    #[must_use]
    pub(crate) fn is_tripped(&self, errors: u32, total: u32) -> bool {
        if total == 0 || total < self.request_volume_threshold {
            return false;
        }

        u64::from(errors) * 100 >= u64::from(self.error_threshold()) * u64::from(total)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            sleep_window: DEFAULT_SLEEP_WINDOW,
            error_threshold_percent: DEFAULT_ERROR_THRESHOLD_PERCENT,
            request_volume_threshold: DEFAULT_REQUEST_VOLUME_THRESHOLD,
            isolation_strategy: IsolationStrategy::default(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            timeout: DEFAULT_TIMEOUT,
            timeout_enabled: true,
            interrupt_on_timeout: true,
            fallback_max_concurrent_requests: DEFAULT_FALLBACK_MAX_CONCURRENT_REQUESTS,
            thread_pool: ThreadPoolConfig::default(),
        }
    }
}
