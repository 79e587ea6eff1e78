// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Default time a tripped circuit stays open before a trial call is admitted.
pub(crate) const DEFAULT_SLEEP_WINDOW: Duration = Duration::from_millis(5000);

/// Default error percentage (failures and timeouts over total volume) that trips the circuit.
pub(crate) const DEFAULT_ERROR_THRESHOLD_PERCENT: u32 = 50;

/// Default minimum number of samples in the rolling window before the error threshold is evaluated.
pub(crate) const DEFAULT_REQUEST_VOLUME_THRESHOLD: u32 = 50;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

pub(crate) const DEFAULT_MAX_CONCURRENT_REQUESTS: u32 = 100;

pub(crate) const DEFAULT_FALLBACK_MAX_CONCURRENT_REQUESTS: u32 = 500;

pub(crate) const DEFAULT_POOL_CORE_SIZE: u32 = 10;

pub(crate) const DEFAULT_POOL_MAXIMUM_SIZE: u32 = 20;

/// A queue size of zero or less means calls are handed to a worker directly or rejected.
pub(crate) const DEFAULT_POOL_MAX_QUEUE_SIZE: i32 = -1;

/// Number of buckets the rolling statistics window is split into.
pub(crate) const DEFAULT_ROLLING_BUCKETS: u32 = 10;

/// Total length of the rolling statistics window.
pub(crate) const DEFAULT_ROLLING_WINDOW: Duration = Duration::from_secs(10);

/// Smallest rolling window accepted; shorter values are clamped.
pub(crate) const MIN_ROLLING_WINDOW: Duration = Duration::from_millis(100);

/// Upper bound on the number of distinct command keys whose breaker state is retained.
pub(crate) const DEFAULT_MAX_TRACKED_KEYS: u64 = 10_000;

pub(crate) const DEFAULT_FALLBACK_CACHE_CAPACITY: u64 = 1000;

pub(crate) const DEFAULT_EXPIRE_AFTER_WRITE: Duration = Duration::from_secs(30 * 60);

pub(crate) const DEFAULT_REFRESH_AFTER_WRITE: Duration = Duration::from_secs(10);

pub(crate) const DEFAULT_REFRESH_INITIAL_DELAY: Duration = Duration::from_secs(30);

pub(crate) const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(20);

/// Name of the method invoked on compiled fallback and degrade handlers.
pub(crate) const HANDLER_METHOD: &str = "fallback";

pub(crate) const HASH_TAG: char = '#';

pub(crate) const COMMA: char = ',';
