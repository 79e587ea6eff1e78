// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::ExecutionResult;
use crate::config::BreakerConfig;
use crate::constants::{DEFAULT_ROLLING_BUCKETS, MIN_ROLLING_WINDOW};

/// Counts of each outcome over the rolling window.
#[must_use]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub(crate) struct HealthInfo {
    pub successes: u32,
    pub failures: u32,
    pub timeouts: u32,
    pub rejections: u32,
}

impl HealthInfo {
    /// All samples, rejections included.
    pub fn total(&self) -> u32 {
        self.successes
            .saturating_add(self.failures)
            .saturating_add(self.timeouts)
            .saturating_add(self.rejections)
    }

    /// Samples counted against the error threshold.
    pub fn errors(&self) -> u32 {
        self.failures.saturating_add(self.timeouts)
    }

    pub fn error_percent(&self) -> u32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }

        #[expect(clippy::cast_possible_truncation, reason = "the quotient never exceeds 100")]
        let percent = (u64::from(self.errors()) * 100 / u64::from(total)) as u32;
        percent
    }

    pub fn is_tripped(&self, config: &BreakerConfig) -> bool {
        config.is_tripped(self.errors(), self.total())
    }

    fn add(&mut self, other: &Self) {
        self.successes = self.successes.saturating_add(other.successes);
        self.failures = self.failures.saturating_add(other.failures);
        self.timeouts = self.timeouts.saturating_add(other.timeouts);
        self.rejections = self.rejections.saturating_add(other.rejections);
    }
}

/// Tracks execution results over a sliding time window split into buckets.
///
/// Thresholds are not stored here. They are passed in at evaluation time so that a configuration
/// change applies to the statistics already collected.
#[derive(Debug, Clone)]
pub(crate) struct HealthMetrics {
    rolling_window: Duration,
    bucket_duration: Duration,
    buckets: VecDeque<Bucket>,
}

impl HealthMetrics {
    pub fn new(rolling_window: Duration) -> Self {
        let rolling_window = rolling_window.max(MIN_ROLLING_WINDOW);

        Self {
            rolling_window,
            bucket_duration: rolling_window / DEFAULT_ROLLING_BUCKETS,
            buckets: VecDeque::with_capacity(DEFAULT_ROLLING_BUCKETS as usize),
        }
    }

    pub fn record(&mut self, result: ExecutionResult, now: Instant) {
        self.evict(now);

        if let Some(back) = self.buckets.back_mut()
            && now.saturating_duration_since(back.started_at) < self.bucket_duration
        {
            back.update(result);
        } else {
            let mut bucket = Bucket::new(now);
            bucket.update(result);
            self.buckets.push_back(bucket);
        }
    }

    pub fn health_info(&self, now: Instant) -> HealthInfo {
        self.buckets
            .iter()
            .filter(|bucket| now.saturating_duration_since(bucket.started_at) < self.rolling_window)
            .fold(HealthInfo::default(), |mut info, bucket| {
                info.add(&bucket.counts);
                info
            })
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front()
            && now.saturating_duration_since(front.started_at) >= self.rolling_window
        {
            self.buckets.pop_front();
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    counts: HealthInfo,
    started_at: Instant,
}

impl Bucket {
    fn new(started_at: Instant) -> Self {
        Self {
            counts: HealthInfo::default(),
            started_at,
        }
    }

    fn update(&mut self, result: ExecutionResult) {
        let counter = match result {
            ExecutionResult::Success => &mut self.counts.successes,
            ExecutionResult::Failure => &mut self.counts.failures,
            ExecutionResult::Timeout => &mut self.counts.timeouts,
            ExecutionResult::Rejected => &mut self.counts.rejections,
        };

        *counter = counter.saturating_add(1);
    }
}
