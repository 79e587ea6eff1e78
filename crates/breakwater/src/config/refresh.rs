// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tick::{Clock, PeriodicTimer};

use crate::breaker::{CircuitEngine, Engines};
use crate::command_key::CommandKey;
use crate::config::{BreakerConfig, CommandModel, ConfigSnapshot, ConfigSource};
use crate::error::RefreshError;
use crate::fallback::FallbackCache;

/// Counts of one refresh cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct RefreshReport {
    /// Keys whose enabled configuration was applied to their breaker.
    pub refreshed: usize,
    /// Keys configured as disabled. Their breakers keep their previous parameters.
    pub disabled: usize,
    /// Keys without a document. Their breakers fell back to defaults.
    pub missing: usize,
    /// Keys whose document could not be fetched or parsed.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyRefresh {
    Refreshed,
    Disabled,
    Missing,
    /// The key was evicted while its document was being fetched.
    Untracked,
}

/// Re-reads the configuration of every observed key and applies it.
///
/// Obtained from [`CommandRegistry::config_refresher`][crate::CommandRegistry::config_refresher].
/// [`run`][Self::run] drives the periodic loop; [`refresh_once`][Self::refresh_once] performs a
/// single cycle, which is convenient in tests and for callers with their own scheduler.
#[derive(Debug, Clone)]
pub struct ConfigRefresher {
    source: Arc<dyn ConfigSource>,
    snapshot: Arc<ConfigSnapshot>,
    engines: Arc<Engines>,
    fallbacks: FallbackCache,
    clock: Clock,
    initial_delay: Duration,
    period: Duration,
}

impl ConfigRefresher {
    pub(crate) fn new(
        source: Arc<dyn ConfigSource>,
        snapshot: Arc<ConfigSnapshot>,
        engines: Arc<Engines>,
        fallbacks: FallbackCache,
        clock: Clock,
        initial_delay: Duration,
        period: Duration,
    ) -> Self {
        Self {
            source,
            snapshot,
            engines,
            fallbacks,
            clock,
            initial_delay,
            period,
        }
    }

    /// Delay before the first refresh cycle.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Interval between refresh cycles.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Refreshes every observed key once, then discards expired fallback handlers.
    ///
    /// A key that fails is logged and counted; the remaining keys are still refreshed.
    pub async fn refresh_once(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        for key in self.engines.keys() {
            match self.refresh_key(&key).await {
                Ok(KeyRefresh::Refreshed) => report.refreshed += 1,
                Ok(KeyRefresh::Disabled) => report.disabled += 1,
                Ok(KeyRefresh::Missing) => report.missing += 1,
                Ok(KeyRefresh::Untracked) => {}
                Err(error) => {
                    report.failed += 1;

                    tracing::event!(
                        name: "breakwater.config.refresh_failed",
                        tracing::Level::WARN,
                        command.key = key.as_str(),
                        error.message = %error,
                    );
                }
            }
        }

        self.fallbacks.evict_expired().await;

        tracing::event!(
            name: "breakwater.config.refreshed",
            tracing::Level::DEBUG,
            config.refresh.refreshed = report.refreshed,
            config.refresh.disabled = report.disabled,
            config.refresh.missing = report.missing,
            config.refresh.failed = report.failed,
        );

        report
    }

    /// Runs the refresh loop forever.
    ///
    /// The first cycle starts after the initial delay, later cycles follow every period.
    pub async fn run(self) {
        self.clock.delay(self.initial_delay).await;
        self.refresh_once().await;

        let mut timer = PeriodicTimer::new(&self.clock, self.period);
        while timer.next().await.is_some() {
            self.refresh_once().await;
        }
    }

    /// Fetches the document of one key and applies it to the snapshot and the key's breaker.
    pub(crate) async fn refresh_key(&self, key: &CommandKey) -> Result<KeyRefresh, RefreshError> {
        let document = self.source.get(key.as_str()).await?;

        let Some(engine) = self.engines.get(key) else {
            return Ok(KeyRefresh::Untracked);
        };

        let Some(document) = document else {
            self.snapshot.remove(key);
            engine.update_params(Arc::new(BreakerConfig::default()));
            return Ok(KeyRefresh::Missing);
        };

        let model = Arc::new(CommandModel::from_json(&document)?);
        self.snapshot.store(key.clone(), Arc::clone(&model));

        if !model.enabled {
            return Ok(KeyRefresh::Disabled);
        }

        engine.update_params(Arc::clone(&model.config));

        Ok(KeyRefresh::Refreshed)
    }

    /// Fetches the document of a newly observed key in the background.
    ///
    /// Does nothing outside a tokio runtime; the periodic loop picks the key up later.
    pub(crate) fn refresh_key_in_background(&self, key: CommandKey) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let refresher = self.clone();

        handle.spawn(async move {
            if let Err(error) = refresher.refresh_key(&key).await {
                tracing::event!(
                    name: "breakwater.config.refresh_failed",
                    tracing::Level::WARN,
                    command.key = key.as_str(),
                    error.message = %error,
                );
            }
        });
    }
}
