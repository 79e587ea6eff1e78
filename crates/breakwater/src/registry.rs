// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use moka::policy::EvictionPolicy;
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, MeterProvider};
use tick::Clock;

use crate::breaker::{BreakerMetrics, CircuitEngine, CircuitState, CommandState, Engines};
use crate::command_key::CommandKey;
use crate::config::{BreakerConfig, ConfigRefresher, ConfigSnapshot, ConfigSource, EmptyConfigSource};
use crate::constants::{
    DEFAULT_MAX_TRACKED_KEYS, DEFAULT_REFRESH_INITIAL_DELAY, DEFAULT_REFRESH_PERIOD, DEFAULT_ROLLING_WINDOW,
};
use crate::fallback::{FallbackCache, FallbackCacheOptions, ScriptRuntime, UnsupportedRuntime};
use crate::isolation::WorkerPool;

/// Process-wide home of every per-key breaker, the configuration snapshot, and the fallback cache.
///
/// Calls are routed through [`execute`][Self::execute] or [`intercept`][Self::intercept]. Cloning
/// is cheap; clones share all state.
///
/// # Examples
///
/// ```
/// use breakwater::{CommandRegistry, InMemoryConfigSource, Invocation, JsonLiteralRuntime, RpcResult};
/// use serde_json::json;
/// use tick::Clock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let documents = InMemoryConfigSource::new();
/// let registry = CommandRegistry::builder(&Clock::new_frozen())
///     .config_source(documents.clone())
///     .script_runtime(JsonLiteralRuntime)
///     .build();
///
/// let invocation = Invocation::new("com.example.Greeter", "sayHi", ["String"], [json!("Ada")]);
/// let result = registry
///     .execute(&invocation, &|_: &Invocation| async { RpcResult::Ok(json!("Hi Ada")) })
///     .await;
///
/// assert_eq!(result, Ok(json!("Hi Ada")));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

#[derive(Debug)]
pub(crate) struct RegistryInner {
    pub snapshot: Arc<ConfigSnapshot>,
    pub engines: Arc<Engines>,
    pub pools: moka::sync::Cache<String, Arc<WorkerPool>>,
    pub fallbacks: FallbackCache,
    pub refresher: ConfigRefresher,
    pub eager_config_fetch: bool,
    pub clock: Clock,
}

impl CommandRegistry {
    /// Starts building a registry that reads time from `clock`.
    #[must_use]
    pub fn builder(clock: &Clock) -> CommandRegistryBuilder {
        CommandRegistryBuilder::new(clock.clone())
    }

    /// The configuration currently known for each key.
    #[must_use]
    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.inner.snapshot
    }

    /// Keys whose breakers are currently retained.
    #[must_use]
    pub fn observed_keys(&self) -> Vec<CommandKey> {
        self.inner.engines.keys()
    }

    /// State and rolling-window counts of the breaker of `key`.
    ///
    /// `None` when the key was never observed or has been evicted.
    #[must_use]
    pub fn breaker_metrics(&self, key: &CommandKey) -> Option<BreakerMetrics> {
        self.inner.engines.get(key).map(|engine| engine.metrics())
    }

    /// Current state of the breaker of `key`.
    #[must_use]
    pub fn circuit_state(&self, key: &CommandKey) -> Option<CircuitState> {
        self.breaker_metrics(key).map(|metrics| metrics.state)
    }

    /// The loop that keeps configuration current.
    #[must_use]
    pub fn config_refresher(&self) -> ConfigRefresher {
        self.inner.refresher.clone()
    }

    /// Spawns the configuration refresh loop on the current tokio runtime.
    ///
    /// Aborting the returned handle stops the loop.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn_config_refresh(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.config_refresher().run())
    }

    /// Returns the state of `key`, observing it on first use.
    pub(crate) fn observe(&self, key: &CommandKey) -> Arc<CommandState> {
        let (state, created) = self.inner.engines.get_or_create(key, || {
            self.inner
                .snapshot
                .lookup_model(key)
                .filter(|model| model.enabled)
                .map_or_else(|| Arc::new(BreakerConfig::default()), |model| Arc::clone(&model.config))
        });

        if created {
            tracing::event!(
                name: "breakwater.command.observed",
                tracing::Level::DEBUG,
                command.key = key.as_str(),
            );

            if self.inner.eager_config_fetch {
                self.inner.refresher.refresh_key_in_background(key.clone());
            }
        }

        state
    }

    /// The worker pool shared by all methods of `interface`.
    pub(crate) fn worker_pool(&self, interface: &str) -> Arc<WorkerPool> {
        self.inner
            .pools
            .get_with_by_ref(interface, || Arc::new(WorkerPool::new(interface)))
    }
}

/// Builder of a [`CommandRegistry`].
#[derive(Debug)]
pub struct CommandRegistryBuilder {
    clock: Clock,
    config_source: Arc<dyn ConfigSource>,
    script_runtime: Arc<dyn ScriptRuntime>,
    max_tracked_keys: u64,
    rolling_window: Duration,
    fallback_cache: FallbackCacheOptions,
    refresh_initial_delay: Duration,
    refresh_period: Duration,
    eager_config_fetch: bool,
    #[cfg(feature = "metrics")]
    resilience_events: Option<Counter<u64>>,
}

impl CommandRegistryBuilder {
    fn new(clock: Clock) -> Self {
        Self {
            clock,
            config_source: Arc::new(EmptyConfigSource),
            script_runtime: Arc::new(UnsupportedRuntime),
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            rolling_window: DEFAULT_ROLLING_WINDOW,
            fallback_cache: FallbackCacheOptions::default(),
            refresh_initial_delay: DEFAULT_REFRESH_INITIAL_DELAY,
            refresh_period: DEFAULT_REFRESH_PERIOD,
            eager_config_fetch: true,
            #[cfg(feature = "metrics")]
            resilience_events: None,
        }
    }

    /// Store the per-key documents are read from. Without one every key stays unconfigured.
    #[must_use]
    pub fn config_source(mut self, source: impl ConfigSource) -> Self {
        self.config_source = Arc::new(source);
        self
    }

    /// Runtime compiling degrade and fallback scripts. Without one no script compiles.
    #[must_use]
    pub fn script_runtime(mut self, runtime: impl ScriptRuntime) -> Self {
        self.script_runtime = Arc::new(runtime);
        self
    }

    /// Maximum number of keys with a retained breaker. Defaults to 10 000.
    ///
    /// The least recently used key is evicted beyond the bound, together with its statistics and
    /// its configuration snapshot entry.
    #[must_use]
    pub fn max_tracked_keys(mut self, max_tracked_keys: u64) -> Self {
        self.max_tracked_keys = max_tracked_keys;
        self
    }

    /// Length of the statistics window thresholds are evaluated over. Defaults to 10 seconds.
    #[must_use]
    pub fn rolling_window(mut self, rolling_window: Duration) -> Self {
        self.rolling_window = rolling_window;
        self
    }

    /// Sizing and expiry of the compiled handler cache.
    #[must_use]
    pub fn fallback_cache(mut self, options: FallbackCacheOptions) -> Self {
        self.fallback_cache = options;
        self
    }

    /// When the refresh loop first runs and how often it repeats. Defaults to 30 and 20 seconds.
    #[must_use]
    pub fn refresh_schedule(mut self, initial_delay: Duration, period: Duration) -> Self {
        self.refresh_initial_delay = initial_delay;
        self.refresh_period = period;
        self
    }

    /// Whether a newly observed key has its document fetched right away in the background.
    ///
    /// Enabled by default. When disabled, new keys wait for the next refresh cycle.
    #[must_use]
    pub fn eager_config_fetch(mut self, enabled: bool) -> Self {
        self.eager_config_fetch = enabled;
        self
    }

    /// Records breaker events on the `resilience.event` counter of `meter_provider`.
    #[cfg(feature = "metrics")]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    #[must_use]
    pub fn meter_provider(mut self, meter_provider: &dyn MeterProvider) -> Self {
        use crate::telemetry::metrics::{create_meter, create_resilience_event_counter};

        self.resilience_events = Some(create_resilience_event_counter(&create_meter(meter_provider)));
        self
    }

    /// Creates the registry. The refresh loop is not started until
    /// [`CommandRegistry::spawn_config_refresh`] is called.
    #[must_use]
    pub fn build(self) -> CommandRegistry {
        let snapshot = Arc::new(ConfigSnapshot::new());

        let evicted_from = Arc::clone(&snapshot);
        let engines = Engines::new(
            self.max_tracked_keys,
            self.rolling_window,
            self.clock.clone(),
            move |key| {
                evicted_from.remove(key);
            },
        );

        #[cfg(feature = "metrics")]
        let engines = match self.resilience_events {
            Some(counter) => engines.with_resilience_events(counter),
            None => engines,
        };

        let engines = Arc::new(engines);

        let fallbacks = FallbackCache::new(self.script_runtime, self.fallback_cache, self.clock.clone());

        let refresher = ConfigRefresher::new(
            self.config_source,
            Arc::clone(&snapshot),
            Arc::clone(&engines),
            fallbacks.clone(),
            self.clock.clone(),
            self.refresh_initial_delay,
            self.refresh_period,
        );

        let pools = moka::sync::Cache::builder()
            .max_capacity(self.max_tracked_keys)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        CommandRegistry {
            inner: Arc::new(RegistryInner {
                snapshot,
                engines,
                pools,
                fallbacks,
                refresher,
                eager_config_fetch: self.eager_config_fetch,
                clock: self.clock,
            }),
        }
    }
}
