// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
#[cfg(feature = "metrics")]
use opentelemetry::metrics::Counter;
use tick::Clock;

use crate::breaker::{Engine, EngineCore, EngineTelemetry};
use crate::command_key::CommandKey;
use crate::config::BreakerConfig;
use crate::isolation::Bulkhead;

/// Everything kept for one observed key.
#[derive(Debug)]
pub(crate) struct CommandState {
    pub engine: Arc<Engine>,
    /// Permits of calls under semaphore isolation.
    pub permits: Arc<Bulkhead>,
    /// Permits of running fallback handlers.
    pub fallback_permits: Arc<Bulkhead>,
}

/// Engines of every observed key.
///
/// The registry holds at most a fixed number of keys. When the bound is reached the least
/// recently used key is evicted together with its statistics, and the eviction callback lets the
/// owner drop other per-key state. The key set doubles as the set of keys the refresh loop visits.
pub(crate) struct Engines {
    map: Cache<CommandKey, Arc<CommandState>>,
    rolling_window: Duration,
    clock: Clock,
    #[cfg(feature = "metrics")]
    resilience_events: Option<Counter<u64>>,
}

impl Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("len", &self.map.entry_count())
            .field("rolling_window", &self.rolling_window)
            .finish_non_exhaustive()
    }
}

impl Engines {
    pub fn new<F>(max_keys: u64, rolling_window: Duration, clock: Clock, on_evict: F) -> Self
    where
        F: Fn(&CommandKey) + Send + Sync + 'static,
    {
        let map = Cache::builder()
            .max_capacity(max_keys)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |key: Arc<CommandKey>, _state, cause| {
                if cause == RemovalCause::Size {
                    tracing::event!(
                        name: "breakwater.circuit_breaker.evicted",
                        tracing::Level::DEBUG,
                        command.key = key.as_str(),
                    );
                    on_evict(&key);
                }
            })
            .build();

        Self {
            map,
            rolling_window,
            clock,
            #[cfg(feature = "metrics")]
            resilience_events: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_resilience_events(mut self, counter: Counter<u64>) -> Self {
        self.resilience_events = Some(counter);
        self
    }

    /// Returns the state of `key`, creating its engine with `params` on first use.
    ///
    /// The flag is `true` when this call created the state.
    pub fn get_or_create(
        &self,
        key: &CommandKey,
        params: impl FnOnce() -> Arc<BreakerConfig>,
    ) -> (Arc<CommandState>, bool) {
        let entry = self.map.entry_by_ref(key).or_insert_with(|| {
            Arc::new(CommandState {
                engine: Arc::new(self.create_engine(key, params())),
                permits: Arc::new(Bulkhead::new()),
                fallback_permits: Arc::new(Bulkhead::new()),
            })
        });

        (Arc::clone(entry.value()), entry.is_fresh())
    }

    pub fn get(&self, key: &CommandKey) -> Option<Arc<Engine>> {
        self.map.get(key).map(|state| Arc::clone(&state.engine))
    }

    /// Keys whose engines are currently retained.
    pub fn keys(&self) -> Vec<CommandKey> {
        self.map.run_pending_tasks();
        self.map.iter().map(|(key, _)| CommandKey::clone(&key)).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> u64 {
        self.map.run_pending_tasks();
        self.map.entry_count()
    }

    fn create_engine(&self, key: &CommandKey, params: Arc<BreakerConfig>) -> Engine {
        let engine = EngineTelemetry::new(
            EngineCore::new(params, self.rolling_window, self.clock.clone()),
            key.clone(),
            self.clock.clone(),
        );

        #[cfg(feature = "metrics")]
        let engine = match &self.resilience_events {
            Some(counter) => engine.with_resilience_events(counter.clone()),
            None => engine,
        };

        engine
    }
}
