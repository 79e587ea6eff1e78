// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Content-addressed cache of compiled fallback handlers.
//!
//! Entries are keyed by the [`Fingerprint`] of the script text. A miss compiles the script once
//! even when many callers ask for it at the same time. Once an entry is older than the refresh
//! interval, the next lookup triggers a recompilation in the background and keeps serving the
//! previous handler until the new one is stored. An entry older than the expiry interval is
//! recompiled on the caller's path, and [`FallbackCache::evict_expired`] discards such entries
//! even when nobody looks them up again.
//!
//! A script that failed to compile is not refreshed. It is compiled again only once its entry
//! expires.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use parking_lot::Mutex;
use tick::Clock;

use crate::constants::{DEFAULT_EXPIRE_AFTER_WRITE, DEFAULT_FALLBACK_CACHE_CAPACITY, DEFAULT_REFRESH_AFTER_WRITE};
use crate::fallback::{CompiledHandler, Fingerprint, ScriptRuntime};

/// Sizing and timing of the compiled handler cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackCacheOptions {
    /// Maximum number of compiled handlers kept. The least recently used entry is evicted first.
    pub capacity: u64,

    /// Age after which an entry is discarded and compiled again on the next lookup.
    pub expire_after_write: Duration,

    /// Age after which a lookup triggers a background recompilation.
    pub refresh_after_write: Duration,
}

impl Default for FallbackCacheOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_FALLBACK_CACHE_CAPACITY,
            expire_after_write: DEFAULT_EXPIRE_AFTER_WRITE,
            refresh_after_write: DEFAULT_REFRESH_AFTER_WRITE,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    // `None` records a script that failed to compile
    handler: Option<Arc<dyn CompiledHandler>>,
    written_at: Instant,
}

impl CacheEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.written_at)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FallbackCache {
    inner: Arc<FallbackCacheInner>,
}

struct FallbackCacheInner {
    entries: Cache<Fingerprint, CacheEntry>,
    runtime: Arc<dyn ScriptRuntime>,
    options: FallbackCacheOptions,
    in_flight: Mutex<HashSet<Fingerprint>>,
    clock: Clock,
}

impl Debug for FallbackCacheInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackCacheInner")
            .field("runtime", &self.runtime)
            .field("options", &self.options)
            .field("entries", &self.entries.entry_count())
            .finish_non_exhaustive()
    }
}

impl FallbackCache {
    pub fn new(runtime: Arc<dyn ScriptRuntime>, options: FallbackCacheOptions, clock: Clock) -> Self {
        let entries = Cache::builder()
            .max_capacity(options.capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        Self {
            inner: Arc::new(FallbackCacheInner {
                entries,
                runtime,
                options,
                in_flight: Mutex::new(HashSet::new()),
                clock,
            }),
        }
    }

    /// Resolves the compiled handler for `source`.
    ///
    /// Returns `None` for a blank script or one that failed to compile.
    pub async fn get(&self, source: &str) -> Option<Arc<dyn CompiledHandler>> {
        if source.trim().is_empty() {
            return None;
        }

        let fingerprint = Fingerprint::of(source);
        let now = self.inner.clock.instant();
        let expire_after_write = self.inner.options.expire_after_write;

        let entry = self
            .inner
            .entries
            .entry(fingerprint)
            .or_insert_with_if(async { self.inner.compile(source, fingerprint) }, |cached| {
                cached.age(now) >= expire_after_write
            })
            .await
            .into_value();

        if entry.handler.is_some() && entry.age(now) >= self.inner.options.refresh_after_write {
            self.refresh(source, fingerprint);
        }

        entry.handler
    }

    /// Discards every entry older than the expiry interval and returns how many were discarded.
    pub async fn evict_expired(&self) -> usize {
        let now = self.inner.clock.instant();
        let expire_after_write = self.inner.options.expire_after_write;

        let expired: Vec<Fingerprint> = self
            .inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.age(now) >= expire_after_write)
            .map(|(fingerprint, _)| *fingerprint)
            .collect();

        for fingerprint in &expired {
            self.inner.entries.invalidate(fingerprint).await;
        }

        if !expired.is_empty() {
            tracing::event!(
                name: "breakwater.fallback.expired",
                tracing::Level::DEBUG,
                fallback.expired = expired.len(),
            );
        }

        expired.len()
    }

    /// Recompiles `source` in the background unless a recompilation is already running.
    fn refresh(&self, source: &str, fingerprint: Fingerprint) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        if !self.inner.in_flight.lock().insert(fingerprint) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let source = source.to_owned();

        handle.spawn(async move {
            let entry = match inner.compile(&source, fingerprint) {
                CacheEntry { handler: None, .. } => {
                    // keep serving the previous handler; a failed refresh is retried on the next cycle
                    let previous = inner.entries.get(&fingerprint).await;
                    previous.map(|previous| CacheEntry {
                        handler: previous.handler,
                        written_at: inner.clock.instant(),
                    })
                }
                compiled => Some(compiled),
            };

            if let Some(entry) = entry {
                inner.entries.insert(fingerprint, entry).await;
            }

            inner.in_flight.lock().remove(&fingerprint);
        });
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> u64 {
        self.inner.entries.run_pending_tasks().await;
        self.inner.entries.entry_count()
    }
}

impl FallbackCacheInner {
    fn compile(&self, source: &str, fingerprint: Fingerprint) -> CacheEntry {
        let handler = match self.runtime.compile(source, &fingerprint) {
            Ok(handler) => {
                tracing::event!(
                    name: "breakwater.fallback.compiled",
                    tracing::Level::DEBUG,
                    fallback.fingerprint = %fingerprint,
                );
                Some(handler)
            }
            Err(error) => {
                tracing::event!(
                    name: "breakwater.fallback.compile_failed",
                    tracing::Level::WARN,
                    fallback.fingerprint = %fingerprint,
                    error.message = %error,
                );
                None
            }
        };

        CacheEntry {
            handler,
            written_at: self.clock.instant(),
        }
    }
}
