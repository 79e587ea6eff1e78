// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the registry and configuration refresh using only public API.

use std::time::Duration;

use breakwater::{
    CircuitState, CommandKey, CommandRegistry, ConfigRefresher, ConfigSource, InMemoryConfigSource, Invocation,
    IsolationStrategy, Protected, RpcError, RpcResult, SourceError,
};
use futures_util::future::BoxFuture;
use serde_json::json;
use tick::{Clock, ClockControl};
use tracing_test::traced_test;

static_assertions::assert_impl_all!(CommandRegistry: Send, Sync, Clone);
static_assertions::assert_impl_all!(ConfigRefresher: Send, Sync, Clone);
static_assertions::assert_impl_all!(InMemoryConfigSource: Send, Sync);
static_assertions::assert_impl_all!(CommandKey: Send, Sync);

fn ok(_: &Invocation) -> std::future::Ready<RpcResult> {
    std::future::ready(Ok(json!("ok")))
}

static_assertions::assert_impl_all!(Protected<fn(&Invocation) -> std::future::Ready<RpcResult>>: Send, Sync);

fn invocation(method: &str) -> Invocation {
    Invocation::new("com.example.Greeter", method, ["String"], [json!("Ada")])
}

fn registry(clock: &Clock, source: impl ConfigSource) -> CommandRegistry {
    CommandRegistry::builder(clock)
        .config_source(source)
        .eager_config_fetch(false)
        .build()
}

#[derive(Debug)]
struct UnavailableSource;

impl ConfigSource for UnavailableSource {
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<String>, SourceError>> {
        Box::pin(async { Err(SourceError::new("connection refused")) })
    }
}

#[tokio::test]
async fn refresh_applies_documents_to_running_breakers() {
    let documents = InMemoryConfigSource::new();
    let registry = registry(&Clock::new_frozen(), documents.clone());

    let _ = registry.execute(&invocation("sayHi"), &ok).await;
    let _ = registry.execute(&invocation("sayBye"), &ok).await;

    documents.insert(
        "com.example.Greeter.sayHi#String",
        r#"{"enable": "1", "hystrixConfig": {"executionIsolationStrategy": "THREAD", "coreSize": 4}}"#,
    );
    let report = registry.config_refresher().refresh_once().await;

    assert_eq!(report.refreshed, 1);
    assert_eq!(report.missing, 1);
    assert_eq!(report.disabled, 0);
    assert_eq!(report.failed, 0);

    let config = registry.snapshot().lookup(&invocation("sayHi").key()).unwrap();
    assert_eq!(config.isolation_strategy, IsolationStrategy::Thread);
    assert_eq!(config.thread_pool.core_size, 4);
    assert!(registry.snapshot().lookup(&invocation("sayBye").key()).is_none());

    // statistics survive the configuration change
    assert_eq!(registry.breaker_metrics(&invocation("sayHi").key()).unwrap().successes, 1);
}

#[tokio::test]
async fn removed_document_restores_defaults() {
    let documents = InMemoryConfigSource::new();
    documents.insert(
        "com.example.Greeter.sayHi#String",
        r#"{"enable": 1, "breakerConfig": {"requestVolumeThreshold": 2}}"#,
    );
    let registry = registry(&Clock::new_frozen(), documents.clone());
    let failing = |_: &Invocation| async { RpcResult::Err(RpcError::infrastructure("connection reset")) };

    let _ = registry.execute(&invocation("sayHi"), &ok).await;
    let _ = registry.config_refresher().refresh_once().await;
    assert_eq!(registry.snapshot().len(), 1);

    documents.remove("com.example.Greeter.sayHi#String");
    let report = registry.config_refresher().refresh_once().await;

    assert_eq!(report.missing, 1);
    assert!(registry.snapshot().is_empty());

    // the default volume threshold of 50 keeps the circuit closed
    for _ in 0..5 {
        let _ = registry.execute(&invocation("sayHi"), &failing).await;
    }
    assert_eq!(registry.circuit_state(&invocation("sayHi").key()), Some(CircuitState::Closed));
}

#[tokio::test]
#[traced_test]
async fn unavailable_source_is_logged_and_keeps_running() {
    let registry = registry(&Clock::new_frozen(), UnavailableSource);

    let _ = registry.execute(&invocation("sayHi"), &ok).await;
    let _ = registry.execute(&invocation("sayBye"), &ok).await;

    let report = registry.config_refresher().refresh_once().await;

    assert_eq!(report.failed, 2);
    assert!(logs_contain("configuration source failed: connection refused"));
    assert!(logs_contain("com.example.Greeter.sayHi#String"));
    assert!(logs_contain("com.example.Greeter.sayBye#String"));
}

#[tokio::test]
async fn spawned_refresh_follows_schedule() {
    let control = ClockControl::new();
    let documents = InMemoryConfigSource::new();
    let registry = registry(&control.to_clock(), documents.clone());

    let _ = registry.execute(&invocation("sayHi"), &ok).await;
    documents.insert("com.example.Greeter.sayHi#String", r#"{"enable": 1}"#);

    let refresh = registry.spawn_config_refresh();
    tokio::task::yield_now().await;
    assert!(registry.snapshot().is_empty());

    control.advance(Duration::from_secs(30));
    for _ in 0..1000 {
        if !registry.snapshot().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert!(registry.snapshot().lookup_model(&invocation("sayHi").key()).unwrap().enabled);
    refresh.abort();
}

#[tokio::test]
async fn tracked_keys_are_bounded() {
    let documents = InMemoryConfigSource::new();
    let registry = CommandRegistry::builder(&Clock::new_frozen())
        .config_source(documents)
        .max_tracked_keys(8)
        .eager_config_fetch(false)
        .build();

    for index in 0..64 {
        let _ = registry.execute(&invocation(&format!("method{index}")), &ok).await;
    }

    assert!(registry.observed_keys().len() <= 8);
    assert!(registry.breaker_metrics(&invocation("method63").key()).is_some());
}
