// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for fallback and degrade handlers using only public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use breakwater::{
    CommandRegistry, CompileError, CompiledHandler, Fingerprint, InMemoryConfigSource, Invocation, JsonLiteralRuntime,
    RpcError, RpcResult, ScriptError, ScriptRuntime, Value,
};
use serde_json::json;
use tick::Clock;

/// Compiles JSON literals, `echo` into a handler returning its first argument, and `fail` into a
/// handler that always fails. Counts compilations.
#[derive(Debug, Clone, Default)]
struct TestRuntime {
    compiles: Arc<AtomicUsize>,
}

impl TestRuntime {
    fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Echo;

impl CompiledHandler for Echo {
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ScriptError> {
        assert_eq!(method, "fallback");
        Ok(args.first().cloned().unwrap_or(Value::Null))
    }
}

#[derive(Debug)]
struct Fail;

impl CompiledHandler for Fail {
    fn invoke(&self, _method: &str, _args: &[Value]) -> Result<Value, ScriptError> {
        Err(ScriptError::new("division by zero"))
    }
}

impl ScriptRuntime for TestRuntime {
    fn compile(&self, source: &str, fingerprint: &Fingerprint) -> Result<Arc<dyn CompiledHandler>, CompileError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);

        match source {
            "echo" => Ok(Arc::new(Echo)),
            "fail" => Ok(Arc::new(Fail)),
            _ => JsonLiteralRuntime.compile(source, fingerprint),
        }
    }
}

fn registry(runtime: &TestRuntime, documents: &InMemoryConfigSource) -> CommandRegistry {
    CommandRegistry::builder(&Clock::new_frozen())
        .config_source(documents.clone())
        .script_runtime(runtime.clone())
        .eager_config_fetch(false)
        .build()
}

fn document(fallback_script: &str) -> String {
    json!({ "enable": 1, "fallbackScript": fallback_script }).to_string()
}

fn failing(_: &Invocation) -> std::future::Ready<RpcResult> {
    std::future::ready(Err(RpcError::infrastructure("connection refused")))
}

/// Observes every invocation once, then loads their configuration.
async fn configure(registry: &CommandRegistry, invocations: &[&Invocation]) {
    for invocation in invocations {
        let _ = registry.execute(invocation, &failing).await;
    }
    registry.config_refresher().refresh_once().await;
}

#[tokio::test]
async fn identical_scripts_share_one_compilation() {
    let runtime = TestRuntime::default();
    let documents = InMemoryConfigSource::new();
    documents.insert("Svc.first#String", document(r#""shared""#));
    documents.insert("Svc.second#String", document(r#""shared""#));
    let registry = registry(&runtime, &documents);

    let first = Invocation::new("Svc", "first", ["String"], [json!("a")]);
    let second = Invocation::new("Svc", "second", ["String"], [json!("b")]);
    configure(&registry, &[&first, &second]).await;

    assert_eq!(registry.execute(&first, &failing).await, Ok(json!("shared")));
    assert_eq!(registry.execute(&second, &failing).await, Ok(json!("shared")));
    assert_eq!(registry.execute(&first, &failing).await, Ok(json!("shared")));

    assert_eq!(runtime.compiles(), 1);
}

#[tokio::test]
async fn handler_receives_call_arguments() {
    let runtime = TestRuntime::default();
    let documents = InMemoryConfigSource::new();
    documents.insert("Svc.echo#String", document("echo"));
    let registry = registry(&runtime, &documents);

    let invocation = Invocation::new("Svc", "echo", ["String"], [json!("original argument")]);
    configure(&registry, &[&invocation]).await;

    assert_eq!(registry.execute(&invocation, &failing).await, Ok(json!("original argument")));
}

#[tokio::test]
async fn failing_handler_yields_empty_result() {
    let runtime = TestRuntime::default();
    let documents = InMemoryConfigSource::new();
    documents.insert("Svc.fail#String", document("fail"));
    let registry = registry(&runtime, &documents);

    let invocation = Invocation::new("Svc", "fail", ["String"], [json!(1)]);
    configure(&registry, &[&invocation]).await;

    assert_eq!(registry.execute(&invocation, &failing).await, Ok(Value::Null));
}

#[tokio::test]
async fn uncompilable_script_surfaces_original_failure() {
    let runtime = TestRuntime::default();
    let documents = InMemoryConfigSource::new();
    documents.insert("Svc.broken#String", document("this is not a script"));
    let registry = registry(&runtime, &documents);

    let invocation = Invocation::new("Svc", "broken", ["String"], [json!(1)]);
    configure(&registry, &[&invocation]).await;

    for _ in 0..3 {
        let result = registry.execute(&invocation, &failing).await;
        assert_eq!(result, Err(RpcError::infrastructure("connection refused")));
    }

    // the failed compilation is cached
    assert_eq!(runtime.compiles(), 1);
}

#[tokio::test]
async fn changed_script_takes_effect_after_refresh() {
    let runtime = TestRuntime::default();
    let documents = InMemoryConfigSource::new();
    documents.insert("Svc.call#String", document(r#""v1""#));
    let registry = registry(&runtime, &documents);

    let invocation = Invocation::new("Svc", "call", ["String"], [json!(1)]);
    configure(&registry, &[&invocation]).await;
    assert_eq!(registry.execute(&invocation, &failing).await, Ok(json!("v1")));

    documents.insert("Svc.call#String", document(r#""v2""#));
    registry.config_refresher().refresh_once().await;

    assert_eq!(registry.execute(&invocation, &failing).await, Ok(json!("v2")));
    assert_eq!(runtime.compiles(), 2);
}

#[tokio::test]
async fn degrade_handler_uses_degrade_script() {
    let runtime = TestRuntime::default();
    let documents = InMemoryConfigSource::new();
    documents.insert(
        "Svc.call#String",
        json!({
            "enable": "1",
            "degrade": "1",
            "degradeScript": "\"degraded\"",
            "fallbackScript": "\"fallback\"",
        })
        .to_string(),
    );
    let registry = registry(&runtime, &documents);

    let invocation = Invocation::new("Svc", "call", ["String"], [json!(1)]);
    configure(&registry, &[&invocation]).await;

    let result = registry
        .execute(&invocation, &|_: &Invocation| async { RpcResult::Ok(json!("remote")) })
        .await;

    assert_eq!(result, Ok(json!("degraded")));
}
