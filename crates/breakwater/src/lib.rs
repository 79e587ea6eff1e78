// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Per-endpoint circuit breaking for remote calls, with live configuration and hot-swappable
//! fallback handlers.
//!
//! Every call site is identified by a [`CommandKey`] derived from its interface, method, and
//! parameter types. A [`CommandRegistry`] keeps one circuit breaker per key and routes calls
//! through it:
//!
//! - A breaker opens when enough calls in its rolling window failed or timed out, fails fast
//!   while open, and admits a single trial call after its sleep window.
//! - Calls are isolated either by a permit limit or by a bounded worker pool per interface, and
//!   cancelled when they exceed their timeout.
//! - Rejected and failed calls are answered by a fallback handler compiled from the key's
//!   fallback script. Handlers are cached by the content of their script, so keys sharing a
//!   script share one compiled handler.
//! - An operator can force a key into degraded mode, where its degrade handler answers every
//!   call without touching the remote side or the breaker.
//!
//! Configuration is read per key from a [`ConfigSource`] as a JSON document and refreshed
//! periodically by a [`ConfigRefresher`]. Updates apply to running breakers without resetting
//! their statistics.
//!
//! # Examples
//!
//! ```
//! use breakwater::{CircuitState, CommandRegistry, InMemoryConfigSource, Invocation, JsonLiteralRuntime, RpcError, RpcResult};
//! use serde_json::json;
//! use tick::Clock;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let documents = InMemoryConfigSource::new();
//! documents.insert(
//!     "com.example.Greeter.sayHi#String",
//!     r#"{
//!         "enable": "1",
//!         "fallbackScript": "\"Hi from fallback\"",
//!         "breakerConfig": { "requestVolumeThreshold": 2, "errorThresholdPercent": 50 }
//!     }"#,
//! );
//!
//! let registry = CommandRegistry::builder(&Clock::new_frozen())
//!     .config_source(documents)
//!     .script_runtime(JsonLiteralRuntime)
//!     .build();
//!
//! let invocation = Invocation::new("com.example.Greeter", "sayHi", ["String"], [json!("Ada")]);
//! let unreachable = |_: &Invocation| async { RpcResult::Err(RpcError::infrastructure("connection refused")) };
//! let _ = registry.execute(&invocation, &unreachable).await;
//!
//! // load the configuration of every observed key
//! registry.config_refresher().refresh_once().await;
//!
//! let result = registry.execute(&invocation, &unreachable).await;
//! assert_eq!(result, Ok(json!("Hi from fallback")));
//! assert_eq!(registry.circuit_state(&invocation.key()), Some(CircuitState::Open));
//! # }
//! ```

mod breaker;
mod command_key;
mod config;
mod constants;
mod dispatcher;
mod error;
mod fallback;
mod invocation;
mod isolation;
mod registry;
mod telemetry;

#[cfg(test)]
mod testing;

#[doc(inline)]
pub use breaker::{BreakerMetrics, CircuitState};
#[doc(inline)]
pub use command_key::{CommandKey, command_name};
#[doc(inline)]
pub use config::{
    BreakerConfig, CommandModel, ConfigRefresher, ConfigSnapshot, ConfigSource, DegradeDirective, InMemoryConfigSource,
    IsolationStrategy, RefreshReport, ThreadPoolConfig,
};
#[doc(inline)]
pub use dispatcher::Protected;
#[doc(inline)]
pub use error::{CompileError, ConfigError, RpcError, ScriptError, SourceError};
#[doc(inline)]
pub use fallback::{CompiledHandler, FallbackCacheOptions, FallbackRole, Fingerprint, JsonLiteralRuntime, ScriptRuntime};
#[doc(inline)]
pub use invocation::{Invocation, Invoker, RpcResult};
#[doc(inline)]
pub use registry::{CommandRegistry, CommandRegistryBuilder};
#[doc(inline)]
pub use serde_json::Value;
