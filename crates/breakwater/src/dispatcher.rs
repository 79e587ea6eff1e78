// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture, Either};
use serde_json::Value;

use crate::breaker::{Attempt, CircuitEngine, CommandState, ExecutionResult};
use crate::command_key::CommandKey;
use crate::config::{BreakerConfig, CommandModel, DegradeDirective, IsolationStrategy};
use crate::constants::HANDLER_METHOD;
use crate::error::RpcError;
use crate::fallback::{CompiledHandler, FallbackRole};
use crate::invocation::{Invocation, Invoker, RpcResult};
use crate::registry::CommandRegistry;

/// How an admitted call ended before fallback handling.
#[derive(Debug)]
enum Outcome {
    Completed(RpcResult),
    Rejected,
    TimedOut(Duration),
}

impl CommandRegistry {
    /// Runs `invocation` through the breaker of its key.
    ///
    /// A key configured as disabled calls `invoker` directly. A key whose degrade directive is
    /// open answers from its degrade handler without calling `invoker`. Otherwise the call is
    /// admitted by the breaker, isolated, and timed; when it fails or is rejected the fallback
    /// handler answers instead. Without a fallback handler the original failure is returned.
    ///
    /// Business failures are returned as they are and count as successes.
    pub async fn execute<I>(&self, invocation: &Invocation, invoker: &I) -> RpcResult
    where
        I: Invoker + ?Sized,
    {
        let key = invocation.key();
        let model = self.inner.snapshot.lookup_model(&key);
        let state = self.observe(&key);

        if let Some(model) = &model {
            if !model.enabled {
                return invoker.invoke(invocation).await;
            }

            if model.directive == DegradeDirective::Open {
                return Ok(self.degrade(&key, model, invocation).await);
            }
        }

        let params = state.engine.params();

        let Some(attempt) = Attempt::enter(&state.engine) else {
            return self
                .fallback(&key, &state, model.as_deref(), invocation, RpcError::CircuitOpen)
                .await;
        };

        let outcome = match params.isolation_strategy {
            IsolationStrategy::Semaphore => self.run_with_permit(&state, &params, invocation, invoker).await,
            IsolationStrategy::Thread => self.run_on_worker(&key, &params, invocation, invoker).await,
        };

        let (result, error) = match outcome {
            Outcome::Completed(Ok(value)) => {
                attempt.complete(ExecutionResult::Success);
                return Ok(value);
            }
            Outcome::Completed(Err(error)) => match classify(&error) {
                ExecutionResult::Success => {
                    attempt.complete(ExecutionResult::Success);
                    return Err(error);
                }
                result => (result, error),
            },
            Outcome::Rejected => {
                tracing::event!(
                    name: "breakwater.execution.rejected",
                    tracing::Level::WARN,
                    command.key = key.as_str(),
                    isolation.strategy = params.isolation_strategy.as_str(),
                );
                (ExecutionResult::Rejected, RpcError::ConcurrencyLimit)
            }
            Outcome::TimedOut(timeout) => {
                tracing::event!(
                    name: "breakwater.execution.timed_out",
                    tracing::Level::WARN,
                    command.key = key.as_str(),
                    execution.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                );
                (ExecutionResult::Timeout, RpcError::Timeout(timeout))
            }
        };

        attempt.complete(result);

        self.fallback(&key, &state, model.as_deref(), invocation, error).await
    }

    /// Builds the invocation from its parts and runs it through [`execute`][Self::execute].
    pub async fn intercept<P, A, I>(
        &self,
        interface: &str,
        method: &str,
        param_types: P,
        args: A,
        invoker: &I,
    ) -> RpcResult
    where
        P: IntoIterator,
        P::Item: Into<String>,
        A: IntoIterator<Item = Value>,
        I: Invoker + ?Sized,
    {
        let invocation = Invocation::new(interface, method, param_types, args);
        self.execute(&invocation, invoker).await
    }

    /// Wraps `invoker` so every call it makes goes through this registry.
    #[must_use]
    pub fn protect<I: Invoker>(&self, invoker: I) -> Protected<I> {
        Protected {
            registry: self.clone(),
            invoker: Arc::new(invoker),
        }
    }

    async fn run_with_permit<I>(
        &self,
        state: &CommandState,
        params: &BreakerConfig,
        invocation: &Invocation,
        invoker: &I,
    ) -> Outcome
    where
        I: Invoker + ?Sized,
    {
        let limit = usize::try_from(params.max_concurrent_requests).unwrap_or(usize::MAX);
        let Some(_permit) = state.permits.try_acquire(limit) else {
            return Outcome::Rejected;
        };

        match self.within_timeout(params, invoker.invoke(invocation)).await {
            Some(result) => Outcome::Completed(result),
            None => Outcome::TimedOut(params.timeout),
        }
    }

    async fn run_on_worker<I>(
        &self,
        key: &CommandKey,
        params: &BreakerConfig,
        invocation: &Invocation,
        invoker: &I,
    ) -> Outcome
    where
        I: Invoker + ?Sized,
    {
        let pool = self.worker_pool(key.interface());

        // time spent waiting for a worker is part of the call's timeout
        let queued_at = self.inner.clock.instant();
        let slot = match self.within_timeout(params, pool.acquire(&params.thread_pool)).await {
            Some(Some(slot)) => slot,
            Some(None) => return Outcome::Rejected,
            None => return Outcome::TimedOut(params.timeout),
        };
        let waited = self.inner.clock.instant().saturating_duration_since(queued_at);
        let remaining = params.timeout_enabled.then_some(params.timeout.saturating_sub(waited));

        let call = invoker.invoke(invocation);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // no runtime to hand the call to, it runs on the caller's task
            let outcome = self.within(remaining, call).await;
            drop(slot);
            return outcome.map_or(Outcome::TimedOut(params.timeout), Outcome::Completed);
        };

        let mut task = runtime.spawn(async move {
            let _slot = slot;
            call.await
        });

        match self.within(remaining, &mut task).await {
            Some(Ok(result)) => Outcome::Completed(result),
            Some(Err(error)) => Outcome::Completed(Err(RpcError::infrastructure(format!(
                "call task of pool {} failed: {error}",
                pool.name()
            )))),
            None => {
                if params.interrupt_on_timeout {
                    task.abort();
                }
                Outcome::TimedOut(params.timeout)
            }
        }
    }

    /// Awaits `call` unless the configured timeout elapses first. `None` means it timed out.
    async fn within_timeout<F: Future>(&self, params: &BreakerConfig, call: F) -> Option<F::Output> {
        self.within(params.timeout_enabled.then_some(params.timeout), call).await
    }

    /// Awaits `call` unless `timeout` elapses first. Without a timeout the call is awaited to completion.
    async fn within<F: Future>(&self, timeout: Option<Duration>, call: F) -> Option<F::Output> {
        let Some(timeout) = timeout else {
            return Some(call.await);
        };

        let call = pin!(call);
        let delay = pin!(self.inner.clock.delay(timeout));

        match future::select(call, delay).await {
            Either::Left((output, _)) => Some(output),
            Either::Right(((), _)) => None,
        }
    }

    async fn degrade(&self, key: &CommandKey, model: &CommandModel, invocation: &Invocation) -> Value {
        tracing::event!(
            name: "breakwater.degrade.forced",
            tracing::Level::INFO,
            command.key = key.as_str(),
        );

        let Some(script) = model.script(FallbackRole::Degrade) else {
            return Value::Null;
        };

        match self.inner.fallbacks.get(script).await {
            Some(handler) => invoke_handler(key, FallbackRole::Degrade, handler.as_ref(), invocation),
            None => Value::Null,
        }
    }

    async fn fallback(
        &self,
        key: &CommandKey,
        state: &CommandState,
        model: Option<&CommandModel>,
        invocation: &Invocation,
        error: RpcError,
    ) -> RpcResult {
        let Some(script) = model.and_then(|model| model.script(FallbackRole::Fallback)) else {
            return Err(error);
        };

        let limit = usize::try_from(state.engine.params().fallback_max_concurrent_requests).unwrap_or(usize::MAX);
        let Some(_permit) = state.fallback_permits.try_acquire(limit) else {
            tracing::event!(
                name: "breakwater.fallback.rejected",
                tracing::Level::WARN,
                command.key = key.as_str(),
                error.message = %error,
            );
            return Err(error);
        };

        let Some(handler) = self.inner.fallbacks.get(script).await else {
            return Err(error);
        };

        tracing::event!(
            name: "breakwater.fallback.executed",
            tracing::Level::WARN,
            command.key = key.as_str(),
            error.message = %error,
        );

        Ok(invoke_handler(key, FallbackRole::Fallback, handler.as_ref(), invocation))
    }
}

/// Maps an error returned by the invoker onto the breaker outcome it records.
///
/// Rejections raised by a nested registry stay rejections. Business failures are successes.
fn classify(error: &RpcError) -> ExecutionResult {
    if error.is_rejection() {
        ExecutionResult::Rejected
    } else if matches!(error, RpcError::Timeout(_)) {
        ExecutionResult::Timeout
    } else if error.counts_as_failure() {
        ExecutionResult::Failure
    } else {
        ExecutionResult::Success
    }
}

/// Calls the handler's entry point. A failing handler yields `Value::Null`.
fn invoke_handler(key: &CommandKey, role: FallbackRole, handler: &dyn CompiledHandler, invocation: &Invocation) -> Value {
    match handler.invoke(HANDLER_METHOD, invocation.args()) {
        Ok(value) => value,
        Err(error) => {
            tracing::event!(
                name: "breakwater.fallback.failed",
                tracing::Level::WARN,
                command.key = key.as_str(),
                fallback.role = role.as_str(),
                error.message = %error,
            );
            Value::Null
        }
    }
}

/// An [`Invoker`] whose calls go through a [`CommandRegistry`].
///
/// Created by [`CommandRegistry::protect`]. Lets the registry sit in any call chain that accepts
/// an invoker.
#[derive(Clone)]
pub struct Protected<I> {
    registry: CommandRegistry,
    invoker: Arc<I>,
}

impl<I> Protected<I> {
    /// The registry guarding the calls.
    #[must_use]
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// The wrapped invoker.
    #[must_use]
    pub fn inner(&self) -> &I {
        &self.invoker
    }
}

impl<I> Debug for Protected<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protected").field("registry", &self.registry).finish_non_exhaustive()
    }
}

impl<I: Invoker + 'static> Invoker for Protected<I> {
    fn invoke(&self, invocation: &Invocation) -> BoxFuture<'static, RpcResult> {
        let registry = self.registry.clone();
        let invoker = Arc::clone(&self.invoker);
        let invocation = invocation.clone();

        Box::pin(async move { registry.execute(&invocation, invoker.as_ref()).await })
    }
}
