// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::time::Duration;

/// The failure half of a remote call outcome.
///
/// The invoker reports [`Infrastructure`][RpcError::Infrastructure] and
/// [`Business`][RpcError::Business] failures. The remaining variants are produced by the
/// dispatcher itself when a call is short-circuited and no fallback handler produced a
/// replacement value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Transport or infrastructure failure. Counts toward the breaker's error rate.
    #[error("infrastructure failure: {0}")]
    Infrastructure(Cow<'static, str>),

    /// Declared business-level failure. Treated as a successful outcome by the breaker.
    #[error("business failure: {0}")]
    Business(Cow<'static, str>),

    /// The circuit is open and the call was not attempted.
    #[error("call rejected: circuit is open")]
    CircuitOpen,

    /// The isolation limit (permits or worker pool) was exhausted.
    #[error("call rejected: concurrency limit reached")]
    ConcurrencyLimit,

    /// The call did not finish within the configured timeout and was cancelled.
    #[error("call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl RpcError {
    /// Creates an infrastructure failure.
    pub fn infrastructure(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Infrastructure(message.into())
    }

    /// Creates a business failure.
    pub fn business(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Business(message.into())
    }

    /// Returns `true` when the failure is counted by the breaker's error rate.
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::Infrastructure(_) | Self::Timeout(_))
    }

    /// Returns `true` when the call was rejected without reaching the remote side.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::ConcurrencyLimit)
    }
}

/// A script could not be turned into an invocable handler.
#[derive(Debug, thiserror::Error)]
#[error("failed to compile fallback script: {message}")]
pub struct CompileError {
    message: Cow<'static, str>,
}

impl CompileError {
    /// Creates a compile error with the given message.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self { message: message.into() }
    }
}

/// A compiled handler failed while producing a fallback value.
#[derive(Debug, thiserror::Error)]
#[error("fallback handler failed: {message}")]
pub struct ScriptError {
    message: Cow<'static, str>,
}

impl ScriptError {
    /// Creates a script error with the given message.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self { message: message.into() }
    }
}

/// The configuration store could not be read.
#[derive(Debug, thiserror::Error)]
#[error("configuration source failed: {0}")]
pub struct SourceError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl SourceError {
    /// Wraps any error raised by a configuration store.
    pub fn new(error: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self(error.into())
    }
}

/// A configuration document could not be interpreted.
#[derive(Debug, thiserror::Error)]
#[error("invalid configuration document: {0}")]
pub struct ConfigError(#[from] serde_json::Error);

/// Reasons a single key could not be refreshed.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RefreshError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
