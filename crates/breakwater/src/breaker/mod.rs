// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-key circuit breaking.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::config::BreakerConfig;

mod engine_core;
mod engine_telemetry;
mod engines;
mod health;

pub(crate) use engine_core::*;
pub(crate) use engine_telemetry::*;
pub(crate) use engines::*;
pub(crate) use health::*;

/// State of a key's circuit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls are permitted and statistics accumulate.
    Closed,

    /// Calls are rejected until the sleep window elapses.
    Open,

    /// A single trial call is in flight. Its outcome decides the next state.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase name used in logs and metric attributes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a key's breaker.
///
/// While closed, the counts cover the current rolling window. While open or half-open, they are
/// the counts of the window that tripped the circuit plus the calls rejected since.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct BreakerMetrics {
    /// Current state of the circuit.
    pub state: CircuitState,
    /// Calls that completed, including business errors.
    pub successes: u32,
    /// Calls that failed.
    pub failures: u32,
    /// Calls that exceeded their timeout.
    pub timeouts: u32,
    /// Calls turned away by the circuit or by the isolation limit.
    pub rejections: u32,
}

impl BreakerMetrics {
    pub(crate) fn new(state: CircuitState, info: HealthInfo) -> Self {
        Self {
            state,
            successes: info.successes,
            failures: info.failures,
            timeouts: info.timeouts,
            rejections: info.rejections,
        }
    }

    /// Number of samples counted toward the request volume.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.successes
            .saturating_add(self.failures)
            .saturating_add(self.timeouts)
            .saturating_add(self.rejections)
    }
}

/// Outcome of a call as seen by the breaker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ExecutionResult {
    /// The call completed. Business failures are successes.
    Success,

    /// Transport or infrastructure failure.
    Failure,

    Timeout,

    /// The isolation limit was reached.
    Rejected,
}

impl ExecutionResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
        }
    }
}

/// Result of attempting to enter the circuit.
#[derive(Debug, Clone)]
pub(crate) enum EnterCircuitResult {
    /// The call is allowed to proceed.
    ///
    /// A `Probe` mode marks the trial call whose outcome decides whether the circuit closes.
    Accepted { mode: ExecutionMode },

    /// The circuit is open, or half-open with its trial already in flight.
    Rejected,
}

#[derive(Debug, Clone)]
pub(crate) enum ExitCircuitResult {
    Unchanged,

    /// Circuit transitioned to Open state.
    Opened(HealthInfo),

    /// The trial failed and the circuit is open again.
    Reopened,

    /// Circuit transitioned back to Closed state.
    Closed(Stats),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionMode {
    Normal,
    Probe,
}

/// Behavior shared by the engine and its telemetry wrapper.
pub(crate) trait CircuitEngine: Debug + Send + Sync + 'static {
    fn enter(&self) -> EnterCircuitResult;

    fn exit(&self, result: ExecutionResult, mode: ExecutionMode) -> ExitCircuitResult;

    /// The parameters the engine currently evaluates against.
    fn params(&self) -> Arc<BreakerConfig>;

    /// Replaces the parameters without resetting the state or the statistics.
    fn update_params(&self, params: Arc<BreakerConfig>);

    fn metrics(&self) -> BreakerMetrics;
}

/// The engine used for every key.
pub(crate) type Engine = EngineTelemetry<EngineCore>;

/// A call admitted by the breaker.
///
/// The outcome must be reported through [`Attempt::complete`]. A trial dropped without an
/// outcome counts as a failed trial so the circuit never stays half-open.
#[derive(Debug)]
pub(crate) struct Attempt {
    engine: Arc<Engine>,
    mode: ExecutionMode,
    completed: bool,
}

impl Attempt {
    /// Enters the circuit of `engine`. Returns `None` when the call is rejected.
    pub fn enter(engine: &Arc<Engine>) -> Option<Self> {
        match engine.enter() {
            EnterCircuitResult::Accepted { mode } => Some(Self {
                engine: Arc::clone(engine),
                mode,
                completed: false,
            }),
            EnterCircuitResult::Rejected => None,
        }
    }

    pub fn complete(mut self, result: ExecutionResult) -> ExitCircuitResult {
        self.completed = true;
        self.engine.exit(result, self.mode)
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        if !self.completed && self.mode == ExecutionMode::Probe {
            self.engine.exit(ExecutionResult::Failure, ExecutionMode::Probe);
        }
    }
}
