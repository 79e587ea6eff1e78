// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tick::Clock;

use super::{
    BreakerMetrics, CircuitEngine, CircuitState, EnterCircuitResult, ExecutionMode, ExecutionResult, ExitCircuitResult,
    HealthInfo, HealthMetrics,
};
use crate::config::BreakerConfig;

/// Engine that manages the state of one key's circuit.
///
/// The breaker parameters live behind an [`ArcSwap`] so they can be replaced while calls are in
/// flight. Replacing them never touches the state or the collected statistics.
#[derive(Debug)]
pub(crate) struct EngineCore {
    state: Mutex<State>,
    params: ArcSwap<BreakerConfig>,
    rolling_window: Duration,
    clock: Clock,
}

impl EngineCore {
    pub fn new(params: Arc<BreakerConfig>, rolling_window: Duration, clock: Clock) -> Self {
        Self {
            state: Mutex::new(State::Closed {
                health: HealthMetrics::new(rolling_window),
            }),
            params: ArcSwap::new(params),
            rolling_window,
            clock,
        }
    }
}

impl CircuitEngine for EngineCore {
    fn enter(&self) -> EnterCircuitResult {
        let now = self.clock.instant();
        let params = self.params.load();

        // NOTE: Remember to execute all expensive operations (like time checks) outside the lock.
        self.state.lock().enter(now, &params)
    }

    fn exit(&self, result: ExecutionResult, mode: ExecutionMode) -> ExitCircuitResult {
        let now = self.clock.instant();
        let params = self.params.load();

        // NOTE: Remember to execute all expensive operations (like time checks) outside the lock.
        self.state.lock().exit(result, mode, now, &params, self.rolling_window)
    }

    fn params(&self) -> Arc<BreakerConfig> {
        self.params.load_full()
    }

    fn update_params(&self, params: Arc<BreakerConfig>) {
        self.params.store(params);
    }

    fn metrics(&self) -> BreakerMetrics {
        let now = self.clock.instant();
        let state = self.state.lock();

        match &*state {
            State::Closed { health } => BreakerMetrics::new(CircuitState::Closed, health.health_info(now)),
            State::Open { stats, .. } => BreakerMetrics::new(CircuitState::Open, stats.window()),
            State::HalfOpen { stats } => BreakerMetrics::new(CircuitState::HalfOpen, stats.window()),
        }
    }
}

#[derive(Debug)]
enum State {
    Closed { health: HealthMetrics },
    Open { opened_at: Instant, stats: Stats },
    // the single trial call is in flight for as long as the circuit is half-open
    HalfOpen { stats: Stats },
}

impl State {
    fn enter(&mut self, now: Instant, params: &BreakerConfig) -> EnterCircuitResult {
        match self {
            Self::Closed { .. } => EnterCircuitResult::Accepted {
                mode: ExecutionMode::Normal,
            },
            Self::Open { opened_at, stats } => {
                if now.saturating_duration_since(*opened_at) >= params.sleep_window {
                    stats.probes_total = stats.probes_total.saturating_add(1);

                    *self = Self::HalfOpen { stats: stats.clone() };

                    EnterCircuitResult::Accepted {
                        mode: ExecutionMode::Probe,
                    }
                } else {
                    stats.rejected = stats.rejected.saturating_add(1);
                    EnterCircuitResult::Rejected
                }
            }
            Self::HalfOpen { stats } => {
                stats.rejected = stats.rejected.saturating_add(1);
                EnterCircuitResult::Rejected
            }
        }
    }

    fn exit(
        &mut self,
        result: ExecutionResult,
        mode: ExecutionMode,
        now: Instant,
        params: &BreakerConfig,
        rolling_window: Duration,
    ) -> ExitCircuitResult {
        match self {
            Self::Closed { health } => {
                health.record(result, now);
                let info = health.health_info(now);

                if info.is_tripped(params) {
                    *self = Self::Open {
                        opened_at: now,
                        stats: Stats::new(now, info),
                    };
                    ExitCircuitResult::Opened(info)
                } else {
                    ExitCircuitResult::Unchanged
                }
            }
            Self::HalfOpen { stats } if mode == ExecutionMode::Probe => {
                if result == ExecutionResult::Success {
                    stats.probes_successes = stats.probes_successes.saturating_add(1);
                    let stats = stats.clone();

                    *self = Self::Closed {
                        health: HealthMetrics::new(rolling_window),
                    };

                    ExitCircuitResult::Closed(stats)
                } else {
                    stats.probes_failures = stats.probes_failures.saturating_add(1);
                    stats.re_opened = stats.re_opened.saturating_add(1);

                    *self = Self::Open {
                        opened_at: now,
                        stats: stats.clone(),
                    };

                    ExitCircuitResult::Reopened
                }
            }
            Self::Open { stats, .. } | Self::HalfOpen { stats } => {
                // A call admitted while closed finished after the circuit changed state. Its
                // result no longer matters.
                stats.lost = stats.lost.saturating_add(1);
                ExitCircuitResult::Unchanged
            }
        }
    }
}

/// Statistics of one open period, from the moment the circuit opened until it closes again.
#[derive(Debug, Clone)]
pub(crate) struct Stats {
    pub opened_at: Instant,
    pub tripped_by: HealthInfo,
    pub re_opened: usize,
    pub probes_total: usize,
    pub probes_successes: usize,
    pub probes_failures: usize,
    pub rejected: usize,
    pub lost: usize,
}

impl Stats {
    pub fn new(opened_at: Instant, tripped_by: HealthInfo) -> Self {
        Self {
            opened_at,
            tripped_by,
            re_opened: 0,
            probes_total: 0,
            probes_successes: 0,
            probes_failures: 0,
            rejected: 0,
            lost: 0,
        }
    }

    pub fn opened_duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.opened_at)
    }

    /// The window that tripped the circuit, with rejections accumulated since then.
    fn window(&self) -> HealthInfo {
        HealthInfo {
            rejections: self
                .tripped_by
                .rejections
                .saturating_add(u32::try_from(self.rejected).unwrap_or(u32::MAX)),
            ..self.tripped_by
        }
    }
}
