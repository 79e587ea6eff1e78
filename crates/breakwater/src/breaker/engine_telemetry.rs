// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::Counter;
use tick::Clock;

use crate::breaker::{
    BreakerMetrics, CircuitEngine, CircuitState, EnterCircuitResult, ExecutionMode, ExecutionResult, ExitCircuitResult,
};
use crate::command_key::CommandKey;
use crate::config::BreakerConfig;
#[cfg(feature = "metrics")]
use crate::telemetry::{CIRCUIT_STATE, COMMAND_KEY, EVENT_NAME};
use crate::telemetry::{
    CIRCUIT_CLOSED_EVENT_NAME, CIRCUIT_OPENED_EVENT_NAME, CIRCUIT_PROBE_EVENT_NAME, CIRCUIT_REJECTED_EVENT_NAME,
    CIRCUIT_REOPENED_EVENT_NAME,
};

/// Wrapper around a circuit engine that reports state changes.
#[derive(Debug)]
pub(crate) struct EngineTelemetry<T> {
    inner: T,
    key: CommandKey,
    clock: Clock,
    #[cfg(feature = "metrics")]
    resilience_events: Option<Counter<u64>>,
}

impl<T> EngineTelemetry<T> {
    pub fn new(inner: T, key: CommandKey, clock: Clock) -> Self {
        Self {
            inner,
            key,
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

    #[cfg_attr(
        not(feature = "metrics"),
        expect(unused_variables, clippy::unused_self, reason = "events are only recorded as metrics")
    )]
    fn report(&self, event_name: &'static str, state: CircuitState) {
        #[cfg(feature = "metrics")]
        if let Some(counter) = &self.resilience_events {
            counter.add(
                1,
                &[
                    opentelemetry::KeyValue::new(EVENT_NAME, event_name),
                    opentelemetry::KeyValue::new(CIRCUIT_STATE, state.as_str()),
                    opentelemetry::KeyValue::new(COMMAND_KEY, self.key.to_string()),
                ],
            );
        }
    }
}

impl<T: CircuitEngine> CircuitEngine for EngineTelemetry<T> {
    fn enter(&self) -> EnterCircuitResult {
        let enter_result = self.inner.enter();

        match enter_result {
            EnterCircuitResult::Rejected => {
                self.report(CIRCUIT_REJECTED_EVENT_NAME, CircuitState::Open);

                tracing::event!(
                    name: "breakwater.circuit_breaker.rejected",
                    tracing::Level::WARN,
                    command.key = self.key.as_str(),
                    circuit_breaker.state = CircuitState::Open.as_str(),
                );
            }
            EnterCircuitResult::Accepted {
                mode: ExecutionMode::Probe,
            } => {
                tracing::event!(
                    name: "breakwater.circuit_breaker.half_opened",
                    tracing::Level::INFO,
                    command.key = self.key.as_str(),
                    circuit_breaker.state = CircuitState::HalfOpen.as_str(),
                );
            }
            EnterCircuitResult::Accepted {
                mode: ExecutionMode::Normal,
            } => {}
        }

        enter_result
    }

    fn exit(&self, result: ExecutionResult, mode: ExecutionMode) -> ExitCircuitResult {
        if mode == ExecutionMode::Probe {
            self.report(CIRCUIT_PROBE_EVENT_NAME, CircuitState::HalfOpen);

            tracing::event!(
                name: "breakwater.circuit_breaker.probe",
                tracing::Level::INFO,
                command.key = self.key.as_str(),
                circuit_breaker.state = CircuitState::HalfOpen.as_str(),
                circuit_breaker.probe.result = result.as_str(),
            );
        }

        let exit_result = self.inner.exit(result, mode);

        match exit_result {
            ExitCircuitResult::Opened(health) => {
                self.report(CIRCUIT_OPENED_EVENT_NAME, CircuitState::Open);

                tracing::event!(
                    name: "breakwater.circuit_breaker.opened",
                    tracing::Level::WARN,
                    command.key = self.key.as_str(),
                    circuit_breaker.state = CircuitState::Open.as_str(),
                    circuit_breaker.health.error_percent = health.error_percent(),
                    circuit_breaker.health.volume = health.total(),
                );
            }
            ExitCircuitResult::Reopened => {
                self.report(CIRCUIT_REOPENED_EVENT_NAME, CircuitState::Open);

                tracing::event!(
                    name: "breakwater.circuit_breaker.reopened",
                    tracing::Level::WARN,
                    command.key = self.key.as_str(),
                    circuit_breaker.state = CircuitState::Open.as_str(),
                    circuit_breaker.probe.result = result.as_str(),
                );
            }
            ExitCircuitResult::Closed(ref stats) => {
                self.report(CIRCUIT_CLOSED_EVENT_NAME, CircuitState::Closed);

                tracing::event!(
                    name: "breakwater.circuit_breaker.closed",
                    tracing::Level::INFO,
                    command.key = self.key.as_str(),
                    circuit_breaker.state = CircuitState::Closed.as_str(),
                    circuit_breaker.open.duration = stats.opened_duration(self.clock.instant()).as_secs(),
                    circuit_breaker.probes.total = stats.probes_total,
                    circuit_breaker.probes.failed = stats.probes_failures,
                    circuit_breaker.rejections = stats.rejected,
                    circuit_breaker.re_opened = stats.re_opened,
                );
            }
            ExitCircuitResult::Unchanged => {}
        }

        exit_result
    }

    fn params(&self) -> Arc<BreakerConfig> {
        self.inner.params()
    }

    fn update_params(&self, params: Arc<BreakerConfig>) {
        self.inner.update_params(params);
    }

    fn metrics(&self) -> BreakerMetrics {
        self.inner.metrics()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::breaker::{HealthInfo, Stats};
    use crate::testing::LogCapture;

    #[derive(Debug)]
    struct EngineFake {
        enter: EnterCircuitResult,
        exit: ExitCircuitResult,
    }

    impl CircuitEngine for EngineFake {
        fn enter(&self) -> EnterCircuitResult {
            self.enter.clone()
        }

        fn exit(&self, _result: ExecutionResult, _mode: ExecutionMode) -> ExitCircuitResult {
            self.exit.clone()
        }

        fn params(&self) -> Arc<BreakerConfig> {
            Arc::new(BreakerConfig::default())
        }

        fn update_params(&self, _params: Arc<BreakerConfig>) {}

        fn metrics(&self) -> BreakerMetrics {
            BreakerMetrics::new(CircuitState::Closed, HealthInfo::default())
        }
    }

    fn create_engine(enter: EnterCircuitResult, exit: ExitCircuitResult) -> EngineTelemetry<EngineFake> {
        EngineTelemetry::new(
            EngineFake { enter, exit },
            CommandKey::derive("com.example.Greeter", "sayHi", ["String"]),
            Clock::new_frozen(),
        )
    }

    #[test]
    fn enter_rejected_is_logged() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let engine = create_engine(EnterCircuitResult::Rejected, ExitCircuitResult::Unchanged);
        let _ = engine.enter();

        capture.assert_contains("WARN");
        capture.assert_contains("command.key=\"com.example.Greeter.sayHi#String\"");
        capture.assert_contains("circuit_breaker.state=\"open\"");
    }

    #[test]
    fn exit_opened_is_logged() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let info = HealthInfo {
            successes: 2,
            failures: 3,
            ..HealthInfo::default()
        };
        let engine = create_engine(
            EnterCircuitResult::Accepted {
                mode: ExecutionMode::Normal,
            },
            ExitCircuitResult::Opened(info),
        );
        let _ = engine.exit(ExecutionResult::Failure, ExecutionMode::Normal);

        capture.assert_contains("circuit_breaker.health.error_percent=60");
        capture.assert_contains("circuit_breaker.health.volume=5");
    }

    #[test]
    fn exit_probe_and_closed_are_logged() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let engine = create_engine(
            EnterCircuitResult::Accepted {
                mode: ExecutionMode::Probe,
            },
            ExitCircuitResult::Closed(Stats::new(Instant::now(), HealthInfo::default())),
        );
        let _ = engine.enter();
        let _ = engine.exit(ExecutionResult::Success, ExecutionMode::Probe);

        capture.assert_contains("circuit_breaker.probe.result=\"success\"");
        capture.assert_contains("circuit_breaker.state=\"closed\"");
        capture.assert_contains("circuit_breaker.probes.total=0");
    }

    #[test]
    fn unchanged_exit_is_silent() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        let engine = create_engine(
            EnterCircuitResult::Accepted {
                mode: ExecutionMode::Normal,
            },
            ExitCircuitResult::Unchanged,
        );
        let _ = engine.enter();
        let _ = engine.exit(ExecutionResult::Success, ExecutionMode::Normal);

        assert!(capture.output().is_empty());
    }

    #[cfg(feature = "metrics")]
    #[test]
    #[cfg(not(miri))]
    fn rejected_is_counted() {
        use opentelemetry::KeyValue;

        use crate::telemetry::metrics::{create_meter, create_resilience_event_counter};
        use crate::testing::MetricTester;

        let tester = MetricTester::new();
        let counter = create_resilience_event_counter(&create_meter(tester.meter_provider()));
        let engine = create_engine(EnterCircuitResult::Rejected, ExitCircuitResult::Unchanged)
            .with_resilience_events(counter);

        let _ = engine.enter();

        tester.assert_attributes_contain(&[
            KeyValue::new(EVENT_NAME, CIRCUIT_REJECTED_EVENT_NAME),
            KeyValue::new(CIRCUIT_STATE, "open"),
            KeyValue::new(COMMAND_KEY, "com.example.Greeter.sayHi#String"),
        ]);
    }
}
