// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Names shared by log events and metrics.

pub(crate) const COMMAND_KEY: &str = "command.key";
pub(crate) const EVENT_NAME: &str = "resilience.event.name";
pub(crate) const CIRCUIT_STATE: &str = "circuit_breaker.state";

pub(crate) const CIRCUIT_REJECTED_EVENT_NAME: &str = "circuit_rejected";
pub(crate) const CIRCUIT_OPENED_EVENT_NAME: &str = "circuit_opened";
pub(crate) const CIRCUIT_REOPENED_EVENT_NAME: &str = "circuit_reopened";
pub(crate) const CIRCUIT_CLOSED_EVENT_NAME: &str = "circuit_closed";
pub(crate) const CIRCUIT_PROBE_EVENT_NAME: &str = "circuit_probe";

#[cfg(feature = "metrics")]
pub(crate) mod metrics {
    use opentelemetry::InstrumentationScope;
    use opentelemetry::metrics::{Counter, Meter, MeterProvider};

    const METER_NAME: &str = "breakwater";
    const VERSION: &str = "v0.1.0";
    const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

    pub(crate) fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
        meter_provider.meter_with_scope(
            InstrumentationScope::builder(METER_NAME)
                .with_version(VERSION)
                .with_schema_url(SCHEMA_URL)
                .build(),
        )
    }

    pub(crate) fn create_resilience_event_counter(meter: &Meter) -> Counter<u64> {
        meter
            .u64_counter("resilience.event")
            .with_description("Emitted upon the occurrence of a resilience event.")
            .with_unit("u64")
            .build()
    }

}
