// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test helpers shared by unit tests.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Captures formatted log output of the current thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).to_string()
    }

    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    /// Use with `tracing::subscriber::set_default`.
    pub fn subscriber(&self) -> impl tracing::Subscriber {
        use tracing_subscriber::layer::SubscriberExt;

        tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_writer(self.clone())
                .with_ansi(false),
        )
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

pub(crate) struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(feature = "metrics")]
pub(crate) use metric_tester::MetricTester;

#[cfg(feature = "metrics")]
mod metric_tester {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics, ScopeMetrics};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

    /// Collects metrics in memory so tests can inspect the recorded attributes.
    #[derive(Debug)]
    pub(crate) struct MetricTester {
        exporter: InMemoryMetricExporter,
        provider: SdkMeterProvider,
    }

    impl MetricTester {
        pub fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();

            Self {
                provider: SdkMeterProvider::builder()
                    .with_periodic_exporter(exporter.clone())
                    .build(),
                exporter,
            }
        }

        pub fn meter_provider(&self) -> &SdkMeterProvider {
            &self.provider
        }

        pub fn dump(&self) -> String {
            self.provider.force_flush().unwrap();
            format!("{:?}", self.exporter.get_finished_metrics().unwrap())
        }

        pub fn collect_attributes(&self) -> Vec<KeyValue> {
            self.provider.force_flush().unwrap();

            self.exporter
                .get_finished_metrics()
                .unwrap()
                .iter()
                .flat_map(ResourceMetrics::scope_metrics)
                .flat_map(ScopeMetrics::metrics)
                .flat_map(|metric| match metric.data() {
                    AggregatedMetrics::U64(MetricData::Sum(sum)) => sum
                        .data_points()
                        .flat_map(|point| point.attributes().cloned())
                        .collect::<Vec<_>>(),
                    _ => Vec::new(),
                })
                .collect()
        }

        pub fn assert_attributes_contain(&self, expected: &[KeyValue]) {
            let attributes = self.collect_attributes();

            for attribute in expected {
                assert!(
                    attributes.contains(attribute),
                    "attribute {attribute:?} not found in collected attributes: {attributes:?}"
                );
            }
        }
    }
}
