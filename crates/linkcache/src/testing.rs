// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test utilities for log and metric assertions.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

/// Records every event formatted by [`LogCapture::subscriber`], for asserting on log output.
///
/// The subscriber is meant for `tracing::subscriber::set_default`, which is scoped to the current
/// thread, so pair it with a current-thread runtime.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    lines: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Panics unless some recorded event contains `needle`.
    pub fn assert_contains(&self, needle: &str) {
        let recorded = String::from_utf8_lossy(&self.lines.lock().unwrap()).into_owned();
        assert!(recorded.contains(needle), "no event contains '{needle}', recorded:\n{recorded}");
    }

    /// A plain-text fmt subscriber that writes into this capture.
    pub fn subscriber(&self) -> impl tracing::Subscriber {
        use tracing_subscriber::layer::SubscriberExt;
        let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(self.clone());
        tracing_subscriber::registry().with(layer)
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.lines.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(feature = "metrics")]
pub(crate) use metrics::MetricTester;

#[cfg(feature = "metrics")]
mod metrics {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics, ScopeMetrics};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

    /// Collects exported metrics in memory.
    #[derive(Debug)]
    pub(crate) struct MetricTester {
        exporter: InMemoryMetricExporter,
        provider: SdkMeterProvider,
    }

    impl MetricTester {
        #[must_use]
        pub fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();
            Self {
                provider: SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build(),
                exporter,
            }
        }

        #[must_use]
        pub fn meter_provider(&self) -> &SdkMeterProvider {
            &self.provider
        }

        /// Flushes the provider and returns the attributes of every `u64` sum data point.
        #[must_use]
        pub fn collect_attributes(&self) -> Vec<KeyValue> {
            self.provider.force_flush().unwrap();
            self.exporter
                .get_finished_metrics()
                .unwrap()
                .iter()
                .flat_map(ResourceMetrics::scope_metrics)
                .flat_map(ScopeMetrics::metrics)
                .flat_map(|metric| match metric.data() {
                    AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                        sum.data_points().flat_map(|point| point.attributes().cloned()).collect::<Vec<_>>()
                    }
                    _ => Vec::new(),
                })
                .collect()
        }

        pub fn assert_attributes_contain(&self, expected: &[KeyValue]) {
            let attributes = self.collect_attributes();
            for attr in expected {
                assert!(
                    attributes.contains(attr),
                    "attribute {attr:?} not found in collected attributes: {attributes:?}"
                );
            }
        }
    }
}
