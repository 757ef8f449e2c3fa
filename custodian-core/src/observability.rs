/*!
Observability infrastructure for Custodian.

- Structured logging through `tracing-subscriber`
- Prometheus counters for archive and copy activity (feature `metrics`)

The `record_*` helpers are always available and compile to no-ops when the
`metrics` feature is disabled, so call sites never need their own `cfg`.
*/

#[cfg(feature = "metrics")]
use prometheus::{Histogram, IntCounter, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use std::time::Duration;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{CustodianError, Result};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<CustodianMetrics> = OnceLock::new();

/// Counters for archive serialization and streaming copies
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct CustodianMetrics {
    pub archives_written_total: IntCounter,
    pub archive_failures_total: IntCounter,
    pub copies_total: IntCounter,
    pub copy_failures_total: IntCounter,
    pub bytes_copied_total: IntCounter,
    pub bytes_discarded_total: IntCounter,
    pub copy_duration_seconds: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn register<C>(registry: &Registry, collector: C, name: &str) -> Result<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| CustodianError::backend(format!("Failed to register {name}: {e}")))?;
    Ok(collector)
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)
        .map_err(|e| CustodianError::backend(format!("Failed to create {name} metric: {e}")))?;
    register(registry, counter, name)
}

#[cfg(feature = "metrics")]
impl CustodianMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let archives_written_total = counter(
            &registry,
            "custodian_archives_written_total",
            "Archives fully serialized and finalized",
        )?;
        let archive_failures_total = counter(
            &registry,
            "custodian_archive_failures_total",
            "Archive serializations aborted by an error",
        )?;
        let copies_total = counter(
            &registry,
            "custodian_copies_total",
            "Streaming copies completed successfully",
        )?;
        let copy_failures_total = counter(
            &registry,
            "custodian_copy_failures_total",
            "Streaming copies that failed or were cancelled",
        )?;
        let bytes_copied_total = counter(
            &registry,
            "custodian_bytes_copied_total",
            "Bytes delivered to copy destinations",
        )?;
        let bytes_discarded_total = counter(
            &registry,
            "custodian_bytes_discarded_total",
            "Bytes written by failed copies before their destination was removed",
        )?;

        let copy_duration_seconds = Histogram::with_opts(prometheus::HistogramOpts::new(
            "custodian_copy_duration_seconds",
            "Duration of streaming copies in seconds",
        ))
        .map_err(|e| {
            CustodianError::backend(format!(
                "Failed to create custodian_copy_duration_seconds metric: {e}"
            ))
        })?;
        let copy_duration_seconds = register(
            &registry,
            copy_duration_seconds,
            "custodian_copy_duration_seconds",
        )?;

        Ok(Self {
            archives_written_total,
            archive_failures_total,
            copies_total,
            copy_failures_total,
            bytes_copied_total,
            bytes_discarded_total,
            copy_duration_seconds,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    pub fn global() -> &'static CustodianMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize Custodian metrics"))
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        use prometheus::Encoder;

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| CustodianError::backend(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            CustodianError::backend(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Render the global metrics registry in Prometheus text format.
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    CustodianMetrics::global().gather_metrics()
}

pub(crate) fn record_archive_written() {
    #[cfg(feature = "metrics")]
    CustodianMetrics::global().archives_written_total.inc();
}

pub(crate) fn record_archive_failed() {
    #[cfg(feature = "metrics")]
    CustodianMetrics::global().archive_failures_total.inc();
}

pub(crate) fn record_copy(bytes: u64, elapsed: Duration) {
    #[cfg(feature = "metrics")]
    {
        let metrics = CustodianMetrics::global();
        metrics.copies_total.inc();
        metrics.bytes_copied_total.inc_by(bytes);
        metrics.copy_duration_seconds.observe(elapsed.as_secs_f64());
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (bytes, elapsed);
}

pub(crate) fn record_copy_failure(bytes: u64) {
    #[cfg(feature = "metrics")]
    {
        let metrics = CustodianMetrics::global();
        metrics.copy_failures_total.inc();
        metrics.bytes_discarded_total.inc_by(bytes);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = bytes;
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise Custodian crates log at `info`, or
/// `debug` when `verbose` is set. Output goes to stderr so command output on
/// stdout stays machine readable.
pub fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let default_directive = if verbose { "custodian=debug" } else { "custodian=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = TracingRegistry::default().with(filter);
    let result = if json {
        set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            ),
        )
    } else {
        set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
        )
    };

    result.map_err(|e| {
        CustodianError::config(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    #[cfg(feature = "metrics")]
    CustodianMetrics::global();

    tracing::debug!(verbose, json, "Tracing initialized");
    Ok(())
}
