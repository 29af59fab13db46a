//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Pipeline metrics registered on a private registry
pub struct Metrics {
    registry: Registry,

    // Submission
    pub batches_submitted: IntCounter,
    pub batches_confirmed: IntCounter,
    pub batches_failed: IntCounter,
    pub confirm_timeouts: IntCounter,

    // Storage
    pub uploads_total: IntCounter,
    pub uploads_failed: IntCounter,

    // Swap
    pub swaps_executed: IntCounter,
    pub swaps_rejected: IntCounter,

    // Histograms
    pub confirm_latency: Histogram,
    pub upload_latency: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let batches_submitted = IntCounter::with_opts(Opts::new(
            "batches_submitted",
            "Instruction batches dispatched to the network",
        ))?;
        let batches_confirmed = IntCounter::with_opts(Opts::new(
            "batches_confirmed",
            "Batches observed at the requested commitment",
        ))?;
        let batches_failed = IntCounter::with_opts(Opts::new(
            "batches_failed",
            "Batches that failed to sign, send or land",
        ))?;
        let confirm_timeouts = IntCounter::with_opts(Opts::new(
            "confirm_timeouts",
            "Confirmation waits that gave up before the ledger reported",
        ))?;

        let uploads_total =
            IntCounter::with_opts(Opts::new("uploads_total", "Storage gateway uploads attempted"))?;
        let uploads_failed =
            IntCounter::with_opts(Opts::new("uploads_failed", "Storage gateway uploads rejected"))?;

        let swaps_executed =
            IntCounter::with_opts(Opts::new("swaps_executed", "Swaps confirmed on-chain"))?;
        let swaps_rejected = IntCounter::with_opts(Opts::new(
            "swaps_rejected",
            "Swaps refused or failed before confirmation",
        ))?;

        let confirm_latency = Histogram::with_opts(
            HistogramOpts::new("confirm_latency_seconds", "Send to confirmation latency")
                .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]),
        )?;
        let upload_latency = Histogram::with_opts(
            HistogramOpts::new("upload_latency_seconds", "Storage gateway request latency")
                .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(batches_submitted.clone()))?;
        registry.register(Box::new(batches_confirmed.clone()))?;
        registry.register(Box::new(batches_failed.clone()))?;
        registry.register(Box::new(confirm_timeouts.clone()))?;
        registry.register(Box::new(uploads_total.clone()))?;
        registry.register(Box::new(uploads_failed.clone()))?;
        registry.register(Box::new(swaps_executed.clone()))?;
        registry.register(Box::new(swaps_rejected.clone()))?;
        registry.register(Box::new(confirm_latency.clone()))?;
        registry.register(Box::new(upload_latency.clone()))?;

        Ok(Self {
            registry,
            batches_submitted,
            batches_confirmed,
            batches_failed,
            confirm_timeouts,
            uploads_total,
            uploads_failed,
            swaps_executed,
            swaps_rejected,
            confirm_latency,
            upload_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %err, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

static METRICS: once_cell::sync::Lazy<Option<Metrics>> = once_cell::sync::Lazy::new(|| {
    Metrics::new()
        .map_err(|err| tracing::warn!(error = %err, "Metrics disabled: registry setup failed"))
        .ok()
});

/// Global metrics instance, `None` if registration failed
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.as_ref()
}

/// Run `f` against the global metrics if they are available
pub fn record(f: impl FnOnce(&Metrics)) {
    if let Some(m) = metrics() {
        f(m);
    }
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Record the elapsed time into the histogram selected by `pick`
    pub fn finish(self, pick: impl FnOnce(&Metrics) -> &Histogram) {
        let elapsed = self.elapsed_secs();
        record(|m| pick(m).observe(elapsed));
    }
}
