//! Prometheus metrics for classification and guarded execution.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`record_classification`, `record_execution`, …) are no-ops if
//! `init_metrics` was never called, so the router is always safe to run —
//! observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `intent_router_classifications_total` | Counter | `mode`, `method` |
//! | `intent_router_resolve_duration_seconds` | Histogram | — |
//! | `intent_router_executions_total` | Counter | `resource`, `outcome` |
//! | `intent_router_admission_rejections_total` | Counter | `resource`, `reason` |
//! | `intent_router_attempts_per_call` | Histogram | — |
//!
//! `executions_total` counts calls that passed admission, labelled with
//! their final outcome; `admission_rejections_total` counts the calls the
//! guards turned away before any attempt ran.

use crate::RouterError;
use prometheus::{
    core::Collector, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the router, bundled together so they can be
/// stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Classifications by resolved mode and detection method.
    pub classifications_total: CounterVec,
    /// Mode resolution latency.
    pub resolve_duration: Histogram,
    /// Admitted calls by resource and final outcome.
    pub executions_total: CounterVec,
    /// Calls refused at admission, by resource and refusing guard.
    pub rejections_total: CounterVec,
    /// Executions performed per admitted call.
    pub attempts_per_call: Histogram,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private
/// registry.
///
/// Must be called once at process startup. Calling it a second time is a
/// no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`RouterError::Other`] if metric construction or registry
/// registration fails (e.g., duplicate descriptor names).
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), RouterError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let classifications_total = CounterVec::new(
        Opts::new(
            "intent_router_classifications_total",
            "Classifications by mode and detection method",
        ),
        &["mode", "method"],
    )
    .map_err(|e| RouterError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(classifications_total.clone()))
        .map_err(|e| RouterError::Other(format!("metrics registration failed: {e}")))?;

    let resolve_duration = Histogram::with_opts(HistogramOpts::new(
        "intent_router_resolve_duration_seconds",
        "Mode resolution latency",
    ))
    .map_err(|e| RouterError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(resolve_duration.clone()))
        .map_err(|e| RouterError::Other(format!("metrics registration failed: {e}")))?;

    let executions_total = CounterVec::new(
        Opts::new(
            "intent_router_executions_total",
            "Admitted calls by resource and final outcome",
        ),
        &["resource", "outcome"],
    )
    .map_err(|e| RouterError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(executions_total.clone()))
        .map_err(|e| RouterError::Other(format!("metrics registration failed: {e}")))?;

    let rejections_total = CounterVec::new(
        Opts::new(
            "intent_router_admission_rejections_total",
            "Calls refused at admission by resource and refusing guard",
        ),
        &["resource", "reason"],
    )
    .map_err(|e| RouterError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(rejections_total.clone()))
        .map_err(|e| RouterError::Other(format!("metrics registration failed: {e}")))?;

    let attempts_per_call = Histogram::with_opts(
        HistogramOpts::new(
            "intent_router_attempts_per_call",
            "Executions performed per admitted call",
        )
        .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 10.0]),
    )
    .map_err(|e| RouterError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(attempts_per_call.clone()))
        .map_err(|e| RouterError::Other(format!("metrics registration failed: {e}")))?;

    // If another thread raced us, the first one wins. Both initializations
    // produce identical metric descriptors, so neither outcome is incorrect.
    let _ = METRICS.set(Metrics {
        registry,
        classifications_total,
        resolve_duration,
        executions_total,
        rejections_total,
        attempts_per_call,
    });

    Ok(())
}

/// Return a reference to the initialised [`Metrics`], or `None` if
/// [`init_metrics`] has not been called yet.
fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one classification by resolved mode and detection method.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_classification(mode: &str, method: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .classifications_total
            .get_metric_with_label_values(&[mode, method])
        {
            c.inc();
        }
    }
}

/// Record how long one mode resolution took.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn observe_resolve_duration(d: Duration) {
    if let Some(m) = metrics() {
        m.resolve_duration.observe(d.as_secs_f64());
    }
}

/// Count one admitted call by resource and final outcome label.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_execution(resource: &str, outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .executions_total
            .get_metric_with_label_values(&[resource, outcome])
        {
            c.inc();
        }
    }
}

/// Count one admission refusal by resource and refusing guard.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_rejection(resource: &str, reason: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .rejections_total
            .get_metric_with_label_values(&[resource, reason])
        {
            c.inc();
        }
    }
}

/// Record how many executions one admitted call performed.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn observe_attempts(attempts: u32) {
    if let Some(m) = metrics() {
        m.attempts_per_call.observe(f64::from(attempts));
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails. Observability degrades gracefully rather than panicking.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// A structured snapshot of key metric counters, used by status surfaces.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Classification counts keyed by `"mode:method"`.
    pub classifications_total: HashMap<String, u64>,
    /// Execution counts keyed by `"resource:outcome"`.
    pub executions_total: HashMap<String, u64>,
    /// Rejection counts keyed by `"resource:reason"`.
    pub rejections_total: HashMap<String, u64>,
}

fn collect_pairs(vec: &CounterVec, first: &str, second: &str, into: &mut HashMap<String, u64>) {
    for family in vec.collect() {
        for metric in family.get_metric() {
            let a = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == first)
                .map_or("unknown", |l| l.get_value());
            let b = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == second)
                .map_or("unknown", |l| l.get_value());
            let value = metric.get_counter().get_value() as u64;
            into.insert(format!("{a}:{b}"), value);
        }
    }
}

/// Return a structured summary of current metric counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been
/// initialised.
///
/// # Panics
///
/// This function never panics.
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };

    let mut summary = MetricsSummary::default();
    collect_pairs(
        &m.classifications_total,
        "mode",
        "method",
        &mut summary.classifications_total,
    );
    collect_pairs(
        &m.executions_total,
        "resource",
        "outcome",
        &mut summary.executions_total,
    );
    collect_pairs(
        &m.rejections_total,
        "resource",
        "reason",
        &mut summary.rejections_total,
    );
    summary
}
