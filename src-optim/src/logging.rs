//! Progress sinks and summary-line formatting for the retry engines.
//!
//! Engines report through a [`RetryLogger`] trait object on a fixed time
//! cadence; the line layout is stable so downstream tooling can parse it.

use std::time::{Duration, Instant};

use ndarray::Array1;
use parking_lot::Mutex;

/// Sink for retry progress summary lines. Implementations must serialize
/// their own writes.
pub trait RetryLogger: Send + Sync {
    fn log(&self, line: &str);
}

/// Routes summary lines through the `log` facade at info level.
#[derive(Debug, Default)]
pub struct StdLogger;

impl RetryLogger for StdLogger {
    fn log(&self, line: &str) {
        log::info!(target: "ridgeline::retry", "{}", line);
    }
}

/// Discards all summary lines.
#[derive(Debug, Default)]
pub struct NullLogger;

impl RetryLogger for NullLogger {
    fn log(&self, _line: &str) {}
}

/// Rate limiter for summary lines.
pub(crate) struct ProgressMeter {
    start: Instant,
    interval: Duration,
    last: Mutex<Instant>,
}

impl ProgressMeter {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            interval,
            last: Mutex::new(now),
        }
    }

    /// `Some(elapsed_seconds)` when a new summary line is due.
    pub fn due(&self) -> Option<f64> {
        let mut last = self.last.lock();
        if last.elapsed() >= self.interval {
            *last = Instant::now();
            Some(self.start.elapsed().as_secs_f64())
        } else {
            None
        }
    }

    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

fn fmt_values(values: &[f64]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".into())
}

fn fmt_point(x: &Array1<f64>) -> String {
    serde_json::to_string(&x.to_vec()).unwrap_or_else(|_| "[]".into())
}

/// `t, evals_per_sec, retries, total_evals, best_f, mean_f, std_f, top20_f, best_x`
#[allow(clippy::too_many_arguments)]
pub(crate) fn simple_line(
    t: f64,
    evals_per_sec: f64,
    retries: usize,
    total_evals: u64,
    best_f: f64,
    mean_f: f64,
    std_f: f64,
    top: &[f64],
    best_x: Option<&Array1<f64>>,
) -> String {
    format!(
        "t={:.1} evals/s={:.0} retries={} evals={} best={:.6e} mean={:.6e} std={:.6e} top={} x={}",
        t,
        evals_per_sec,
        retries,
        total_evals,
        best_f,
        mean_f,
        std_f,
        fmt_values(top),
        best_x.map(fmt_point).unwrap_or_else(|| "[]".into()),
    )
}

/// `t, evals_per_sec, retries, total_evals, best_f, worst_store_f, store_size, top20_f, best_x`
#[allow(clippy::too_many_arguments)]
pub(crate) fn coordinated_line(
    t: f64,
    evals_per_sec: f64,
    retries: usize,
    total_evals: u64,
    best_f: f64,
    worst_store_f: f64,
    store_size: usize,
    top: &[f64],
    best_x: Option<&Array1<f64>>,
) -> String {
    format!(
        "t={:.1} evals/s={:.0} retries={} evals={} best={:.6e} worst={:.6e} store={} top={} x={}",
        t,
        evals_per_sec,
        retries,
        total_evals,
        best_f,
        worst_store_f,
        store_size,
        fmt_values(top),
        best_x.map(fmt_point).unwrap_or_else(|| "[]".into()),
    )
}
