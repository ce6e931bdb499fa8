//! Stage timing for the pipeline.
//!
//! Applied explicitly at each stage call site: opens a `stage` span, logs
//! row counts and elapsed time, and logs failures before
//! handing them back to the caller unchanged.

use std::future::Future;
use std::time::Instant;

use anyhow::Result;
use tracing::{error, info, info_span, Instrument};

// ---

/// Anything a stage can return whose size is worth logging.
pub trait RowCount {
    fn row_count(&self) -> usize;
}

impl<T> RowCount for Vec<T> {
    fn row_count(&self) -> usize {
        self.len()
    }
}

impl RowCount for () {
    fn row_count(&self) -> usize {
        0
    }
}

/// Time a synchronous stage.
pub fn timed<T, F>(stage: &'static str, rows_in: usize, f: F) -> Result<T>
where
    T: RowCount,
    F: FnOnce() -> Result<T>,
{
    // ---
    let _span = info_span!("stage", name = stage).entered();
    let started = Instant::now();
    info!(rows_in, "Starting {}", stage);

    let result = f();
    log_outcome(stage, started, &result);
    result
}

/// Time an async stage. Async stages read from the engine, so only the rows
/// they produce are counted.
pub async fn timed_async<T, Fut>(stage: &'static str, fut: Fut) -> Result<T>
where
    T: RowCount,
    Fut: Future<Output = Result<T>>,
{
    // ---
    let span = info_span!("stage", name = stage);
    async move {
        let started = Instant::now();
        info!("Starting {}", stage);

        let result = fut.await;
        log_outcome(stage, started, &result);
        result
    }
    .instrument(span)
    .await
}

fn log_outcome<T: RowCount>(stage: &str, started: Instant, result: &Result<T>) {
    // ---
    let elapsed = started.elapsed().as_secs_f64();
    match result {
        Ok(out) => info!(
            rows_out = out.row_count(),
            "Completed {} - Duration: {:.4}s",
            stage,
            elapsed
        ),
        Err(e) => error!("Error in {} after {:.4}s: {:#}", stage, elapsed, e),
    }
}
