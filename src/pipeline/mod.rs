//! Sensor anomaly pipeline gateway (EMBP).
//!
//! Stages run strictly in sequence, each consuming the full output of the
//! previous one:
//! rolling statistics -> sanitize -> outlier model -> explanation -> report.
//! Sibling stage modules stay private; callers only see
//! [`sensor_anomaly_detection`] and [`PipelineParams`].

use std::path::PathBuf;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::{Config, ModelConfig};
use crate::instrument::{timed, timed_async};
use crate::models::{AnomalyVerdict, DateRange};

mod explain;
mod forest;
mod outlier;
mod report;
mod rolling;
mod sanitize;

pub use explain::{categorize, describe, Flags, ZScores};
pub use report::REPORT_COLUMNS;

// ---

/// Inputs of one anomaly detection run.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    // ---
    pub date_range: DateRange,
    pub output_path: PathBuf,
    pub model: ModelConfig,
}

impl From<&Config> for PipelineParams {
    fn from(cfg: &Config) -> Self {
        Self {
            date_range: cfg.date_range,
            output_path: cfg.output_path.clone(),
            model: cfg.model,
        }
    }
}

/// Detect anomalies for every sensor observation in the date range, write the
/// report CSV and return the verdicts.
pub async fn sensor_anomaly_detection(
    pool: &SqlitePool,
    params: &PipelineParams,
) -> Result<Vec<AnomalyVerdict>> {
    // ---
    info!(
        "Anomaly detection for {} .. {}",
        params.date_range.start(),
        params.date_range.end()
    );

    let raw = timed_async("rolling_statistics", rolling::compute(pool, &params.date_range)).await?;
    let rows = sanitize::sanitize(raw);

    let scores = timed("outlier_model", rows.len(), || {
        Ok(outlier::detect(&rows, &params.model))
    })?;

    let verdicts = timed("explanation", rows.len(), || {
        Ok(rows
            .into_iter()
            .zip(scores)
            .map(|(row, score)| explain::reconcile(row, score))
            .collect::<Vec<_>>())
    })?;

    timed("report_export", verdicts.len(), || {
        report::write_report(&params.output_path, &verdicts)
    })?;

    let anomalies = verdicts.iter().filter(|v| v.is_anomaly_global).count();
    info!(
        "Anomaly report written to {} ({} rows, {} anomalies)",
        params.output_path.display(),
        verdicts.len(),
        anomalies
    );
    Ok(verdicts)
}
