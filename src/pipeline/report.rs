//! CSV export of the anomaly verdicts.
//!
//! The column projection is consumed by downstream dashboards and must not
//! change shape.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{AnomalyCategory, AnomalyVerdict};

// ---

pub const REPORT_COLUMNS: [&str; 14] = [
    "id",
    "report_date",
    "sensor_id",
    "vehicle_id",
    "wheel_position",
    "temperature_avg",
    "cold_pressure_avg",
    "hot_pressure_avg",
    "is_anomaly_global",
    "anomaly_category",
    "anomaly_detail_text",
    "z_temp",
    "z_cold",
    "z_hot",
];

/// One output line. Field order is the column order.
#[derive(Debug, Serialize)]
struct ReportRecord<'a> {
    // ---
    id: i64,
    report_date: NaiveDate,
    sensor_id: i64,
    vehicle_id: i64,
    wheel_position: i64,
    temperature_avg: f64,
    cold_pressure_avg: f64,
    hot_pressure_avg: f64,
    is_anomaly_global: bool,
    anomaly_category: AnomalyCategory,
    anomaly_detail_text: &'a str,
    z_temp: f64,
    z_cold: f64,
    z_hot: f64,
}

impl<'a> From<&'a AnomalyVerdict> for ReportRecord<'a> {
    fn from(v: &'a AnomalyVerdict) -> Self {
        // ---
        Self {
            id: v.row.id,
            report_date: v.row.report_date,
            sensor_id: v.row.sensor_id,
            vehicle_id: v.row.vehicle_id,
            wheel_position: v.row.wheel_position,
            temperature_avg: v.row.temperature_avg,
            cold_pressure_avg: v.row.cold_pressure_avg,
            hot_pressure_avg: v.row.hot_pressure_avg,
            is_anomaly_global: v.is_anomaly_global,
            anomaly_category: v.category,
            anomaly_detail_text: &v.detail_text,
            z_temp: v.row.z_temp(),
            z_cold: v.row.z_cold(),
            z_hot: v.row.z_hot(),
        }
    }
}

/// Write the verdicts to `path`, replacing any existing file. The header
/// row is written even when there are no verdicts.
pub fn write_report(path: &Path, verdicts: &[AnomalyVerdict]) -> Result<()> {
    // ---
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create report {}", path.display()))?;

    writer.write_record(REPORT_COLUMNS)?;
    for verdict in verdicts {
        writer
            .serialize(ReportRecord::from(verdict))
            .with_context(|| format!("Failed to write report row {}", verdict.row.id))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush report {}", path.display()))?;
    Ok(())
}
