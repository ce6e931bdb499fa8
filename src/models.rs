//! Data models for the sensor anomaly pipeline.

use std::fmt;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Serialize, Serializer};

// ---

/// Inclusive calendar-date range a pipeline run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    // ---
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    // ---
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        // ---
        if start > end {
            bail!("date range start {} is after end {}", start, end);
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// One sensor reporting period projected to a calendar day, as returned by
/// the engine. Nullable columns stay `Option` until the sanitize step.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct DailyMetricRow {
    // ---
    pub id: Option<i64>,
    pub sensor_id: Option<i64>,
    pub vehicle_id: Option<i64>,
    pub wheel_position: Option<i64>,
    pub report_date: NaiveDate,
    pub temperature_avg: Option<f64>,
    pub cold_pressure_avg: Option<f64>,
    pub hot_pressure_avg: Option<f64>,
    /// Level-3 high + level-3 low temperature duration.
    pub crit_temp_dur: i64,
    pub crit_cold_press_dur: i64,
    pub crit_hot_press_dur: i64,
}

/// Trailing-window statistics for one measure before null substitution.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RollingStat {
    // ---
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub z: Option<f64>,
}

/// Output of the rolling statistics stage, still nullable.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRollingRow {
    // ---
    pub metrics: DailyMetricRow,
    pub temperature: RollingStat,
    pub cold_pressure: RollingStat,
    pub hot_pressure: RollingStat,
    pub crit_temp: RollingStat,
}

/// Trailing-window statistics for one measure, nulls already replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowStat {
    // ---
    pub mean: f64,
    pub stddev: f64,
    pub z: f64,
}

/// A daily metric row plus its rolling statistics, with every value defined.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingFeatureRow {
    // ---
    pub id: i64,
    pub sensor_id: i64,
    pub vehicle_id: i64,
    pub wheel_position: i64,
    pub report_date: NaiveDate,
    pub temperature_avg: f64,
    pub cold_pressure_avg: f64,
    pub hot_pressure_avg: f64,
    pub crit_temp_dur: f64,
    pub crit_cold_press_dur: f64,
    pub crit_hot_press_dur: f64,
    pub temperature: WindowStat,
    pub cold_pressure: WindowStat,
    pub hot_pressure: WindowStat,
    pub crit_temp: WindowStat,
}

impl RollingFeatureRow {
    // ---
    pub fn z_temp(&self) -> f64 {
        self.temperature.z
    }

    pub fn z_cold(&self) -> f64 {
        self.cold_pressure.z
    }

    pub fn z_hot(&self) -> f64 {
        self.hot_pressure.z
    }

    pub fn z_dur_temp(&self) -> f64 {
        self.crit_temp.z
    }
}

/// Result of the outlier model for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierScore {
    // ---
    pub is_outlier: bool,
    /// Lower is more anomalous; negative values are outliers.
    pub score: f64,
}

impl OutlierScore {
    pub const INLIER: Self = Self {
        is_outlier: false,
        score: 0.0,
    };
}

/// Coarse bucket used for charting an anomaly. Serializes as its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyCategory {
    ThermalFailure,
    PressureFailure,
    BehavioralAnomaly,
    Normal,
}

impl AnomalyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThermalFailure => "Thermal Failure",
            Self::PressureFailure => "Pressure Failure",
            Self::BehavioralAnomaly => "Behavioral Anomaly (AI)",
            Self::Normal => "Normal",
        }
    }
}

impl fmt::Display for AnomalyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AnomalyCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Final per-row verdict of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyVerdict {
    // ---
    pub row: RollingFeatureRow,
    pub is_temp_anomaly: bool,
    pub is_cold_press_anomaly: bool,
    pub is_hot_press_anomaly: bool,
    pub is_ml_anomaly: bool,
    pub ml_score: f64,
    pub is_anomaly_global: bool,
    pub category: AnomalyCategory,
    pub detail_text: String,
}
