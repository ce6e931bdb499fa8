//! Configuration loader for the `fleet-sensor-anomalies` batch job.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::{env, path::PathBuf};

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;

use crate::models::DateRange;

/// Parse an optional environment variable into `$ty`, falling back to a default.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.to_string())
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// SQLite connection string for the analytical engine.
    pub db_url: String,

    /// Directory holding the `<table>_desc.csv` / `<table>.csv` pairs.
    pub data_dir: PathBuf,

    /// Inclusive calendar-date range to analyze.
    pub date_range: DateRange,

    /// Destination of the anomaly report CSV.
    pub output_path: PathBuf,

    /// Isolation forest settings.
    pub model: ModelConfig,
}

/// Settings for the multivariate outlier model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConfig {
    /// Number of isolation trees.
    pub n_estimators: usize,

    /// Expected share of outliers in a batch, in (0, 0.5].
    pub contamination: f64,

    /// Seed for every random draw made while growing the forest.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            contamination: 0.04,
            seed: 42,
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `DATABASE_URL` – engine connection string (default: `sqlite::memory:`)
/// - `DATA_DIR` – input CSV directory (default: `data`)
/// - `REPORT_START_DATE` / `REPORT_END_DATE` – ISO dates (default: 2023-01-01 .. 2023-12-31)
/// - `ANOMALY_OUTPUT_PATH` – report path (default: `output/anomalies_from_sensors.csv`)
/// - `MODEL_SEED` (42), `MODEL_ESTIMATORS` (100), `MODEL_CONTAMINATION` (0.04)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = env_or!("DATABASE_URL", "sqlite::memory:");
    let data_dir = PathBuf::from(env_or!("DATA_DIR", "data"));
    let output_path = PathBuf::from(env_or!(
        "ANOMALY_OUTPUT_PATH",
        "output/anomalies_from_sensors.csv"
    ));

    let defaults = ModelConfig::default();
    let model = ModelConfig {
        n_estimators: parse_env!("MODEL_ESTIMATORS", usize, defaults.n_estimators),
        contamination: parse_env!("MODEL_CONTAMINATION", f64, defaults.contamination),
        seed: parse_env!("MODEL_SEED", u64, defaults.seed),
    };
    model.validate()?;

    let start = parse_date("REPORT_START_DATE", &env_or!("REPORT_START_DATE", "2023-01-01"))?;
    let end = parse_date("REPORT_END_DATE", &env_or!("REPORT_END_DATE", "2023-12-31"))?;
    let date_range = DateRange::new(start, end)?;

    Ok(Config {
        db_url,
        data_dir,
        date_range,
        output_path,
        model,
    })
}

fn parse_date(var_name: &str, value: &str) -> Result<NaiveDate> {
    // ---
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow!("Invalid {}: '{}' ({})", var_name, value, e))
}

impl ModelConfig {
    /// Reject settings the forest cannot work with.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.n_estimators == 0 {
            bail!("MODEL_ESTIMATORS must be at least 1");
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            bail!(
                "MODEL_CONTAMINATION must be in (0, 0.5], got {}",
                self.contamination
            );
        }
        Ok(())
    }
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL        : {}", self.db_url);
        tracing::info!("  DATA_DIR            : {}", self.data_dir.display());
        tracing::info!("  REPORT_START_DATE   : {}", self.date_range.start());
        tracing::info!("  REPORT_END_DATE     : {}", self.date_range.end());
        tracing::info!("  ANOMALY_OUTPUT_PATH : {}", self.output_path.display());
        tracing::info!("  MODEL_ESTIMATORS    : {}", self.model.n_estimators);
        tracing::info!("  MODEL_CONTAMINATION : {}", self.model.contamination);
        tracing::info!("  MODEL_SEED          : {}", self.model.seed);
    }
}
