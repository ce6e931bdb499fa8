//! Application entry point for the `fleet-sensor-anomalies` batch job.
//!
//! This binary runs the full sequence once and exits:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the in-memory analytical engine
//! - Registering the device and sensor tables from their CSV exports
//! - Running the sensor anomaly pipeline and writing its CSV report
//!
//! # Environment Variables
//! - `DATA_DIR` (optional) – directory of `<table>_desc.csv` / `<table>.csv` pairs (default: `data`)
//! - `REPORT_START_DATE` / `REPORT_END_DATE` (optional) – inclusive ISO date range
//! - `ANOMALY_OUTPUT_PATH` (optional) – report destination
//! - `LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `LOG_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! Any failure aborts the run and is returned from `main`, giving a non-zero
//! exit status.
use std::env;

use is_terminal::IsTerminal;

use dotenvy::dotenv;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use fleet_sensor_anomalies::{
    config,
    schema::{self, TableSource, DEVICE_TABLE, SENSOR_TABLE},
    sensor_anomaly_detection, PipelineParams,
};

// ---

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    tracing::info!("Starting fleet sensor anomaly analysis");

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pool = schema::connect(&cfg.db_url).await?;
    tracing::info!("Analytical engine ready");

    tracing::info!("Registering device data...");
    let device = TableSource::from_data_dir(&cfg.data_dir, DEVICE_TABLE, schema::device_type_map());
    schema::register_table(&pool, &device).await?;

    tracing::info!("Registering sensor data...");
    let sensor = TableSource::from_data_dir(&cfg.data_dir, SENSOR_TABLE, schema::sensor_type_map());
    schema::register_table(&pool, &sensor).await?;

    tracing::info!("Performing comprehensive anomaly detection...");
    let verdicts = sensor_anomaly_detection(&pool, &PipelineParams::from(&cfg)).await?;

    pool.close().await;
    tracing::info!(
        "Application completed successfully ({} verdicts)",
        verdicts.len()
    );

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `LOG_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `LOG_LEVEL` env var
///
/// Called once at startup, before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("LOG_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
