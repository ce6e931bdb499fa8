//! Rolling statistics stage.
//!
//! Projects raw sensor observations to one daily metric row each (via the
//! engine), then computes trailing-window mean, sample standard deviation and
//! z-score per sensor for the three averages and the critical temperature
//! duration. The window spans the current row and up to `WINDOW_ROWS - 1`
//! preceding rows of the same sensor; it counts observations, not calendar
//! days, and never looks ahead.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::models::{DailyMetricRow, DateRange, RawRollingRow, RollingStat};

// ---

/// Observations per trailing window, current row included.
pub const WINDOW_ROWS: usize = 7;

/// Daily projection of `time_in_level_sensor`. Date bounds are bound as
/// parameters, inclusive on both ends.
const DAILY_METRICS_SQL: &str = r#"
    SELECT
        CAST(id AS INTEGER)             AS id,
        CAST(sensor_id AS INTEGER)      AS sensor_id,
        CAST(vehicle_id AS INTEGER)     AS vehicle_id,
        CAST(wheel_position AS INTEGER) AS wheel_position,
        date(report_start_at)           AS report_date,
        CAST(temperature_avg AS REAL)   AS temperature_avg,
        CAST(cold_pressure_avg AS REAL) AS cold_pressure_avg,
        CAST(hot_pressure_avg AS REAL)  AS hot_pressure_avg,
        COALESCE(CAST(level_3_high_temperature_dur AS INTEGER), 0)
          + COALESCE(CAST(level_3_low_temperature_dur AS INTEGER), 0)   AS crit_temp_dur,
        COALESCE(CAST(level_3_high_cold_pressure_dur AS INTEGER), 0)
          + COALESCE(CAST(level_3_low_cold_pressure_dur AS INTEGER), 0) AS crit_cold_press_dur,
        COALESCE(CAST(level_3_high_hot_pressure_dur AS INTEGER), 0)
          + COALESCE(CAST(level_3_low_hot_pressure_dur AS INTEGER), 0)  AS crit_hot_press_dur
    FROM time_in_level_sensor
    WHERE date(report_start_at) BETWEEN ?1 AND ?2
    ORDER BY sensor_id, report_start_at, id
"#;

/// Fetch the daily metric rows for `range`, grouped by sensor and in time
/// order within each sensor.
pub async fn fetch_daily_metrics(pool: &SqlitePool, range: &DateRange) -> Result<Vec<DailyMetricRow>> {
    // ---
    debug!("Daily metrics query:\n{}", DAILY_METRICS_SQL.trim());

    sqlx::query_as::<_, DailyMetricRow>(DAILY_METRICS_SQL)
        .bind(range.start())
        .bind(range.end())
        .fetch_all(pool)
        .await
        .with_context(|| {
            format!(
                "Daily metrics query failed for {} .. {}",
                range.start(),
                range.end()
            )
        })
}

/// Run the stage: fetch daily metrics and attach rolling statistics.
///
/// Output is ordered by report date, then sensor id, then row id.
pub async fn compute(pool: &SqlitePool, range: &DateRange) -> Result<Vec<RawRollingRow>> {
    // ---
    let daily = fetch_daily_metrics(pool, range).await?;

    let unkeyed = daily.iter().filter(|r| r.sensor_id.is_none()).count();
    if unkeyed > 0 {
        warn!("{} rows have no sensor_id and share one window partition", unkeyed);
    }
    Ok(attach_rolling_stats(daily))
}

/// Attach trailing-window statistics to rows already ordered by sensor and
/// time. Rows without a sensor id form a single partition of their own.
pub fn attach_rolling_stats(daily: Vec<DailyMetricRow>) -> Vec<RawRollingRow> {
    // ---
    let mut out = Vec::with_capacity(daily.len());

    let mut start = 0;
    while start < daily.len() {
        let sensor_id = daily[start].sensor_id;
        let end = daily[start..]
            .iter()
            .position(|r| r.sensor_id != sensor_id)
            .map_or(daily.len(), |offset| start + offset);
        let partition = &daily[start..end];

        let temperature = rolling_stats(&column(partition, |r| r.temperature_avg), WINDOW_ROWS);
        let cold_pressure = rolling_stats(&column(partition, |r| r.cold_pressure_avg), WINDOW_ROWS);
        let hot_pressure = rolling_stats(&column(partition, |r| r.hot_pressure_avg), WINDOW_ROWS);
        let crit_temp = rolling_stats(
            &column(partition, |r| Some(r.crit_temp_dur as f64)),
            WINDOW_ROWS,
        );

        for (i, metrics) in partition.iter().enumerate() {
            out.push(RawRollingRow {
                metrics: metrics.clone(),
                temperature: temperature[i],
                cold_pressure: cold_pressure[i],
                hot_pressure: hot_pressure[i],
                crit_temp: crit_temp[i],
            });
        }
        start = end;
    }

    out.sort_by(|a, b| {
        (a.metrics.report_date, a.metrics.sensor_id, a.metrics.id).cmp(&(
            b.metrics.report_date,
            b.metrics.sensor_id,
            b.metrics.id,
        ))
    });
    out
}

fn column<F>(rows: &[DailyMetricRow], f: F) -> Vec<Option<f64>>
where
    F: Fn(&DailyMetricRow) -> Option<f64>,
{
    rows.iter().map(f).collect()
}

/// Trailing-window statistics over one partition.
///
/// Follows SQL aggregate semantics: nulls in the frame are skipped, the
/// standard deviation is the sample one (undefined below two values). The
/// z-score of a defined value is `0` when the deviation is zero or undefined,
/// and null when the value itself is null.
pub fn rolling_stats(values: &[Option<f64>], window: usize) -> Vec<RollingStat> {
    // ---
    let window = window.max(1);

    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let lo = (i + 1).saturating_sub(window);
            let frame: Vec<f64> = values[lo..=i].iter().flatten().copied().collect();

            let mean = mean(&frame);
            let stddev = mean.and_then(|m| sample_stddev(&frame, m));
            let z = value.map(|v| z_score(v, mean, stddev));

            RollingStat { mean, stddev, z }
        })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn sample_stddev(values: &[f64], mean: f64) -> Option<f64> {
    // ---
    if values.len() < 2 {
        return None;
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// `(value - mean) / stddev`, saturating to exactly 0 when the deviation is
/// zero or undefined.
pub fn z_score(value: f64, mean: Option<f64>, stddev: Option<f64>) -> f64 {
    // ---
    match (mean, stddev) {
        (Some(m), Some(sd)) if sd != 0.0 => (value - m) / sd,
        _ => 0.0,
    }
}
