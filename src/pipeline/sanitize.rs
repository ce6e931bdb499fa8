//! The single null-substitution step between the rolling statistics stage
//! and the outlier model.
//!
//! Substitution table (every entry becomes `0`):
//!
//! | field                                  | when                    |
//! |----------------------------------------|-------------------------|
//! | `id`, `sensor_id`                      | null                    |
//! | `vehicle_id`, `wheel_position`         | null                    |
//! | `temperature_avg`, `cold_pressure_avg`, `hot_pressure_avg` | null |
//! | window mean / stddev / z of every measure | null                 |
//! | any float above                        | NaN or infinite         |
//!
//! Critical durations are already non-null (summed with `COALESCE` in the
//! engine) and only converted to floats here.

use crate::models::{RawRollingRow, RollingFeatureRow, RollingStat, WindowStat};

// ---

pub fn sanitize(rows: Vec<RawRollingRow>) -> Vec<RollingFeatureRow> {
    rows.into_iter().map(sanitize_row).collect()
}

pub fn sanitize_row(raw: RawRollingRow) -> RollingFeatureRow {
    // ---
    let m = raw.metrics;

    RollingFeatureRow {
        id: m.id.unwrap_or(0),
        sensor_id: m.sensor_id.unwrap_or(0),
        vehicle_id: m.vehicle_id.unwrap_or(0),
        wheel_position: m.wheel_position.unwrap_or(0),
        report_date: m.report_date,
        temperature_avg: fill(m.temperature_avg),
        cold_pressure_avg: fill(m.cold_pressure_avg),
        hot_pressure_avg: fill(m.hot_pressure_avg),
        crit_temp_dur: m.crit_temp_dur as f64,
        crit_cold_press_dur: m.crit_cold_press_dur as f64,
        crit_hot_press_dur: m.crit_hot_press_dur as f64,
        temperature: fill_stat(raw.temperature),
        cold_pressure: fill_stat(raw.cold_pressure),
        hot_pressure: fill_stat(raw.hot_pressure),
        crit_temp: fill_stat(raw.crit_temp),
    }
}

fn fill(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn fill_stat(stat: RollingStat) -> WindowStat {
    WindowStat {
        mean: fill(stat.mean),
        stddev: fill(stat.stddev),
        z: fill(stat.z),
    }
}
