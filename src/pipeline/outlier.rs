//! Multivariate outlier stage.
//!
//! Builds the fixed 9-feature vector per row, standardizes it against the
//! current batch and scores the batch with a freshly fitted isolation forest.
//! Nothing is persisted between runs.

use tracing::debug;

use super::forest::IsolationForest;
use crate::config::ModelConfig;
use crate::models::{OutlierScore, RollingFeatureRow};

// ---

pub const FEATURE_NAMES: [&str; 9] = [
    "temperature_avg",
    "cold_pressure_avg",
    "hot_pressure_avg",
    "crit_temp_dur",
    "crit_cold_press_dur",
    "crit_hot_press_dur",
    "z_temp",
    "z_cold",
    "z_hot",
];

/// Model inputs for one row. The critical-duration z-score is not a model
/// input; it only feeds the explanation.
pub fn features(row: &RollingFeatureRow) -> Vec<f64> {
    vec![
        row.temperature_avg,
        row.cold_pressure_avg,
        row.hot_pressure_avg,
        row.crit_temp_dur,
        row.crit_cold_press_dur,
        row.crit_hot_press_dur,
        row.z_temp(),
        row.z_cold(),
        row.z_hot(),
    ]
}

/// Per-feature batch mean and population standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    // ---
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on a non-empty batch. A zero-variance feature keeps scale 1, so it
    /// is only centered.
    pub fn fit(data: &[Vec<f64>]) -> Self {
        // ---
        let n = data.len().max(1) as f64;
        let dims = data.first().map_or(0, Vec::len);

        let mean: Vec<f64> = (0..dims)
            .map(|j| data.iter().map(|x| x[j]).sum::<f64>() / n)
            .collect();
        let scale = (0..dims)
            .map(|j| {
                let var = data.iter().map(|x| (x[j] - mean[j]).powi(2)).sum::<f64>() / n;
                let sd = var.sqrt();
                if sd > 0.0 && sd.is_finite() {
                    sd
                } else {
                    1.0
                }
            })
            .collect();

        Self { mean, scale }
    }

    pub fn transform(&self, data: &[Vec<f64>]) -> Vec<Vec<f64>> {
        // ---
        data.iter()
            .map(|x| {
                x.iter()
                    .zip(self.mean.iter().zip(&self.scale))
                    .map(|(v, (m, s))| (v - m) / s)
                    .collect()
            })
            .collect()
    }
}

/// Score every row of the batch. A batch too small to fit a forest yields
/// all inliers rather than an error.
pub fn detect(rows: &[RollingFeatureRow], config: &ModelConfig) -> Vec<OutlierScore> {
    // ---
    let raw: Vec<Vec<f64>> = rows.iter().map(features).collect();
    let scaler = StandardScaler::fit(&raw);
    let scaled = scaler.transform(&raw);

    let Some(forest) = IsolationForest::fit(&scaled, config) else {
        debug!(
            "Batch of {} rows too small for the outlier model, marking all as inliers",
            rows.len()
        );
        return vec![OutlierScore::INLIER; rows.len()];
    };
    debug!("Outlier model offset: {:.6}", forest.offset());

    forest
        .decision_function(&scaled)
        .into_iter()
        .map(|score| OutlierScore {
            is_outlier: score < 0.0,
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::WindowStat;
    use chrono::NaiveDate;

    fn row(id: i64, temp: f64, cold: f64, hot: f64, z_temp: f64) -> RollingFeatureRow {
        // ---
        RollingFeatureRow {
            id,
            sensor_id: id % 4,
            vehicle_id: 84,
            wheel_position: (id % 4) + 1,
            report_date: NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(),
            temperature_avg: temp,
            cold_pressure_avg: cold,
            hot_pressure_avg: hot,
            crit_temp_dur: 0.0,
            crit_cold_press_dur: 0.0,
            crit_hot_press_dur: 0.0,
            temperature: WindowStat {
                z: z_temp,
                ..WindowStat::default()
            },
            cold_pressure: WindowStat::default(),
            hot_pressure: WindowStat::default(),
            crit_temp: WindowStat {
                z: 99.0,
                ..WindowStat::default()
            },
        }
    }

    /// 60 physically plausible rows and one hot tyre with collapsed pressure.
    fn batch() -> Vec<RollingFeatureRow> {
        // ---
        let mut rows: Vec<RollingFeatureRow> = (0..60)
            .map(|i| {
                let jitter = (i % 6) as f64 * 0.5;
                row(i, 30.0 + jitter, 100.0 + jitter, 110.0 + jitter, 0.1 * jitter)
            })
            .collect();
        rows.push(row(60, 95.0, 40.0, 60.0, 2.5));
        rows
    }

    #[test]
    fn test_feature_vector_layout() {
        // ---
        let r = row(1, 30.0, 100.0, 110.0, 1.5);
        let f = features(&r);
        assert_eq!(f.len(), FEATURE_NAMES.len());
        assert_eq!(f, vec![30.0, 100.0, 110.0, 0.0, 0.0, 0.0, 1.5, 0.0, 0.0]);
        // Duration z-score is not a model input
        assert!(!f.contains(&99.0));
    }

    #[test]
    fn test_scaler_standardizes_and_handles_constant_columns() {
        // ---
        let data = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = StandardScaler::fit(&data);
        let out = scaler.transform(&data);

        assert_eq!(out[0], vec![-1.0, 0.0]);
        assert_eq!(out[1], vec![1.0, 0.0]);
    }

    #[test]
    fn test_empty_batch_yields_no_scores() {
        // ---
        assert!(detect(&[], &ModelConfig::default()).is_empty());
    }

    #[test]
    fn test_single_row_is_inlier() {
        // ---
        let scores = detect(&[row(1, 30.0, 100.0, 110.0, 0.0)], &ModelConfig::default());
        assert_eq!(scores, vec![OutlierScore::INLIER]);
    }

    #[test]
    fn test_inconsistent_row_is_flagged() {
        // ---
        let rows = batch();
        let scores = detect(&rows, &ModelConfig::default());

        assert_eq!(scores.len(), rows.len());
        assert!(scores[60].is_outlier);
        let lowest = scores
            .iter()
            .map(|s| s.score)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(scores[60].score, lowest);
    }

    #[test]
    fn test_detection_is_deterministic() {
        // ---
        let rows = batch();
        let cfg = ModelConfig::default();
        assert_eq!(detect(&rows, &cfg), detect(&rows, &cfg));
    }

    #[test]
    fn test_seed_changes_scores() {
        // ---
        let rows = batch();
        let a = detect(&rows, &ModelConfig::default());
        let b = detect(
            &rows,
            &ModelConfig {
                seed: 7,
                ..ModelConfig::default()
            },
        );
        assert_ne!(a, b);
    }
}
