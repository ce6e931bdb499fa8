//! Reconciliation of statistical and model flags into one verdict.
//!
//! Category and reason text follow two different precedence chains and may
//! disagree for the same row: the category is a coarse charting bucket, the
//! reason text is the detailed tooltip.

use crate::models::{AnomalyCategory, AnomalyVerdict, OutlierScore, RollingFeatureRow};

// ---

/// `|z|` above this is an extreme single-measure deviation.
pub const EXTREME_Z: f64 = 3.0;

/// `|z|` above this is a moderate deviation, used only to explain model hits.
pub const MODERATE_Z: f64 = 2.0;

/// Temperature above / cold pressure below this z hints at a leak under heat.
pub const PHYSICS_MISMATCH_Z: f64 = 1.5;

pub const NORMAL_TEXT: &str = "Normal";
pub const CONFIRMED_BY_AI: &str = "(Confirmed by AI)";
pub const COMPLEX_PATTERN: &str = "Complex Multivariate Pattern";

/// The z-scores the explainer looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ZScores {
    // ---
    pub temp: f64,
    pub cold: f64,
    pub hot: f64,
    pub dur_temp: f64,
}

impl ZScores {
    pub fn of(row: &RollingFeatureRow) -> Self {
        Self {
            temp: row.z_temp(),
            cold: row.z_cold(),
            hot: row.z_hot(),
            dur_temp: row.z_dur_temp(),
        }
    }
}

/// The four component anomaly flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    // ---
    pub temp: bool,
    pub cold_press: bool,
    pub hot_press: bool,
    pub ml: bool,
}

impl Flags {
    pub fn new(z: &ZScores, ml: bool) -> Self {
        Self {
            temp: z.temp.abs() > EXTREME_Z,
            cold_press: z.cold.abs() > EXTREME_Z,
            hot_press: z.hot.abs() > EXTREME_Z,
            ml,
        }
    }

    pub fn any_statistical(&self) -> bool {
        self.temp || self.cold_press || self.hot_press
    }

    /// The fused global flag.
    pub fn any(&self) -> bool {
        self.any_statistical() || self.ml
    }
}

/// First match wins: thermal, pressure, model, normal.
pub fn categorize(flags: &Flags) -> AnomalyCategory {
    // ---
    if flags.temp {
        AnomalyCategory::ThermalFailure
    } else if flags.cold_press || flags.hot_press {
        AnomalyCategory::PressureFailure
    } else if flags.ml {
        AnomalyCategory::BehavioralAnomaly
    } else {
        AnomalyCategory::Normal
    }
}

/// Human-readable reason for the verdict.
///
/// Statistical labels come first. A model hit adds pattern detail only when
/// no statistical label explains the row, and a confirmation suffix
/// otherwise.
pub fn describe(flags: &Flags, z: &ZScores) -> String {
    // ---
    let mut labels: Vec<String> = Vec::new();

    if flags.temp {
        labels.push("Extreme Temp".to_string());
    }
    if flags.cold_press {
        labels.push("Extreme Cold Press".to_string());
    }
    if flags.hot_press {
        labels.push("Extreme Hot Press".to_string());
    }

    if flags.ml {
        if labels.is_empty() {
            labels.push(pattern_label(z));
        } else {
            labels.push(CONFIRMED_BY_AI.to_string());
        }
    }

    if labels.is_empty() {
        return NORMAL_TEXT.to_string();
    }
    labels.join(", ")
}

fn pattern_label(z: &ZScores) -> String {
    // ---
    let mut signals = Vec::new();

    if z.temp.abs() > MODERATE_Z {
        signals.push("Unusual Temp Trend");
    }
    if z.cold.abs() > MODERATE_Z {
        signals.push("Unusual Cold Press Trend");
    }
    if z.dur_temp.abs() > MODERATE_Z {
        signals.push("Prolonged Critical Temp");
    }
    if z.temp > PHYSICS_MISMATCH_Z && z.cold < -PHYSICS_MISMATCH_Z {
        signals.push("Physics Mismatch (High T / Low P)");
    }

    if signals.is_empty() {
        COMPLEX_PATTERN.to_string()
    } else {
        format!("Pattern: {}", signals.join(" & "))
    }
}

/// Fuse one row's statistics with its model score.
pub fn reconcile(row: RollingFeatureRow, ml: OutlierScore) -> AnomalyVerdict {
    // ---
    let z = ZScores::of(&row);
    let flags = Flags::new(&z, ml.is_outlier);

    AnomalyVerdict {
        is_temp_anomaly: flags.temp,
        is_cold_press_anomaly: flags.cold_press,
        is_hot_press_anomaly: flags.hot_press,
        is_ml_anomaly: flags.ml,
        ml_score: ml.score,
        is_anomaly_global: flags.any(),
        category: categorize(&flags),
        detail_text: describe(&flags, &z),
        row,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::WindowStat;
    use chrono::NaiveDate;

    fn flags(temp: bool, cold_press: bool, hot_press: bool, ml: bool) -> Flags {
        Flags {
            temp,
            cold_press,
            hot_press,
            ml,
        }
    }

    fn z(temp: f64, cold: f64, hot: f64, dur_temp: f64) -> ZScores {
        ZScores {
            temp,
            cold,
            hot,
            dur_temp,
        }
    }

    #[test]
    fn test_global_flag_is_or_of_components() {
        // ---
        for bits in 0u8..16 {
            let f = flags(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0);
            assert_eq!(f.any(), bits != 0, "flags {:?}", f);
        }
    }

    #[test]
    fn test_flags_use_strict_threshold() {
        // ---
        let f = Flags::new(&z(3.0, -3.01, 0.0, 10.0), false);
        assert!(!f.temp);
        assert!(f.cold_press);
        assert!(!f.hot_press);
    }

    #[test]
    fn test_category_precedence() {
        // ---
        assert_eq!(
            categorize(&flags(true, false, false, true)),
            AnomalyCategory::ThermalFailure
        );
        assert_eq!(
            categorize(&flags(true, true, true, true)),
            AnomalyCategory::ThermalFailure
        );
        assert_eq!(
            categorize(&flags(false, false, true, true)),
            AnomalyCategory::PressureFailure
        );
        assert_eq!(
            categorize(&flags(false, true, false, false)),
            AnomalyCategory::PressureFailure
        );
        assert_eq!(
            categorize(&flags(false, false, false, true)),
            AnomalyCategory::BehavioralAnomaly
        );
        assert_eq!(
            categorize(&flags(false, false, false, false)),
            AnomalyCategory::Normal
        );
    }

    #[test]
    fn test_statistical_label_confirmed_by_model() {
        // ---
        let text = describe(&flags(true, false, false, true), &z(3.5, 0.0, 0.0, 2.5));
        assert_eq!(text, "Extreme Temp, (Confirmed by AI)");
    }

    #[test]
    fn test_statistical_labels_in_fixed_order() {
        // ---
        let text = describe(&flags(true, true, true, false), &z(4.0, -4.0, 4.0, 0.0));
        assert_eq!(text, "Extreme Temp, Extreme Cold Press, Extreme Hot Press");

        let text = describe(&flags(false, true, true, true), &z(0.0, -4.0, 4.0, 0.0));
        assert_eq!(text, "Extreme Cold Press, Extreme Hot Press, (Confirmed by AI)");
    }

    #[test]
    fn test_model_only_single_pattern() {
        // ---
        let text = describe(&flags(false, false, false, true), &z(2.5, 0.0, 0.0, 0.0));
        assert_eq!(text, "Pattern: Unusual Temp Trend");
    }

    #[test]
    fn test_model_only_combined_pattern() {
        // ---
        let text = describe(&flags(false, false, false, true), &z(2.5, -2.2, 0.0, 2.1));
        assert_eq!(
            text,
            "Pattern: Unusual Temp Trend & Unusual Cold Press Trend & Prolonged Critical Temp & Physics Mismatch (High T / Low P)"
        );
    }

    #[test]
    fn test_physics_mismatch_alone() {
        // ---
        let text = describe(&flags(false, false, false, true), &z(1.8, -1.7, 0.0, 0.0));
        assert_eq!(text, "Pattern: Physics Mismatch (High T / Low P)");

        // High temperature with high pressure is physically consistent
        let text = describe(&flags(false, false, false, true), &z(1.8, 1.7, 0.0, 0.0));
        assert_eq!(text, COMPLEX_PATTERN);
    }

    #[test]
    fn test_model_only_without_signals() {
        // ---
        let text = describe(&flags(false, false, false, true), &z(1.0, -1.0, 2.9, 1.9));
        assert_eq!(text, "Complex Multivariate Pattern");
    }

    #[test]
    fn test_nothing_flagged_is_normal() {
        // ---
        // Moderate signals alone do not produce text without a model hit
        let f = flags(false, false, false, false);
        assert_eq!(describe(&f, &z(2.5, -2.5, 0.0, 2.5)), "Normal");
        assert_eq!(categorize(&f), AnomalyCategory::Normal);
    }

    #[test]
    fn test_category_and_text_may_diverge() {
        // ---
        let f = flags(false, true, false, true);
        assert_eq!(categorize(&f), AnomalyCategory::PressureFailure);
        assert_eq!(
            describe(&f, &z(0.0, -3.5, 0.0, 0.0)),
            "Extreme Cold Press, (Confirmed by AI)"
        );
    }

    #[test]
    fn test_reconcile_row() {
        // ---
        let row = RollingFeatureRow {
            id: 11,
            sensor_id: 5,
            vehicle_id: 84,
            wheel_position: 2,
            report_date: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            temperature_avg: 70.0,
            cold_pressure_avg: 100.0,
            hot_pressure_avg: 115.0,
            crit_temp_dur: 300.0,
            crit_cold_press_dur: 0.0,
            crit_hot_press_dur: 0.0,
            temperature: WindowStat {
                mean: 35.0,
                stddev: 10.0,
                z: 3.5,
            },
            cold_pressure: WindowStat::default(),
            hot_pressure: WindowStat::default(),
            crit_temp: WindowStat::default(),
        };

        let verdict = reconcile(
            row.clone(),
            OutlierScore {
                is_outlier: true,
                score: -0.12,
            },
        );

        assert!(verdict.is_temp_anomaly);
        assert!(!verdict.is_cold_press_anomaly);
        assert!(!verdict.is_hot_press_anomaly);
        assert!(verdict.is_ml_anomaly);
        assert!(verdict.is_anomaly_global);
        assert_eq!(verdict.ml_score, -0.12);
        assert_eq!(verdict.category, AnomalyCategory::ThermalFailure);
        assert_eq!(verdict.detail_text, "Extreme Temp, (Confirmed by AI)");
        assert_eq!(verdict.row, row);

        let quiet = reconcile(row, OutlierScore::INLIER);
        assert!(quiet.is_anomaly_global);
        assert_eq!(quiet.detail_text, "Extreme Temp");
    }
}
