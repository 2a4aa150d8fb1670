use crate::models::ActivitySummary;
use crate::numeric::{finite_or_zero, round_dp};
use serde::{Deserialize, Serialize};

/// Thresholds used when an activity arrives without a usable TSS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TssEstimatorConfig {
    /// Functional threshold power in watts
    pub ftp: Option<f64>,
    /// Threshold (lactate) heart rate in bpm
    pub threshold_heart_rate: Option<f64>,
    /// Intensity factor assumed by the duration-only estimate
    pub flat_intensity_factor: f64,
}

impl Default for TssEstimatorConfig {
    fn default() -> Self {
        Self {
            ftp: None,
            threshold_heart_rate: None,
            flat_intensity_factor: 0.7,
        }
    }
}

/// TSS estimate with method used
#[derive(Debug, Clone, PartialEq)]
pub struct TssEstimate {
    pub tss: f64,
    pub method: TssMethod,
}

/// Methods used for TSS calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TssMethod {
    Reported,        // TSS already present on the summary
    PowerBased,      // duration × NP × IF / (FTP × 36)
    IntensityFactor, // duration × IF² × 100
    HeartRateBased,  // hrTSS from the threshold HR ratio
    Estimated,       // Flat duration-only fallback
}

/// TSS estimation fallback chain
#[derive(Debug, Clone, Default)]
pub struct TssEstimator {
    config: TssEstimatorConfig,
}

impl TssEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TssEstimatorConfig) -> Self {
        Self { config }
    }

    /// Estimate TSS for a summary using the best available method
    pub fn estimate(&self, summary: &ActivitySummary) -> TssEstimate {
        if summary.tss > 0.0 && summary.tss.is_finite() {
            return TssEstimate {
                tss: summary.tss,
                method: TssMethod::Reported,
            };
        }

        let duration_seconds = summary.duration_seconds as f64;

        // Try power-based TSS first
        if let (Some(np), Some(ftp)) = (summary.normalized_power, self.config.ftp) {
            if let Some(tss) = Self::power_tss(duration_seconds, np, ftp) {
                return Self::estimate_of(tss, TssMethod::PowerBased);
            }
        }

        if summary.intensity_factor > 0.0 {
            let tss = Self::intensity_factor_tss(duration_seconds, summary.intensity_factor);
            return Self::estimate_of(tss, TssMethod::IntensityFactor);
        }

        // Try heart rate TSS as fallback
        if let (Some(avg_hr), Some(threshold)) =
            (summary.avg_heart_rate, self.config.threshold_heart_rate)
        {
            if let Some(tss) = Self::heart_rate_tss(duration_seconds, avg_hr as f64, threshold) {
                return Self::estimate_of(tss, TssMethod::HeartRateBased);
            }
        }

        // Final fallback: flat intensity assumption
        let tss = self.flat_tss(duration_seconds);
        Self::estimate_of(tss, TssMethod::Estimated)
    }

    /// TSS = duration_s × NP × IF / (FTP × 36)
    pub fn power_tss(duration_seconds: f64, normalized_power: f64, ftp: f64) -> Option<f64> {
        if normalized_power <= 0.0 || ftp <= 0.0 {
            return None;
        }
        let intensity_factor = normalized_power / ftp;
        Some(duration_seconds * normalized_power * intensity_factor / (ftp * 36.0))
    }

    /// TSS = duration_hours × IF² × 100
    pub fn intensity_factor_tss(duration_seconds: f64, intensity_factor: f64) -> f64 {
        duration_seconds / 3600.0 * intensity_factor * intensity_factor * 100.0
    }

    /// hrTSS = duration_minutes × (avgHR / thresholdHR)² × 100 / 60
    pub fn heart_rate_tss(duration_seconds: f64, avg_hr: f64, threshold_hr: f64) -> Option<f64> {
        if avg_hr <= 0.0 || threshold_hr <= 0.0 {
            return None;
        }
        let ratio = avg_hr / threshold_hr;
        Some(duration_seconds / 60.0 * ratio * ratio * 100.0 / 60.0)
    }

    /// duration_minutes × IF² × 100 / 60 with the configured flat IF
    pub fn flat_tss(&self, duration_seconds: f64) -> f64 {
        let intensity = self.config.flat_intensity_factor;
        duration_seconds / 60.0 * intensity * intensity * 100.0 / 60.0
    }

    fn estimate_of(tss: f64, method: TssMethod) -> TssEstimate {
        TssEstimate {
            tss: round_dp(finite_or_zero(tss).max(0.0), 2),
            method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sport;
    use chrono::{TimeZone, Utc};

    fn create_test_summary(duration_seconds: u32) -> ActivitySummary {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut summary = ActivitySummary::empty(Sport::Cycling, start);
        summary.duration_seconds = duration_seconds;
        summary
    }

    fn estimator() -> TssEstimator {
        TssEstimator::with_config(TssEstimatorConfig {
            ftp: Some(250.0),
            threshold_heart_rate: Some(165.0),
            ..TssEstimatorConfig::default()
        })
    }

    #[test]
    fn test_reported_tss_wins() {
        let mut summary = create_test_summary(3600);
        summary.tss = 87.5;
        summary.normalized_power = Some(300.0);

        let estimate = estimator().estimate(&summary);
        assert_eq!(estimate.method, TssMethod::Reported);
        assert_eq!(estimate.tss, 87.5);
    }

    #[test]
    fn test_power_based_tss() {
        let mut summary = create_test_summary(3600);
        summary.normalized_power = Some(250.0);

        let estimate = estimator().estimate(&summary);
        assert_eq!(estimate.method, TssMethod::PowerBased);
        assert_eq!(estimate.tss, 100.0);
    }

    #[test]
    fn test_intensity_factor_tss() {
        let mut summary = create_test_summary(7200);
        summary.intensity_factor = 0.8;

        let estimate = TssEstimator::new().estimate(&summary);
        assert_eq!(estimate.method, TssMethod::IntensityFactor);
        assert_eq!(estimate.tss, 128.0);
    }

    #[test]
    fn test_heart_rate_tss() {
        let mut summary = create_test_summary(3600);
        summary.avg_heart_rate = Some(165);

        let estimate = estimator().estimate(&summary);
        assert_eq!(estimate.method, TssMethod::HeartRateBased);
        assert_eq!(estimate.tss, 100.0);
    }

    #[test]
    fn test_flat_fallback() {
        let summary = create_test_summary(3600);
        let estimate = TssEstimator::new().estimate(&summary);

        assert_eq!(estimate.method, TssMethod::Estimated);
        assert_eq!(estimate.tss, 49.0);
    }

    #[test]
    fn test_zero_duration_is_zero() {
        let summary = create_test_summary(0);
        assert_eq!(TssEstimator::new().estimate(&summary).tss, 0.0);
    }
}
