//! Per-activity metric derivation.
//!
//! Turns a decoded [`RawActivity`] into an [`ActivitySummary`]. Every path is
//! total: degenerate input (no samples, no power, FTP of zero) yields zeros or
//! `None`, never an error or a non-finite number.

use crate::decode::gpx::haversine_distance;
use crate::models::{ActivitySummary, RawActivity, Sample};
use crate::numeric::{finite_or_zero, mean, round_dp, safe_div};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::instrument;

/// Tunable parameters of the metrics calculator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Rolling window for normalized power, in seconds of activity time
    pub np_window_seconds: u32,
    /// Below this many power samples NP falls back to the plain mean
    pub np_min_samples: usize,
    /// Single elevation steps at or above this are treated as sensor jumps.
    /// `None` keeps every positive step.
    pub elevation_noise_threshold_m: Option<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            np_window_seconds: 30,
            np_min_samples: 30,
            elevation_noise_threshold_m: Some(50.0),
        }
    }
}

/// Metrics calculator
#[derive(Debug, Clone, Default)]
pub struct MetricsCalculator {
    config: MetricsConfig,
}

impl MetricsCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Build the summary for one activity
    #[instrument(skip(self, raw), fields(sport = %raw.sport, samples = raw.samples.len()))]
    pub fn summarize(&self, raw: &RawActivity, reference_ftp: f64) -> ActivitySummary {
        let samples = &raw.samples;
        let mut summary = ActivitySummary::empty(raw.sport, raw.start_time);

        let duration_seconds = resolve_duration(raw);
        summary.duration_seconds = duration_seconds;
        let duration = duration_seconds as f64;

        summary.distance_m = round_dp(resolve_distance(raw), 2);
        summary.elevation_gain_m = round_dp(self.resolve_elevation_gain(raw), 2);

        // Power
        let powers = finite_values(samples, |s| s.power);
        let avg_power = mean(&powers);
        let max_power = powers.iter().copied().reduce(f64::max);
        let normalized_power = self.normalized_power(samples);

        summary.avg_power = avg_power.map(|p| round_dp(p, 2));
        summary.max_power = max_power.map(|p| round_dp(p, 2));
        summary.normalized_power = normalized_power.map(|p| round_dp(p, 2));

        let np = normalized_power.unwrap_or(0.0);
        let (tss, intensity_factor) = training_stress(duration, np, reference_ftp);
        summary.tss = round_dp(tss, 2);
        summary.intensity_factor = round_dp(intensity_factor, 2);
        summary.variability_index = round_dp(
            variability_index(np, avg_power.unwrap_or(0.0), reference_ftp),
            2,
        );

        // Heart rate: device totals win over sample aggregates
        let heart_rates = finite_values(samples, |s| s.heart_rate);
        summary.avg_heart_rate = positive(raw.totals.avg_heart_rate)
            .or_else(|| mean(&heart_rates))
            .map(round_bpm);
        summary.max_heart_rate = positive(raw.totals.max_heart_rate)
            .or_else(|| heart_rates.iter().copied().reduce(f64::max))
            .map(round_bpm);

        let cadences = finite_values(samples, |s| s.cadence);
        summary.avg_cadence = mean(&cadences).map(|c| round_dp(c, 2));

        // Speed in km/h
        let speeds = finite_values(samples, |s| s.speed_kmh);
        let avg_speed = mean(&speeds).or_else(|| {
            (summary.distance_m > 0.0 && duration > 0.0)
                .then(|| summary.distance_m / duration * 3.6)
        });
        summary.avg_speed = avg_speed.map(|s| round_dp(s, 2));
        summary.max_speed = speeds.iter().copied().reduce(f64::max).map(|s| round_dp(s, 2));

        summary.calories = resolve_calories(raw, avg_power, duration);

        if let Some(first) = samples.iter().find(|s| s.has_position()) {
            summary.start_lat = first.lat.map(|v| round_dp(v, 2));
            summary.start_lon = first.lon.map(|v| round_dp(v, 2));
        }

        summary
    }

    /// Normalized power over a time-based rolling window.
    ///
    /// Each sample closes a window covering the preceding `np_window_seconds`
    /// of activity time; windows are only emitted once a full window has
    /// elapsed since the first power sample. With 1 Hz input this matches the
    /// classic 30-sample rolling mean.
    pub fn normalized_power(&self, samples: &[Sample]) -> Option<f64> {
        let points: Vec<(u32, f64)> = samples
            .iter()
            .filter_map(|s| {
                s.power
                    .filter(|p| p.is_finite())
                    .map(|p| (s.time_offset_seconds, p))
            })
            .collect();

        if points.is_empty() {
            return None;
        }

        let plain_mean = points.iter().map(|(_, p)| p).sum::<f64>() / points.len() as f64;
        if points.len() < self.config.np_min_samples {
            return Some(plain_mean);
        }

        let window = self.config.np_window_seconds.max(1);
        let first_offset = points[0].0;
        let mut in_window: VecDeque<(u32, f64)> = VecDeque::new();
        let mut window_sum = 0.0;
        let mut fourth_power_sum = 0.0;
        let mut window_count = 0usize;

        for &(offset, power) in &points {
            in_window.push_back((offset, power));
            window_sum += power;

            while let Some(&(oldest, oldest_power)) = in_window.front() {
                if offset.saturating_sub(oldest) >= window {
                    window_sum -= oldest_power;
                    in_window.pop_front();
                } else {
                    break;
                }
            }

            if offset.saturating_sub(first_offset) + 1 >= window {
                let rolling = window_sum / in_window.len() as f64;
                fourth_power_sum += rolling.powi(4);
                window_count += 1;
            }
        }

        if window_count == 0 {
            return Some(plain_mean);
        }

        Some(finite_or_zero((fourth_power_sum / window_count as f64).powf(0.25)))
    }

    /// Sum of positive elevation steps, skipping steps at or above the noise
    /// threshold
    pub fn elevation_gain(&self, samples: &[Sample]) -> f64 {
        let elevations = finite_values(samples, |s| s.elevation_m);
        elevations
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|delta| *delta > 0.0)
            .filter(|delta| match self.config.elevation_noise_threshold_m {
                Some(threshold) => *delta < threshold,
                None => true,
            })
            .sum()
    }

    fn resolve_elevation_gain(&self, raw: &RawActivity) -> f64 {
        if raw.samples.iter().any(|s| s.elevation_m.is_some()) {
            self.elevation_gain(&raw.samples)
        } else {
            positive(raw.totals.ascent_m).unwrap_or(0.0)
        }
    }
}

/// Summarize with the default configuration
pub fn summarize(raw: &RawActivity, reference_ftp: f64) -> ActivitySummary {
    MetricsCalculator::new().summarize(raw, reference_ftp)
}

/// `(tss, intensity_factor)`; both zero when NP or FTP is unavailable
pub fn training_stress(duration_seconds: f64, normalized_power: f64, ftp: f64) -> (f64, f64) {
    if normalized_power <= 0.0 || ftp <= 0.0 || !normalized_power.is_finite() || !ftp.is_finite() {
        return (0.0, 0.0);
    }

    let intensity_factor = normalized_power / ftp;
    let tss = safe_div(
        duration_seconds * normalized_power * intensity_factor,
        ftp * 3600.0,
    ) * 100.0;

    (finite_or_zero(tss), finite_or_zero(intensity_factor))
}

/// NP / average power. Zero without NP or FTP, 1 when average power is zero.
pub fn variability_index(normalized_power: f64, avg_power: f64, ftp: f64) -> f64 {
    if normalized_power <= 0.0 || ftp <= 0.0 {
        return 0.0;
    }
    if avg_power <= 0.0 {
        return 1.0;
    }
    safe_div(normalized_power, avg_power)
}

/// Device timer time, else elapsed time, else the last sample offset
fn resolve_duration(raw: &RawActivity) -> u32 {
    positive(raw.totals.timer_seconds)
        .or_else(|| positive(raw.totals.elapsed_seconds))
        .map(|secs| secs.round().min(u32::MAX as f64) as u32)
        .unwrap_or_else(|| raw.last_offset())
}

/// Device distance, else the furthest cumulative distance, else haversine
/// over the sampled positions
fn resolve_distance(raw: &RawActivity) -> f64 {
    if let Some(distance) = positive(raw.totals.distance_m) {
        return distance;
    }

    let cumulative = finite_values(&raw.samples, |s| s.cumulative_distance_m)
        .into_iter()
        .reduce(f64::max);
    if let Some(distance) = cumulative.filter(|d| *d > 0.0) {
        return distance;
    }

    let positions: Vec<(f64, f64)> = raw
        .samples
        .iter()
        .filter_map(|s| Some((s.lat?, s.lon?)))
        .collect();
    positions
        .windows(2)
        .map(|w| haversine_distance(w[0].0, w[0].1, w[1].0, w[1].1))
        .sum()
}

/// Device calories, else mechanical work in kJ from average power
fn resolve_calories(raw: &RawActivity, avg_power: Option<f64>, duration: f64) -> u32 {
    let calories = positive(raw.totals.calories)
        .or_else(|| avg_power.map(|p| p * duration / 1000.0))
        .unwrap_or(0.0);
    finite_or_zero(calories).round().clamp(0.0, u32::MAX as f64) as u32
}

fn finite_values(samples: &[Sample], field: impl Fn(&Sample) -> Option<f64>) -> Vec<f64> {
    samples
        .iter()
        .filter_map(field)
        .filter(|v| v.is_finite())
        .collect()
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn round_bpm(value: f64) -> u32 {
    value.round().clamp(0.0, u32::MAX as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceTotals, Sport};
    use chrono::{TimeZone, Utc};

    fn activity_with_power(powers: &[f64]) -> RawActivity {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut activity = RawActivity::new(Sport::Cycling, start);
        activity.samples = powers
            .iter()
            .enumerate()
            .map(|(i, p)| Sample {
                power: Some(*p),
                ..Sample::at(i as u32)
            })
            .collect();
        activity
    }

    #[test]
    fn test_empty_activity_summary() {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let raw = RawActivity::new(Sport::Running, start);
        let summary = summarize(&raw, 250.0);

        assert_eq!(summary.duration_seconds, 0);
        assert_eq!(summary.distance_m, 0.0);
        assert_eq!(summary.calories, 0);
        assert_eq!(summary.tss, 0.0);
        assert_eq!(summary.intensity_factor, 0.0);
        assert_eq!(summary.variability_index, 0.0);
        assert!(summary.normalized_power.is_none());
    }

    #[test]
    fn test_np_falls_back_to_mean_below_min_samples() {
        let raw = activity_with_power(&[100.0, 200.0, 300.0]);
        let np = MetricsCalculator::new().normalized_power(&raw.samples);
        assert_eq!(np, Some(200.0));
    }

    #[test]
    fn test_np_constant_power_equals_power() {
        let raw = activity_with_power(&vec![250.0; 600]);
        let np = MetricsCalculator::new().normalized_power(&raw.samples).unwrap();
        assert!((np - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_np_exceeds_average_for_variable_power() {
        let powers: Vec<f64> = (0..1200)
            .map(|i| if (i / 60) % 2 == 0 { 350.0 } else { 100.0 })
            .collect();
        let raw = activity_with_power(&powers);
        let calc = MetricsCalculator::new();
        let np = calc.normalized_power(&raw.samples).unwrap();

        assert!(np > 225.0, "np was {}", np);
        assert!(np < 350.0);
    }

    #[test]
    fn test_np_time_window_with_sparse_sampling() {
        // one sample every 2 s: a 30 s window holds 15 samples
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut raw = RawActivity::new(Sport::Cycling, start);
        raw.samples = (0..100)
            .map(|i| Sample {
                power: Some(200.0),
                ..Sample::at(i * 2)
            })
            .collect();

        let np = MetricsCalculator::new().normalized_power(&raw.samples).unwrap();
        assert!((np - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_tss_one_hour_at_ftp_is_100() {
        let raw = activity_with_power(&vec![250.0; 3600]);
        let summary = summarize(&raw, 250.0);

        assert_eq!(summary.duration_seconds, 3599);
        assert_eq!(summary.intensity_factor, 1.0);
        assert!((summary.tss - 99.97).abs() < 0.01);
        assert_eq!(summary.variability_index, 1.0);
    }

    #[test]
    fn test_tss_zero_without_ftp() {
        let raw = activity_with_power(&vec![250.0; 100]);
        let summary = summarize(&raw, 0.0);
        assert_eq!(summary.tss, 0.0);
        assert_eq!(summary.intensity_factor, 0.0);
        assert_eq!(summary.variability_index, 0.0);
        assert_eq!(summary.normalized_power, Some(250.0));
    }

    #[test]
    fn test_variability_index_rules() {
        assert_eq!(variability_index(0.0, 200.0, 250.0), 0.0);
        assert_eq!(variability_index(210.0, 0.0, 250.0), 1.0);
        assert!((variability_index(220.0, 200.0, 250.0) - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_duration_prefers_device_totals() {
        let mut raw = activity_with_power(&[200.0; 10]);
        raw.totals = DeviceTotals {
            timer_seconds: Some(3000.4),
            elapsed_seconds: Some(3300.0),
            ..DeviceTotals::default()
        };
        assert_eq!(summarize(&raw, 250.0).duration_seconds, 3000);

        raw.totals.timer_seconds = Some(0.0);
        assert_eq!(summarize(&raw, 250.0).duration_seconds, 3300);

        raw.totals.elapsed_seconds = None;
        assert_eq!(summarize(&raw, 250.0).duration_seconds, 9);
    }

    #[test]
    fn test_elevation_gain_skips_jumps() {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut raw = RawActivity::new(Sport::Hiking, start);
        raw.samples = [100.0, 105.0, 103.0, 160.0, 170.0]
            .iter()
            .enumerate()
            .map(|(i, e)| Sample {
                elevation_m: Some(*e),
                ..Sample::at(i as u32)
            })
            .collect();

        let calc = MetricsCalculator::new();
        // +5, -2, +57 (dropped), +10
        assert_eq!(calc.elevation_gain(&raw.samples), 15.0);

        let unfiltered = MetricsCalculator::with_config(MetricsConfig {
            elevation_noise_threshold_m: None,
            ..MetricsConfig::default()
        });
        assert_eq!(unfiltered.elevation_gain(&raw.samples), 72.0);
    }

    #[test]
    fn test_calorie_fallback_from_power() {
        let raw = activity_with_power(&vec![200.0; 1001]);
        let summary = summarize(&raw, 250.0);
        // 200 W * 1000 s / 1000
        assert_eq!(summary.calories, 200);
    }

    #[test]
    fn test_distance_fallback_to_positions() {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut raw = RawActivity::new(Sport::Running, start);
        raw.samples = vec![
            Sample {
                lat: Some(0.0),
                lon: Some(0.0),
                ..Sample::at(0)
            },
            Sample {
                lat: Some(0.01),
                lon: Some(0.0),
                ..Sample::at(300)
            },
        ];

        let summary = summarize(&raw, 0.0);
        assert!((summary.distance_m - 1111.95).abs() < 0.5);
        assert_eq!(summary.start_lat, Some(0.0));
        assert_eq!(summary.duration_seconds, 300);
        assert!(summary.avg_speed.unwrap() > 13.0);
    }

    #[test]
    fn test_heart_rate_prefers_device_then_samples() {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut raw = RawActivity::new(Sport::Running, start);
        raw.samples = vec![
            Sample {
                heart_rate: Some(140.0),
                ..Sample::at(0)
            },
            Sample {
                heart_rate: Some(151.0),
                ..Sample::at(1)
            },
        ];

        let summary = summarize(&raw, 0.0);
        assert_eq!(summary.avg_heart_rate, Some(146));
        assert_eq!(summary.max_heart_rate, Some(151));

        raw.totals.avg_heart_rate = Some(139.0);
        let summary = summarize(&raw, 0.0);
        assert_eq!(summary.avg_heart_rate, Some(139));
    }
}
