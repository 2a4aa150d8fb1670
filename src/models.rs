use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decode::ActivityFormat;

/// Sport types recognised in activity files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Cycling,
    Running,
    Swimming,
    Walking,
    Hiking,
    Rowing,
    Other,
}

impl Sport {
    /// Map a free-form sport tag from a device file onto a known sport.
    ///
    /// Devices disagree on naming ("Biking", "ride", "cycling", "run", ...), so
    /// the match is on lowercase prefixes.
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        if tag.contains("cycl") || tag.contains("bik") || tag.contains("ride") {
            Sport::Cycling
        } else if tag.contains("swim") {
            Sport::Swimming
        } else if tag.contains("run") || tag.contains("jog") {
            Sport::Running
        } else if tag.contains("walk") {
            Sport::Walking
        } else if tag.contains("hik") {
            Sport::Hiking
        } else if tag.contains("rowing") || tag.starts_with("row") {
            Sport::Rowing
        } else {
            Sport::Other
        }
    }
}

impl Default for Sport {
    fn default() -> Self {
        Sport::Other
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sport::Cycling => "cycling",
            Sport::Running => "running",
            Sport::Swimming => "swimming",
            Sport::Walking => "walking",
            Sport::Hiking => "hiking",
            Sport::Rowing => "rowing",
            Sport::Other => "other",
        };
        f.write_str(name)
    }
}

/// Workout types for categorizing training sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkoutType {
    Recovery,
    Endurance,
    Tempo,
    Threshold,
    Interval,
    VO2Max,
    Race,
}

/// Individual sample in an activity time series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the activity's resolved start time
    #[serde(default)]
    pub time_offset_seconds: u32,

    /// Power output in watts
    #[serde(default)]
    pub power: Option<f64>,

    /// Heart rate in beats per minute
    #[serde(default)]
    pub heart_rate: Option<f64>,

    /// Cadence (rpm or steps per minute)
    #[serde(default)]
    pub cadence: Option<f64>,

    /// Speed in km/h
    #[serde(default)]
    pub speed_kmh: Option<f64>,

    /// Elevation in meters above sea level
    #[serde(default)]
    pub elevation_m: Option<f64>,

    /// Latitude in decimal degrees
    #[serde(default)]
    pub lat: Option<f64>,

    /// Longitude in decimal degrees
    #[serde(default)]
    pub lon: Option<f64>,

    /// Distance covered since start in meters
    #[serde(default)]
    pub cumulative_distance_m: Option<f64>,

    /// Temperature in degrees Celsius
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl Sample {
    pub fn at(time_offset_seconds: u32) -> Self {
        Sample {
            time_offset_seconds,
            ..Sample::default()
        }
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

/// Lap record reported by the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    /// Lap start relative to the activity start
    pub start_offset_seconds: u32,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub timer_seconds: Option<f64>,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub avg_heart_rate: Option<f64>,
    #[serde(default)]
    pub max_heart_rate: Option<f64>,
    #[serde(default)]
    pub avg_power: Option<f64>,
}

/// Coarse totals reported by the source device.
///
/// Any of these may be absent; the metrics calculator prefers them over
/// sample-derived values when present and non-zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTotals {
    /// Moving (timer) time in seconds
    #[serde(default)]
    pub timer_seconds: Option<f64>,
    /// Wall-clock elapsed time in seconds
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub calories: Option<f64>,
    #[serde(default)]
    pub avg_heart_rate: Option<f64>,
    #[serde(default)]
    pub max_heart_rate: Option<f64>,
    #[serde(default)]
    pub ascent_m: Option<f64>,
}

/// Decoded activity before any derived metrics are computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawActivity {
    #[serde(default)]
    pub sport: Sport,

    /// Resolved start: embedded session start, else first sample timestamp,
    /// else the caller's fallback
    pub start_time: DateTime<Utc>,

    #[serde(default)]
    pub name: Option<String>,

    /// Samples ordered by non-decreasing `time_offset_seconds`
    #[serde(default)]
    pub samples: Vec<Sample>,

    #[serde(default)]
    pub laps: Vec<Lap>,

    #[serde(default)]
    pub totals: DeviceTotals,

    #[serde(default)]
    pub source_format: Option<ActivityFormat>,
}

impl RawActivity {
    pub fn new(sport: Sport, start_time: DateTime<Utc>) -> Self {
        RawActivity {
            sport,
            start_time,
            name: None,
            samples: Vec::new(),
            laps: Vec::new(),
            totals: DeviceTotals::default(),
            source_format: None,
        }
    }

    /// Time offset of the last sample, 0 for an empty activity
    pub fn last_offset(&self) -> u32 {
        self.samples.last().map(|s| s.time_offset_seconds).unwrap_or(0)
    }

    /// Restore the ordering invariant after a decoder appended samples
    pub(crate) fn sort_samples(&mut self) {
        if !self
            .samples
            .windows(2)
            .all(|w| w[0].time_offset_seconds <= w[1].time_offset_seconds)
        {
            self.samples.sort_by_key(|s| s.time_offset_seconds);
        }
    }
}

/// Derived, immutable per-activity summary.
///
/// Values are rounded to their persisted precision when the summary is built:
/// integers for duration, calories and heart rate, two decimals elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub activity_type: Sport,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u32,
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub calories: u32,
    pub avg_heart_rate: Option<u32>,
    pub max_heart_rate: Option<u32>,
    pub avg_power: Option<f64>,
    pub max_power: Option<f64>,
    pub normalized_power: Option<f64>,
    pub avg_cadence: Option<f64>,
    /// km/h
    pub avg_speed: Option<f64>,
    /// km/h
    pub max_speed: Option<f64>,
    pub tss: f64,
    pub intensity_factor: f64,
    pub variability_index: f64,
    pub start_lat: Option<f64>,
    pub start_lon: Option<f64>,
}

impl ActivitySummary {
    /// Zero-valued summary for an activity without usable data
    pub fn empty(activity_type: Sport, start_time: DateTime<Utc>) -> Self {
        ActivitySummary {
            activity_type,
            start_time,
            duration_seconds: 0,
            distance_m: 0.0,
            elevation_gain_m: 0.0,
            calories: 0,
            avg_heart_rate: None,
            max_heart_rate: None,
            avg_power: None,
            max_power: None,
            normalized_power: None,
            avg_cadence: None,
            avg_speed: None,
            max_speed: None,
            tss: 0.0,
            intensity_factor: 0.0,
            variability_index: 0.0,
            start_lat: None,
            start_lon: None,
        }
    }

    /// Calendar day (UTC) the activity belongs to
    pub fn date(&self) -> NaiveDate {
        self.start_time.date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sport_enum_serialization() {
        let json = serde_json::to_string(&Sport::Cycling).unwrap();
        assert_eq!(json, "\"cycling\"");

        let deserialized: Sport = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, Sport::Cycling);
    }

    #[test]
    fn test_sport_from_device_tags() {
        assert_eq!(Sport::from_tag("Biking"), Sport::Cycling);
        assert_eq!(Sport::from_tag("cycling"), Sport::Cycling);
        assert_eq!(Sport::from_tag("Running"), Sport::Running);
        assert_eq!(Sport::from_tag("open_water_swimming"), Sport::Swimming);
        assert_eq!(Sport::from_tag("trail_running"), Sport::Running);
        assert_eq!(Sport::from_tag("indoor_cycling"), Sport::Cycling);
        assert_eq!(Sport::from_tag("indoor_rowing"), Sport::Rowing);
        assert_eq!(Sport::from_tag("swimming"), Sport::Swimming);
        assert_eq!(Sport::from_tag("Other"), Sport::Other);
    }

    #[test]
    fn test_sample_defaults_from_sparse_json() {
        let sample: Sample = serde_json::from_str(r#"{"time_offset_seconds": 12, "power": 250.0}"#).unwrap();
        assert_eq!(sample.time_offset_seconds, 12);
        assert_eq!(sample.power, Some(250.0));
        assert!(sample.heart_rate.is_none());
        assert!(!sample.has_position());
    }

    #[test]
    fn test_sort_samples_restores_order() {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut activity = RawActivity::new(Sport::Running, start);
        activity.samples = vec![Sample::at(5), Sample::at(1), Sample::at(3)];
        activity.sort_samples();

        let offsets: Vec<u32> = activity.samples.iter().map(|s| s.time_offset_seconds).collect();
        assert_eq!(offsets, vec![1, 3, 5]);
        assert_eq!(activity.last_offset(), 5);
    }

    #[test]
    fn test_summary_date_and_empty() {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 23, 30, 0).unwrap();
        let summary = ActivitySummary::empty(Sport::Cycling, start);
        assert_eq!(summary.date(), NaiveDate::from_ymd_opt(2024, 9, 23).unwrap());
        assert_eq!(summary.tss, 0.0);
        assert_eq!(summary.duration_seconds, 0);
    }
}
