//! Pre-normalized JSON activities.
//!
//! The document already has the `RawActivity` shape, except that
//! `start_time` may be missing and samples may carry absolute timestamps.
//! The start resolves like every other format: document start, then first
//! sample timestamp, then the caller's fallback.

use super::{offset_seconds, resolve_start, ActivityDecoder, ActivityFormat};
use crate::error::DecodeError;
use crate::models::{DeviceTotals, Lap, RawActivity, Sample, Sport};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct JsonDocument {
    #[serde(default)]
    sport: Sport,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    samples: Vec<JsonSample>,
    #[serde(default)]
    laps: Vec<Lap>,
    #[serde(default)]
    totals: DeviceTotals,
}

#[derive(Debug, Deserialize)]
struct JsonSample {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    sample: Sample,
}

/// JSON decoder
pub struct JsonDecoder;

impl JsonDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityDecoder for JsonDecoder {
    fn format(&self) -> ActivityFormat {
        ActivityFormat::Json
    }

    fn decode(
        &self,
        payload: &[u8],
        fallback_start: DateTime<Utc>,
    ) -> Result<RawActivity, DecodeError> {
        let document: JsonDocument = serde_json::from_slice(payload)
            .map_err(|e| DecodeError::parse(ActivityFormat::Json, e.to_string()))?;

        let first_timestamp = document.samples.iter().find_map(|s| s.timestamp);
        let start = resolve_start(document.start_time, first_timestamp, fallback_start);

        let mut activity = RawActivity::new(document.sport, start);
        activity.name = document.name;
        activity.laps = document.laps;
        activity.totals = document.totals;
        activity.samples = document
            .samples
            .into_iter()
            .map(|json| match json.timestamp {
                Some(ts) => Sample {
                    time_offset_seconds: offset_seconds(ts, start),
                    ..json.sample
                },
                None => json.sample,
            })
            .collect();

        activity.source_format = Some(ActivityFormat::Json);
        activity.sort_samples();
        Ok(activity)
    }
}
