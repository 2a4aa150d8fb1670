//! Binary FIT decoder built on `fitparser`.
//!
//! Session, lap and record messages are read. Everything else in the file is
//! ignored.

use super::{offset_seconds, resolve_start, ActivityDecoder, ActivityFormat};
use crate::error::DecodeError;
use crate::models::{DeviceTotals, Lap, RawActivity, Sample, Sport};
use chrono::{DateTime, Utc};
use fitparser::profile::MesgNum;
use fitparser::{FitDataRecord, Value};
use tracing::{debug, warn};

const FIT_SIGNATURE: &[u8; 4] = b".FIT";
const SEMICIRCLES_TO_DEGREES: f64 = 180.0 / 2_147_483_648.0;
const MPS_TO_KMH: f64 = 3.6;

/// FIT decoder
pub struct FitDecoder;

impl FitDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FitDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityDecoder for FitDecoder {
    fn format(&self) -> ActivityFormat {
        ActivityFormat::Fit
    }

    fn decode(
        &self,
        payload: &[u8],
        fallback_start: DateTime<Utc>,
    ) -> Result<RawActivity, DecodeError> {
        validate_header(payload)?;

        let records = fitparser::from_bytes(payload).map_err(|e| DecodeError::Corrupt {
            format: ActivityFormat::Fit,
            reason: e.to_string(),
        })?;

        Ok(build_activity(records, fallback_start))
    }
}

/// Check header size, signature and declared length before handing the bytes
/// to the parser.
fn validate_header(payload: &[u8]) -> Result<(), DecodeError> {
    if payload.len() < 12 {
        return Err(DecodeError::InvalidSignature {
            format: ActivityFormat::Fit,
            reason: format!("{} bytes is shorter than a FIT header", payload.len()),
        });
    }

    let header_size = payload[0] as usize;
    if header_size != 12 && header_size != 14 {
        return Err(DecodeError::InvalidSignature {
            format: ActivityFormat::Fit,
            reason: format!("unexpected header size {}", header_size),
        });
    }

    if &payload[8..12] != FIT_SIGNATURE {
        return Err(DecodeError::InvalidSignature {
            format: ActivityFormat::Fit,
            reason: "missing .FIT marker".to_string(),
        });
    }

    let data_size = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
    let expected = header_size + data_size + 2;
    if payload.len() < expected {
        return Err(DecodeError::Corrupt {
            format: ActivityFormat::Fit,
            reason: format!(
                "truncated stream: header declares {} bytes, got {}",
                expected,
                payload.len()
            ),
        });
    }

    Ok(())
}

#[derive(Default)]
struct SessionFields {
    start_time: Option<DateTime<Utc>>,
    sport: Option<String>,
    totals: DeviceTotals,
}

struct TimedSample {
    timestamp: DateTime<Utc>,
    sample: Sample,
}

struct TimedLap {
    start_time: Option<DateTime<Utc>>,
    lap: Lap,
}

fn build_activity(records: Vec<FitDataRecord>, fallback_start: DateTime<Utc>) -> RawActivity {
    let mut session: Option<SessionFields> = None;
    let mut sport_message: Option<String> = None;
    let mut laps = Vec::new();
    let mut samples = Vec::new();
    let mut untimed_records = 0usize;

    for record in &records {
        match record.kind() {
            MesgNum::Session => {
                if session.is_some() {
                    warn!("Multiple FIT sessions found; using the first");
                    continue;
                }
                session = Some(read_session(record));
            }
            MesgNum::Lap => laps.push(read_lap(record)),
            MesgNum::Record => match read_record(record) {
                Some(timed) => samples.push(timed),
                None => untimed_records += 1,
            },
            MesgNum::Sport => {
                if sport_message.is_none() {
                    sport_message = string_field(record, "sport");
                }
            }
            _ => {}
        }
    }

    if untimed_records > 0 {
        debug!(untimed_records, "Skipped FIT records without a timestamp");
    }

    let session = session.unwrap_or_default();
    let first_sample = samples.iter().map(|s| s.timestamp).min();
    let start_time = resolve_start(session.start_time, first_sample, fallback_start);

    let sport = session
        .sport
        .as_deref()
        .or(sport_message.as_deref())
        .map(Sport::from_tag)
        .unwrap_or_default();

    let mut activity = RawActivity::new(sport, start_time);
    activity.totals = session.totals;
    activity.source_format = Some(ActivityFormat::Fit);

    activity.samples = samples
        .into_iter()
        .map(|timed| Sample {
            time_offset_seconds: offset_seconds(timed.timestamp, start_time),
            ..timed.sample
        })
        .collect();
    activity.sort_samples();

    activity.laps = laps
        .into_iter()
        .map(|timed| Lap {
            start_offset_seconds: timed
                .start_time
                .map(|ts| offset_seconds(ts, start_time))
                .unwrap_or(0),
            ..timed.lap
        })
        .collect();

    activity
}

fn read_session(record: &FitDataRecord) -> SessionFields {
    let mut session = SessionFields::default();

    for field in record.fields() {
        match field.name() {
            "start_time" => session.start_time = timestamp_value(field.value()),
            "sport" => {
                if let Value::String(name) = field.value() {
                    session.sport = Some(name.clone());
                }
            }
            "total_timer_time" => session.totals.timer_seconds = fit_value_to_f64(field.value()),
            "total_elapsed_time" => {
                session.totals.elapsed_seconds = fit_value_to_f64(field.value())
            }
            "total_distance" => session.totals.distance_m = fit_value_to_f64(field.value()),
            "total_calories" => session.totals.calories = fit_value_to_f64(field.value()),
            "avg_heart_rate" => session.totals.avg_heart_rate = fit_value_to_f64(field.value()),
            "max_heart_rate" => session.totals.max_heart_rate = fit_value_to_f64(field.value()),
            "total_ascent" => session.totals.ascent_m = fit_value_to_f64(field.value()),
            _ => {}
        }
    }

    session
}

fn read_lap(record: &FitDataRecord) -> TimedLap {
    let mut lap = Lap::default();
    let mut start_time = None;

    for field in record.fields() {
        match field.name() {
            "start_time" => start_time = timestamp_value(field.value()),
            "total_elapsed_time" => lap.elapsed_seconds = fit_value_to_f64(field.value()),
            "total_timer_time" => lap.timer_seconds = fit_value_to_f64(field.value()),
            "total_distance" => lap.distance_m = fit_value_to_f64(field.value()),
            "avg_heart_rate" => lap.avg_heart_rate = fit_value_to_f64(field.value()),
            "max_heart_rate" => lap.max_heart_rate = fit_value_to_f64(field.value()),
            "avg_power" => lap.avg_power = fit_value_to_f64(field.value()),
            _ => {}
        }
    }

    TimedLap { start_time, lap }
}

fn read_record(record: &FitDataRecord) -> Option<TimedSample> {
    let mut sample = Sample::default();
    let mut timestamp = None;

    for field in record.fields() {
        let value = field.value();
        match field.name() {
            "timestamp" => timestamp = timestamp_value(value),
            "power" => sample.power = fit_value_to_f64(value),
            "heart_rate" => sample.heart_rate = fit_value_to_f64(value),
            "cadence" => sample.cadence = fit_value_to_f64(value),
            "speed" | "enhanced_speed" => {
                if let Some(mps) = fit_value_to_f64(value) {
                    sample.speed_kmh = Some(mps * MPS_TO_KMH);
                }
            }
            "altitude" | "enhanced_altitude" => sample.elevation_m = fit_value_to_f64(value),
            "position_lat" => {
                sample.lat = fit_value_to_f64(value).map(|v| v * SEMICIRCLES_TO_DEGREES)
            }
            "position_long" => {
                sample.lon = fit_value_to_f64(value).map(|v| v * SEMICIRCLES_TO_DEGREES)
            }
            "distance" => sample.cumulative_distance_m = fit_value_to_f64(value),
            "temperature" => sample.temperature = fit_value_to_f64(value),
            _ => {}
        }
    }

    timestamp.map(|timestamp| TimedSample { timestamp, sample })
}

fn timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Some((*ts).into()),
        _ => None,
    }
}

fn string_field(record: &FitDataRecord, name: &str) -> Option<String> {
    record
        .fields()
        .iter()
        .find(|field| field.name() == name)
        .and_then(|field| match field.value() {
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
}

fn fit_value_to_f64(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Float32(v) => *v as f64,
        Value::Float64(v) => *v,
        Value::SInt8(v) => *v as f64,
        Value::UInt8(v) => *v as f64,
        Value::UInt8z(v) => *v as f64,
        Value::Byte(v) => *v as f64,
        Value::SInt16(v) => *v as f64,
        Value::UInt16(v) => *v as f64,
        Value::UInt16z(v) => *v as f64,
        Value::SInt32(v) => *v as f64,
        Value::UInt32(v) => *v as f64,
        Value::UInt32z(v) => *v as f64,
        Value::SInt64(v) => *v as f64,
        Value::UInt64(v) => *v as f64,
        Value::UInt64z(v) => *v as f64,
        Value::Array(values) => return values.iter().find_map(fit_value_to_f64),
        _ => return None,
    };
    Some(v).filter(|v| v.is_finite())
}
