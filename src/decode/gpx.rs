//! GPS Exchange decoder.
//!
//! Track points carry position, elevation and time. Garmin's
//! TrackPointExtension adds heart rate, cadence, power and temperature. GPX has
//! no device totals, so distance and elapsed time are derived from the points.

use super::tcx::{local_name, path_ends_with};
use super::{offset_seconds, parse_number, parse_timestamp, resolve_start, ActivityDecoder, ActivityFormat};
use crate::error::DecodeError;
use crate::models::{RawActivity, Sample, Sport};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two coordinates
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// GPX decoder
pub struct GpxDecoder;

impl GpxDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GpxDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityDecoder for GpxDecoder {
    fn format(&self) -> ActivityFormat {
        ActivityFormat::Gpx
    }

    fn decode(
        &self,
        payload: &[u8],
        fallback_start: DateTime<Utc>,
    ) -> Result<RawActivity, DecodeError> {
        let mut state = GpxState::default();
        let mut reader = Reader::from_reader(payload);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = local_name(&e);
                    state.open(&name, &e)?;
                    path.push(name);
                }
                Ok(Event::Empty(e)) => {
                    let name = local_name(&e);
                    state.open(&name, &e)?;
                    state.close(&name);
                }
                Ok(Event::End(_)) => {
                    if let Some(name) = path.pop() {
                        state.close(&name);
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| DecodeError::parse(ActivityFormat::Gpx, e.to_string()))?;
                    state.text(&path, &text);
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(DecodeError::parse(
                        ActivityFormat::Gpx,
                        format!("at byte {}: {}", reader.buffer_position(), e),
                    ))
                }
                _ => {}
            }
            buf.clear();
        }

        if !path.is_empty() {
            return Err(DecodeError::Corrupt {
                format: ActivityFormat::Gpx,
                reason: format!("document ends inside <{}>", path.join("/")),
            });
        }

        state.finish(fallback_start)
    }
}

#[derive(Default)]
struct PendingPoint {
    timestamp: Option<DateTime<Utc>>,
    sample: Sample,
}

#[derive(Default)]
struct GpxState {
    saw_root: bool,
    name: Option<String>,
    metadata_name: Option<String>,
    activity_type: Option<String>,
    points: Vec<PendingPoint>,
    current: Option<PendingPoint>,
}

impl GpxState {
    fn open(&mut self, name: &str, e: &BytesStart<'_>) -> Result<(), DecodeError> {
        match name {
            "gpx" => self.saw_root = true,
            "trkpt" => {
                let mut point = PendingPoint::default();
                point.sample.lat = coordinate(e, "lat")?;
                point.sample.lon = coordinate(e, "lon")?;
                self.current = Some(point);
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &str) {
        if name == "trkpt" {
            if let Some(point) = self.current.take() {
                self.points.push(point);
            }
        }
    }

    fn text(&mut self, path: &[String], text: &str) {
        if let Some(point) = self.current.as_mut() {
            let sample = &mut point.sample;
            match path.last().map(String::as_str) {
                Some("ele") => sample.elevation_m = parse_number(text),
                Some("time") => point.timestamp = parse_timestamp(text),
                Some("hr") => sample.heart_rate = parse_number(text),
                Some("cad") => sample.cadence = parse_number(text),
                Some("power") => sample.power = parse_number(text),
                Some("atemp") => sample.temperature = parse_number(text),
                Some("speed") => sample.speed_kmh = parse_number(text).map(|mps| mps * 3.6),
                _ => {}
            }
            return;
        }

        if path_ends_with(path, &["trk", "name"]) && self.name.is_none() {
            self.name = Some(text.to_string());
        } else if path_ends_with(path, &["metadata", "name"]) && self.metadata_name.is_none() {
            self.metadata_name = Some(text.to_string());
        } else if path_ends_with(path, &["trk", "type"]) && self.activity_type.is_none() {
            self.activity_type = Some(text.to_string());
        }
    }

    fn finish(self, fallback_start: DateTime<Utc>) -> Result<RawActivity, DecodeError> {
        if !self.saw_root {
            return Err(DecodeError::parse(ActivityFormat::Gpx, "no gpx root element"));
        }

        let first_ts = self.points.iter().filter_map(|p| p.timestamp).min();
        let last_ts = self.points.iter().filter_map(|p| p.timestamp).max();
        let start_time = resolve_start(None, first_ts, fallback_start);

        let sport = self
            .activity_type
            .as_deref()
            .map(Sport::from_tag)
            .unwrap_or_default();

        let mut activity = RawActivity::new(sport, start_time);
        // Track name wins over the document name
        activity.name = self.name.or(self.metadata_name);
        activity.source_format = Some(ActivityFormat::Gpx);

        let mut total_distance = 0.0;
        let mut last_offset = 0u32;
        let mut previous: Option<(f64, f64, u32)> = None;

        for point in self.points {
            let mut sample = point.sample;
            if let Some(ts) = point.timestamp {
                last_offset = offset_seconds(ts, start_time);
            }
            sample.time_offset_seconds = last_offset;

            if let (Some(lat), Some(lon)) = (sample.lat, sample.lon) {
                if let Some((prev_lat, prev_lon, prev_offset)) = previous {
                    let segment = haversine_distance(prev_lat, prev_lon, lat, lon);
                    total_distance += segment;

                    let dt = last_offset.saturating_sub(prev_offset);
                    if sample.speed_kmh.is_none() && dt > 0 {
                        sample.speed_kmh = Some(segment / dt as f64 * 3.6);
                    }
                }
                previous = Some((lat, lon, last_offset));
            }
            sample.cumulative_distance_m = Some(total_distance);
            activity.samples.push(sample);
        }
        activity.sort_samples();

        if !activity.samples.is_empty() {
            activity.totals.distance_m = Some(total_distance);
        }
        if let (Some(first), Some(last)) = (first_ts, last_ts) {
            activity.totals.elapsed_seconds = Some((last - first).num_seconds() as f64);
        }

        Ok(activity)
    }
}

fn coordinate(e: &BytesStart<'_>, key: &str) -> Result<Option<f64>, DecodeError> {
    let attr = e
        .try_get_attribute(key)
        .map_err(|err| DecodeError::parse(ActivityFormat::Gpx, err.to_string()))?;

    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|err| DecodeError::parse(ActivityFormat::Gpx, err.to_string()))?;
            Ok(parse_number(&value))
        }
        None => Ok(None),
    }
}
