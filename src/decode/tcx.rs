//! Training Center XML decoder.
//!
//! Streams the document with `quick-xml`, keeping a stack of open element
//! names so text nodes can be matched by their parent path.

use super::{offset_seconds, parse_number, parse_timestamp, resolve_start, ActivityDecoder, ActivityFormat};
use crate::error::DecodeError;
use crate::models::{Lap, RawActivity, Sample, Sport};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// TCX decoder
pub struct TcxDecoder;

impl TcxDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TcxDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityDecoder for TcxDecoder {
    fn format(&self) -> ActivityFormat {
        ActivityFormat::Tcx
    }

    fn decode(
        &self,
        payload: &[u8],
        fallback_start: DateTime<Utc>,
    ) -> Result<RawActivity, DecodeError> {
        let mut state = TcxState::default();
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
                        .map_err(|e| DecodeError::parse(ActivityFormat::Tcx, e.to_string()))?;
                    state.text(&path, &text);
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(DecodeError::parse(
                        ActivityFormat::Tcx,
                        format!("at byte {}: {}", reader.buffer_position(), e),
                    ))
                }
                _ => {}
            }
            buf.clear();
        }

        if !path.is_empty() {
            return Err(DecodeError::Corrupt {
                format: ActivityFormat::Tcx,
                reason: format!("document ends inside <{}>", path.join("/")),
            });
        }

        state.finish(fallback_start)
    }
}

pub(super) fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// True when the innermost elements of `path` are exactly `suffix`
pub(super) fn path_ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

#[derive(Default)]
struct PendingPoint {
    timestamp: Option<DateTime<Utc>>,
    sample: Sample,
}

#[derive(Default)]
struct PendingLap {
    start_time: Option<DateTime<Utc>>,
    lap: Lap,
    calories: Option<f64>,
}

#[derive(Default)]
struct TcxState {
    /// `<Activity>` elements opened so far
    activity_count: usize,
    sport: Option<String>,
    activity_id: Option<DateTime<Utc>>,
    name: Option<String>,
    laps: Vec<PendingLap>,
    points: Vec<PendingPoint>,
    current_lap: Option<PendingLap>,
    current_point: Option<PendingPoint>,
}

impl TcxState {
    /// Multi-activity files keep only the first activity
    fn in_first_activity(&self) -> bool {
        self.activity_count <= 1
    }

    fn open(&mut self, name: &str, e: &BytesStart<'_>) -> Result<(), DecodeError> {
        if name == "Activity" {
            self.activity_count += 1;
            if self.activity_count == 1 {
                self.sport = attribute(e, "Sport")?;
            }
            return Ok(());
        }
        if !self.in_first_activity() {
            return Ok(());
        }

        match name {
            "Lap" => {
                let start_time = attribute(e, "StartTime")?.and_then(|s| parse_timestamp(&s));
                self.current_lap = Some(PendingLap {
                    start_time,
                    ..PendingLap::default()
                });
            }
            "Trackpoint" => self.current_point = Some(PendingPoint::default()),
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &str) {
        match name {
            "Lap" => {
                if let Some(lap) = self.current_lap.take() {
                    self.laps.push(lap);
                }
            }
            "Trackpoint" => {
                if let Some(point) = self.current_point.take() {
                    self.points.push(point);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, path: &[String], text: &str) {
        if !self.in_first_activity() {
            return;
        }
        if let Some(point) = self.current_point.as_mut() {
            let sample = &mut point.sample;
            if path_ends_with(path, &["Trackpoint", "Time"]) {
                point.timestamp = parse_timestamp(text);
            } else if path_ends_with(path, &["Position", "LatitudeDegrees"]) {
                sample.lat = parse_number(text);
            } else if path_ends_with(path, &["Position", "LongitudeDegrees"]) {
                sample.lon = parse_number(text);
            } else if path_ends_with(path, &["Trackpoint", "AltitudeMeters"]) {
                sample.elevation_m = parse_number(text);
            } else if path_ends_with(path, &["Trackpoint", "DistanceMeters"]) {
                sample.cumulative_distance_m = parse_number(text);
            } else if path_ends_with(path, &["HeartRateBpm", "Value"]) {
                sample.heart_rate = parse_number(text);
            } else if path_ends_with(path, &["Trackpoint", "Cadence"])
                || path_ends_with(path, &["TPX", "RunCadence"])
            {
                sample.cadence = parse_number(text);
            } else if path_ends_with(path, &["TPX", "Watts"]) {
                sample.power = parse_number(text);
            } else if path_ends_with(path, &["TPX", "Speed"]) {
                sample.speed_kmh = parse_number(text).map(|mps| mps * 3.6);
            }
            return;
        }

        if let Some(lap) = self.current_lap.as_mut() {
            if path_ends_with(path, &["Lap", "TotalTimeSeconds"]) {
                lap.lap.timer_seconds = parse_number(text);
            } else if path_ends_with(path, &["Lap", "DistanceMeters"]) {
                lap.lap.distance_m = parse_number(text);
            } else if path_ends_with(path, &["Lap", "Calories"]) {
                lap.calories = parse_number(text);
            } else if path_ends_with(path, &["AverageHeartRateBpm", "Value"]) {
                lap.lap.avg_heart_rate = parse_number(text);
            } else if path_ends_with(path, &["MaximumHeartRateBpm", "Value"]) {
                lap.lap.max_heart_rate = parse_number(text);
            } else if path_ends_with(path, &["LX", "AvgWatts"]) {
                lap.lap.avg_power = parse_number(text);
            }
            return;
        }

        if path_ends_with(path, &["Activity", "Id"]) && self.activity_id.is_none() {
            self.activity_id = parse_timestamp(text);
        } else if path_ends_with(path, &["Activity", "Notes"]) && self.name.is_none() {
            self.name = Some(text.to_string());
        }
    }

    fn finish(self, fallback_start: DateTime<Utc>) -> Result<RawActivity, DecodeError> {
        if self.activity_count == 0 {
            return Err(DecodeError::parse(
                ActivityFormat::Tcx,
                "no Activity element found",
            ));
        }

        let session_start = self
            .activity_id
            .or_else(|| self.laps.iter().find_map(|lap| lap.start_time));
        let first_sample = self.points.iter().filter_map(|p| p.timestamp).min();
        let start_time = resolve_start(session_start, first_sample, fallback_start);

        let sport = self
            .sport
            .as_deref()
            .map(Sport::from_tag)
            .unwrap_or_default();

        let mut activity = RawActivity::new(sport, start_time);
        activity.name = self.name;
        activity.source_format = Some(ActivityFormat::Tcx);

        let totals = &mut activity.totals;
        totals.timer_seconds = sum_present(self.laps.iter().map(|l| l.lap.timer_seconds));
        totals.distance_m = sum_present(self.laps.iter().map(|l| l.lap.distance_m));
        totals.calories = sum_present(self.laps.iter().map(|l| l.calories));
        totals.avg_heart_rate = weighted_lap_heart_rate(&self.laps);
        totals.max_heart_rate = self
            .laps
            .iter()
            .filter_map(|l| l.lap.max_heart_rate)
            .fold(None, |acc: Option<f64>, hr| Some(acc.map_or(hr, |m| m.max(hr))));

        // Points without their own time inherit the previous point's offset
        let mut last_offset = 0;
        activity.samples = self
            .points
            .into_iter()
            .map(|point| {
                if let Some(ts) = point.timestamp {
                    last_offset = offset_seconds(ts, start_time);
                }
                Sample {
                    time_offset_seconds: last_offset,
                    ..point.sample
                }
            })
            .collect();
        activity.sort_samples();

        activity.laps = self
            .laps
            .into_iter()
            .map(|pending| Lap {
                start_offset_seconds: pending
                    .start_time
                    .map(|ts| offset_seconds(ts, start_time))
                    .unwrap_or(0),
                ..pending.lap
            })
            .collect();

        Ok(activity)
    }
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Result<Option<String>, DecodeError> {
    let attr = e
        .try_get_attribute(key)
        .map_err(|err| DecodeError::parse(ActivityFormat::Tcx, err.to_string()))?;

    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|err| DecodeError::parse(ActivityFormat::Tcx, err.to_string()))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn sum_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

fn weighted_lap_heart_rate(laps: &[PendingLap]) -> Option<f64> {
    let mut weighted = 0.0;
    let mut seconds = 0.0;
    for lap in laps {
        if let (Some(hr), Some(secs)) = (lap.lap.avg_heart_rate, lap.lap.timer_seconds) {
            weighted += hr * secs;
            seconds += secs;
        }
    }
    if seconds > 0.0 {
        Some(weighted / seconds)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE_TCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2"
    xmlns:ns3="http://www.garmin.com/xmlschemas/ActivityExtension/v2">
  <Activities>
    <Activity Sport="Biking">
      <Id>2024-09-23T07:00:00Z</Id>
      <Lap StartTime="2024-09-23T07:00:00Z">
        <TotalTimeSeconds>600</TotalTimeSeconds>
        <DistanceMeters>5000</DistanceMeters>
        <Calories>150</Calories>
        <AverageHeartRateBpm><Value>140</Value></AverageHeartRateBpm>
        <MaximumHeartRateBpm><Value>160</Value></MaximumHeartRateBpm>
        <Track>
          <Trackpoint>
            <Time>2024-09-23T07:00:00Z</Time>
            <Position>
              <LatitudeDegrees>47.3769</LatitudeDegrees>
              <LongitudeDegrees>8.5417</LongitudeDegrees>
            </Position>
            <AltitudeMeters>408.0</AltitudeMeters>
            <DistanceMeters>0</DistanceMeters>
            <HeartRateBpm><Value>120</Value></HeartRateBpm>
            <Cadence>85</Cadence>
            <Extensions>
              <ns3:TPX>
                <ns3:Speed>8.0</ns3:Speed>
                <ns3:Watts>210</ns3:Watts>
              </ns3:TPX>
            </Extensions>
          </Trackpoint>
          <Trackpoint>
            <Time>2024-09-23T07:00:10Z</Time>
            <HeartRateBpm><Value>125</Value></HeartRateBpm>
            <Cadence>not-a-number</Cadence>
          </Trackpoint>
        </Track>
      </Lap>
      <Lap StartTime="2024-09-23T07:10:00Z">
        <TotalTimeSeconds>300</TotalTimeSeconds>
        <DistanceMeters>2500</DistanceMeters>
        <Calories>80</Calories>
        <AverageHeartRateBpm><Value>170</Value></AverageHeartRateBpm>
        <MaximumHeartRateBpm><Value>182</Value></MaximumHeartRateBpm>
      </Lap>
    </Activity>
  </Activities>
</TrainingCenterDatabase>"#;

    fn fallback() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_tcx_activity() {
        let activity = TcxDecoder::new()
            .decode(SAMPLE_TCX.as_bytes(), fallback())
            .unwrap();

        assert_eq!(activity.sport, Sport::Cycling);
        assert_eq!(
            activity.start_time,
            Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap()
        );
        assert_eq!(activity.source_format, Some(ActivityFormat::Tcx));
        assert_eq!(activity.laps.len(), 2);
        assert_eq!(activity.laps[1].start_offset_seconds, 600);

        assert_eq!(activity.totals.timer_seconds, Some(900.0));
        assert_eq!(activity.totals.distance_m, Some(7500.0));
        assert_eq!(activity.totals.calories, Some(230.0));
        assert_eq!(activity.totals.max_heart_rate, Some(182.0));
        // (140 * 600 + 170 * 300) / 900
        assert_eq!(activity.totals.avg_heart_rate, Some(150.0));
    }

    #[test]
    fn test_decode_tcx_trackpoints() {
        let activity = TcxDecoder::new()
            .decode(SAMPLE_TCX.as_bytes(), fallback())
            .unwrap();

        assert_eq!(activity.samples.len(), 2);
        let first = &activity.samples[0];
        assert_eq!(first.time_offset_seconds, 0);
        assert_eq!(first.lat, Some(47.3769));
        assert_eq!(first.lon, Some(8.5417));
        assert_eq!(first.power, Some(210.0));
        assert_eq!(first.heart_rate, Some(120.0));
        assert!((first.speed_kmh.unwrap() - 28.8).abs() < 1e-9);

        let second = &activity.samples[1];
        assert_eq!(second.time_offset_seconds, 10);
        assert_eq!(second.cadence, None);
        assert!(!second.has_position());
    }

    #[test]
    fn test_later_activities_are_ignored() {
        let xml = r#"<TrainingCenterDatabase><Activities>
            <Activity Sport="Running">
              <Id>2024-09-23T07:00:00Z</Id>
              <Lap StartTime="2024-09-23T07:00:00Z">
                <TotalTimeSeconds>600</TotalTimeSeconds>
                <Track><Trackpoint><Time>2024-09-23T07:00:00Z</Time></Trackpoint></Track>
              </Lap>
            </Activity>
            <Activity Sport="Biking">
              <Id>2024-09-24T07:00:00Z</Id>
              <Notes>second</Notes>
              <Lap StartTime="2024-09-24T07:00:00Z">
                <TotalTimeSeconds>3600</TotalTimeSeconds>
                <Track>
                  <Trackpoint><Time>2024-09-24T07:00:00Z</Time></Trackpoint>
                  <Trackpoint><Time>2024-09-24T07:00:10Z</Time></Trackpoint>
                </Track>
              </Lap>
            </Activity>
        </Activities></TrainingCenterDatabase>"#;
        let activity = TcxDecoder::new().decode(xml.as_bytes(), fallback()).unwrap();

        assert_eq!(activity.sport, Sport::Running);
        assert_eq!(activity.laps.len(), 1);
        assert_eq!(activity.samples.len(), 1);
        assert_eq!(activity.totals.timer_seconds, Some(600.0));
        assert!(activity.name.is_none());
        assert_eq!(
            activity.start_time,
            Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_activity_is_parse_error() {
        let xml = "<TrainingCenterDatabase><Activities/></TrainingCenterDatabase>";
        let err = TcxDecoder::new().decode(xml.as_bytes(), fallback()).unwrap_err();
        assert!(matches!(err, DecodeError::Parse { .. }));
    }

    #[test]
    fn test_truncated_document_is_rejected() {
        let truncated = &SAMPLE_TCX[..SAMPLE_TCX.len() / 2];
        let err = TcxDecoder::new()
            .decode(truncated.as_bytes(), fallback())
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Corrupt { .. } | DecodeError::Parse { .. }
        ));
    }

    #[test]
    fn test_fallback_start_without_timestamps() {
        let xml = r#"<TrainingCenterDatabase><Activities><Activity Sport="Running">
            <Lap><Track><Trackpoint><HeartRateBpm><Value>130</Value></HeartRateBpm></Trackpoint></Track></Lap>
            </Activity></Activities></TrainingCenterDatabase>"#;
        let activity = TcxDecoder::new().decode(xml.as_bytes(), fallback()).unwrap();

        assert_eq!(activity.start_time, fallback());
        assert_eq!(activity.sport, Sport::Running);
        assert_eq!(activity.samples[0].time_offset_seconds, 0);
    }

    #[test]
    fn test_path_ends_with() {
        let path: Vec<String> = ["Trackpoint", "HeartRateBpm", "Value"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(path_ends_with(&path, &["HeartRateBpm", "Value"]));
        assert!(!path_ends_with(&path, &["AverageHeartRateBpm", "Value"]));
        assert!(!path_ends_with(&path[..1], &["HeartRateBpm", "Value"]));
    }
}
