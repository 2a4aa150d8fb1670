//! Compact time-series persistence format.
//!
//! Long activities are uniformly subsampled to at most [`MAX_POINTS`] points,
//! each stored as a positional array
//! `[time_s, power_w, heart_rate_bpm, cadence, speed_mps, elevation_m]`.
//! The GPS route is subsampled separately to at most [`MAX_ROUTE_POINTS`].

use crate::models::Sample;
use crate::numeric::round_dp;
use serde::{Deserialize, Serialize};

pub const MAX_POINTS: usize = 300;
pub const MAX_ROUTE_POINTS: usize = 100;

/// `[time_s, power_w, heart_rate_bpm, cadence, speed_mps, elevation_m]`.
///
/// Missing channels are stored as 0. Speed keeps one decimal, everything else
/// is an integer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompactPoint(pub i64, pub i64, pub i64, pub i64, pub f64, pub i64);

impl CompactPoint {
    pub fn from_sample(sample: &Sample) -> Self {
        CompactPoint(
            sample.time_offset_seconds as i64,
            round_channel(sample.power),
            round_channel(sample.heart_rate),
            round_channel(sample.cadence),
            sample
                .speed_kmh
                .map(|kmh| round_dp(kmh / 3.6, 1))
                .unwrap_or(0.0),
            round_channel(sample.elevation_m),
        )
    }

    pub fn time_seconds(&self) -> i64 {
        self.0
    }
}

/// Subsampled activity stream as persisted alongside the summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactSeries {
    pub points: Vec<CompactPoint>,
    /// Sample count before subsampling
    pub total_points: usize,
    pub stride: usize,
    /// `[lat, lon]` pairs rounded to 5 decimals
    pub route: Vec<[f64; 2]>,
    /// Coordinate-bearing sample count before subsampling
    pub route_total_points: usize,
    pub route_stride: usize,
}

impl CompactSeries {
    pub fn from_samples(samples: &[Sample]) -> Self {
        let stride = stride_for(samples.len(), MAX_POINTS);
        let points = samples
            .iter()
            .step_by(stride)
            .map(CompactPoint::from_sample)
            .collect();

        let positions: Vec<(f64, f64)> = samples
            .iter()
            .filter_map(|s| Some((s.lat?, s.lon?)))
            .filter(|(lat, lon)| lat.is_finite() && lon.is_finite())
            .collect();
        let route_stride = stride_for(positions.len(), MAX_ROUTE_POINTS);
        let route = positions
            .iter()
            .step_by(route_stride)
            .map(|(lat, lon)| [round_dp(*lat, 5), round_dp(*lon, 5)])
            .collect();

        CompactSeries {
            points,
            total_points: samples.len(),
            stride,
            route,
            route_total_points: positions.len(),
            route_stride,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_offset(&self) -> Option<i64> {
        self.points.first().map(CompactPoint::time_seconds)
    }

    pub fn last_offset(&self) -> Option<i64> {
        self.points.last().map(CompactPoint::time_seconds)
    }
}

/// `ceil(total / max)`, never below 1
pub fn stride_for(total: usize, max: usize) -> usize {
    if max == 0 {
        return total.max(1);
    }
    total.div_ceil(max).max(1)
}

fn round_channel(value: Option<f64>) -> i64 {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.round() as i64)
        .unwrap_or(0)
}
