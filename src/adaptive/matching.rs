//! Planned-vs-actual session matching.
//!
//! A planned session is matched with an actual one on the same date, of the
//! same sport (unless the policy relaxes that) and with the closest duration
//! inside the tolerance. Planned sessions left over count as missed, actual
//! sessions left over count as unplanned load.

use super::state::zone_for_intensity;
use super::{DailyDelta, PlannedWorkout};
use crate::models::{ActivitySummary, Sport};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingPolicy {
    pub require_same_sport: bool,
    /// Allowed |actual - planned| duration as a fraction of the planned one
    pub duration_tolerance: f64,
}

impl Default for MatchingPolicy {
    fn default() -> Self {
        Self {
            require_same_sport: true,
            duration_tolerance: 0.5,
        }
    }
}

/// A completed session as seen by the matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualSession {
    pub date: NaiveDate,
    pub sport: Sport,
    pub duration_minutes: u32,
    pub tss: f64,
    #[serde(default)]
    pub max_zone: Option<u8>,
}

impl ActualSession {
    /// The zone comes from the session intensity factor, so it stays empty
    /// for activities summarized without power or FTP
    pub fn from_summary(summary: &ActivitySummary) -> Self {
        Self {
            date: summary.date(),
            sport: summary.activity_type,
            duration_minutes: (summary.duration_seconds as f64 / 60.0).round() as u32,
            tss: summary.tss,
            max_zone: zone_for_intensity(summary.intensity_factor),
        }
    }

    pub fn with_max_zone(mut self, zone: u8) -> Self {
        self.max_zone = Some(zone);
        self
    }
}

/// Nutrition intake deviation for a day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeDelta {
    pub date: NaiveDate,
    #[serde(default)]
    pub carbs_delta_g: f64,
    #[serde(default)]
    pub fluid_delta_l: f64,
}

/// Outcome for one planned or actual session, by index into the inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionMatch {
    Matched { planned: usize, actual: usize },
    Missed { planned: usize },
    Unplanned { actual: usize },
}

impl MatchingPolicy {
    fn compatible(&self, planned: &PlannedWorkout, actual: &ActualSession) -> Option<f64> {
        if planned.date != actual.date {
            return None;
        }
        if self.require_same_sport && planned.sport != actual.sport {
            return None;
        }

        let expected = planned.duration_minutes.max(1) as f64;
        let deviation = (actual.duration_minutes as f64 - planned.duration_minutes as f64).abs() / expected;
        (deviation <= self.duration_tolerance).then_some(deviation)
    }

    /// Greedy matching in plan order; each actual session is used at most once
    pub fn match_sessions(&self, plan: &[PlannedWorkout], actual: &[ActualSession]) -> Vec<SessionMatch> {
        let mut used = vec![false; actual.len()];
        let mut matches = Vec::with_capacity(plan.len() + actual.len());

        for (p_idx, planned) in plan.iter().enumerate() {
            let best = actual
                .iter()
                .enumerate()
                .filter(|(a_idx, _)| !used[*a_idx])
                .filter_map(|(a_idx, session)| self.compatible(planned, session).map(|d| (a_idx, d)))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            match best {
                Some((a_idx, _)) => {
                    used[a_idx] = true;
                    matches.push(SessionMatch::Matched {
                        planned: p_idx,
                        actual: a_idx,
                    });
                }
                None => matches.push(SessionMatch::Missed { planned: p_idx }),
            }
        }

        matches.extend(
            used.iter()
                .enumerate()
                .filter(|(_, taken)| !**taken)
                .map(|(a_idx, _)| SessionMatch::Unplanned { actual: a_idx }),
        );
        matches
    }
}

/// Roll matched sessions and intake up into one delta per date
pub fn daily_deltas(
    plan: &[PlannedWorkout],
    actual: &[ActualSession],
    intake: &[IntakeDelta],
    policy: &MatchingPolicy,
) -> Vec<DailyDelta> {
    let mut days: BTreeMap<NaiveDate, DailyDelta> = BTreeMap::new();

    for planned in plan {
        let day = days.entry(planned.date).or_insert_with(|| DailyDelta::new(planned.date));
        day.planned_tss += planned.target_tss.max(0.0);
        day.planned_minutes += planned.duration_minutes;
        day.planned_zone = day.planned_zone.max(Some(planned.zone));
    }

    for session in actual {
        let day = days.entry(session.date).or_insert_with(|| DailyDelta::new(session.date));
        if session.tss.is_finite() {
            day.actual_tss += session.tss.max(0.0);
        }
        day.actual_minutes += session.duration_minutes;
        day.max_zone = day.max_zone.max(session.max_zone);
    }

    for outcome in policy.match_sessions(plan, actual) {
        match outcome {
            SessionMatch::Missed { planned } => {
                if let Some(day) = days.get_mut(&plan[planned].date) {
                    day.missed_sessions += 1;
                }
            }
            SessionMatch::Unplanned { actual: a_idx } => {
                if let Some(day) = days.get_mut(&actual[a_idx].date) {
                    day.unplanned_sessions += 1;
                }
            }
            SessionMatch::Matched { .. } => {}
        }
    }

    for entry in intake {
        let day = days.entry(entry.date).or_insert_with(|| DailyDelta::new(entry.date));
        day.carbs_delta_g += entry.carbs_delta_g;
        day.fluid_delta_l += entry.fluid_delta_l;
    }

    days.into_values().collect()
}
