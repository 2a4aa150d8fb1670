//! Daily athlete state classification.
//!
//! Glycogen, recovery and hydration are classified from the rolling window of
//! planned-vs-actual deltas through [`ClassificationThresholds`]. The numbers
//! are policy and come from configuration.

use super::{BaselineProfile, DailyDelta, PlannedWorkout};
use crate::pmc::DayLoad;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlycogenStatus {
    Depleted,
    Low,
    Normal,
}

impl GlycogenStatus {
    pub fn is_reduced(&self) -> bool {
        matches!(self, GlycogenStatus::Low | GlycogenStatus::Depleted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryNeed {
    Low,
    Medium,
    High,
    Critical,
}

impl RecoveryNeed {
    pub fn is_elevated(&self) -> bool {
        matches!(self, RecoveryNeed::High | RecoveryNeed::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HydrationStatus {
    Optimal,
    Suboptimal,
    Dehydrated,
}

macro_rules! lowercase_display {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = format!("{:?}", self).to_lowercase();
                f.write_str(&text)
            }
        }
    };
}

lowercase_display!(GlycogenStatus);
lowercase_display!(RecoveryNeed);
lowercase_display!(HydrationStatus);

/// Macro percentage-point deltas from the baseline split
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroAdjustments {
    pub carbs_pct: f64,
    pub protein_pct: f64,
    pub fat_pct: f64,
}

/// Classification and capacity policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationThresholds {
    /// Actual TSS over the last 48 h at which glycogen counts as depleted
    pub depleted_tss_48h: f64,
    /// Actual TSS over the last 48 h at which glycogen counts as low
    pub low_tss_48h: f64,
    /// 7-day actual-minus-planned TSS at which glycogen counts as low
    pub low_tss_delta_7d: f64,
    /// 48 h carbohydrate shortfall (g) marking depleted glycogen
    pub depleted_carb_deficit_g: f64,
    /// 48 h carbohydrate shortfall (g) marking low glycogen
    pub low_carb_deficit_g: f64,

    /// Fatigue score boundaries for the recovery need classes
    pub critical_fatigue: f64,
    pub high_fatigue: f64,
    pub medium_fatigue: f64,
    /// Fatigue points per point of negative TSB
    pub fatigue_per_tsb: f64,
    /// Fatigue points per TSS of 7-day overshoot
    pub fatigue_per_delta_tss: f64,

    /// 48 h fluid shortfall (L) for the hydration classes
    pub suboptimal_fluid_deficit_l: f64,
    pub dehydrated_fluid_deficit_l: f64,

    /// Capacity is CTL times this factor when a chronicle is supplied
    pub capacity_per_ctl: f64,
    /// Capacity used without chronicle data
    pub default_capacity_tss: f64,
    pub min_capacity_tss: f64,
    pub capacity_multiplier_low: f64,
    pub capacity_multiplier_medium: f64,
    pub capacity_multiplier_high: f64,
    pub capacity_multiplier_critical: f64,
}

impl Default for ClassificationThresholds {
    fn default() -> Self {
        Self {
            depleted_tss_48h: 250.0,
            low_tss_48h: 150.0,
            low_tss_delta_7d: 100.0,
            depleted_carb_deficit_g: 300.0,
            low_carb_deficit_g: 150.0,
            critical_fatigue: 85.0,
            high_fatigue: 70.0,
            medium_fatigue: 45.0,
            fatigue_per_tsb: 2.0,
            fatigue_per_delta_tss: 0.1,
            suboptimal_fluid_deficit_l: 0.5,
            dehydrated_fluid_deficit_l: 1.5,
            capacity_per_ctl: 1.5,
            default_capacity_tss: 100.0,
            min_capacity_tss: 40.0,
            capacity_multiplier_low: 1.3,
            capacity_multiplier_medium: 1.0,
            capacity_multiplier_high: 0.7,
            capacity_multiplier_critical: 0.4,
        }
    }
}

/// Per-athlete, per-date state. Recomputed and overwritten on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteDailyState {
    pub athlete_id: String,
    pub date: NaiveDate,
    pub kcal_target: u32,
    pub macro_adjustments: MacroAdjustments,
    pub glycogen_status: GlycogenStatus,
    pub recovery_need: RecoveryNeed,
    pub hydration_status: HydrationStatus,
    /// 0 (fresh) to 100 (exhausted)
    pub fatigue_score: f64,
    pub tss_capacity: f64,
    pub recommended_zone: u8,
    pub max_zone_reached: Option<u8>,
    pub computed_at: DateTime<Utc>,
}

/// Aggregates over the delta window feeding the classifiers
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeltaWindow {
    pub actual_tss_48h: f64,
    pub tss_delta_7d: f64,
    pub carbs_delta_48h: f64,
    pub fluid_delta_48h: f64,
    pub max_zone: Option<u8>,
}

impl DeltaWindow {
    /// Sum the deltas dated within the 7 days ending at `date`
    pub fn collect(date: NaiveDate, deltas: &[DailyDelta]) -> Self {
        let week_start = date.checked_sub_days(Days::new(6)).unwrap_or(date);
        let two_day_start = date.checked_sub_days(Days::new(1)).unwrap_or(date);

        let mut window = DeltaWindow::default();
        for delta in deltas.iter().filter(|d| d.date >= week_start && d.date <= date) {
            window.tss_delta_7d += delta.tss_delta();
            window.max_zone = window.max_zone.max(delta.max_zone);

            if delta.date >= two_day_start {
                window.actual_tss_48h += delta.actual_tss.max(0.0);
                window.carbs_delta_48h += delta.carbs_delta_g;
                window.fluid_delta_48h += delta.fluid_delta_l;
            }
        }
        window
    }
}

impl ClassificationThresholds {
    pub fn glycogen_status(&self, window: &DeltaWindow) -> GlycogenStatus {
        if window.actual_tss_48h >= self.depleted_tss_48h
            || window.carbs_delta_48h <= -self.depleted_carb_deficit_g
        {
            GlycogenStatus::Depleted
        } else if window.actual_tss_48h >= self.low_tss_48h
            || window.tss_delta_7d >= self.low_tss_delta_7d
            || window.carbs_delta_48h <= -self.low_carb_deficit_g
        {
            GlycogenStatus::Low
        } else {
            GlycogenStatus::Normal
        }
    }

    /// 50 at balance, rising with negative TSB and with 7-day overshoot
    pub fn fatigue_score(&self, window: &DeltaWindow, load: Option<&DayLoad>) -> f64 {
        let tsb = load.map(|l| l.tsb).filter(|t| t.is_finite()).unwrap_or(0.0);
        let score = 50.0 - tsb * self.fatigue_per_tsb + window.tss_delta_7d * self.fatigue_per_delta_tss;
        if score.is_finite() {
            score.clamp(0.0, 100.0)
        } else {
            50.0
        }
    }

    pub fn recovery_need(&self, fatigue_score: f64) -> RecoveryNeed {
        if fatigue_score >= self.critical_fatigue {
            RecoveryNeed::Critical
        } else if fatigue_score >= self.high_fatigue {
            RecoveryNeed::High
        } else if fatigue_score >= self.medium_fatigue {
            RecoveryNeed::Medium
        } else {
            RecoveryNeed::Low
        }
    }

    pub fn hydration_status(&self, window: &DeltaWindow) -> HydrationStatus {
        if window.fluid_delta_48h <= -self.dehydrated_fluid_deficit_l {
            HydrationStatus::Dehydrated
        } else if window.fluid_delta_48h <= -self.suboptimal_fluid_deficit_l {
            HydrationStatus::Suboptimal
        } else {
            HydrationStatus::Optimal
        }
    }

    /// TSS the athlete can absorb today
    pub fn tss_capacity(&self, recovery_need: RecoveryNeed, load: Option<&DayLoad>) -> f64 {
        let base = load
            .map(|l| l.ctl * self.capacity_per_ctl)
            .filter(|c| c.is_finite() && *c > 0.0)
            .unwrap_or(self.default_capacity_tss);

        let multiplier = match recovery_need {
            RecoveryNeed::Low => self.capacity_multiplier_low,
            RecoveryNeed::Medium => self.capacity_multiplier_medium,
            RecoveryNeed::High => self.capacity_multiplier_high,
            RecoveryNeed::Critical => self.capacity_multiplier_critical,
        };

        (base * multiplier).max(self.min_capacity_tss)
    }
}

/// Highest zone advisable given the state
pub fn recommended_zone(
    planned: &PlannedWorkout,
    glycogen: GlycogenStatus,
    recovery_need: RecoveryNeed,
) -> u8 {
    let recovery_cap = match recovery_need {
        RecoveryNeed::Low => 5,
        RecoveryNeed::Medium => 3,
        RecoveryNeed::High => 2,
        RecoveryNeed::Critical => 1,
    };
    let glycogen_cap = if glycogen == GlycogenStatus::Depleted { 2 } else { 5 };

    planned.zone.clamp(1, 5).min(recovery_cap).min(glycogen_cap)
}

/// Upper bounds of power zones 1-4 as fractions of FTP
pub const POWER_ZONE_LIMITS: [f64; 4] = [0.55, 0.75, 0.90, 1.05];

/// Power zone of a session intensity factor; `None` without power data
pub fn zone_for_intensity(intensity_factor: f64) -> Option<u8> {
    if !intensity_factor.is_finite() || intensity_factor <= 0.0 {
        return None;
    }
    let below = POWER_ZONE_LIMITS
        .iter()
        .take_while(|limit| intensity_factor >= **limit)
        .count();
    Some(below as u8 + 1)
}

/// Daily energy target: baseline plus the training load, scaled up when
/// glycogen is reduced and never below BMR
pub fn kcal_target(
    baseline: &BaselineProfile,
    training_tss: f64,
    glycogen: GlycogenStatus,
    kcal_per_tss: f64,
    low_glycogen_bonus: f64,
    depleted_glycogen_bonus: f64,
) -> u32 {
    let training_kcal = training_tss.max(0.0) * kcal_per_tss;
    let bonus = match glycogen {
        GlycogenStatus::Depleted => depleted_glycogen_bonus,
        GlycogenStatus::Low => low_glycogen_bonus,
        GlycogenStatus::Normal => 0.0,
    };

    let target = (baseline.daily_kcal + training_kcal) * (1.0 + bonus);
    let target = target.max(baseline.bmr_kcal);
    if target.is_finite() {
        target.round().clamp(0.0, u32::MAX as f64) as u32
    } else {
        baseline.bmr_kcal.max(0.0).round() as u32
    }
}
