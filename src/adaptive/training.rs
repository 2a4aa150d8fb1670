use super::state::{AthleteDailyState, GlycogenStatus, RecoveryNeed};
use super::PlannedWorkout;
use crate::models::WorkoutType;
use crate::numeric::round_dp;
use serde::{Deserialize, Serialize};

const CRITICAL_MAX_MINUTES: u32 = 45;
const HIGH_MAX_MINUTES: u32 = 90;
const CRITICAL_INTENSITY_CAP: f64 = 0.6;
const HIGH_INTENSITY_CAP: f64 = 0.75;
const DEPLETED_INTENSITY_CAP: f64 = 0.7;

/// Adjusted session prescription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingAdaptation {
    pub tss_target: f64,
    pub max_duration_minutes: u32,
    /// 0-1 multiplier on the planned intensity
    pub intensity_cap: f64,
    pub workout_type: WorkoutType,
    pub zone: u8,
}

pub fn adapt(state: &AthleteDailyState, planned: &PlannedWorkout) -> TrainingAdaptation {
    let tss_target = round_dp(planned.target_tss.max(0.0).min(state.tss_capacity), 1);

    let max_duration_minutes = match state.recovery_need {
        RecoveryNeed::Critical => CRITICAL_MAX_MINUTES,
        RecoveryNeed::High => HIGH_MAX_MINUTES,
        _ => planned.duration_minutes,
    };

    // The tightest applicable cap wins
    let mut intensity_cap: f64 = 1.0;
    match state.recovery_need {
        RecoveryNeed::Critical => intensity_cap = intensity_cap.min(CRITICAL_INTENSITY_CAP),
        RecoveryNeed::High => intensity_cap = intensity_cap.min(HIGH_INTENSITY_CAP),
        _ => {}
    }
    if state.glycogen_status == GlycogenStatus::Depleted {
        intensity_cap = intensity_cap.min(DEPLETED_INTENSITY_CAP);
    }

    let workout_type = match state.recovery_need {
        RecoveryNeed::Critical => WorkoutType::Recovery,
        RecoveryNeed::High => match planned.workout_type {
            WorkoutType::Recovery => WorkoutType::Recovery,
            _ => WorkoutType::Endurance,
        },
        _ => planned.workout_type,
    };

    TrainingAdaptation {
        tss_target,
        max_duration_minutes,
        intensity_cap,
        workout_type,
        zone: state.recommended_zone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::state::{HydrationStatus, MacroAdjustments};
    use chrono::{NaiveDate, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 23).unwrap()
    }

    fn state(glycogen: GlycogenStatus, recovery: RecoveryNeed, capacity: f64) -> AthleteDailyState {
        AthleteDailyState {
            athlete_id: "athlete_1".to_string(),
            date: date(),
            kcal_target: 2800,
            macro_adjustments: MacroAdjustments::default(),
            glycogen_status: glycogen,
            recovery_need: recovery,
            hydration_status: HydrationStatus::Optimal,
            fatigue_score: 50.0,
            tss_capacity: capacity,
            recommended_zone: 3,
            max_zone_reached: None,
            computed_at: Utc::now(),
        }
    }

    fn hard_session() -> PlannedWorkout {
        PlannedWorkout {
            duration_minutes: 180,
            target_tss: 220.0,
            zone: 5,
            workout_type: WorkoutType::Interval,
            ..PlannedWorkout::default_for(date())
        }
    }

    #[test]
    fn test_critical_caps() {
        let out = adapt(&state(GlycogenStatus::Normal, RecoveryNeed::Critical, 40.0), &hard_session());

        assert_eq!(out.max_duration_minutes, 45);
        assert_eq!(out.intensity_cap, 0.6);
        assert_eq!(out.workout_type, WorkoutType::Recovery);
        assert_eq!(out.tss_target, 40.0);
    }

    #[test]
    fn test_high_need_downgrades_to_endurance() {
        let out = adapt(&state(GlycogenStatus::Normal, RecoveryNeed::High, 70.0), &hard_session());

        assert_eq!(out.max_duration_minutes, 90);
        assert_eq!(out.intensity_cap, 0.75);
        assert_eq!(out.workout_type, WorkoutType::Endurance);
    }

    #[test]
    fn test_depleted_glycogen_takes_tighter_cap() {
        let out = adapt(&state(GlycogenStatus::Depleted, RecoveryNeed::High, 70.0), &hard_session());
        assert_eq!(out.intensity_cap, 0.7);

        let out = adapt(&state(GlycogenStatus::Depleted, RecoveryNeed::Critical, 40.0), &hard_session());
        assert_eq!(out.intensity_cap, 0.6);
    }

    #[test]
    fn test_fresh_athlete_keeps_plan() {
        let out = adapt(&state(GlycogenStatus::Normal, RecoveryNeed::Low, 300.0), &hard_session());

        assert_eq!(out.max_duration_minutes, 180);
        assert_eq!(out.intensity_cap, 1.0);
        assert_eq!(out.workout_type, WorkoutType::Interval);
        assert_eq!(out.tss_target, 220.0);
    }
}
