use super::state::{AthleteDailyState, GlycogenStatus, HydrationStatus};
use super::{BaselineProfile, PlannedWorkout};
use serde::{Deserialize, Serialize};

/// Zone at or above which a session counts as high intensity
pub const HIGH_INTENSITY_ZONE: u8 = 4;

const LONG_SESSION_MINUTES: u32 = 90;
const ELECTROLYTE_SESSION_MINUTES: u32 = 60;
const CAFFEINE_FATIGUE_LIMIT: f64 = 70.0;
const CAFFEINE_MG_PER_KG: f64 = 3.0;

/// Carbohydrate, protein, caffeine and electrolyte plan around the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelingAdaptation {
    pub pre_workout_carbs_g: u32,
    pub intra_workout_carbs_g_per_hour: u32,
    pub post_workout_carbs_g: u32,
    pub post_workout_protein_g: u32,
    /// `None` when caffeine is advised against
    pub caffeine_mg: Option<u32>,
    pub electrolytes: bool,
}

pub fn adapt(
    state: &AthleteDailyState,
    planned: &PlannedWorkout,
    baseline: &BaselineProfile,
) -> FuelingAdaptation {
    let pre_workout_carbs_g = match state.glycogen_status {
        GlycogenStatus::Depleted => 60,
        GlycogenStatus::Low => 45,
        GlycogenStatus::Normal => 30,
    };

    let intra_workout_carbs_g_per_hour = if planned.duration_minutes > LONG_SESSION_MINUTES {
        if planned.zone >= HIGH_INTENSITY_ZONE {
            90
        } else {
            60
        }
    } else {
        30
    };

    let (post_workout_carbs_g, post_workout_protein_g) = if state.recovery_need.is_elevated() {
        (80, 35)
    } else {
        (50, 25)
    };

    let caffeine_mg = if state.fatigue_score > CAFFEINE_FATIGUE_LIMIT {
        None
    } else {
        Some((baseline.weight_kg.max(0.0) * CAFFEINE_MG_PER_KG).round() as u32)
    };

    let electrolytes = planned.duration_minutes > ELECTROLYTE_SESSION_MINUTES
        || state.hydration_status != HydrationStatus::Optimal;

    FuelingAdaptation {
        pre_workout_carbs_g,
        intra_workout_carbs_g_per_hour,
        post_workout_carbs_g,
        post_workout_protein_g,
        caffeine_mg,
        electrolytes,
    }
}
