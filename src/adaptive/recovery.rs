use super::state::{AthleteDailyState, RecoveryNeed};
use serde::{Deserialize, Serialize};

const ACTIVE_RECOVERY_FATIGUE_LIMIT: f64 = 80.0;
const COLD_THERAPY_FATIGUE: f64 = 70.0;
const FOAM_ROLLING_FATIGUE: f64 = 50.0;

/// Sleep and recovery modality targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAdaptation {
    pub sleep_hours: f64,
    pub active_recovery: bool,
    pub stretching_minutes: u32,
    pub cold_therapy: bool,
    pub foam_rolling: bool,
}

pub fn adapt(state: &AthleteDailyState) -> RecoveryAdaptation {
    let sleep_hours = match state.recovery_need {
        RecoveryNeed::Critical => 9.0,
        RecoveryNeed::High => 8.5,
        _ => 7.5,
    };

    RecoveryAdaptation {
        sleep_hours,
        active_recovery: state.recovery_need < RecoveryNeed::Critical
            && state.fatigue_score < ACTIVE_RECOVERY_FATIGUE_LIMIT,
        stretching_minutes: if state.recovery_need.is_elevated() { 20 } else { 10 },
        cold_therapy: state.fatigue_score > COLD_THERAPY_FATIGUE,
        foam_rolling: state.fatigue_score > FOAM_ROLLING_FATIGUE,
    }
}
