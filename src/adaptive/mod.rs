//! Adaptive daily-state engine.
//!
//! Compares the last week of planned-vs-actual deltas against a baseline
//! metabolic profile and today's plan, classifies the athlete's state, and
//! derives four adaptation blocks (nutrition, fueling, training, recovery).
//! Every call recomputes from scratch; nothing is carried between calls.

pub mod fueling;
pub mod matching;
pub mod nutrition;
pub mod recovery;
pub mod state;
pub mod training;

use crate::error::EngineError;
use crate::models::{Sport, WorkoutType};
use crate::pmc::DayLoad;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

pub use fueling::FuelingAdaptation;
pub use matching::{ActualSession, IntakeDelta, MatchingPolicy, SessionMatch};
pub use nutrition::{NutritionAdaptation, NutritionPolicy};
pub use recovery::RecoveryAdaptation;
pub use state::{
    AthleteDailyState, ClassificationThresholds, DeltaWindow, GlycogenStatus, HydrationStatus,
    MacroAdjustments, RecoveryNeed,
};
pub use training::TrainingAdaptation;

/// Planned-minus-actual picture of one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyDelta {
    pub date: NaiveDate,
    pub planned_tss: f64,
    pub actual_tss: f64,
    pub planned_minutes: u32,
    pub actual_minutes: u32,
    pub planned_zone: Option<u8>,
    /// Highest zone reached in any actual session
    pub max_zone: Option<u8>,
    /// Carbohydrate intake minus target (g), negative for a shortfall
    pub carbs_delta_g: f64,
    /// Fluid intake minus target (L)
    pub fluid_delta_l: f64,
    pub missed_sessions: u32,
    pub unplanned_sessions: u32,
}

impl Default for DailyDelta {
    fn default() -> Self {
        Self::new(NaiveDate::default())
    }
}

impl DailyDelta {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            planned_tss: 0.0,
            actual_tss: 0.0,
            planned_minutes: 0,
            actual_minutes: 0,
            planned_zone: None,
            max_zone: None,
            carbs_delta_g: 0.0,
            fluid_delta_l: 0.0,
            missed_sessions: 0,
            unplanned_sessions: 0,
        }
    }

    /// Actual minus planned TSS; positive when the athlete did more
    pub fn tss_delta(&self) -> f64 {
        let delta = self.actual_tss - self.planned_tss;
        if delta.is_finite() {
            delta
        } else {
            0.0
        }
    }
}

/// A session on the training plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedWorkout {
    pub date: NaiveDate,
    #[serde(default)]
    pub sport: Sport,
    pub workout_type: WorkoutType,
    pub duration_minutes: u32,
    pub target_tss: f64,
    /// Target training zone, 1-5
    pub zone: u8,
}

impl PlannedWorkout {
    /// Generic session used when nothing is planned for `date`
    pub fn default_for(date: NaiveDate) -> Self {
        PlannedDefaults::default().workout_for(date)
    }
}

/// Assumptions filled in for a missing planned workout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannedDefaults {
    pub duration_minutes: u32,
    pub target_tss: f64,
    pub zone: u8,
    pub workout_type: WorkoutType,
}

impl Default for PlannedDefaults {
    fn default() -> Self {
        Self {
            duration_minutes: 60,
            target_tss: 80.0,
            zone: 2,
            workout_type: WorkoutType::Endurance,
        }
    }
}

impl PlannedDefaults {
    pub fn workout_for(&self, date: NaiveDate) -> PlannedWorkout {
        PlannedWorkout {
            date,
            sport: Sport::Other,
            workout_type: self.workout_type,
            duration_minutes: self.duration_minutes,
            target_tss: self.target_tss,
            zone: self.zone,
        }
    }
}

/// Baseline metabolic profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineProfile {
    pub bmr_kcal: f64,
    /// Estimated daily expenditure without training
    pub daily_kcal: f64,
    pub weight_kg: f64,
}

impl BaselineProfile {
    /// Reject non-finite or non-positive values
    pub fn validate(&self) -> Result<(), EngineError> {
        let fields = [
            ("bmr_kcal", self.bmr_kcal),
            ("daily_kcal", self.daily_kcal),
            ("weight_kg", self.weight_kg),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::InvalidBaseline {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Engine policy, all of it configurable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub thresholds: ClassificationThresholds,
    pub nutrition: NutritionPolicy,
    pub planned_defaults: PlannedDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationOutput {
    pub nutrition: NutritionAdaptation,
    pub fueling: FuelingAdaptation,
    pub training: TrainingAdaptation,
    pub recovery: RecoveryAdaptation,
}

/// State plus the adaptations derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveOutcome {
    pub state: AthleteDailyState,
    pub adaptations: AdaptationOutput,
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveEngine {
    config: AdaptiveConfig,
}

impl AdaptiveEngine {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Compute the daily state and adaptations for one athlete and date.
    ///
    /// `deltas` may span any range; only the 7 days ending at `date` are
    /// used. A missing `planned` workout falls back to the configured
    /// defaults, a missing `baseline` is fatal. `load` is the chronicle day
    /// for `date`, when one exists.
    #[instrument(skip(self, deltas, planned, baseline, load), fields(deltas = deltas.len()))]
    pub fn compute(
        &self,
        athlete_id: &str,
        date: NaiveDate,
        deltas: &[DailyDelta],
        planned: Option<&PlannedWorkout>,
        baseline: Option<&BaselineProfile>,
        load: Option<&DayLoad>,
    ) -> Result<AdaptiveOutcome, EngineError> {
        let baseline = baseline.ok_or_else(|| EngineError::MissingBaseline {
            athlete_id: athlete_id.to_string(),
        })?;
        baseline.validate()?;

        let planned = match planned {
            Some(p) => p.clone(),
            None => {
                debug!("No planned workout for {}, using defaults", date);
                self.config.planned_defaults.workout_for(date)
            }
        };

        let state = self.classify(athlete_id, date, deltas, &planned, baseline, load);
        let adaptations = AdaptationOutput {
            nutrition: self.config.nutrition.adapt(&state, baseline),
            fueling: fueling::adapt(&state, &planned, baseline),
            training: training::adapt(&state, &planned),
            recovery: recovery::adapt(&state),
        };

        debug!(
            glycogen = %state.glycogen_status,
            recovery_need = %state.recovery_need,
            fatigue = state.fatigue_score,
            kcal = state.kcal_target,
            "Computed daily state"
        );

        Ok(AdaptiveOutcome { state, adaptations })
    }

    /// Match planned and actual sessions first, then compute
    #[allow(clippy::too_many_arguments)]
    pub fn compute_from_sessions(
        &self,
        athlete_id: &str,
        date: NaiveDate,
        plan: &[PlannedWorkout],
        actual: &[ActualSession],
        intake: &[IntakeDelta],
        policy: &MatchingPolicy,
        baseline: Option<&BaselineProfile>,
        load: Option<&DayLoad>,
    ) -> Result<AdaptiveOutcome, EngineError> {
        let deltas = matching::daily_deltas(plan, actual, intake, policy);
        let today = plan.iter().find(|p| p.date == date);
        self.compute(athlete_id, date, &deltas, today, baseline, load)
    }

    fn classify(
        &self,
        athlete_id: &str,
        date: NaiveDate,
        deltas: &[DailyDelta],
        planned: &PlannedWorkout,
        baseline: &BaselineProfile,
        load: Option<&DayLoad>,
    ) -> AthleteDailyState {
        let thresholds = &self.config.thresholds;
        let policy = &self.config.nutrition;
        let window = DeltaWindow::collect(date, deltas);

        let glycogen_status = thresholds.glycogen_status(&window);
        let fatigue_score = thresholds.fatigue_score(&window, load);
        let recovery_need = thresholds.recovery_need(fatigue_score);
        let hydration_status = thresholds.hydration_status(&window);
        let tss_capacity = thresholds.tss_capacity(recovery_need, load);

        let training_tss = planned.target_tss.max(0.0).min(tss_capacity);
        let kcal_target = state::kcal_target(
            baseline,
            training_tss,
            glycogen_status,
            policy.kcal_per_tss,
            policy.low_glycogen_kcal_bonus,
            policy.depleted_glycogen_kcal_bonus,
        );

        AthleteDailyState {
            athlete_id: athlete_id.to_string(),
            date,
            kcal_target,
            macro_adjustments: policy.macro_adjustments(glycogen_status, recovery_need),
            glycogen_status,
            recovery_need,
            hydration_status,
            fatigue_score: crate::numeric::round_dp(fatigue_score, 1),
            tss_capacity: crate::numeric::round_dp(tss_capacity, 1),
            recommended_zone: state::recommended_zone(planned, glycogen_status, recovery_need),
            max_zone_reached: window.max_zone,
            computed_at: Utc::now(),
        }
    }
}
