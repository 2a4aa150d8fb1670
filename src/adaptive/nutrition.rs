use super::state::{AthleteDailyState, GlycogenStatus, MacroAdjustments, RecoveryNeed};
use super::BaselineProfile;
use crate::numeric::round_dp;
use serde::{Deserialize, Serialize};

const KCAL_PER_G_CARBS: f64 = 4.0;
const KCAL_PER_G_PROTEIN: f64 = 4.0;
const KCAL_PER_G_FAT: f64 = 9.0;

/// Energy and macro policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NutritionPolicy {
    /// Baseline CHO / PRO / FAT split in percent
    pub baseline_carbs_pct: f64,
    pub baseline_protein_pct: f64,
    pub baseline_fat_pct: f64,
    pub carbs_bump_low_glycogen: f64,
    pub carbs_bump_depleted_glycogen: f64,
    /// Extra protein points under high or critical recovery need
    pub protein_bump_recovery: f64,
    pub hydration_l_per_kg: f64,
    /// Extra fluid when glycogen is low or depleted
    pub hydration_bonus_l: f64,
    pub kcal_per_tss: f64,
    pub low_glycogen_kcal_bonus: f64,
    pub depleted_glycogen_kcal_bonus: f64,
}

impl Default for NutritionPolicy {
    fn default() -> Self {
        Self {
            baseline_carbs_pct: 55.0,
            baseline_protein_pct: 20.0,
            baseline_fat_pct: 25.0,
            carbs_bump_low_glycogen: 5.0,
            carbs_bump_depleted_glycogen: 10.0,
            protein_bump_recovery: 5.0,
            hydration_l_per_kg: 0.035,
            hydration_bonus_l: 0.5,
            kcal_per_tss: 9.0,
            low_glycogen_kcal_bonus: 0.05,
            depleted_glycogen_kcal_bonus: 0.10,
        }
    }
}

/// Daily nutrition targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionAdaptation {
    pub kcal_target: u32,
    /// Integer percentages, always summing to 100
    pub carbs_pct: u8,
    pub protein_pct: u8,
    pub fat_pct: u8,
    pub carbs_g: u32,
    pub protein_g: u32,
    pub fat_g: u32,
    pub hydration_l: f64,
}

impl NutritionAdaptation {
    pub fn macro_sum(&self) -> u32 {
        self.carbs_pct as u32 + self.protein_pct as u32 + self.fat_pct as u32
    }
}

impl NutritionPolicy {
    /// Percentage-point shifts from the baseline split.
    ///
    /// Carbohydrate rises with reduced glycogen, protein with elevated
    /// recovery need, and fat gives back half of the combined increase.
    pub fn macro_adjustments(
        &self,
        glycogen: GlycogenStatus,
        recovery_need: RecoveryNeed,
    ) -> MacroAdjustments {
        let carbs_pct = match glycogen {
            GlycogenStatus::Depleted => self.carbs_bump_depleted_glycogen,
            GlycogenStatus::Low => self.carbs_bump_low_glycogen,
            GlycogenStatus::Normal => 0.0,
        };
        let protein_pct = if recovery_need.is_elevated() {
            self.protein_bump_recovery
        } else {
            0.0
        };

        MacroAdjustments {
            carbs_pct,
            protein_pct,
            fat_pct: -(carbs_pct + protein_pct) / 2.0,
        }
    }

    pub fn adapt(&self, state: &AthleteDailyState, baseline: &BaselineProfile) -> NutritionAdaptation {
        let adjustments = &state.macro_adjustments;
        let [carbs_pct, protein_pct, fat_pct] = renormalize([
            self.baseline_carbs_pct + adjustments.carbs_pct,
            self.baseline_protein_pct + adjustments.protein_pct,
            self.baseline_fat_pct + adjustments.fat_pct,
        ]);

        let kcal = state.kcal_target as f64;
        let grams = |pct: u8, kcal_per_g: f64| (kcal * pct as f64 / 100.0 / kcal_per_g).round() as u32;

        let mut hydration_l = baseline.weight_kg.max(0.0) * self.hydration_l_per_kg;
        if state.glycogen_status.is_reduced() {
            hydration_l += self.hydration_bonus_l;
        }

        NutritionAdaptation {
            kcal_target: state.kcal_target,
            carbs_pct,
            protein_pct,
            fat_pct,
            carbs_g: grams(carbs_pct, KCAL_PER_G_CARBS),
            protein_g: grams(protein_pct, KCAL_PER_G_PROTEIN),
            fat_g: grams(fat_pct, KCAL_PER_G_FAT),
            hydration_l: round_dp(hydration_l, 2),
        }
    }
}

/// Scale shares to integer percentages summing to exactly 100.
///
/// Largest-remainder rounding; ties go to the earlier share. Negative shares
/// count as zero and an all-zero input falls back to 55/20/25.
pub fn renormalize(shares: [f64; 3]) -> [u8; 3] {
    let shares = shares.map(|s| if s.is_finite() { s.max(0.0) } else { 0.0 });
    let total: f64 = shares.iter().sum();
    if total <= 0.0 {
        return [55, 20, 25];
    }

    let scaled = shares.map(|s| s * 100.0 / total);
    let mut result = scaled.map(|s| s.floor() as u32);
    let assigned: u32 = result.iter().sum();

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        let ra = scaled[a] - scaled[a].floor();
        let rb = scaled[b] - scaled[b].floor();
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });
    for &i in order.iter().take(100u32.saturating_sub(assigned) as usize) {
        result[i] += 1;
    }

    result.map(|v| v.min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::state::HydrationStatus;
    use chrono::{NaiveDate, Utc};

    fn state(glycogen: GlycogenStatus, recovery: RecoveryNeed, kcal: u32) -> AthleteDailyState {
        let policy = NutritionPolicy::default();
        AthleteDailyState {
            athlete_id: "athlete_1".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 9, 23).unwrap(),
            kcal_target: kcal,
            macro_adjustments: policy.macro_adjustments(glycogen, recovery),
            glycogen_status: glycogen,
            recovery_need: recovery,
            hydration_status: HydrationStatus::Optimal,
            fatigue_score: 50.0,
            tss_capacity: 100.0,
            recommended_zone: 2,
            max_zone_reached: None,
            computed_at: Utc::now(),
        }
    }

    fn baseline() -> BaselineProfile {
        BaselineProfile {
            bmr_kcal: 1700.0,
            daily_kcal: 2400.0,
            weight_kg: 70.0,
        }
    }

    #[test]
    fn test_baseline_split_unchanged() {
        let s = state(GlycogenStatus::Normal, RecoveryNeed::Low, 3000);
        let out = NutritionPolicy::default().adapt(&s, &baseline());

        assert_eq!((out.carbs_pct, out.protein_pct, out.fat_pct), (55, 20, 25));
        assert_eq!(out.carbs_g, 413);
        assert_eq!(out.protein_g, 150);
        assert_eq!(out.fat_g, 83);
        assert_eq!(out.hydration_l, 2.45);
    }

    #[test]
    fn test_depleted_and_critical_shift() {
        let s = state(GlycogenStatus::Depleted, RecoveryNeed::Critical, 3000);
        assert_eq!(
            s.macro_adjustments,
            MacroAdjustments {
                carbs_pct: 10.0,
                protein_pct: 5.0,
                fat_pct: -7.5,
            }
        );

        let out = NutritionPolicy::default().adapt(&s, &baseline());
        // 65 / 25 / 17.5 scaled to 100
        assert_eq!(out.macro_sum(), 100);
        assert!(out.carbs_pct > 55);
        assert!(out.protein_pct > 20);
        assert!(out.fat_pct < 25);
        assert_eq!(out.hydration_l, 2.95);
    }

    #[test]
    fn test_renormalize_sums_to_100() {
        assert_eq!(renormalize([55.0, 20.0, 25.0]), [55, 20, 25]);
        assert_eq!(renormalize([1.0, 1.0, 1.0]).iter().map(|v| *v as u32).sum::<u32>(), 100);
        assert_eq!(renormalize([1.0, 1.0, 1.0]), [34, 33, 33]);
        assert_eq!(renormalize([0.0, 0.0, 0.0]), [55, 20, 25]);
        assert_eq!(renormalize([-5.0, 10.0, 10.0]), [0, 50, 50]);
    }
}
