use crate::models::ActivitySummary;
use crate::numeric::{round_dp, safe_div};
use crate::tss::TssEstimator;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::instrument;

/// PMC calculation errors
#[derive(Error, Debug)]
pub enum PmcError {
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Training load for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTss {
    /// Date of the training day
    pub date: NaiveDate,

    /// Total TSS for the day (sum of all activities)
    pub total_tss: f64,

    /// Total moving time for the day
    pub total_seconds: u64,

    /// Number of activities recorded on this day
    pub activity_count: u16,
}

impl DailyTss {
    pub fn rest(date: NaiveDate) -> Self {
        DailyTss {
            date,
            total_tss: 0.0,
            total_seconds: 0,
            activity_count: 0,
        }
    }
}

/// Chronicle entry for one date.
///
/// `tsb` is always exactly `ctl - atl` for the values stored on the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayLoad {
    pub date: NaiveDate,
    pub tss: f64,
    /// Chronic Training Load (42-day exponentially weighted average)
    pub ctl: f64,
    /// Acute Training Load (7-day exponentially weighted average)
    pub atl: f64,
    /// Training Stress Balance (CTL - ATL)
    pub tsb: f64,
}

impl DayLoad {
    fn new(date: NaiveDate, tss: f64, ctl: f64, atl: f64) -> Self {
        DayLoad {
            date,
            tss,
            ctl,
            atl,
            tsb: ctl - atl,
        }
    }

    /// Persisted precision: ctl/atl/tsb to 1 decimal, tss to 2.
    /// TSB is recomputed from the rounded loads so the identity survives.
    pub fn rounded(&self) -> DayLoad {
        let ctl = round_dp(self.ctl, 1);
        let atl = round_dp(self.atl, 1);
        DayLoad {
            date: self.date,
            tss: round_dp(self.tss, 2),
            ctl,
            atl,
            tsb: round_dp(ctl - atl, 1),
        }
    }
}

/// Scalar summary of a chronicle window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChronicleSummary {
    pub current_ctl: f64,
    pub current_atl: f64,
    pub current_tsb: f64,
    /// CTL change over the ramp-rate period (default 7 days)
    pub ramp_rate: f64,
    pub total_tss: f64,
    /// Total TSS divided by the days in the window
    pub average_tss: f64,
    pub peak_tss: f64,
    pub total_hours: f64,
}

/// Day-indexed load series plus its summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chronicle {
    pub days: Vec<DayLoad>,
    pub summary: ChronicleSummary,
}

impl Chronicle {
    /// Latest day in the window
    pub fn latest(&self) -> Option<&DayLoad> {
        self.days.last()
    }

    /// Copy rounded to persisted precision
    pub fn rounded(&self) -> Chronicle {
        let s = &self.summary;
        let current_ctl = round_dp(s.current_ctl, 1);
        let current_atl = round_dp(s.current_atl, 1);
        Chronicle {
            days: self.days.iter().map(DayLoad::rounded).collect(),
            summary: ChronicleSummary {
                current_ctl,
                current_atl,
                current_tsb: round_dp(current_ctl - current_atl, 1),
                ramp_rate: round_dp(s.ramp_rate, 1),
                total_tss: round_dp(s.total_tss, 2),
                average_tss: round_dp(s.average_tss, 2),
                peak_tss: round_dp(s.peak_tss, 2),
                total_hours: round_dp(s.total_hours, 2),
            },
        }
    }
}

/// PMC configuration with customizable time constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmcConfig {
    /// CTL time constant in days (default: 42)
    pub ctl_time_constant: u16,

    /// ATL time constant in days (default: 7)
    pub atl_time_constant: u16,

    /// Ramp rate calculation period in days
    pub ramp_rate_days: u16,

    /// Ramp rate above which the load build-up is flagged
    pub aggressive_ramp_rate: f64,

    /// Ramp rate below which fitness loss is flagged
    pub declining_ramp_rate: f64,
}

impl Default for PmcConfig {
    fn default() -> Self {
        PmcConfig {
            ctl_time_constant: 42,
            atl_time_constant: 7,
            ramp_rate_days: 7,
            aggressive_ramp_rate: 8.0,
            declining_ramp_rate: -5.0,
        }
    }
}

impl PmcConfig {
    pub fn validate(&self) -> Result<(), PmcError> {
        if self.ctl_time_constant == 0 || self.atl_time_constant == 0 {
            return Err(PmcError::ConfigurationError(
                "time constants must be at least one day".to_string(),
            ));
        }
        if self.ramp_rate_days == 0 {
            return Err(PmcError::ConfigurationError(
                "ramp rate period must be at least one day".to_string(),
            ));
        }
        Ok(())
    }
}

/// Training Stress Balance interpretation ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TsbInterpretation {
    VeryFresh,    // +25 and above
    Fresh,        // +5 to +25
    Neutral,      // -10 to +5
    Fatigued,     // -30 to -10
    VeryFatigued, // Below -30
}

impl TsbInterpretation {
    /// Get TSB interpretation from numeric value
    pub fn from_tsb(tsb: f64) -> Self {
        if tsb >= 25.0 {
            TsbInterpretation::VeryFresh
        } else if tsb >= 5.0 {
            TsbInterpretation::Fresh
        } else if tsb >= -10.0 {
            TsbInterpretation::Neutral
        } else if tsb >= -30.0 {
            TsbInterpretation::Fatigued
        } else {
            TsbInterpretation::VeryFatigued
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TsbInterpretation::VeryFresh => "Very fresh, fitness may be slipping",
            TsbInterpretation::Fresh => "Fresh and ready for a hard day",
            TsbInterpretation::Neutral => "Balanced load",
            TsbInterpretation::Fatigued => "Fatigued",
            TsbInterpretation::VeryFatigued => "Very fatigued",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            TsbInterpretation::VeryFresh => "Add load or schedule a key event",
            TsbInterpretation::Fresh => "Good day for intensity or racing",
            TsbInterpretation::Neutral => "Continue the planned progression",
            TsbInterpretation::Fatigued => "Keep intensity low and fuel recovery well",
            TsbInterpretation::VeryFatigued => "Rest before resuming structured training",
        }
    }
}

/// Load chronicle engine
pub struct PmcCalculator {
    config: PmcConfig,
}

impl PmcCalculator {
    /// Create new PMC calculator with default configuration
    pub fn new() -> Self {
        PmcCalculator {
            config: PmcConfig::default(),
        }
    }

    /// Create new PMC calculator with custom configuration
    pub fn with_config(config: PmcConfig) -> Self {
        PmcCalculator { config }
    }

    /// Aggregate daily TSS from activity summaries, taking each summary's TSS
    /// as-is
    pub fn aggregate_daily_tss(
        &self,
        summaries: &[ActivitySummary],
    ) -> BTreeMap<NaiveDate, DailyTss> {
        Self::aggregate_with(summaries, |summary| summary.tss)
    }

    fn aggregate_with(
        summaries: &[ActivitySummary],
        tss_of: impl Fn(&ActivitySummary) -> f64,
    ) -> BTreeMap<NaiveDate, DailyTss> {
        let mut daily_tss: BTreeMap<NaiveDate, DailyTss> = BTreeMap::new();

        for summary in summaries {
            let date = summary.date();
            let tss = tss_of(summary);
            let tss = if tss.is_finite() { tss.max(0.0) } else { 0.0 };

            let day = daily_tss
                .entry(date)
                .or_insert_with(|| DailyTss::rest(date));
            day.total_tss += tss;
            day.total_seconds += summary.duration_seconds as u64;
            day.activity_count += 1;
        }

        daily_tss
    }

    /// Build a chronicle from TSS values alone
    pub fn build_chronicle(
        &self,
        daily_tss: &BTreeMap<NaiveDate, f64>,
        window_days: u32,
        end_date: NaiveDate,
    ) -> Result<Chronicle, PmcError> {
        let days: BTreeMap<NaiveDate, DailyTss> = daily_tss
            .iter()
            .map(|(date, tss)| {
                (
                    *date,
                    DailyTss {
                        total_tss: *tss,
                        ..DailyTss::rest(*date)
                    },
                )
            })
            .collect();
        self.build_from_daily(&days, window_days, end_date)
    }

    /// Build a chronicle over the `window_days` calendar days ending at
    /// `end_date`.
    ///
    /// The recurrence is seeded at zero on the first window day and advanced
    /// once per calendar day, rest days included. Entries outside the window
    /// are ignored.
    #[instrument(skip(self, daily_tss), fields(entries = daily_tss.len()))]
    pub fn build_from_daily(
        &self,
        daily_tss: &BTreeMap<NaiveDate, DailyTss>,
        window_days: u32,
        end_date: NaiveDate,
    ) -> Result<Chronicle, PmcError> {
        self.config.validate()?;

        if window_days == 0 {
            return Ok(Chronicle::default());
        }

        let start_date = end_date
            .checked_sub_days(Days::new(window_days as u64 - 1))
            .ok_or_else(|| {
                PmcError::InvalidDateRange(format!(
                    "{} days before {} is out of range",
                    window_days, end_date
                ))
            })?;

        let ctl_factor = 1.0 / self.config.ctl_time_constant as f64;
        let atl_factor = 1.0 / self.config.atl_time_constant as f64;

        let mut days = Vec::with_capacity(window_days as usize);
        let mut ctl = 0.0;
        let mut atl = 0.0;
        let mut total_seconds = 0u64;

        for date in start_date.iter_days().take(window_days as usize) {
            let (tss, seconds) = daily_tss
                .get(&date)
                .map(|d| (sanitize(d.total_tss), d.total_seconds))
                .unwrap_or((0.0, 0));

            // CTL_today = CTL_yesterday + (TSS_today - CTL_yesterday) / time_constant
            ctl += (tss - ctl) * ctl_factor;
            atl += (tss - atl) * atl_factor;

            total_seconds += seconds;
            days.push(DayLoad::new(date, tss, ctl, atl));
        }

        let summary = self.summarize_days(&days, total_seconds);
        Ok(Chronicle { days, summary })
    }

    /// Build a chronicle from activity summaries, estimating TSS for
    /// activities that have none
    pub fn chronicle_from_summaries(
        &self,
        summaries: &[ActivitySummary],
        estimator: &TssEstimator,
        window_days: u32,
        end_date: NaiveDate,
    ) -> Result<Chronicle, PmcError> {
        let daily = Self::aggregate_with(summaries, |summary| estimator.estimate(summary).tss);
        self.build_from_daily(&daily, window_days, end_date)
    }

    fn summarize_days(&self, days: &[DayLoad], total_seconds: u64) -> ChronicleSummary {
        let Some(last) = days.last() else {
            return ChronicleSummary::default();
        };

        let total_tss: f64 = days.iter().map(|d| d.tss).sum();
        let peak_tss = days.iter().map(|d| d.tss).fold(0.0, f64::max);

        ChronicleSummary {
            current_ctl: last.ctl,
            current_atl: last.atl,
            current_tsb: last.tsb,
            ramp_rate: self.ramp_rate(days),
            total_tss,
            average_tss: safe_div(total_tss, days.len() as f64),
            peak_tss,
            total_hours: total_seconds as f64 / 3600.0,
        }
    }

    /// `ctl[last] - ctl[last - ramp_rate_days]`, 0 with too little history
    pub fn ramp_rate(&self, days: &[DayLoad]) -> f64 {
        let period = self.config.ramp_rate_days as usize;
        if days.len() < period + 1 {
            return 0.0;
        }
        let last = days.len() - 1;
        days[last].ctl - days[last - period].ctl
    }

    /// Generate training recommendations for the latest chronicle state
    pub fn recommendations(&self, summary: &ChronicleSummary) -> Vec<String> {
        let mut recommendations = Vec::new();

        let interpretation = TsbInterpretation::from_tsb(summary.current_tsb);
        recommendations.push(interpretation.recommendation().to_string());

        if summary.ramp_rate > self.config.aggressive_ramp_rate {
            recommendations.push("Fitness is building fast; watch for overreaching".to_string());
        } else if summary.ramp_rate < self.config.declining_ramp_rate {
            recommendations.push("Fitness is dropping; consider adding load".to_string());
        }

        if summary.current_atl > summary.current_ctl * 1.5 && summary.current_ctl > 0.0 {
            recommendations.push("Acute load well above chronic; plan recovery days".to_string());
        }

        if interpretation == TsbInterpretation::VeryFatigued {
            recommendations.push("Prioritise sleep and carbohydrate intake".to_string());
        }

        recommendations
    }
}

impl Default for PmcCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(tss: f64) -> f64 {
    if tss.is_finite() {
        tss.max(0.0)
    } else {
        0.0
    }
}
