use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use trainfuel::adaptive::{AdaptiveEngine, AdaptiveOutcome, BaselineProfile, DailyDelta, PlannedWorkout};
use trainfuel::cache::ActivityCache;
use trainfuel::config::AppConfig;
use trainfuel::decode::ActivityFormat;
use trainfuel::logging::{init_logging, LogLevel};
use trainfuel::models::ActivitySummary;
use trainfuel::pipeline::{ActivityRecord, Pipeline};
use trainfuel::pmc::{Chronicle, DayLoad, PmcCalculator, TsbInterpretation};
use trainfuel::store::{AdaptiveService, SqliteStore, StateStore};
use trainfuel::tss::TssEstimator;

/// TrainFuel - activity decoding, training load and daily fueling CLI
///
/// Decodes FIT, TCX, GPX and JSON activity files, tracks CTL/ATL/TSB and
/// adapts nutrition, fueling, training and recovery targets to the
/// athlete's current state.
#[derive(Parser)]
#[command(name = "trainfuel")]
#[command(version)]
#[command(about = "Training load and adaptive fueling CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an activity file and compute its summary
    Decode {
        /// Activity file (.fit, .tcx, .gpx, .json, optionally .gz)
        file: PathBuf,

        /// Declared format, overriding the file extension
        #[arg(short = 'f', long)]
        format: Option<String>,

        /// Reference FTP in watts (defaults to the athlete's)
        #[arg(long)]
        ftp: Option<f64>,

        /// Athlete ID from the config
        #[arg(short, long)]
        athlete: Option<String>,

        /// Print the compact time series too
        #[arg(long)]
        compact: bool,

        /// Store the activity record in the database
        #[arg(long)]
        store: bool,
    },

    /// Build the CTL/ATL/TSB chronicle from activity summaries
    Chronicle {
        /// JSON file with an array of activity summaries
        #[arg(short, long)]
        input: PathBuf,

        /// Window length in days
        #[arg(short, long, default_value = "90")]
        days: u32,

        /// Last day of the window (YYYY-MM-DD, default today)
        #[arg(short, long)]
        end: Option<NaiveDate>,

        /// Athlete ID from the config
        #[arg(short, long)]
        athlete: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Store the chronicle days in the database
        #[arg(long)]
        store: bool,
    },

    /// Compute the daily state and adaptations for an athlete
    Adapt {
        /// Athlete ID
        #[arg(short, long)]
        athlete: String,

        /// Target date (YYYY-MM-DD, default today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// JSON file with an array of daily deltas
        #[arg(long)]
        deltas: Option<PathBuf>,

        /// JSON file with the baseline profile (defaults to the athlete's)
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// JSON file with today's planned workout
        #[arg(long)]
        planned: Option<PathBuf>,

        /// JSON file with today's chronicle day
        #[arg(long)]
        load: Option<PathBuf>,

        /// Persist the result (the stored chronicle day replaces --load)
        #[arg(long)]
        store: bool,
    },

    /// Show or initialise the configuration file
    Config {
        /// Print the effective configuration
        #[arg(short, long)]
        show: bool,

        /// Write a default configuration file
        #[arg(short, long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };

    let mut log_config = config.logging.clone();
    log_config.level = match cli.verbose {
        0 => log_config.level,
        1 => LogLevel::Info,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    init_logging(&log_config).context("Failed to initialise logging")?;

    match cli.command {
        Commands::Decode {
            file,
            format,
            ftp,
            athlete,
            compact,
            store,
        } => run_decode(&config, &file, format, ftp, athlete.as_deref(), compact, store),
        Commands::Chronicle {
            input,
            days,
            end,
            athlete,
            json,
            store,
        } => run_chronicle(&config, &input, days, end, athlete.as_deref(), json, store),
        Commands::Adapt {
            athlete,
            date,
            deltas,
            baseline,
            planned,
            load,
            store,
        } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let inputs = AdaptInputs {
                deltas: deltas
                    .as_deref()
                    .map(read_json::<Vec<DailyDelta>>)
                    .transpose()?
                    .unwrap_or_default(),
                baseline: match baseline.as_deref() {
                    Some(path) => Some(read_json(path)?),
                    None => config.athlete(Some(athlete.as_str())).and_then(|a| a.baseline.clone()),
                },
                planned: planned.as_deref().map(read_json::<PlannedWorkout>).transpose()?,
                load: load.as_deref().map(read_json::<DayLoad>).transpose()?,
            };
            run_adapt(&config, &athlete, date, inputs, store)
        }
        Commands::Config { show, init } => run_config(config, cli.config.as_deref(), show, init),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    let path = &config.storage.database_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    SqliteStore::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn run_decode(
    config: &AppConfig,
    file: &Path,
    format: Option<String>,
    ftp: Option<f64>,
    athlete: Option<&str>,
    compact: bool,
    store: bool,
) -> Result<()> {
    let reference_ftp = ftp
        .or_else(|| config.tss_config_for(athlete).ftp)
        .unwrap_or(0.0);
    let pipeline = Pipeline::new(config.metrics.clone(), reference_ftp)
        .with_cache(ActivityCache::from_config(&config.cache));

    let record = match format {
        Some(name) => {
            let format: ActivityFormat = name.parse()?;
            let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
            pipeline.ingest(&bytes, format, Utc::now())?
        }
        None => pipeline.ingest_file(file)?,
    };

    print_summary(&record);
    if compact {
        println!("{}", serde_json::to_string_pretty(&record.series)?);
    }

    if store {
        let athlete_id = athlete
            .map(str::to_string)
            .or_else(|| config.default_athlete_id.clone())
            .context("--store needs an athlete (--athlete or default_athlete_id)")?;
        open_store(config)?.upsert_activity(&athlete_id, &record)?;
        println!("{}", format!("✓ Stored activity {}", record.id).green());
    }
    Ok(())
}

fn print_summary(record: &ActivityRecord) {
    let s = &record.summary;
    println!("{}", "Activity summary".green().bold());
    if let Some(name) = &record.name {
        println!("  Name:        {}", name);
    }
    println!("  Sport:       {}", s.activity_type);
    println!("  Start:       {}", s.start_time);
    println!("  Duration:    {} s", s.duration_seconds);
    println!("  Distance:    {:.2} m", s.distance_m);
    println!("  Elevation:   {:.2} m", s.elevation_gain_m);
    println!("  Calories:    {}", s.calories);
    if let Some(hr) = s.avg_heart_rate {
        println!("  Avg HR:      {} bpm (max {})", hr, s.max_heart_rate.unwrap_or(hr));
    }
    if let Some(power) = s.avg_power {
        println!("  Avg power:   {:.2} W", power);
    }
    if let Some(np) = s.normalized_power {
        println!("  NP:          {:.2} W", np);
    }
    println!(
        "  TSS:         {}",
        format!("{:.2} (IF {:.2}, VI {:.2})", s.tss, s.intensity_factor, s.variability_index).cyan()
    );
    println!("  Samples:     {} (stride {})", record.series.total_points, record.series.stride);
}

fn run_chronicle(
    config: &AppConfig,
    input: &Path,
    days: u32,
    end: Option<NaiveDate>,
    athlete: Option<&str>,
    json: bool,
    store: bool,
) -> Result<()> {
    let summaries: Vec<ActivitySummary> = read_json(input)?;
    let end = end.unwrap_or_else(|| Utc::now().date_naive());

    let calculator = PmcCalculator::with_config(config.pmc.clone());
    let estimator = TssEstimator::with_config(config.tss_config_for(athlete));
    let chronicle = calculator
        .chronicle_from_summaries(&summaries, &estimator, days, end)?
        .rounded();

    if json {
        println!("{}", serde_json::to_string_pretty(&chronicle)?);
    } else {
        print_chronicle(&chronicle, &calculator);
    }

    if store {
        let athlete_id = athlete
            .map(str::to_string)
            .or_else(|| config.default_athlete_id.clone())
            .context("--store needs an athlete (--athlete or default_athlete_id)")?;
        open_store(config)?.upsert_day_loads(&athlete_id, &chronicle.days)?;
        println!("{}", format!("✓ Stored {} chronicle days", chronicle.days.len()).green());
    }
    Ok(())
}

fn print_chronicle(chronicle: &Chronicle, calculator: &PmcCalculator) {
    println!("{}", "Date         TSS      CTL    ATL    TSB".bold());
    for day in chronicle.days.iter().rev().take(14).rev() {
        let tsb = format!("{:>6.1}", day.tsb);
        let tsb = if day.tsb < -10.0 {
            tsb.red()
        } else if day.tsb > 5.0 {
            tsb.green()
        } else {
            tsb.normal()
        };
        println!("{}  {:>6.1}  {:>5.1}  {:>5.1}  {}", day.date, day.tss, day.ctl, day.atl, tsb);
    }

    let s = &chronicle.summary;
    println!();
    println!(
        "CTL {:.1}  ATL {:.1}  TSB {:.1}  ramp {:+.1}/week",
        s.current_ctl, s.current_atl, s.current_tsb, s.ramp_rate
    );
    println!(
        "Total TSS {:.0}  avg {:.1}/day  peak {:.0}  {:.1} h",
        s.total_tss, s.average_tss, s.peak_tss, s.total_hours
    );
    println!("{}", TsbInterpretation::from_tsb(s.current_tsb).description().cyan());
    for recommendation in calculator.recommendations(s) {
        println!("  • {}", recommendation);
    }
}

struct AdaptInputs {
    deltas: Vec<DailyDelta>,
    baseline: Option<BaselineProfile>,
    planned: Option<PlannedWorkout>,
    load: Option<DayLoad>,
}

fn run_adapt(
    config: &AppConfig,
    athlete_id: &str,
    date: NaiveDate,
    inputs: AdaptInputs,
    store: bool,
) -> Result<()> {
    let engine = AdaptiveEngine::new(config.adaptive.clone());

    let outcome = if store {
        let store = open_store(config)?;
        if let Some(load) = &inputs.load {
            store.upsert_day_loads(athlete_id, std::slice::from_ref(load))?;
        }
        let service = AdaptiveService::new(engine, store);
        service.recompute(
            athlete_id,
            date,
            &inputs.deltas,
            inputs.planned.as_ref(),
            inputs.baseline.as_ref(),
        )?
    } else {
        engine.compute(
            athlete_id,
            date,
            &inputs.deltas,
            inputs.planned.as_ref(),
            inputs.baseline.as_ref(),
            inputs.load.as_ref(),
        )?
    };

    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &AdaptiveOutcome) {
    let state = &outcome.state;
    let a = &outcome.adaptations;

    println!(
        "{}",
        format!("Daily state for {} on {}", state.athlete_id, state.date).bold()
    );
    println!(
        "  Glycogen {}  Recovery need {}  Hydration {}  Fatigue {:.1}",
        state.glycogen_status.to_string().yellow(),
        state.recovery_need.to_string().yellow(),
        state.hydration_status,
        state.fatigue_score
    );
    println!(
        "  Capacity {:.1} TSS  zone ≤ {}  {} kcal",
        state.tss_capacity, state.recommended_zone, state.kcal_target
    );

    println!("{}", "Nutrition".green().bold());
    println!(
        "  {}/{}/{} % CHO/PRO/FAT = {} g / {} g / {} g, {:.2} L fluid",
        a.nutrition.carbs_pct,
        a.nutrition.protein_pct,
        a.nutrition.fat_pct,
        a.nutrition.carbs_g,
        a.nutrition.protein_g,
        a.nutrition.fat_g,
        a.nutrition.hydration_l
    );

    println!("{}", "Fueling".green().bold());
    println!(
        "  pre {} g, during {} g/h, post {} g CHO + {} g PRO, caffeine {}, electrolytes {}",
        a.fueling.pre_workout_carbs_g,
        a.fueling.intra_workout_carbs_g_per_hour,
        a.fueling.post_workout_carbs_g,
        a.fueling.post_workout_protein_g,
        a.fueling
            .caffeine_mg
            .map(|mg| format!("{} mg", mg))
            .unwrap_or_else(|| "none".to_string()),
        if a.fueling.electrolytes { "yes" } else { "no" }
    );

    println!("{}", "Training".blue().bold());
    println!(
        "  {:?} up to {} min, {:.1} TSS, intensity ≤ {:.0}%, zone {}",
        a.training.workout_type,
        a.training.max_duration_minutes,
        a.training.tss_target,
        a.training.intensity_cap * 100.0,
        a.training.zone
    );

    println!("{}", "Recovery".magenta().bold());
    println!(
        "  sleep {:.1} h, stretching {} min, active recovery {}, cold therapy {}, foam rolling {}",
        a.recovery.sleep_hours,
        a.recovery.stretching_minutes,
        a.recovery.active_recovery,
        a.recovery.cold_therapy,
        a.recovery.foam_rolling
    );
}

fn run_config(mut config: AppConfig, path: Option<&Path>, show: bool, init: bool) -> Result<()> {
    if init {
        let written = match path {
            Some(path) => {
                if path.exists() {
                    bail!("{} already exists", path.display());
                }
                config.save_to_file(path)?;
                path.to_path_buf()
            }
            None => {
                let default_path = AppConfig::default_config_path();
                if default_path.exists() {
                    bail!("{} already exists", default_path.display());
                }
                config.save_default()?
            }
        };
        println!("{}", format!("✓ Wrote {}", written.display()).green());
    }

    if show || !init {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
