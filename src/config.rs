use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::adaptive::{AdaptiveConfig, BaselineProfile, MatchingPolicy};
use crate::cache::CacheConfig;
use crate::error::{Result, TrainFuelError};
use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::pmc::PmcConfig;
use crate::tss::TssEstimatorConfig;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application metadata
    pub metadata: ConfigMetadata,

    pub logging: LogConfig,

    /// Normalized power window and elevation filter
    pub metrics: MetricsConfig,

    /// Performance Management Chart settings
    pub pmc: PmcConfig,

    /// TSS fallback estimation
    pub tss: TssEstimatorConfig,

    /// Classification thresholds and nutrition policy
    pub adaptive: AdaptiveConfig,

    /// Planned-vs-actual session matching
    pub matching: MatchingPolicy,

    pub cache: CacheConfig,

    pub storage: StorageSettings,

    /// Athletes configuration
    pub athletes: HashMap<String, AthleteSettings>,

    /// Default athlete ID (currently active)
    pub default_athlete_id: Option<String>,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        ConfigMetadata {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database holding daily states, chronicle days and activities
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("trainfuel")
                .join("trainfuel.db"),
        }
    }
}

/// Per-athlete thresholds and metabolic baseline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AthleteSettings {
    /// Functional threshold power in watts
    pub ftp: Option<f64>,
    /// Threshold heart rate in bpm
    pub threshold_heart_rate: Option<f64>,
    pub baseline: Option<BaselineProfile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            metadata: ConfigMetadata::default(),
            logging: LogConfig::default(),
            metrics: MetricsConfig::default(),
            pmc: PmcConfig::default(),
            tss: TssEstimatorConfig::default(),
            adaptive: AdaptiveConfig::default(),
            matching: MatchingPolicy::default(),
            cache: CacheConfig::default(),
            storage: StorageSettings::default(),
            athletes: HashMap::new(),
            default_athlete_id: None,
        }
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TrainFuelError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            TrainFuelError::Configuration(format!("Failed to parse TOML configuration: {}", e))
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let toml_content = toml::to_string_pretty(self).map_err(|e| {
            TrainFuelError::Configuration(format!("Failed to serialize configuration: {}", e))
        })?;
        fs::write(path, toml_content)?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trainfuel")
            .join("config.toml")
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default configuration ({})", e);
                Self::default()
            }
        }
    }

    /// Save configuration to default location
    pub fn save_default(&mut self) -> Result<PathBuf> {
        let config_path = Self::default_config_path();
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }

    pub fn validate(&self) -> Result<()> {
        self.pmc
            .validate()
            .map_err(|e| TrainFuelError::Configuration(e.to_string()))?;

        if self.metrics.np_window_seconds == 0 {
            return Err(TrainFuelError::Configuration(
                "metrics.np_window_seconds must be positive".to_string(),
            ));
        }
        let tolerance = self.matching.duration_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(TrainFuelError::Configuration(
                "matching.duration_tolerance must be non-negative".to_string(),
            ));
        }
        if let Some(id) = &self.default_athlete_id {
            if !self.athletes.contains_key(id) {
                return Err(TrainFuelError::Configuration(format!(
                    "default athlete '{}' is not configured",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Athlete by ID, or the default athlete when `athlete_id` is `None`
    pub fn athlete(&self, athlete_id: Option<&str>) -> Option<&AthleteSettings> {
        let id = athlete_id.or(self.default_athlete_id.as_deref())?;
        self.athletes.get(id)
    }

    /// Register an athlete; the first one becomes the default
    pub fn add_athlete(&mut self, athlete_id: impl Into<String>, settings: AthleteSettings) {
        let athlete_id = athlete_id.into();
        if self.default_athlete_id.is_none() {
            self.default_athlete_id = Some(athlete_id.clone());
        }
        self.athletes.insert(athlete_id, settings);
    }

    /// TSS estimator settings with the athlete's thresholds filled in
    pub fn tss_config_for(&self, athlete_id: Option<&str>) -> TssEstimatorConfig {
        let mut config = self.tss.clone();
        if let Some(athlete) = self.athlete(athlete_id) {
            config.ftp = config.ftp.or(athlete.ftp);
            config.threshold_heart_rate = config.threshold_heart_rate.or(athlete.threshold_heart_rate);
        }
        config
    }
}
