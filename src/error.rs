//! Unified error hierarchy for TrainFuel
//!
//! Decoding, engine and storage failures each get their own enum; all of them
//! convert into [`TrainFuelError`] so callers can use a single `Result`.

use crate::decode::ActivityFormat;
use thiserror::Error;

/// Top-level error type for all TrainFuel operations
#[derive(Debug, Error)]
pub enum TrainFuelError {
    /// Activity file decoding errors
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Adaptive engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Load chronicle errors
    #[error("Chronicle error: {0}")]
    Chronicle(#[from] crate::pmc::PmcError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors raised while turning raw bytes into a `RawActivity`.
///
/// Every variant names the format that was being decoded so callers can tell
/// "wrong format" apart from "corrupt archive".
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Extension or declared tag is not one of the supported formats
    #[error("Unsupported activity format: {name}")]
    UnsupportedFormat { name: String },

    /// gzip wrapper could not be inflated
    #[error("Failed to decompress {format} payload: {reason}")]
    Decompression {
        format: ActivityFormat,
        reason: String,
    },

    /// Magic bytes / header integrity check failed
    #[error("Invalid {format} signature: {reason}")]
    InvalidSignature {
        format: ActivityFormat,
        reason: String,
    },

    /// Stream is truncated or fails its integrity check
    #[error("Corrupt {format} stream: {reason}")]
    Corrupt {
        format: ActivityFormat,
        reason: String,
    },

    /// Payload could not be parsed
    #[error("Parse error in {format}: {reason}")]
    Parse {
        format: ActivityFormat,
        reason: String,
    },
}

impl DecodeError {
    pub fn parse(format: ActivityFormat, reason: impl Into<String>) -> Self {
        DecodeError::Parse {
            format,
            reason: reason.into(),
        }
    }

    /// Format the failing decoder was working on, if one was resolved
    pub fn format(&self) -> Option<ActivityFormat> {
        match self {
            DecodeError::UnsupportedFormat { .. } => None,
            DecodeError::Decompression { format, .. }
            | DecodeError::InvalidSignature { format, .. }
            | DecodeError::Corrupt { format, .. }
            | DecodeError::Parse { format, .. } => Some(*format),
        }
    }
}

/// Adaptive engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// kcal targets cannot be computed without a metabolic baseline
    #[error("Missing baseline metabolic profile for athlete {athlete_id}")]
    MissingBaseline { athlete_id: String },

    /// Baseline exists but holds unusable values
    #[error("Invalid baseline field {field}: {value}")]
    InvalidBaseline { field: String, value: String },
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Writer lock poisoned for {key}")]
    LockPoisoned { key: String },
}

/// Result type alias for TrainFuel operations
pub type Result<T> = std::result::Result<T, TrainFuelError>;

impl TrainFuelError {
    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TrainFuelError::Decode(DecodeError::UnsupportedFormat { .. }) => ErrorSeverity::Warning,
            TrainFuelError::Decode(_) => ErrorSeverity::Error,
            TrainFuelError::Engine(EngineError::MissingBaseline { .. }) => ErrorSeverity::Error,
            TrainFuelError::Store(StoreError::LockPoisoned { .. }) => ErrorSeverity::Critical,
            TrainFuelError::Configuration(_) => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            TrainFuelError::Decode(DecodeError::UnsupportedFormat { name }) => {
                format!("'{}' is not a supported activity file (fit, tcx, gpx, json)", name)
            }
            TrainFuelError::Decode(DecodeError::Decompression { .. }) => {
                "The compressed activity archive is damaged and could not be opened".to_string()
            }
            TrainFuelError::Engine(EngineError::MissingBaseline { athlete_id }) => {
                format!(
                    "No metabolic baseline on file for {}. Add BMR, daily kcal and weight first.",
                    athlete_id
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = TrainFuelError::Decode(DecodeError::UnsupportedFormat {
            name: "ride.csv".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = TrainFuelError::Store(StoreError::LockPoisoned {
            key: "a1/2024-09-23".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_decode_error_carries_format() {
        let err = DecodeError::parse(ActivityFormat::Tcx, "unexpected EOF");
        assert_eq!(err.format(), Some(ActivityFormat::Tcx));
        assert!(err.to_string().contains("tcx"));

        let err = DecodeError::UnsupportedFormat {
            name: "notes.txt".to_string(),
        };
        assert_eq!(err.format(), None);
    }

    #[test]
    fn test_decompression_distinct_from_parse() {
        let err = DecodeError::Decompression {
            format: ActivityFormat::Fit,
            reason: "invalid gzip header".to_string(),
        };
        assert!(matches!(err, DecodeError::Decompression { .. }));
        assert!(!matches!(err, DecodeError::Parse { .. }));
    }

    #[test]
    fn test_user_messages() {
        let err = TrainFuelError::Engine(EngineError::MissingBaseline {
            athlete_id: "athlete_1".to_string(),
        });
        assert!(err.user_message().contains("athlete_1"));
    }
}
