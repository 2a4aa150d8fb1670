// Library interface for TrainFuel modules
// The CLI binary and the integration tests build on this crate

pub mod adaptive;
pub mod cache;
pub mod config;
pub mod decode;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod numeric;
pub mod pipeline;
pub mod pmc;
pub mod store;
pub mod timeseries;
pub mod tss;

// Re-export commonly used types for convenience
pub use adaptive::{AdaptationOutput, AdaptiveEngine, AdaptiveOutcome, AthleteDailyState};
pub use decode::{decode_activity, ActivityFormat, DecoderRegistry};
pub use error::{DecodeError, EngineError, Result, TrainFuelError};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use metrics::{summarize, MetricsCalculator};
pub use models::*;
pub use pipeline::{ActivityRecord, Pipeline};
pub use pmc::{Chronicle, DayLoad, PmcCalculator};
pub use timeseries::CompactSeries;
pub use tss::TssEstimator;
