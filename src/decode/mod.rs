//! Activity file decoders.
//!
//! Each supported format has one decoder implementing [`ActivityDecoder`].
//! Decoders are pure: they take the (already decompressed) payload plus a
//! fallback start time and return an owned [`RawActivity`] or a
//! [`DecodeError`]. gzip unwrapping happens in [`DecoderRegistry`] before any
//! decoder sees the bytes.

use crate::error::{DecodeError, TrainFuelError};
use crate::models::RawActivity;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

pub mod fit;
pub mod gpx;
pub mod gzip;
pub mod json;
pub mod tcx;

/// Supported activity file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityFormat {
    /// Binary device format
    Fit,
    /// Training Center XML
    Tcx,
    /// GPS Exchange XML
    Gpx,
    /// Pre-normalized JSON
    Json,
}

impl ActivityFormat {
    pub const ALL: [ActivityFormat; 4] = [
        ActivityFormat::Fit,
        ActivityFormat::Tcx,
        ActivityFormat::Gpx,
        ActivityFormat::Json,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            ActivityFormat::Fit => "fit",
            ActivityFormat::Tcx => "tcx",
            ActivityFormat::Gpx => "gpx",
            ActivityFormat::Json => "json",
        }
    }

    /// Infer the format from a file name, looking through a trailing `.gz`.
    ///
    /// Returns the format and whether the name declares gzip wrapping.
    pub fn from_file_name(name: &str) -> Result<(Self, bool), DecodeError> {
        let lower = name.to_lowercase();
        let (stem, gzipped) = match lower.strip_suffix(".gz") {
            Some(stem) => (stem.to_string(), true),
            None => (lower, false),
        };

        let extension = Path::new(&stem)
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| DecodeError::UnsupportedFormat {
                name: name.to_string(),
            })?;

        let format = extension
            .parse::<ActivityFormat>()
            .map_err(|_| DecodeError::UnsupportedFormat {
                name: name.to_string(),
            })?;

        Ok((format, gzipped))
    }
}

impl fmt::Display for ActivityFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ActivityFormat {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "fit" => Ok(ActivityFormat::Fit),
            "tcx" => Ok(ActivityFormat::Tcx),
            "gpx" => Ok(ActivityFormat::Gpx),
            "json" => Ok(ActivityFormat::Json),
            _ => Err(DecodeError::UnsupportedFormat {
                name: s.to_string(),
            }),
        }
    }
}

/// Trait implemented by every format-specific decoder
pub trait ActivityDecoder: Send + Sync {
    /// Format handled by this decoder
    fn format(&self) -> ActivityFormat;

    /// Decode an uncompressed payload.
    ///
    /// `fallback_start` is used only when neither an embedded session start
    /// nor a sample timestamp is present.
    fn decode(
        &self,
        payload: &[u8],
        fallback_start: DateTime<Utc>,
    ) -> Result<RawActivity, DecodeError>;

    /// Check if this decoder handles the given file name
    fn can_decode(&self, file_path: &Path) -> bool {
        file_path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| ActivityFormat::from_file_name(name).ok())
            .map(|(format, _)| format == self.format())
            .unwrap_or(false)
    }
}

/// Registry dispatching payloads to the decoder for their format
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn ActivityDecoder>>,
}

impl DecoderRegistry {
    /// Create a registry with all built-in decoders
    pub fn new() -> Self {
        let decoders: Vec<Box<dyn ActivityDecoder>> = vec![
            Box::new(fit::FitDecoder::new()),
            Box::new(tcx::TcxDecoder::new()),
            Box::new(gpx::GpxDecoder::new()),
            Box::new(json::JsonDecoder::new()),
        ];

        Self { decoders }
    }

    pub fn decoder_for(&self, format: ActivityFormat) -> Option<&dyn ActivityDecoder> {
        self.decoders
            .iter()
            .find(|decoder| decoder.format() == format)
            .map(|decoder| decoder.as_ref())
    }

    /// Decode bytes of a declared format, inflating gzip first when present
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub fn decode_bytes(
        &self,
        bytes: &[u8],
        format: ActivityFormat,
        fallback_start: DateTime<Utc>,
    ) -> Result<RawActivity, DecodeError> {
        let decoder = self
            .decoder_for(format)
            .ok_or_else(|| DecodeError::UnsupportedFormat {
                name: format.to_string(),
            })?;

        let payload = gzip::maybe_decompress(bytes, format)?;
        let activity = decoder.decode(&payload, fallback_start)?;

        debug!(
            %format,
            samples = activity.samples.len(),
            laps = activity.laps.len(),
            sport = %activity.sport,
            "Decoded activity"
        );
        Ok(activity)
    }

    /// Decode bytes whose format is inferred from a file name
    pub fn decode_named(
        &self,
        file_name: &str,
        bytes: &[u8],
        fallback_start: DateTime<Utc>,
    ) -> Result<RawActivity, DecodeError> {
        let (format, _) = ActivityFormat::from_file_name(file_name)?;
        self.decode_bytes(bytes, format, fallback_start)
    }

    /// Decode a file from disk.
    ///
    /// The file's modification time is the fallback start.
    pub fn decode_file(&self, file_path: &Path) -> Result<RawActivity, TrainFuelError> {
        let file_name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        // Reject unknown extensions before touching the file contents
        let (format, _) = ActivityFormat::from_file_name(file_name)?;

        let bytes = std::fs::read(file_path)?;
        let fallback_start = std::fs::metadata(file_path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        info!(file = %file_path.display(), %format, "Decoding activity file");
        Ok(self.decode_bytes(&bytes, format, fallback_start)?)
    }

    /// Decode every supported file in a directory.
    ///
    /// Failures are reported on the progress bar and skipped; they are not
    /// retried.
    pub fn decode_directory(
        &self,
        dir_path: &Path,
    ) -> Result<Vec<(PathBuf, RawActivity)>, TrainFuelError> {
        let mut decoded = Vec::new();
        let files = self.collect_decodable_files(dir_path)?;

        if files.is_empty() {
            info!(dir = %dir_path.display(), "No decodable files found");
            return Ok(decoded);
        }

        let pb = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        for file_path in files {
            let display_name = file_path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();
            pb.set_message(format!("Decoding {}", display_name));

            match self.decode_file(&file_path) {
                Ok(activity) => {
                    pb.println(format!(
                        "✓ Decoded {} samples from {}",
                        activity.samples.len(),
                        display_name
                    ));
                    decoded.push((file_path, activity));
                }
                Err(e) => {
                    warn!(file = %display_name, error = %e, "Failed to decode activity");
                    pb.println(format!("✗ Failed to decode {}: {}", display_name, e));
                }
            }

            pb.inc(1);
        }

        pb.finish_with_message("Decode complete");
        Ok(decoded)
    }

    fn collect_decodable_files(&self, dir_path: &Path) -> Result<Vec<PathBuf>, TrainFuelError> {
        if !dir_path.is_dir() {
            return Err(TrainFuelError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Path is not a directory: {}", dir_path.display()),
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir_path)? {
            let path = entry?.path();
            if path.is_file() && self.can_decode_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        Ok(files)
    }

    /// Check if any registered decoder accepts this file name
    pub fn can_decode_file(&self, file_path: &Path) -> bool {
        self.decoders.iter().any(|decoder| decoder.can_decode(file_path))
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode bytes of a declared format with the built-in decoders
pub fn decode_activity(
    bytes: &[u8],
    format: ActivityFormat,
    fallback_start: DateTime<Utc>,
) -> Result<RawActivity, DecodeError> {
    DecoderRegistry::new().decode_bytes(bytes, format, fallback_start)
}

/// Start time resolution shared by the decoders
pub(crate) fn resolve_start(
    session_start: Option<DateTime<Utc>>,
    first_sample: Option<DateTime<Utc>>,
    fallback_start: DateTime<Utc>,
) -> DateTime<Utc> {
    session_start.or(first_sample).unwrap_or(fallback_start)
}

/// Whole seconds from `start` to `timestamp`, clamped at zero
pub(crate) fn offset_seconds(timestamp: DateTime<Utc>, start: DateTime<Utc>) -> u32 {
    let seconds = (timestamp - start).num_seconds();
    seconds.clamp(0, u32::MAX as i64) as u32
}

/// Lenient numeric parse used by the text decoders; bad input becomes `None`
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
