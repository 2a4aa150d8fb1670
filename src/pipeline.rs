//! End-to-end ingestion: bytes → `RawActivity` → `ActivitySummary` plus the
//! compact series persisted next to it.

use crate::cache::{fingerprint, request_key, ActivityCache};
use crate::decode::{ActivityFormat, DecoderRegistry};
use crate::error::{DecodeError, TrainFuelError};
use crate::metrics::{MetricsCalculator, MetricsConfig};
use crate::models::{ActivitySummary, RawActivity};
use crate::timeseries::CompactSeries;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// A decoded and summarized activity ready for storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    /// SHA-256 of the raw input bytes
    pub fingerprint: String,
    pub source_format: Option<ActivityFormat>,
    pub name: Option<String>,
    pub summary: ActivitySummary,
    pub series: CompactSeries,
}

impl ActivityRecord {
    pub fn from_raw(raw: &RawActivity, summary: ActivitySummary, fingerprint: String) -> Self {
        ActivityRecord {
            id: Uuid::new_v4(),
            fingerprint,
            source_format: raw.source_format,
            name: raw.name.clone(),
            summary,
            series: CompactSeries::from_samples(&raw.samples),
        }
    }
}

pub struct Pipeline {
    registry: DecoderRegistry,
    calculator: MetricsCalculator,
    reference_ftp: f64,
    cache: Option<ActivityCache<ActivityRecord>>,
}

impl Pipeline {
    /// `reference_ftp` of 0 leaves TSS/IF/VI at zero
    pub fn new(config: MetricsConfig, reference_ftp: f64) -> Self {
        Pipeline {
            registry: DecoderRegistry::new(),
            calculator: MetricsCalculator::with_config(config),
            reference_ftp,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: ActivityCache<ActivityRecord>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&ActivityCache<ActivityRecord>> {
        self.cache.as_ref()
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// Decode and summarize a payload of a declared format.
    ///
    /// Identical requests (bytes, format and fallback start) are served from
    /// the cache while the entry is fresh.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub fn ingest(
        &self,
        bytes: &[u8],
        format: ActivityFormat,
        fallback_start: DateTime<Utc>,
    ) -> Result<ActivityRecord, DecodeError> {
        let key = request_key(bytes, format.extension(), fallback_start);
        if let Some(cache) = &self.cache {
            if let Some(record) = cache.get_at(&key, Utc::now()) {
                debug!(key = %key, "Activity served from cache");
                return Ok(record);
            }
        }

        let raw = self.registry.decode_bytes(bytes, format, fallback_start)?;
        let summary = self.calculator.summarize(&raw, self.reference_ftp);
        let record = ActivityRecord::from_raw(&raw, summary, fingerprint(bytes));

        if let Some(cache) = &self.cache {
            cache.insert_at(key, record.clone(), Utc::now());
        }
        Ok(record)
    }

    /// Ingest a file, inferring the format from its name
    pub fn ingest_file(&self, file_path: &Path) -> Result<ActivityRecord, TrainFuelError> {
        let file_name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let (format, _) = ActivityFormat::from_file_name(file_name)?;

        let bytes = std::fs::read(file_path)?;
        let fallback_start = std::fs::metadata(file_path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let record = self.ingest(&bytes, format, fallback_start)?;
        info!(
            file = %file_path.display(),
            duration = record.summary.duration_seconds,
            tss = record.summary.tss,
            "Ingested activity"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const JSON_ACTIVITY: &str = r#"{
        "sport": "cycling",
        "start_time": "2024-09-23T07:00:00Z",
        "samples": [
            {"time_offset_seconds": 0, "power": 200.0},
            {"time_offset_seconds": 1, "power": 220.0},
            {"time_offset_seconds": 2, "power": 180.0}
        ]
    }"#;

    fn fallback() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_ingest_json() {
        let pipeline = Pipeline::new(MetricsConfig::default(), 250.0);
        let record = pipeline
            .ingest(JSON_ACTIVITY.as_bytes(), ActivityFormat::Json, fallback())
            .unwrap();

        assert_eq!(record.source_format, Some(ActivityFormat::Json));
        assert_eq!(record.summary.avg_power, Some(200.0));
        assert_eq!(record.series.total_points, 3);
        assert_eq!(record.fingerprint.len(), 64);
    }

    #[test]
    fn test_cache_returns_same_record() {
        let pipeline = Pipeline::new(MetricsConfig::default(), 250.0)
            .with_cache(ActivityCache::new(Duration::minutes(5), 8));

        let first = pipeline
            .ingest(JSON_ACTIVITY.as_bytes(), ActivityFormat::Json, fallback())
            .unwrap();
        let second = pipeline
            .ingest(JSON_ACTIVITY.as_bytes(), ActivityFormat::Json, fallback())
            .unwrap();

        assert_eq!(first.id, second.id);
        let metrics = pipeline.cache().map(|c| c.metrics()).unwrap_or_default();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
    }

    #[test]
    fn test_cache_is_keyed_by_declared_format() {
        let pipeline = Pipeline::new(MetricsConfig::default(), 250.0)
            .with_cache(ActivityCache::new(Duration::minutes(5), 8));

        pipeline
            .ingest(JSON_ACTIVITY.as_bytes(), ActivityFormat::Json, fallback())
            .unwrap();
        let as_fit = pipeline.ingest(JSON_ACTIVITY.as_bytes(), ActivityFormat::Fit, fallback());

        assert!(matches!(
            as_fit,
            Err(DecodeError::InvalidSignature {
                format: ActivityFormat::Fit,
                ..
            })
        ));
        assert_eq!(pipeline.cache().map(|c| c.len()), Some(1));
    }

    #[test]
    fn test_cache_is_keyed_by_fallback_start() {
        let pipeline = Pipeline::new(MetricsConfig::default(), 250.0)
            .with_cache(ActivityCache::new(Duration::minutes(5), 8));
        let undated = r#"{"sport": "running", "samples": [{"time_offset_seconds": 0}]}"#;
        let later = fallback() + Duration::days(3);

        let first = pipeline
            .ingest(undated.as_bytes(), ActivityFormat::Json, fallback())
            .unwrap();
        let second = pipeline
            .ingest(undated.as_bytes(), ActivityFormat::Json, later)
            .unwrap();

        assert_eq!(first.summary.start_time, fallback());
        assert_eq!(second.summary.start_time, later);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_decode_failure_is_not_cached() {
        let pipeline = Pipeline::new(MetricsConfig::default(), 250.0)
            .with_cache(ActivityCache::new(Duration::minutes(5), 8));

        let result = pipeline.ingest(b"{not json", ActivityFormat::Json, fallback());
        assert!(matches!(result, Err(DecodeError::Parse { .. })));
        assert_eq!(pipeline.cache().map(|c| c.len()), Some(0));
    }
}
