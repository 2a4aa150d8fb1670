use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;
use trainfuel::adaptive::{AdaptiveConfig, BaselineProfile};
use trainfuel::cache::ActivityCache;
use trainfuel::metrics::MetricsConfig;
use trainfuel::store::{AdaptiveService, SqliteStore, StateStore};
use trainfuel::timeseries::{MAX_POINTS, MAX_ROUTE_POINTS};
use trainfuel::{
    AdaptiveEngine, CompactSeries, Pipeline, PmcCalculator, RawActivity, Sample, Sport,
    TssEstimator,
};

#[cfg(test)]
mod integration_tests {
    use super::*;

    fn start_of(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, day, 7, 0, 0).unwrap()
    }

    fn create_test_activity(start: DateTime<Utc>, seconds: u32, power: f64) -> RawActivity {
        let mut activity = RawActivity::new(Sport::Cycling, start);
        activity.samples = (0..seconds)
            .map(|i| Sample {
                power: Some(power),
                heart_rate: Some(145.0),
                speed_kmh: Some(32.4),
                elevation_m: Some(400.0),
                lat: Some(47.0 + i as f64 * 0.0001),
                lon: Some(8.0),
                ..Sample::at(i)
            })
            .collect();
        activity
    }

    #[test]
    fn test_hour_long_series_is_subsampled() {
        let activity = create_test_activity(start_of(23), 3600, 220.0);
        let series = CompactSeries::from_samples(&activity.samples);

        assert!(series.points.len() <= MAX_POINTS);
        assert_eq!(series.total_points, 3600);
        assert_eq!(series.stride, 12);
        assert_eq!(series.first_offset(), Some(0));
        let last = series.last_offset().unwrap();
        assert!(3599 - last < series.stride as i64);

        assert!(series.route.len() <= MAX_ROUTE_POINTS);
        assert_eq!(series.route_total_points, 3600);
        assert_eq!(series.route[0], [47.0, 8.0]);

        // 32.4 km/h is 9 m/s
        assert_eq!(series.points[1].4, 9.0);
        assert_eq!(series.points[1].1, 220);
    }

    #[test]
    fn test_short_series_is_kept_whole() {
        let activity = create_test_activity(start_of(23), 120, 200.0);
        let series = CompactSeries::from_samples(&activity.samples);

        assert_eq!(series.points.len(), 120);
        assert_eq!(series.stride, 1);
        assert!(CompactSeries::from_samples(&[]).is_empty());
    }

    #[test]
    fn test_files_to_daily_state() {
        let temp_dir = TempDir::new().unwrap();
        for day in 17..=22u32 {
            let activity = create_test_activity(start_of(day), 5400, 230.0);
            let path = temp_dir.path().join(format!("ride_{}.json", day));
            std::fs::write(&path, serde_json::to_vec(&activity).unwrap()).unwrap();
        }

        let pipeline = Pipeline::new(MetricsConfig::default(), 250.0)
            .with_cache(ActivityCache::new(Duration::minutes(10), 32));
        let store = SqliteStore::open(temp_dir.path().join("trainfuel.db")).unwrap();

        let mut paths: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| pipeline.registry().can_decode_file(path))
            .collect();
        paths.sort();
        assert_eq!(paths.len(), 6);

        for path in &paths {
            let record = pipeline.ingest_file(path).unwrap();
            assert!(record.summary.tss > 0.0);
            store.upsert_activity("athlete_1", &record).unwrap();
        }
        // Re-ingesting identical bytes keeps one row per activity
        let again = pipeline.ingest_file(&paths[0]).unwrap();
        store.upsert_activity("athlete_1", &again).unwrap();

        let target = NaiveDate::from_ymd_opt(2024, 9, 23).unwrap();
        let records = store
            .load_activities("athlete_1", target - Duration::days(30), target)
            .unwrap();
        assert_eq!(records.len(), 6);
        assert!(records
            .windows(2)
            .all(|w| w[0].summary.start_time <= w[1].summary.start_time));

        let summaries: Vec<_> = records.iter().map(|r| r.summary.clone()).collect();
        let chronicle = PmcCalculator::new()
            .chronicle_from_summaries(&summaries, &TssEstimator::new(), 42, target)
            .unwrap();
        store
            .upsert_day_loads("athlete_1", &chronicle.rounded().days)
            .unwrap();

        let stored_today = store.load_day_load("athlete_1", target).unwrap().unwrap();
        assert_eq!(stored_today.tss, 0.0);
        assert!(stored_today.tsb < 0.0);

        let service = AdaptiveService::new(AdaptiveEngine::new(AdaptiveConfig::default()), store);
        let baseline = BaselineProfile {
            bmr_kcal: 1700.0,
            daily_kcal: 2400.0,
            weight_kg: 70.0,
        };
        let outcome = service
            .recompute("athlete_1", target, &[], None, Some(&baseline))
            .unwrap();

        assert!(outcome.state.fatigue_score > 50.0);
        assert!(outcome.state.recovery_need.is_elevated());
        assert_eq!(outcome.adaptations.nutrition.macro_sum(), 100);

        let stored = service
            .store()
            .load_daily_state("athlete_1", target)
            .unwrap()
            .unwrap();
        assert_eq!(stored.state.recovery_need, outcome.state.recovery_need);
    }
}
