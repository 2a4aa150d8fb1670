use chrono::{TimeZone, Utc};
use trainfuel::decode::gpx::haversine_distance;
use trainfuel::metrics::{training_stress, variability_index, MetricsConfig};
use trainfuel::{summarize, MetricsCalculator, RawActivity, Sample, Sport};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use proptest::prelude::*;

    fn create_test_ride(powers: &[f64]) -> RawActivity {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut activity = RawActivity::new(Sport::Cycling, start);
        activity.samples = powers
            .iter()
            .enumerate()
            .map(|(i, p)| Sample {
                power: Some(*p),
                heart_rate: Some(140.0),
                ..Sample::at(i as u32)
            })
            .collect();
        activity
    }

    #[test]
    fn test_hour_at_threshold_is_100_tss() {
        let mut ride = create_test_ride(&vec![250.0; 3600]);
        ride.totals.timer_seconds = Some(3600.0);

        let summary = summarize(&ride, 250.0);
        assert_eq!(summary.duration_seconds, 3600);
        assert_eq!(summary.normalized_power, Some(250.0));
        assert_eq!(summary.intensity_factor, 1.0);
        assert_eq!(summary.tss, 100.0);
        assert_eq!(summary.variability_index, 1.0);
        assert_eq!(summary.calories, 900);
        assert_eq!(summary.avg_heart_rate, Some(140));
    }

    #[test]
    fn test_intervals_raise_np_above_average() {
        let powers: Vec<f64> = (0..1200)
            .map(|i| if (i / 60) % 2 == 0 { 350.0 } else { 100.0 })
            .collect();
        let summary = summarize(&create_test_ride(&powers), 250.0);

        let np = summary.normalized_power.unwrap();
        let avg = summary.avg_power.unwrap();
        assert!(np > avg);
        assert!(summary.variability_index > 1.0);
    }

    #[test]
    fn test_zero_ftp_zeroes_derived_load() {
        let summary = summarize(&create_test_ride(&vec![200.0; 600]), 0.0);
        assert_eq!(summary.tss, 0.0);
        assert_eq!(summary.intensity_factor, 0.0);
        assert_eq!(summary.variability_index, 0.0);
        assert_eq!(summary.avg_power, Some(200.0));
    }

    #[test]
    fn test_variability_index_edges() {
        assert_eq!(variability_index(0.0, 200.0, 250.0), 0.0);
        assert_eq!(variability_index(200.0, 200.0, 0.0), 0.0);
        assert_eq!(variability_index(200.0, 0.0, 250.0), 1.0);
    }

    #[test]
    fn test_elevation_noise_filter() {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut hike = RawActivity::new(Sport::Hiking, start);
        hike.samples = [400.0, 405.0, 403.0, 410.0, 600.0, 602.0]
            .iter()
            .enumerate()
            .map(|(i, ele)| Sample {
                elevation_m: Some(*ele),
                ..Sample::at(i as u32 * 10)
            })
            .collect();

        let filtered = MetricsCalculator::new().summarize(&hike, 0.0);
        assert_eq!(filtered.elevation_gain_m, 14.0);

        let unfiltered = MetricsCalculator::with_config(MetricsConfig {
            elevation_noise_threshold_m: None,
            ..MetricsConfig::default()
        })
        .summarize(&hike, 0.0);
        assert_eq!(unfiltered.elevation_gain_m, 204.0);
    }

    #[test]
    fn test_haversine_one_degree_of_latitude() {
        let distance = haversine_distance(0.0, 0.0, 1.0, 0.0);
        let expected = 111_190.0;
        assert!((distance - expected).abs() / expected < 0.005);
    }

    #[test]
    fn test_distance_from_positions() {
        let start = Utc.with_ymd_and_hms(2024, 9, 23, 7, 0, 0).unwrap();
        let mut run = RawActivity::new(Sport::Running, start);
        run.samples = (0..=10)
            .map(|i| Sample {
                lat: Some(47.0 + i as f64 * 0.001),
                lon: Some(8.0),
                ..Sample::at(i * 30)
            })
            .collect();

        let summary = summarize(&run, 0.0);
        assert!((summary.distance_m - 1111.9).abs() < 5.0);
        assert_eq!(summary.start_lat, Some(47.0));
        assert!(summary.avg_speed.unwrap() > 0.0);
    }

    proptest! {
        #[test]
        fn test_np_is_mean_below_min_samples(powers in prop::collection::vec(0.0f64..1500.0, 1..30)) {
            let ride = create_test_ride(&powers);
            let np = MetricsCalculator::new().normalized_power(&ride.samples).unwrap();
            let mean = powers.iter().sum::<f64>() / powers.len() as f64;
            prop_assert!((np - mean).abs() < 1e-9);
        }

        #[test]
        fn test_steady_power_np_equals_power(power in 50.0f64..600.0, seconds in 30usize..2000) {
            let ride = create_test_ride(&vec![power; seconds]);
            let np = MetricsCalculator::new().normalized_power(&ride.samples).unwrap();
            prop_assert!((np - power).abs() < 1e-6);
        }

        #[test]
        fn test_summary_values_are_finite(
            powers in prop::collection::vec(0.0f64..2000.0, 0..400),
            ftp in 0.0f64..400.0,
        ) {
            let summary = summarize(&create_test_ride(&powers), ftp);
            prop_assert!(summary.tss.is_finite() && summary.tss >= 0.0);
            prop_assert!(summary.intensity_factor.is_finite());
            prop_assert!(summary.variability_index.is_finite());
            prop_assert!(summary.distance_m.is_finite());
        }

        #[test]
        fn test_training_stress_scales_with_duration(
            duration in 60.0f64..20000.0,
            np in 50.0f64..500.0,
            ftp in 100.0f64..400.0,
        ) {
            let (single, if_single) = training_stress(duration, np, ftp);
            let (double, if_double) = training_stress(duration * 2.0, np, ftp);
            prop_assert!((double - 2.0 * single).abs() < 1e-6);
            prop_assert!((if_single - if_double).abs() < 1e-12);
        }
    }
}
