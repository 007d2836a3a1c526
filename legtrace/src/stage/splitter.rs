//! Stage 2: Trip Splitter (spec §4.2). Groups consecutive samples into
//! candidate trips by temporal gap, then discards clusters that never move
//! far enough from their own centroid to be a real trip. Grounded in
//! `calc/trips.py::read_locations`'s trip-filtering block.

use crate::config::PipelineConfig;
use crate::model::LoadedSample;

/// `trip_id` for samples belonging to a discarded candidate trip when
/// `include_all` is set (spec §4.2).
pub const DISCARDED_TRIP_ID: i64 = -1;

const GOOD_SAMPLE_LOC_ERROR_M: f64 = 100.0;
const MIN_FAR_SAMPLES: usize = 10;

/// Splits a device's loaded samples into trips, discarding stationary-noise
/// clusters. Returns one `(trip_id, samples)` entry per kept trip with
/// sequential ids starting at 0, plus a single `(DISCARDED_TRIP_ID, samples)`
/// entry carrying every discarded sample when `include_all` is set.
pub fn split(samples: Vec<LoadedSample>, config: &PipelineConfig, include_all: bool) -> Vec<(i64, Vec<LoadedSample>)> {
    if samples.is_empty() {
        return Vec::new();
    }

    let gap_threshold_secs = (config.mins_between_trips * 60) as f64;
    let mut candidates: Vec<Vec<LoadedSample>> = Vec::new();
    for sample in samples {
        let starts_new = match candidates.last() {
            None => true,
            Some(_) => sample.dt > gap_threshold_secs,
        };
        if starts_new {
            candidates.push(Vec::new());
        }
        candidates.last_mut().unwrap().push(sample);
    }

    let mut kept = Vec::new();
    let mut discarded = Vec::new();
    for candidate in candidates {
        if is_real_trip(&candidate, config) {
            kept.push(candidate);
        } else {
            discarded.extend(candidate);
        }
    }

    let mut result: Vec<(i64, Vec<LoadedSample>)> = kept
        .into_iter()
        .enumerate()
        .map(|(idx, samples)| (idx as i64, samples))
        .collect();

    if include_all && !discarded.is_empty() {
        result.push((DISCARDED_TRIP_ID, discarded));
    }

    result
}

/// A candidate trip is real only if more than 10 "good" samples
/// (`loc_error < 100`) sit further than `min_distance_moved_in_trip` from
/// the centroid of all good samples in the candidate (spec §4.2 steps 1-3).
fn is_real_trip(candidate: &[LoadedSample], config: &PipelineConfig) -> bool {
    let good: Vec<&LoadedSample> = candidate
        .iter()
        .filter(|s| s.sample.loc_error < GOOD_SAMPLE_LOC_ERROR_M)
        .collect();
    if good.is_empty() {
        return false;
    }

    let n = good.len() as f64;
    let (sum_x, sum_y) = good.iter().fold((0.0, 0.0), |(sx, sy), s| (sx + s.sample.x, sy + s.sample.y));
    let (mean_x, mean_y) = (sum_x / n, sum_y / n);

    let far_count = good
        .iter()
        .filter(|s| {
            let dx = s.sample.x - mean_x;
            let dy = s.sample.y - mean_y;
            (dx * dx + dy * dy).sqrt() > config.min_distance_moved_in_trip
        })
        .count();

    far_count > MIN_FAR_SAMPLES
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{ActivityType, Sample};
    use chrono::{TimeZone, Utc};

    fn loaded(minute: i64, x: f64, y: f64, dt: f64, loc_error: f64) -> LoadedSample {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute);
        LoadedSample {
            sample: Sample {
                time,
                x,
                y,
                speed: Some(1.0),
                loc_error,
                atype: ActivityType::Walking,
                aconf: Some(0.9),
                is_moving: Some(true),
                closest_car_way_dist: 10.0,
                closest_rail_way_dist: 50.0,
                created_at: time,
            },
            dt,
            dd: 0.0,
        }
    }

    #[test]
    fn gap_splits_into_two_trips() {
        let mut samples = Vec::new();
        for i in 0..31 {
            let x = i as f64 * 70.0; // moves 2100m over 30 min, plenty of dispersion
            samples.push(loaded(i, x, 0.0, if i == 0 { 0.0 } else { 60.0 }, 5.0));
        }
        // 25 minute gap, well beyond the 20-minute threshold.
        let gap_start = 31;
        for i in 0..31 {
            let x = i as f64 * 70.0;
            samples.push(loaded(gap_start + 25 + i, x, 2000.0, if i == 0 { 25.0 * 60.0 } else { 60.0 }, 5.0));
        }

        let config = PipelineConfig::default();
        let trips = split(samples, &config, false);
        assert_eq!(trips.len(), 2, "a 25-minute gap should split into two trips");
    }

    #[test]
    fn stationary_jitter_is_rejected() {
        let mut samples = Vec::new();
        for i in 0..200 {
            // jitters within ~50m, never exceeding the 200m dispersion rule.
            let jitter = if i % 2 == 0 { 20.0 } else { -20.0 };
            samples.push(loaded(i, jitter, 0.0, if i == 0 { 0.0 } else { 12.0 }, 5.0));
        }
        let config = PipelineConfig::default();
        let trips = split(samples, &config, false);
        assert_eq!(trips.len(), 0, "jitter within the dispersion radius should not form a trip");
    }

    #[test]
    fn include_all_tags_discarded_samples_with_negative_one() {
        let mut samples = Vec::new();
        for i in 0..50 {
            samples.push(loaded(i, 1.0, 0.0, if i == 0 { 0.0 } else { 12.0 }, 5.0));
        }
        let config = PipelineConfig::default();
        let trips = split(samples, &config, true);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].0, DISCARDED_TRIP_ID);
    }
}
