//! Stage 3: Trajectory Filter (spec §4.3). Thin adapter from this crate's
//! [`LoadedSample`] rows to [`legtrace_filter`]'s pure numeric IMM bank.
//! Grounded in `calc/trips.py::filter_trips`.

use legtrace_filter::{imm, FilterError, FilterSample, ImmConfig, Mode};

use crate::model::{ActivityType, LoadedSample};

/// Per-sample outputs of a trip's IMM pass (spec §4.3): smoothed position,
/// most-likely mode path, mode posterior, and the in-vehicle sub-filter's
/// log-likelihood trace consumed by the transit matcher (spec §4.5).
pub struct TrajectoryFilterOutput {
    pub smoothed_positions: Vec<(f64, f64)>,
    pub mode_path: Vec<Mode>,
    pub mode_probs: Vec<[f64; 4]>,
    pub in_vehicle_log_likelihood: Vec<f64>,
}

/// Runs the IMM filter and Viterbi decode over one trip's samples.
pub fn run_trip(samples: &[LoadedSample]) -> Result<TrajectoryFilterOutput, FilterError> {
    let filter_samples: Vec<FilterSample> = samples.iter().map(to_filter_sample).collect();
    let output = imm::run(&filter_samples, &ImmConfig::default())?;
    Ok(TrajectoryFilterOutput {
        smoothed_positions: output.means.iter().map(|m| (m[0], m[1])).collect(),
        mode_path: output.path,
        mode_probs: output.mode_probs,
        in_vehicle_log_likelihood: output.in_vehicle_log_likelihood,
    })
}

/// Maps a reported activity class to a filter-bank mode hint, per the
/// original's `ATYPE_MAPPING` (running/on_foot/walking -> walking,
/// on_bicycle -> on_bicycle, in_vehicle -> in_vehicle, still -> still,
/// unknown has no hint).
fn activity_hint(atype: ActivityType) -> Option<Mode> {
    match atype {
        ActivityType::Still => Some(Mode::Still),
        ActivityType::Walking | ActivityType::OnFoot | ActivityType::Running => Some(Mode::Walking),
        ActivityType::OnBicycle => Some(Mode::OnBicycle),
        ActivityType::InVehicle => Some(Mode::InVehicle),
        ActivityType::Unknown => None,
    }
}

fn to_filter_sample(loaded: &LoadedSample) -> FilterSample {
    let sample = &loaded.sample;

    let activity_hint = match (activity_hint(sample.atype), sample.aconf) {
        (Some(mode), Some(aconf)) if aconf >= 0.5 => {
            // an overconfident (1.0) device report is discounted by half
            // (spec §4.3 Activity prior).
            let confidence = if aconf >= 1.0 { aconf / 2.0 } else { aconf };
            Some((mode, confidence))
        }
        _ => None,
    };

    FilterSample {
        dt: loaded.dt,
        x: sample.x,
        y: sample.y,
        speed: sample.speed,
        location_std: sample.loc_error.max(0.1),
        vehicle_way_distance: sample.vehicle_way_distance(),
        activity_hint,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Sample;
    use chrono::{TimeZone, Utc};

    fn sample(minute: i64, x: f64, dt: f64, atype: ActivityType, aconf: Option<f64>) -> LoadedSample {
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute);
        LoadedSample {
            sample: Sample {
                time,
                x,
                y: 0.0,
                speed: Some(1.0),
                loc_error: 5.0,
                atype,
                aconf,
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
    fn overconfident_activity_report_is_halved() {
        let loaded = sample(0, 0.0, 0.0, ActivityType::Walking, Some(1.0));
        let filter_sample = to_filter_sample(&loaded);
        let (_, confidence) = filter_sample.activity_hint.unwrap();
        assert_eq!(confidence, 0.5);
    }

    #[test]
    fn low_confidence_report_yields_no_hint() {
        let loaded = sample(0, 0.0, 0.0, ActivityType::OnBicycle, Some(0.3));
        let filter_sample = to_filter_sample(&loaded);
        assert!(filter_sample.activity_hint.is_none());
    }

    #[test]
    fn run_trip_produces_aligned_output() {
        let samples: Vec<LoadedSample> = (0..20)
            .map(|i| sample(i, i as f64 * 2.0, if i == 0 { 0.0 } else { 60.0 }, ActivityType::Walking, Some(0.8)))
            .collect();
        let output = run_trip(&samples).expect("filter should succeed on clean walking data");
        assert_eq!(output.smoothed_positions.len(), samples.len());
        assert_eq!(output.mode_path.len(), samples.len());
    }
}
