//! Stage 5: Transit Matcher (spec §4.5). For each `in_vehicle` leg, looks up
//! nearby real-time transit vehicle positions and rewrites the leg's mode to
//! the matched route type when the fit is good enough. Grounded in
//! `calc/trips.py::split_trip_legs` (lines 594-607, see `SPEC_FULL.md` §4.5
//! for the two resolved Open Questions) and `bambam-core`'s
//! `OpportunitySpatialRow` rstar usage for the spatial query.

use chrono::{DateTime, Duration, Utc};
use legtrace_filter::kalman::{self, KalmanState};
use legtrace_filter::{imm, Mode as FilterMode};
use rstar::RTree;

use crate::config::PipelineConfig;
use crate::model::{Leg, LoadedSample, TimeWindow, TransitVehicleObservation, TransportMode};
use crate::stage::filter::TrajectoryFilterOutput;
use crate::store::TransitStore;

/// Runs the transit matcher over every `in_vehicle` leg of one trip.
/// Transit store failures are caught and logged per leg; the leg keeps its
/// `in_vehicle` mode rather than aborting the trip (spec §4.5 Failure
/// handling).
pub async fn match_transit_legs<T: TransitStore>(
    store: &T,
    device_id: &str,
    mut legs: Vec<Leg>,
    trip_samples: &[LoadedSample],
    filter_output: &TrajectoryFilterOutput,
    config: &PipelineConfig,
    user_has_car: bool,
) -> Vec<Leg> {
    for leg in legs.iter_mut() {
        if leg.mode != TransportMode::InVehicle {
            continue;
        }

        let window = TimeWindow::new(leg.start_time, leg.end_time).expand(Duration::seconds(config.transit_time_window_secs));
        let observations = match store.read_transit_observations(device_id, window).await {
            Ok(obs) => obs,
            Err(e) => {
                log::warn!("transit lookup failed for leg [{}, {}]: {e}", leg.start_time, leg.end_time);
                continue;
            }
        };

        let nearby = observations_within_buffer(leg, &observations, config.transit_buffer_m);
        if nearby.is_empty() {
            continue;
        }

        let range = leg_sample_range(trip_samples, leg);
        let Some(best) = best_candidate(trip_samples, filter_output, range, &nearby) else {
            continue;
        };

        let threshold = threshold_for(best.route_type, config);
        if passes(best.score, threshold, user_has_car) {
            leg.mode = best.route_type.into_transport_mode();
        }
    }
    legs
}

fn threshold_for(route_type: crate::model::TransitRouteType, config: &PipelineConfig) -> f64 {
    use crate::model::TransitRouteType::*;
    match route_type {
        Tram => config.transit_thresholds.tram,
        Train => config.transit_thresholds.train,
        Bus => config.transit_thresholds.bus,
    }
}

/// Resolved sign gate (`SPEC_FULL.md` §4.5): `score` is a fit score (higher
/// is better, can be negative), so the match passes when it clears the
/// *negated* per-type threshold, or unconditionally when the device has no
/// registered car.
fn passes(score: f64, threshold: f64, user_has_car: bool) -> bool {
    score > -threshold || !user_has_car
}

fn observations_within_buffer<'a>(leg: &Leg, observations: &'a [TransitVehicleObservation], buffer_m: f64) -> Vec<&'a TransitVehicleObservation> {
    if leg.sample_positions.is_empty() || observations.is_empty() {
        return Vec::new();
    }
    let points: Vec<[f64; 2]> = leg.sample_positions.iter().map(|&(x, y)| [x, y]).collect();
    let tree = RTree::bulk_load(points);
    let buffer_sq = buffer_m * buffer_m;
    observations
        .iter()
        .filter(|o| {
            tree.nearest_neighbor(&[o.x, o.y])
                .map(|p| {
                    let dx = p[0] - o.x;
                    let dy = p[1] - o.y;
                    dx * dx + dy * dy <= buffer_sq
                })
                .unwrap_or(false)
        })
        .collect()
}

struct Candidate {
    route_type: crate::model::TransitRouteType,
    score: f64,
}

/// Groups candidate observations by `vehicle_ref`, scores each against the
/// leg, and returns the maximum-scoring vehicle (spec §4.5 step 2-3; "closest"
/// resolved to mean highest fit score, see `SPEC_FULL.md` §4.5).
fn best_candidate(
    trip_samples: &[LoadedSample],
    filter_output: &TrajectoryFilterOutput,
    range: (usize, usize),
    candidates: &[&TransitVehicleObservation],
) -> Option<Candidate> {
    use std::collections::BTreeMap;

    let mut by_vehicle: BTreeMap<&str, Vec<&TransitVehicleObservation>> = BTreeMap::new();
    for &obs in candidates {
        by_vehicle.entry(obs.vehicle_ref.as_str()).or_default().push(obs);
    }

    let free_ll = free_log_likelihood(filter_output, range);

    let mut scored: Vec<Candidate> = by_vehicle
        .into_values()
        .map(|obs| {
            let route_type = obs[0].route_type;
            let candidate_ll = candidate_log_likelihood(trip_samples, range, &obs);
            Candidate {
                route_type,
                score: candidate_ll - free_ll,
            }
        })
        .collect();

    scored.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.pop()
}

fn leg_sample_range(trip_samples: &[LoadedSample], leg: &Leg) -> (usize, usize) {
    let start = trip_samples.iter().position(|s| s.sample.time >= leg.start_time).unwrap_or(trip_samples.len());
    let end = trip_samples
        .iter()
        .rposition(|s| s.sample.time <= leg.end_time)
        .map(|i| i + 1)
        .unwrap_or(start);
    (start, end.max(start))
}

fn free_log_likelihood(filter_output: &TrajectoryFilterOutput, range: (usize, usize)) -> f64 {
    filter_output.in_vehicle_log_likelihood[range.0..range.1]
        .iter()
        .filter(|v| v.is_finite())
        .sum()
}

fn nearest_observation_position(observations: &[&TransitVehicleObservation], time: DateTime<Utc>) -> Option<(f64, f64)> {
    observations
        .iter()
        .min_by_key(|o| (o.time - time).num_milliseconds().abs())
        .map(|o| (o.x, o.y))
}

/// Re-runs a single in-vehicle Kalman filter over the leg's samples with
/// the candidate vehicle's nearest-in-time observation spliced in as the
/// position measurement at each step, accumulating log-likelihood (spec
/// §4.5 step 2; see `SPEC_FULL.md` §4.5 "Fit score implementation").
fn candidate_log_likelihood(trip_samples: &[LoadedSample], range: (usize, usize), observations: &[&TransitVehicleObservation]) -> f64 {
    let (start, end) = range;
    if start >= end {
        return f64::NEG_INFINITY;
    }

    let params = imm::mode_params(FilterMode::InVehicle);
    let first = &trip_samples[start].sample;
    let mut state = KalmanState {
        mean: [first.x, first.y, 0.0, 0.0],
        cov: [
            [first.loc_error.powi(2), 0.0, 0.0, 0.0],
            [0.0, first.loc_error.powi(2), 0.0, 0.0],
            [0.0, 0.0, 4.0, 0.0],
            [0.0, 0.0, 0.0, 4.0],
        ],
    };

    let mut total_ll = 0.0;
    let mut prev_time = first.time;
    for loaded in &trip_samples[start..end] {
        let sample = &loaded.sample;
        let dt = (sample.time - prev_time).num_milliseconds() as f64 / 1000.0;
        let predicted = kalman::predict(&state, dt, &params);
        let (mx, my) = nearest_observation_position(observations, sample.time).unwrap_or((sample.x, sample.y));
        let step = kalman::update(&predicted, mx, my, sample.speed, sample.loc_error.max(0.1), sample.vehicle_way_distance(), &params);
        state = step.state;
        total_ll += if step.well_conditioned { step.log_likelihood } else { f64::NEG_INFINITY };
        prev_time = sample.time;
    }

    total_ll
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{ActivityType, Sample, TransitRouteType};
    use crate::store::mock::InMemoryStore;
    use chrono::TimeZone;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn trip_samples(n: usize) -> Vec<LoadedSample> {
        (0..n)
            .map(|i| LoadedSample {
                sample: Sample {
                    time: base_time() + Duration::seconds(i as i64 * 10),
                    x: i as f64 * 150.0,
                    y: 0.0,
                    speed: Some(15.0),
                    loc_error: 10.0,
                    atype: ActivityType::InVehicle,
                    aconf: Some(0.8),
                    is_moving: Some(true),
                    closest_car_way_dist: 5.0,
                    closest_rail_way_dist: 5.0,
                    created_at: base_time(),
                },
                dt: if i == 0 { 0.0 } else { 10.0 },
                dd: if i == 0 { 0.0 } else { 150.0 },
            })
            .collect()
    }

    fn in_vehicle_leg(samples: &[LoadedSample]) -> Leg {
        let positions: Vec<(f64, f64)> = samples.iter().map(|s| (s.sample.x, s.sample.y)).collect();
        Leg {
            start_time: samples.first().unwrap().sample.time,
            end_time: samples.last().unwrap().sample.time,
            start_pos: positions[0],
            end_pos: *positions.last().unwrap(),
            sample_positions: positions,
            length_m: 1000.0,
            mode: TransportMode::InVehicle,
            is_user_corrected: false,
        }
    }

    #[tokio::test]
    async fn leg_without_nearby_observations_stays_in_vehicle() {
        let samples = trip_samples(10);
        let leg = in_vehicle_leg(&samples);
        let filter_output = TrajectoryFilterOutput {
            smoothed_positions: samples.iter().map(|s| (s.sample.x, s.sample.y)).collect(),
            mode_path: vec![FilterMode::InVehicle; 10],
            mode_probs: vec![[0.0, 0.0, 0.0, 1.0]; 10],
            in_vehicle_log_likelihood: vec![-2.0; 10],
        };
        let store = InMemoryStore::new();
        let config = PipelineConfig::default();
        let legs = match_transit_legs(&store, "device-1", vec![leg], &samples, &filter_output, &config, false).await;
        assert_eq!(legs[0].mode, TransportMode::InVehicle);
    }

    #[tokio::test]
    async fn bus_match_within_buffer_and_threshold_reclassifies() {
        let samples = trip_samples(10);
        let leg = in_vehicle_leg(&samples);
        let bus_obs: Vec<TransitVehicleObservation> = samples
            .iter()
            .map(|s| TransitVehicleObservation {
                vehicle_ref: "bus-42".to_string(),
                vehicle_journey_ref: None,
                time: s.sample.time,
                x: s.sample.x + 5.0,
                y: s.sample.y,
                route_type: TransitRouteType::Bus,
                route_name: Some("42".to_string()),
            })
            .collect();
        let filter_output = TrajectoryFilterOutput {
            smoothed_positions: samples.iter().map(|s| (s.sample.x, s.sample.y)).collect(),
            mode_path: vec![FilterMode::InVehicle; 10],
            mode_probs: vec![[0.0, 0.0, 0.0, 1.0]; 10],
            in_vehicle_log_likelihood: vec![-200.0; 10],
        };
        let store = InMemoryStore::new().with_transit("device-1", bus_obs);
        let config = PipelineConfig::default();
        let legs = match_transit_legs(&store, "device-1", vec![leg], &samples, &filter_output, &config, false).await;
        assert_eq!(legs[0].mode, TransportMode::Bus, "a tightly-matching nearby bus observation should reclassify the leg");
    }
}
