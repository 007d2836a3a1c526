//! Stage 4: Leg Segmenter (spec §4.4, Stages A-D). Grounded in
//! `calc/trips.py::filter_legs` (Stages A+B),
//! `detect_and_merge_invalid_transitions` (Stage C), and
//! `limit_transportation_methods` (Stage D).

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use legtrace_filter::Mode as FilterMode;

use crate::config::PipelineConfig;
use crate::model::{Leg, LoadedSample, ModeGroup, TransportMode};
use crate::stage::filter::TrajectoryFilterOutput;

const GOOD_SAMPLE_LOC_ERROR_M: f64 = 100.0;
const SPEED_OUTLIER_THRESHOLD_MPS: f64 = 30.0;

/// Runs all four segmentation stages over one trip's filtered samples.
pub fn segment(samples: &[LoadedSample], filter_output: &TrajectoryFilterOutput, config: &PipelineConfig) -> Vec<Leg> {
    let loc_errors: Vec<f64> = samples.iter().map(|s| s.sample.loc_error).collect();
    let times: Vec<DateTime<Utc>> = samples.iter().map(|s| s.sample.time).collect();
    let reported_speeds: Vec<Option<f64>> = samples.iter().map(|s| s.sample.speed).collect();
    let positions = &filter_output.smoothed_positions;

    let stable_modes = stabilize_runs(&filter_output.mode_path, &loc_errors, config.min_samples_per_leg);
    let leg_id = assign_legs(&stable_modes, positions, &times, &loc_errors, &reported_speeds, config.min_samples_per_leg);
    let legs = build_legs(&leg_id, &stable_modes, positions, &times);
    let legs = merge_implausible_transitions(legs, &times, &stable_modes);

    if config.enable_mode_cap {
        cap_mode_count(legs, config.max_methods)
    } else {
        legs
    }
}

fn mode_to_transport(mode: FilterMode) -> Option<TransportMode> {
    match mode {
        FilterMode::Walking => Some(TransportMode::Walking),
        FilterMode::OnBicycle => Some(TransportMode::OnBicycle),
        FilterMode::InVehicle => Some(TransportMode::InVehicle),
        FilterMode::Still => None,
    }
}

fn compute_runs(modes: &[FilterMode]) -> Vec<(usize, usize)> {
    if modes.is_empty() {
        return Vec::new();
    }
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..modes.len() {
        if modes[i] != modes[i - 1] {
            runs.push((start, i));
            start = i;
        }
    }
    runs.push((start, modes.len()));
    runs
}

fn good_sample_count(loc_errors: &[f64], range: (usize, usize)) -> usize {
    loc_errors[range.0..range.1].iter().filter(|&&e| e < GOOD_SAMPLE_LOC_ERROR_M).count()
}

/// Stage A: overwrites a short run (`run_len <= 3` good samples) flanked by a
/// preceding long run (`run_len > min_samples_per_leg`) with the preceding
/// run's mode, removing single-sample flicker.
fn stabilize_runs(modes: &[FilterMode], loc_errors: &[f64], min_samples_per_leg: usize) -> Vec<FilterMode> {
    let runs = compute_runs(modes);
    let counts: Vec<usize> = runs.iter().map(|&r| good_sample_count(loc_errors, r)).collect();
    let mut out = modes.to_vec();
    for idx in 1..runs.len() {
        if counts[idx] <= 3 && counts[idx - 1] > min_samples_per_leg {
            let prev_mode = modes[runs[idx - 1].0];
            let (start, end) = runs[idx];
            for slot in out[start..end].iter_mut() {
                *slot = prev_mode;
            }
        }
    }
    out
}

/// Stage B: assigns a `leg_id` (-1 if amputated) to each sample. A run only
/// becomes a leg when it has at least `min_samples_per_leg` good samples and
/// is not `still`. Within a leg, a sample whose implied speed disagrees with
/// its reported speed by more than 30 m/s evicts the *previous* accepted
/// sample from the leg (spec §4.4 Stage B, outlier rejection). `prev_idx` is
/// reset at the start of every run, so the outlier check never compares
/// across a mode transition into an unrelated prior leg.
fn assign_legs(
    modes: &[FilterMode],
    positions: &[(f64, f64)],
    times: &[DateTime<Utc>],
    loc_errors: &[f64],
    reported_speeds: &[Option<f64>],
    min_samples_per_leg: usize,
) -> Vec<i64> {
    let runs = compute_runs(modes);
    let counts: Vec<usize> = runs.iter().map(|&r| good_sample_count(loc_errors, r)).collect();
    let mut leg_id = vec![-1i64; modes.len()];
    let mut next_id = 0i64;

    for (run_idx, &(start, end)) in runs.iter().enumerate() {
        let mode = modes[start];
        let mut prev_idx: Option<usize> = None;
        let current_leg_id = if counts[run_idx] >= min_samples_per_leg && mode != FilterMode::Still {
            let id = next_id;
            next_id += 1;
            id
        } else {
            -1
        };

        for i in start..end {
            if current_leg_id == -1 || loc_errors[i] >= GOOD_SAMPLE_LOC_ERROR_M || mode == FilterMode::Still {
                leg_id[i] = -1;
                continue;
            }
            leg_id[i] = current_leg_id;

            if let Some(p) = prev_idx {
                let dt = (times[i] - times[p]).num_milliseconds() as f64 / 1000.0;
                let dx = positions[i].0 - positions[p].0;
                let dy = positions[i].1 - positions[p].1;
                let calc_speed = if dt > 0.0 { (dx * dx + dy * dy).sqrt() / dt } else { 0.0 };
                if let Some(reported) = reported_speeds[i] {
                    if (calc_speed - reported).abs() > SPEED_OUTLIER_THRESHOLD_MPS {
                        leg_id[p] = -1;
                    }
                }
            }
            prev_idx = Some(i);
        }
    }

    leg_id
}

fn leg_length(positions: &[(f64, f64)]) -> f64 {
    positions
        .windows(2)
        .map(|w| {
            let dx = w[1].0 - w[0].0;
            let dy = w[1].1 - w[0].1;
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}

fn build_legs(leg_id: &[i64], modes: &[FilterMode], positions: &[(f64, f64)], times: &[DateTime<Utc>]) -> Vec<Leg> {
    let mut grouped: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, &id) in leg_id.iter().enumerate() {
        if id >= 0 {
            grouped.entry(id).or_default().push(i);
        }
    }

    grouped
        .into_values()
        .filter_map(|indices| {
            let mode = mode_to_transport(modes[indices[0]])?;
            let sample_positions: Vec<(f64, f64)> = indices.iter().map(|&i| positions[i]).collect();
            Some(Leg {
                start_time: times[indices[0]],
                end_time: times[*indices.last().unwrap()],
                start_pos: sample_positions[0],
                end_pos: *sample_positions.last().unwrap(),
                length_m: leg_length(&sample_positions),
                sample_positions,
                mode,
                is_user_corrected: false,
            })
        })
        .collect()
}

fn combine_legs(a: &Leg, b: &Leg, mode: TransportMode) -> Leg {
    let mut sample_positions = a.sample_positions.clone();
    sample_positions.extend(b.sample_positions.clone());
    Leg {
        start_time: a.start_time,
        end_time: b.end_time,
        start_pos: a.start_pos,
        end_pos: b.end_pos,
        length_m: leg_length(&sample_positions),
        sample_positions,
        mode,
        is_user_corrected: false,
    }
}

fn is_bicycle_vehicle_pair(a: TransportMode, b: TransportMode) -> bool {
    matches!(
        (a, b),
        (TransportMode::OnBicycle, TransportMode::InVehicle) | (TransportMode::InVehicle, TransportMode::OnBicycle)
    )
}

fn still_count_between(times: &[DateTime<Utc>], modes: &[FilterMode], leg1_end: DateTime<Utc>, leg2_start: DateTime<Utc>) -> usize {
    times
        .iter()
        .zip(modes.iter())
        .filter(|&(&t, &m)| t > leg1_end && t < leg2_start && m == FilterMode::Still)
        .count()
}

/// Stage C: merges adjacent bicycle/vehicle leg pairs separated by fewer
/// than 3 `still`-tagged samples. The longer leg (by sample count; ties
/// favour the earlier leg) wins its mode.
fn merge_implausible_transitions(mut legs: Vec<Leg>, times: &[DateTime<Utc>], modes: &[FilterMode]) -> Vec<Leg> {
    loop {
        let mut merged_any = false;
        let mut out: Vec<Leg> = Vec::with_capacity(legs.len());
        let mut i = 0;
        while i < legs.len() {
            if i + 1 < legs.len() && is_bicycle_vehicle_pair(legs[i].mode, legs[i + 1].mode) {
                let still = still_count_between(times, modes, legs[i].end_time, legs[i + 1].start_time);
                if still < 3 {
                    let a = &legs[i];
                    let b = &legs[i + 1];
                    let winner_mode = if a.sample_positions.len() >= b.sample_positions.len() { a.mode } else { b.mode };
                    out.push(combine_legs(a, b, winner_mode));
                    i += 2;
                    merged_any = true;
                    continue;
                }
            }
            out.push(legs[i].clone());
            i += 1;
        }
        legs = out;
        if !merged_any {
            return legs;
        }
    }
}

fn duration_ms(leg: &Leg) -> i64 {
    (leg.end_time - leg.start_time).num_milliseconds()
}

fn choose_neighbor(legs: &[Leg], idx: usize) -> usize {
    let left = idx.checked_sub(1);
    let right = if idx + 1 < legs.len() { Some(idx + 1) } else { None };
    match (left, right) {
        (Some(l), Some(r)) => {
            let same_group_l = legs[l].mode.group() == legs[idx].mode.group();
            let same_group_r = legs[r].mode.group() == legs[idx].mode.group();
            match (same_group_l, same_group_r) {
                (true, false) => l,
                (false, true) => r,
                _ => {
                    if duration_ms(&legs[l]) >= duration_ms(&legs[r]) {
                        l
                    } else {
                        r
                    }
                }
            }
        }
        (Some(l), None) => l,
        (None, Some(r)) => r,
        (None, None) => idx,
    }
}

/// Stage D (optional): repeatedly merges the shortest-duration leg into a
/// neighbour (preferring same-group, else the longer neighbour) until
/// distinct [`ModeGroup`]s drop to `max_methods` or one leg remains.
fn cap_mode_count(mut legs: Vec<Leg>, max_methods: usize) -> Vec<Leg> {
    loop {
        let groups: HashSet<ModeGroup> = legs.iter().map(|l| l.mode.group()).collect();
        if groups.len() <= max_methods || legs.len() <= 1 {
            return legs;
        }

        let shortest_idx = legs
            .iter()
            .enumerate()
            .min_by_key(|&(_, leg)| duration_ms(leg))
            .map(|(i, _)| i)
            .expect("legs is non-empty here");
        let neighbor_idx = choose_neighbor(&legs, shortest_idx);

        let (lo, hi) = if shortest_idx < neighbor_idx {
            (shortest_idx, neighbor_idx)
        } else {
            (neighbor_idx, shortest_idx)
        };
        let winner_mode = legs[neighbor_idx].mode;
        let merged = combine_legs(&legs[lo], &legs[hi], winner_mode);
        legs[lo] = merged;
        legs.remove(hi);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{ActivityType, Sample};
    use chrono::TimeZone;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn loaded_samples(n: usize) -> Vec<LoadedSample> {
        (0..n)
            .map(|i| LoadedSample {
                sample: Sample {
                    time: base_time() + chrono::Duration::seconds(i as i64 * 10),
                    x: i as f64 * 10.0,
                    y: 0.0,
                    speed: Some(1.0),
                    loc_error: 5.0,
                    atype: ActivityType::Walking,
                    aconf: Some(0.8),
                    is_moving: Some(true),
                    closest_car_way_dist: 10.0,
                    closest_rail_way_dist: 50.0,
                    created_at: base_time(),
                },
                dt: if i == 0 { 0.0 } else { 10.0 },
                dd: if i == 0 { 0.0 } else { 10.0 },
            })
            .collect()
    }

    fn filter_output(modes: Vec<FilterMode>, positions: Vec<(f64, f64)>) -> TrajectoryFilterOutput {
        let n = modes.len();
        TrajectoryFilterOutput {
            smoothed_positions: positions,
            mode_path: modes,
            mode_probs: vec![[0.25; 4]; n],
            in_vehicle_log_likelihood: vec![0.0; n],
        }
    }

    #[test]
    fn single_sample_flicker_is_absorbed_by_a_long_run() {
        let mut modes = vec![FilterMode::Walking; 20];
        modes[10] = FilterMode::OnBicycle;
        let loc_errors = vec![5.0; 20];
        let stabilized = stabilize_runs(&modes, &loc_errors, 15);
        assert!(stabilized.iter().all(|&m| m == FilterMode::Walking), "flicker run should be overwritten");
    }

    #[test]
    fn short_run_never_becomes_a_leg() {
        let samples = loaded_samples(10);
        let modes = vec![FilterMode::OnBicycle; 10];
        let positions: Vec<(f64, f64)> = samples.iter().map(|s| (s.sample.x, s.sample.y)).collect();
        let output = filter_output(modes, positions);
        let config = PipelineConfig::default();
        let legs = segment(&samples, &output, &config);
        assert!(legs.is_empty(), "a 10-sample run is below min_samples_per_leg and must be amputated");
    }

    #[test]
    fn bicycle_vehicle_pair_without_still_gap_merges() {
        let mut samples = loaded_samples(40);
        let mut modes = Vec::with_capacity(40);
        for i in 0..40 {
            if i < 20 {
                modes.push(FilterMode::OnBicycle);
            } else {
                modes.push(FilterMode::InVehicle);
                samples[i].sample.speed = Some(20.0);
            }
        }
        let positions: Vec<(f64, f64)> = samples.iter().map(|s| (s.sample.x, s.sample.y)).collect();
        let output = filter_output(modes, positions);
        let config = PipelineConfig::default();
        let legs = segment(&samples, &output, &config);
        assert_eq!(legs.len(), 1, "an implausible bicycle/vehicle transition without a still gap should merge");
    }

    #[test]
    fn mode_cap_reduces_distinct_groups() {
        let walk_leg = Leg {
            start_time: base_time(),
            end_time: base_time() + chrono::Duration::minutes(1),
            start_pos: (0.0, 0.0),
            end_pos: (10.0, 0.0),
            sample_positions: vec![(0.0, 0.0), (10.0, 0.0)],
            length_m: 10.0,
            mode: TransportMode::Walking,
            is_user_corrected: false,
        };
        let bike_leg = Leg {
            start_time: base_time() + chrono::Duration::minutes(1),
            end_time: base_time() + chrono::Duration::minutes(2),
            start_pos: (10.0, 0.0),
            end_pos: (20.0, 0.0),
            sample_positions: vec![(10.0, 0.0), (20.0, 0.0)],
            length_m: 10.0,
            mode: TransportMode::OnBicycle,
            is_user_corrected: false,
        };
        let bus_leg = Leg {
            start_time: base_time() + chrono::Duration::minutes(2),
            end_time: base_time() + chrono::Duration::minutes(20),
            start_pos: (20.0, 0.0),
            end_pos: (2000.0, 0.0),
            sample_positions: vec![(20.0, 0.0), (2000.0, 0.0)],
            length_m: 1980.0,
            mode: TransportMode::Bus,
            is_user_corrected: false,
        };
        let car_leg = Leg {
            start_time: base_time() + chrono::Duration::minutes(20),
            end_time: base_time() + chrono::Duration::minutes(40),
            start_pos: (2000.0, 0.0),
            end_pos: (4000.0, 0.0),
            sample_positions: vec![(2000.0, 0.0), (4000.0, 0.0)],
            length_m: 2000.0,
            mode: TransportMode::InVehicle,
            is_user_corrected: false,
        };
        let legs = vec![walk_leg, bike_leg, bus_leg, car_leg];
        let capped = cap_mode_count(legs, 3);
        let groups: HashSet<ModeGroup> = capped.iter().map(|l| l.mode.group()).collect();
        assert!(groups.len() <= 3, "mode cap should leave at most 3 distinct groups");
    }
}
