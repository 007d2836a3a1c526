//! The Interacting Multiple Model recursion: mixes the four mode sub-filters
//! from [`crate::kalman`] at each step using the mode-transition matrix `M`,
//! updates each on the incoming measurement, and re-derives mode
//! probabilities from the per-mode likelihoods (spec §4.3).

use crate::activity_prior;
use crate::error::FilterError;
use crate::kalman::{self, KalmanState, ModeParams};
use crate::mode::{Mode, ALL_MODES, NUM_MODES};
use crate::types::{FilterSample, ImmConfig, ImmOutput};
use crate::viterbi;

/// left-stochastic mode-transition matrix: `M[i][j]` is `P(mode j at t |
/// mode i at t-1)`. Columns sum to 1. Rows/columns ordered per [`Mode`].
pub const TRANSITION: [[f64; NUM_MODES]; NUM_MODES] = [
    [0.90, 0.07, 0.01, 0.02],
    [0.05, 0.85, 0.08, 0.02],
    [0.01, 0.05, 0.90, 0.04],
    [0.01, 0.02, 0.03, 0.94],
];

const MODE_PARAMS: [ModeParams; NUM_MODES] = [
    ModeParams { q_pos: 0.02, q_vel: 0.02, way_inflation: 0.0 },  // still
    ModeParams { q_pos: 0.3, q_vel: 0.4, way_inflation: 0.0 },    // walking, ~1.3 m/s
    ModeParams { q_pos: 1.2, q_vel: 2.0, way_inflation: 0.0 },    // on_bicycle, ~4 m/s
    ModeParams { q_pos: 5.0, q_vel: 12.0, way_inflation: 3.0 },   // in_vehicle, unbounded
];

const PROBABILITY_FLOOR: f64 = 1e-6;
const UNDERFLOW_EPSILON: f64 = 1e-300;

/// Exposes one sub-filter's tuned parameters for callers that need to run a
/// single-mode Kalman filter outside the full IMM recursion (the transit
/// matcher's fit-score comparison, spec §4.5 step 2).
pub fn mode_params(mode: Mode) -> ModeParams {
    MODE_PARAMS[mode.index()]
}

/// Runs the IMM filter bank plus Viterbi decode over an entire trip's
/// samples. Pure function: no I/O, no logging.
pub fn run(samples: &[FilterSample], config: &ImmConfig) -> Result<ImmOutput, FilterError> {
    if samples.is_empty() {
        return Err(FilterError::EmptySequence);
    }

    let n = samples.len();
    let mut means = Vec::with_capacity(n);
    let mut covariances = Vec::with_capacity(n);
    let mut mode_probs = Vec::with_capacity(n);
    let mut in_vehicle_log_likelihood = Vec::with_capacity(n);
    let mut emissions = Vec::with_capacity(n);

    let mut mu = config.initial_mode_prior.unwrap_or([0.25; NUM_MODES]);
    let mut states: [KalmanState; NUM_MODES] = ALL_MODES.map(|_| KalmanState {
        mean: [samples[0].x, samples[0].y, 0.0, 0.0],
        cov: [
            [samples[0].location_std.powi(2), 0.0, 0.0, 0.0],
            [0.0, samples[0].location_std.powi(2), 0.0, 0.0],
            [0.0, 0.0, 4.0, 0.0],
            [0.0, 0.0, 0.0, 4.0],
        ],
    });

    for (idx, sample) in samples.iter().enumerate() {
        let (mixed_states, mu_predicted) = mix(&states, &mu);

        let mut log_lik = [0.0_f64; NUM_MODES];
        let mut degenerate = [false; NUM_MODES];
        let mut posterior = mixed_states;

        for (j, mode) in ALL_MODES.iter().enumerate() {
            let predicted = kalman::predict(&mixed_states[j], sample.dt, &MODE_PARAMS[*mode as usize]);
            let step = kalman::update(
                &predicted,
                sample.x,
                sample.y,
                sample.speed,
                sample.location_std,
                sample.vehicle_way_distance,
                &MODE_PARAMS[*mode as usize],
            );
            posterior[j] = step.state;
            degenerate[j] = !step.well_conditioned;
            log_lik[j] = if step.well_conditioned {
                step.log_likelihood
            } else {
                f64::NEG_INFINITY
            };
        }

        let activity_mult = match sample.activity_hint {
            Some((mode, confidence)) => activity_prior::multiplier(mode, confidence),
            None => [1.0; NUM_MODES],
        };

        let max_log = log_lik
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);

        let mut raw = [0.0_f64; NUM_MODES];
        for j in 0..NUM_MODES {
            let exp_lik = if log_lik[j].is_finite() {
                (log_lik[j] - max_log).exp()
            } else {
                0.0
            };
            raw[j] = mu_predicted[j] * exp_lik * activity_mult[j];
        }

        let total: f64 = raw.iter().sum();
        let mut mu_new = if total < UNDERFLOW_EPSILON {
            [0.25; NUM_MODES]
        } else {
            let mut normalized = raw;
            for v in normalized.iter_mut() {
                *v /= total;
            }
            normalized
        };

        if total >= UNDERFLOW_EPSILON {
            let mut floored_total = 0.0;
            for j in 0..NUM_MODES {
                if degenerate[j] {
                    mu_new[j] = mu_new[j].max(PROBABILITY_FLOOR);
                }
                floored_total += mu_new[j];
            }
            for v in mu_new.iter_mut() {
                *v /= floored_total;
            }
        }

        let (combined_mean, combined_cov) = combine(&posterior, &mu_new);

        means.push(combined_mean);
        covariances.push(combined_cov);
        mode_probs.push(mu_new);
        in_vehicle_log_likelihood.push(if log_lik[Mode::InVehicle.index()].is_finite() {
            log_lik[Mode::InVehicle.index()]
        } else {
            f64::NEG_INFINITY
        });

        let mut emission = [0.0_f64; NUM_MODES];
        for j in 0..NUM_MODES {
            let base = if log_lik[j].is_finite() { log_lik[j] } else { -1.0e6 };
            emission[j] = base + activity_mult[j].max(1e-12).ln();
        }
        emissions.push(emission);

        if !means[idx][0].is_finite() || !means[idx][1].is_finite() {
            return Err(FilterError::NonFiniteState(idx));
        }

        mu = mu_new;
        states = posterior;
    }

    let path = viterbi::decode(&emissions, &TRANSITION).map_err(FilterError::ViterbiFailure)?;

    Ok(ImmOutput {
        means,
        covariances,
        mode_probs,
        path,
        in_vehicle_log_likelihood,
    })
}

/// IMM mixing step: blends the previous step's per-mode posteriors into new
/// priors for each mode using the transition matrix, per the standard IMM
/// recipe. Returns the mixed `(state, predicted mode prior)` pairs.
fn mix(
    states: &[KalmanState; NUM_MODES],
    mu_prev: &[f64; NUM_MODES],
) -> ([KalmanState; NUM_MODES], [f64; NUM_MODES]) {
    let mut mu_predicted = [0.0_f64; NUM_MODES];
    for j in 0..NUM_MODES {
        mu_predicted[j] = (0..NUM_MODES).map(|i| TRANSITION[i][j] * mu_prev[i]).sum();
    }

    let mut mixed = states.clone();
    for j in 0..NUM_MODES {
        if mu_predicted[j] < UNDERFLOW_EPSILON {
            mixed[j] = states[j];
            continue;
        }
        let weights: [f64; NUM_MODES] =
            std::array::from_fn(|i| TRANSITION[i][j] * mu_prev[i] / mu_predicted[j]);

        let mut mean = [0.0_f64; 4];
        for i in 0..NUM_MODES {
            for k in 0..4 {
                mean[k] += weights[i] * states[i].mean[k];
            }
        }

        let mut cov = [[0.0_f64; 4]; 4];
        for i in 0..NUM_MODES {
            let diff: [f64; 4] = std::array::from_fn(|k| states[i].mean[k] - mean[k]);
            for a in 0..4 {
                for b in 0..4 {
                    cov[a][b] += weights[i] * (states[i].cov[a][b] + diff[a] * diff[b]);
                }
            }
        }

        mixed[j] = KalmanState { mean, cov };
    }

    (mixed, mu_predicted)
}

/// Combines the per-mode posteriors into a single smoothed state estimate
/// weighted by the mode posterior, the standard IMM combined output.
fn combine(states: &[KalmanState; NUM_MODES], mu: &[f64; NUM_MODES]) -> ([f64; 4], [[f64; 4]; 4]) {
    let mut mean = [0.0_f64; 4];
    for j in 0..NUM_MODES {
        for k in 0..4 {
            mean[k] += mu[j] * states[j].mean[k];
        }
    }
    let mut cov = [[0.0_f64; 4]; 4];
    for j in 0..NUM_MODES {
        let diff: [f64; 4] = std::array::from_fn(|k| states[j].mean[k] - mean[k]);
        for a in 0..4 {
            for b in 0..4 {
                cov[a][b] += mu[j] * (states[j].cov[a][b] + diff[a] * diff[b]);
            }
        }
    }
    (mean, cov)
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(dt: f64, x: f64, y: f64, speed: Option<f64>) -> FilterSample {
        FilterSample {
            dt,
            x,
            y,
            speed,
            location_std: 5.0,
            vehicle_way_distance: 500.0,
            activity_hint: None,
        }
    }

    #[test]
    fn stationary_samples_favor_still_mode() {
        let samples: Vec<FilterSample> = (0..30).map(|i| sample(if i == 0 { 0.0 } else { 5.0 }, 0.1, -0.1, Some(0.0))).collect();
        let output = run(&samples, &ImmConfig::default()).expect("filter should not fail on clean stationary data");
        let last = output.mode_probs.last().unwrap();
        let max_idx = (0..NUM_MODES).max_by(|&a, &b| last[a].partial_cmp(&last[b]).unwrap()).unwrap();
        assert_eq!(max_idx, Mode::Still.index(), "a device sitting still should settle on the still mode");
    }

    #[test]
    fn fast_steady_motion_favors_in_vehicle_mode() {
        let mut samples = Vec::new();
        for i in 0..40 {
            let dt = if i == 0 { 0.0 } else { 2.0 };
            samples.push(sample(dt, i as f64 * 2.0 * 15.0, 0.0, Some(15.0)));
        }
        let output = run(&samples, &ImmConfig::default()).expect("filter should not fail on clean vehicle data");
        let last = output.mode_probs.last().unwrap();
        let max_idx = (0..NUM_MODES).max_by(|&a, &b| last[a].partial_cmp(&last[b]).unwrap()).unwrap();
        assert_eq!(max_idx, Mode::InVehicle.index(), "sustained 15 m/s travel should settle on in_vehicle");
    }

    #[test]
    fn empty_sequence_is_an_error() {
        let result = run(&[], &ImmConfig::default());
        assert!(matches!(result, Err(FilterError::EmptySequence)));
    }

    #[test]
    fn output_lengths_match_input() {
        let samples: Vec<FilterSample> = (0..10).map(|i| sample(if i == 0 { 0.0 } else { 1.0 }, i as f64, 0.0, None)).collect();
        let output = run(&samples, &ImmConfig::default()).unwrap();
        assert_eq!(output.means.len(), samples.len());
        assert_eq!(output.mode_probs.len(), samples.len());
        assert_eq!(output.path.len(), samples.len());
    }
}
