//! Viterbi decoding of the most-likely mode path under the IMM's
//! log-emission sequence and mode-transition matrix (spec §4.3).

use crate::mode::{Mode, NUM_MODES};

/// Decodes the maximum-a-posteriori mode sequence given per-step emission
/// log-likelihoods (`emissions[t][mode]`) and the mode-transition matrix
/// `transition[i][j] = P(mode j at t | mode i at t-1)`.
pub fn decode(
    emissions: &[[f64; NUM_MODES]],
    transition: &[[f64; NUM_MODES]; NUM_MODES],
) -> Result<Vec<Mode>, String> {
    if emissions.is_empty() {
        return Err("cannot decode an empty emission sequence".to_string());
    }

    let log_transition: [[f64; NUM_MODES]; NUM_MODES] =
        std::array::from_fn(|i| std::array::from_fn(|j| transition[i][j].max(1e-300).ln()));

    let n = emissions.len();
    let mut score = [[0.0_f64; NUM_MODES]; 2];
    let mut backptr: Vec<[usize; NUM_MODES]> = Vec::with_capacity(n);

    for j in 0..NUM_MODES {
        score[0][j] = emissions[0][j];
    }
    backptr.push([0; NUM_MODES]);

    for t in 1..n {
        let (prev, cur) = if t % 2 == 1 { (0, 1) } else { (1, 0) };
        let mut step_back = [0usize; NUM_MODES];
        for j in 0..NUM_MODES {
            let mut best_score = f64::NEG_INFINITY;
            let mut best_i = 0;
            for i in 0..NUM_MODES {
                let candidate = score[prev][i] + log_transition[i][j];
                if candidate > best_score {
                    best_score = candidate;
                    best_i = i;
                }
            }
            score[cur][j] = best_score + emissions[t][j];
            step_back[j] = best_i;
        }
        backptr.push(step_back);
    }

    let final_row = if n % 2 == 1 { 0 } else { 1 };
    let mut best_final = 0;
    let mut best_final_score = f64::NEG_INFINITY;
    for j in 0..NUM_MODES {
        if score[final_row][j] > best_final_score {
            best_final_score = score[final_row][j];
            best_final = j;
        }
    }
    if !best_final_score.is_finite() {
        return Err("all mode paths underflowed to -infinity".to_string());
    }

    let mut path_idx = vec![0usize; n];
    path_idx[n - 1] = best_final;
    for t in (1..n).rev() {
        path_idx[t - 1] = backptr[t][path_idx[t]];
    }

    let path = path_idx
        .into_iter()
        .map(|idx| Mode::from_index(idx).expect("index bounded by NUM_MODES"))
        .collect();
    Ok(path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_step_picks_max_emission() {
        let emissions = vec![[0.0, 5.0, 1.0, 0.0]];
        let transition = crate::imm::TRANSITION;
        let path = decode(&emissions, &transition).expect("decode should succeed");
        assert_eq!(path, vec![Mode::Walking]);
    }

    #[test]
    fn sticky_transitions_resist_one_sample_flicker() {
        // walking for a while, one big momentary vehicle-mode emission, back to walking.
        let mut emissions = vec![[0.0, 5.0, 0.0, 0.0]; 10];
        emissions[5] = [0.0, 0.0, 0.0, 6.0];
        let transition = crate::imm::TRANSITION;
        let path = decode(&emissions, &transition).expect("decode should succeed");
        assert!(
            path.iter().filter(|&&m| m == Mode::Walking).count() >= 8,
            "a single strong emission shouldn't flip the whole path away from walking"
        );
    }

    #[test]
    fn empty_emissions_is_an_error() {
        let transition = crate::imm::TRANSITION;
        assert!(decode(&[], &transition).is_err());
    }
}
