#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    #[error("IMM filter received an empty sample sequence")]
    EmptySequence,
    #[error("non-finite value encountered in state mean at sample index {0}")]
    NonFiniteState(usize),
    #[error("mode probabilities underflowed to zero for all modes at sample index {0}")]
    ProbabilityUnderflow(usize),
    #[error("Viterbi decode failed: {0}")]
    ViterbiFailure(String),
}
