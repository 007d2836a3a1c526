//! Maps a device-reported activity class onto a likelihood multiplier over
//! the four IMM modes (spec §4.3 "Activity prior").

use crate::mode::{Mode, NUM_MODES};

/// Confusion matrix at full confidence: row = reported activity mapped to a
/// [`Mode`] hint, column = filter-bank mode index. Values > 1 boost that
/// mode's likelihood, values < 1 suppress it. At confidence 0 the prior has
/// no effect; at confidence 1 the full row applies (see [`multiplier`]).
const CONFUSION: [[f64; NUM_MODES]; NUM_MODES] = [
    // hint = Still
    [6.0, 0.3, 0.1, 0.05],
    // hint = Walking (covers running/on_foot/walking per the mapping upstream)
    [0.3, 6.0, 1.2, 0.1],
    // hint = OnBicycle
    [0.1, 0.6, 6.0, 0.3],
    // hint = InVehicle
    [0.05, 0.1, 0.3, 6.0],
];

/// Returns the per-mode likelihood multiplier for a hinted `mode` reported
/// with `confidence` in `[0, 1]`. Confidence 0 yields the identity (all 1s);
/// confidence 1 yields the full confusion-matrix row.
pub fn multiplier(mode: Mode, confidence: f64) -> [f64; NUM_MODES] {
    let c = confidence.clamp(0.0, 1.0);
    let row = CONFUSION[mode.index()];
    let mut out = [1.0; NUM_MODES];
    for i in 0..NUM_MODES {
        out[i] = 1.0 + c * (row[i] - 1.0);
    }
    out
}
