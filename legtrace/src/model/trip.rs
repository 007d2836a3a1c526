use chrono::{DateTime, Utc};

/// A leg's inferred transport mode (spec §3 Leg invariant: never `still` or
/// `unknown`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    Walking,
    OnBicycle,
    InVehicle,
    Bus,
    Tram,
    Train,
}

/// The coarser grouping used only by the mode-count cap (spec §4.4 Stage D).
/// `Other` is the catch-all `TRANSPORT_MODE_GROUPS` fallback; no
/// [`TransportMode`] currently maps to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeGroup {
    Walking,
    Cycling,
    Driving,
    Transit,
    Other,
}

impl TransportMode {
    pub fn group(self) -> ModeGroup {
        match self {
            TransportMode::Walking => ModeGroup::Walking,
            TransportMode::OnBicycle => ModeGroup::Cycling,
            TransportMode::InVehicle => ModeGroup::Driving,
            TransportMode::Bus | TransportMode::Tram | TransportMode::Train => ModeGroup::Transit,
        }
    }
}

/// A maximal contiguous subsequence of a trip's samples sharing one
/// inferred transport mode (spec §3, GLOSSARY "Leg").
#[derive(Debug, Clone)]
pub struct Leg {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_pos: (f64, f64),
    pub end_pos: (f64, f64),
    pub sample_positions: Vec<(f64, f64)>,
    pub length_m: f64,
    pub mode: TransportMode,
    /// set when a prior write carries a user correction (spec §3 Lifecycle,
    /// §7 `UserEditConflict`); such legs are never regenerated.
    pub is_user_corrected: bool,
}

/// A contiguous set of samples with a synthetic trip index (spec §3).
#[derive(Debug, Clone)]
pub struct Trip {
    pub index: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub legs: Vec<Leg>,
}

impl Trip {
    /// Checks the structural invariants from spec §3: legs are
    /// non-overlapping in time, and each leg's bounds lie within the trip's.
    pub fn legs_are_well_formed(&self) -> bool {
        if self.legs.iter().any(|leg| leg.start_time < self.start_time || leg.end_time > self.end_time) {
            return false;
        }
        for window in self.legs.windows(2) {
            if window[0].end_time > window[1].start_time {
                return false;
            }
        }
        true
    }
}
