use chrono::{DateTime, Utc};

/// Error kinds from spec §7, with enough context attached to log
/// meaningfully at the point the pipeline contains the failure.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// expected: the device has no samples in the requested window. Callers
    /// should return without writing and advance the cursor.
    #[error("no samples for device {device_id} in [{start}, {end}]")]
    NoData {
        device_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// transient: a raw-sample or transit-observation query failed. Aborts
    /// the current device's run without advancing its cursor.
    #[error("upstream query failed for device {device_id}: {source}")]
    UpstreamQuery {
        device_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// per-trip: the IMM or Viterbi decode failed on one trip. The trip is
    /// skipped; other trips for the device continue.
    #[error("numeric failure on trip [{trip_start}, {trip_end}]: {source}")]
    Numeric {
        trip_start: DateTime<Utc>,
        trip_end: DateTime<Utc>,
        #[source]
        source: legtrace_filter::FilterError,
    },

    /// programmer error: e.g. non-monotone timestamps after sorting. Aborts
    /// with a diagnostic; never expected in correct operation.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// a trip's prior legs carry a user correction; skip rewriting it.
    #[error("trip [{trip_start}, {trip_end}] has user-corrected legs, skipping rewrite")]
    UserEditConflict {
        trip_start: DateTime<Utc>,
        trip_end: DateTime<Utc>,
    },
}

/// Configuration-loading failure (spec §0.4 CLI / `PipelineConfig::from_file`),
/// kept separate from [`PipelineError`] since it belongs to startup, not to a
/// device's pipeline run.
#[derive(thiserror::Error, Debug)]
#[error("{msg}: {source}")]
pub struct ConfigError {
    pub msg: String,
    #[source]
    pub source: config::ConfigError,
}

impl PipelineError {
    /// `true` for errors that abort only the current device's run without
    /// escalating further (spec §7 Propagation).
    pub fn aborts_device(&self) -> bool {
        matches!(
            self,
            PipelineError::UpstreamQuery { .. } | PipelineError::InvariantViolation(_)
        )
    }
}
