use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-vehicle-type closest-match thresholds for the transit matcher (spec
/// §4.5 step 2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransitThresholds {
    pub tram: f64,
    pub train: f64,
    pub bus: f64,
    pub other: f64,
}

impl Default for TransitThresholds {
    fn default() -> TransitThresholds {
        TransitThresholds {
            tram: 80.0,
            train: 500.0,
            bus: 60.0,
            other: 30.0,
        }
    }
}

/// Explicit, threaded pipeline configuration replacing the original
/// module-level constants (spec §9 "Global state replaced by explicit
/// context").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mins_between_trips: i64,
    pub min_distance_moved_in_trip: f64,
    pub min_samples_per_leg: usize,
    pub max_methods: usize,
    pub enable_mode_cap: bool,
    pub transit_buffer_m: f64,
    pub transit_time_window_secs: i64,
    pub transit_thresholds: TransitThresholds,
    pub local_crs: i32,
    pub worker_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            mins_between_trips: 20,
            min_distance_moved_in_trip: 200.0,
            min_samples_per_leg: 15,
            max_methods: 3,
            enable_mode_cap: false,
            transit_buffer_m: 200.0,
            transit_time_window_secs: 60,
            transit_thresholds: TransitThresholds::default(),
            local_crs: 3067,
            worker_concurrency: 4,
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from a TOML file, falling back to
    /// [`PipelineConfig::default`] values for any field the file omits.
    pub fn from_file(path: &str) -> Result<PipelineConfig, ConfigError> {
        let base = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .map_err(|e| ConfigError {
                msg: format!("failed reading '{path}'"),
                source: e,
            })?;

        base.try_deserialize().map_err(|e| ConfigError {
            msg: format!("failed deserializing '{path}' into PipelineConfig"),
            source: e,
        })
    }
}
