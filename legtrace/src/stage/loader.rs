//! Stage 1: Sample Loader (spec §4.1). Pulls a time-ordered sample sequence
//! for one device, precomputes per-step deltas, and trims a possibly
//! in-progress tail. Grounded in `calc/trips.py::read_locations`.

use crate::error::PipelineError;
use crate::model::{LoadedSample, Sample, TimeWindow};
use crate::store::SampleStore;

/// Loads and prepares one device's samples over `window`.
///
/// Returns [`PipelineError::NoData`] when the store has no rows in the
/// window (spec §7).
pub async fn load<S: SampleStore>(
    store: &S,
    device_id: &str,
    window: TimeWindow,
    include_all: bool,
) -> Result<Vec<LoadedSample>, PipelineError> {
    let mut samples = store.read_locations(device_id, window, include_all).await?;
    if samples.is_empty() {
        return Err(PipelineError::NoData {
            device_id: device_id.to_string(),
            start: window.start,
            end: window.end,
        });
    }

    samples.sort_by_key(|s| s.time);

    let samples = if include_all {
        samples
    } else {
        trim_tail(samples)
    };

    if samples.is_empty() {
        return Err(PipelineError::NoData {
            device_id: device_id.to_string(),
            start: window.start,
            end: window.end,
        });
    }

    Ok(with_deltas(samples))
}

/// Drops the latest "possibly in-progress" burst (spec §4.1 Tail trimming).
fn trim_tail(samples: Vec<Sample>) -> Vec<Sample> {
    let last_not_moving = samples
        .iter()
        .filter(|s| s.is_moving == Some(false))
        .map(|s| s.time)
        .max();

    match last_not_moving {
        Some(cutoff) => samples.into_iter().filter(|s| s.time <= cutoff).collect(),
        None => {
            let max_received = samples.iter().map(|s| s.created_at).max();
            match max_received {
                Some(max_received) => samples.into_iter().filter(|s| s.created_at < max_received).collect(),
                None => samples,
            }
        }
    }
}

fn with_deltas(samples: Vec<Sample>) -> Vec<LoadedSample> {
    let mut out = Vec::with_capacity(samples.len());
    let mut prev: Option<&Sample> = None;
    for sample in &samples {
        let (dt, dd) = match prev {
            None => (0.0, 0.0),
            Some(p) => {
                let dt = (sample.time - p.time).num_milliseconds() as f64 / 1000.0;
                let dx = sample.x - p.x;
                let dy = sample.y - p.y;
                (dt, (dx * dx + dy * dy).sqrt())
            }
        };
        out.push(LoadedSample {
            sample: sample.clone(),
            dt,
            dd,
        });
        prev = Some(sample);
    }
    out
}
