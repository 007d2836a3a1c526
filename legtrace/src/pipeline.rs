//! Orchestrates the five stages over one device's window (spec §2, §5).
//! Grounded in the teacher's `run_local`/driver-loop style (e.g.
//! `bambam/src/main.rs`'s top-level sequencing) and
//! `calc/trips.py::split_trip_legs`'s per-trip try/except containment.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{TimeWindow, Trip};
use crate::stage::{filter, matcher, segmenter, splitter};
use crate::store::{SampleStore, TransitStore, TripWriter};

/// Runs the full pipeline for one device over `window`.
///
/// `NoData` propagates immediately (expected, no write). `UpstreamQuery` and
/// `InvariantViolation` abort the device's run. `Numeric` failures and
/// `UserEditConflict`s are contained per-trip: logged, the trip is skipped,
/// and the run continues with the next trip (spec §7 Propagation).
pub async fn run_device<S>(
    store: &S,
    device_id: &str,
    window: TimeWindow,
    config: &PipelineConfig,
    user_has_car: bool,
) -> Result<(), PipelineError>
where
    S: SampleStore + TransitStore + TripWriter,
{
    let samples = crate::stage::loader::load(store, device_id, window, false).await?;
    let trip_groups = splitter::split(samples, config, false);

    let mut written = 0usize;
    let mut skipped = 0usize;

    for (trip_index, trip_samples) in trip_groups {
        let trip_start = trip_samples.first().expect("split never yields an empty trip group").sample.time;
        let trip_end = trip_samples.last().expect("split never yields an empty trip group").sample.time;
        let trip_window = TimeWindow::new(trip_start, trip_end);

        match store.existing_legs_have_user_edits(device_id, trip_window).await {
            Ok(true) => {
                let err = PipelineError::UserEditConflict { trip_start, trip_end };
                log::warn!("{err}");
                skipped += 1;
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                if e.aborts_device() {
                    return Err(e);
                }
                log::error!("user-edit check failed for trip [{trip_start}, {trip_end}]: {e}");
                skipped += 1;
                continue;
            }
        }

        let filter_output = match filter::run_trip(&trip_samples) {
            Ok(output) => output,
            Err(source) => {
                let err = PipelineError::Numeric { trip_start, trip_end, source };
                log::error!("{err}");
                skipped += 1;
                continue;
            }
        };

        let legs = segmenter::segment(&trip_samples, &filter_output, config);
        let legs = matcher::match_transit_legs(store, device_id, legs, &trip_samples, &filter_output, config, user_has_car).await;

        let trip = Trip {
            index: trip_index,
            start_time: trip_start,
            end_time: trip_end,
            legs,
        };

        if !trip.legs_are_well_formed() {
            return Err(PipelineError::InvariantViolation(format!(
                "trip [{trip_start}, {trip_end}] produced overlapping or out-of-bounds legs"
            )));
        }

        store.write_trip(device_id, &trip).await?;
        written += 1;
    }

    log::info!("device {device_id}: wrote {written} trips, skipped {skipped}");
    Ok(())
}
