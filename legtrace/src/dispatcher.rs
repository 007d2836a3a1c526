//! Bounded-concurrency worker pool driving [`crate::pipeline::run_device`]
//! across every device with new samples (spec §5). One `tokio::task` per
//! device, concurrency capped by `PipelineConfig::worker_concurrency` via a
//! semaphore, matching the teacher's `tokio::sync::Semaphore`-gated worker
//! pattern (e.g. `bambam`'s scheduler run loop).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::model::TimeWindow;
use crate::store::{DeviceDiscovery, SampleStore, TransitStore, TripWriter};

/// Runs one dispatch pass: discovers devices with samples newer than
/// `min_received_at`, then runs the pipeline for each, up to
/// `config.worker_concurrency` at a time. Returns the number of devices
/// whose run failed with an aborting error (`UpstreamQuery` /
/// `InvariantViolation`) so the caller can decide on an exit code.
pub async fn dispatch<D, S>(
    discovery: &D,
    store: Arc<S>,
    min_received_at: DateTime<Utc>,
    window: TimeWindow,
    config: Arc<PipelineConfig>,
    user_has_car: impl Fn(&str) -> bool + Send + Sync + 'static,
) -> Result<usize, crate::error::PipelineError>
where
    D: DeviceDiscovery,
    S: SampleStore + TransitStore + TripWriter + Send + Sync + 'static,
{
    let devices = discovery.find_devices_with_new_samples(min_received_at).await?;
    let semaphore = Arc::new(Semaphore::new(config.worker_concurrency.max(1)));
    let user_has_car = Arc::new(user_has_car);

    let mut handles = Vec::with_capacity(devices.len());
    for (device_id, _cursor) in devices {
        let semaphore = semaphore.clone();
        let store = store.clone();
        let config = config.clone();
        let user_has_car = user_has_car.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
            log::info!("device {device_id}: starting run");
            let has_car = user_has_car(&device_id);
            let result = crate::pipeline::run_device(store.as_ref(), &device_id, window, &config, has_car).await;
            match &result {
                Ok(()) => log::info!("device {device_id}: finished"),
                Err(e) if matches!(e, crate::error::PipelineError::NoData { .. }) => {
                    log::info!("device {device_id}: no new samples");
                }
                Err(e) => log::error!("device {device_id}: {e}"),
            }
            result
        }));
    }

    let mut aborted = 0usize;
    for handle in handles {
        match handle.await.expect("worker task should not panic") {
            Ok(()) => {}
            Err(e) if matches!(e, crate::error::PipelineError::NoData { .. }) => {}
            Err(e) if e.aborts_device() => aborted += 1,
            Err(_) => {}
        }
    }

    Ok(aborted)
}
