pub mod mock;

use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::model::{Sample, TimeWindow, TransitVehicleObservation, Trip};

/// Read contract for raw sample ingestion (spec §6 "Input: raw sample read").
/// A concrete SQL-backed implementation is an external collaborator, out of
/// scope per spec §1.
pub trait SampleStore: Send + Sync {
    fn read_locations(
        &self,
        device_id: &str,
        window: TimeWindow,
        include_all: bool,
    ) -> impl std::future::Future<Output = Result<Vec<Sample>, PipelineError>> + Send;
}

/// Read contract for real-time transit vehicle positions (spec §6 "Input:
/// transit observation read"). The spatial-buffer intersection is performed
/// by the underlying store; this crate only consumes already-filtered rows.
pub trait TransitStore: Send + Sync {
    fn read_transit_observations(
        &self,
        device_id: &str,
        window: TimeWindow,
    ) -> impl std::future::Future<Output = Result<Vec<TransitVehicleObservation>, PipelineError>> + Send;
}

/// Write contract for derived trips/legs (spec §6 "Output: trip/leg write"),
/// plus the user-edit check that gates idempotent rewrites (spec §3
/// Lifecycle, §5 Idempotency of writes).
pub trait TripWriter: Send + Sync {
    fn existing_legs_have_user_edits(
        &self,
        device_id: &str,
        trip_window: TimeWindow,
    ) -> impl std::future::Future<Output = Result<bool, PipelineError>> + Send;

    fn write_trip(
        &self,
        device_id: &str,
        trip: &Trip,
    ) -> impl std::future::Future<Output = Result<(), PipelineError>> + Send;
}

/// Drives the dispatcher: lists devices whose most-recent sample arrival
/// exceeds the last-processed cursor (spec §6 "Discovery of work").
pub trait DeviceDiscovery: Send + Sync {
    fn find_devices_with_new_samples(
        &self,
        min_received_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<(String, DateTime<Utc>)>, PipelineError>> + Send;
}
