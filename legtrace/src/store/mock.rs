//! Simple in-memory store implementations for tests and examples, grounded
//! in the teacher's `new_local` synchronous/test-only constructors (e.g.
//! `MultimodalAccessModel::new_local`).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::model::{Sample, TimeWindow, TransitVehicleObservation, Trip};
use crate::store::{DeviceDiscovery, SampleStore, TransitStore, TripWriter};

/// An in-memory [`SampleStore`] + [`TransitStore`] backed by per-device
/// vectors, with no filtering beyond the requested time window.
#[derive(Default)]
pub struct InMemoryStore {
    pub samples: HashMap<String, Vec<Sample>>,
    pub transit: HashMap<String, Vec<TransitVehicleObservation>>,
    pub user_edited_trips: Mutex<Vec<(String, TimeWindow)>>,
    pub written_trips: Mutex<Vec<(String, Trip)>>,
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }

    pub fn with_samples(mut self, device_id: &str, samples: Vec<Sample>) -> InMemoryStore {
        self.samples.insert(device_id.to_string(), samples);
        self
    }

    pub fn with_transit(mut self, device_id: &str, observations: Vec<TransitVehicleObservation>) -> InMemoryStore {
        self.transit.insert(device_id.to_string(), observations);
        self
    }

    pub fn mark_user_edited(mut self, device_id: &str, window: TimeWindow) -> InMemoryStore {
        self.user_edited_trips
            .get_mut()
            .unwrap()
            .push((device_id.to_string(), window));
        self
    }
}

impl SampleStore for InMemoryStore {
    async fn read_locations(
        &self,
        device_id: &str,
        window: TimeWindow,
        _include_all: bool,
    ) -> Result<Vec<Sample>, PipelineError> {
        let rows = self
            .samples
            .get(device_id)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| window.contains(s.time))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }
}

impl TransitStore for InMemoryStore {
    async fn read_transit_observations(
        &self,
        device_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<TransitVehicleObservation>, PipelineError> {
        let rows = self
            .transit
            .get(device_id)
            .map(|obs| obs.iter().filter(|o| window.contains(o.time)).cloned().collect())
            .unwrap_or_default();
        Ok(rows)
    }
}

impl TripWriter for InMemoryStore {
    async fn existing_legs_have_user_edits(
        &self,
        device_id: &str,
        trip_window: TimeWindow,
    ) -> Result<bool, PipelineError> {
        let edited = self.user_edited_trips.lock().unwrap();
        Ok(edited.iter().any(|(id, window)| {
            id == device_id && window.start <= trip_window.end && window.end >= trip_window.start
        }))
    }

    async fn write_trip(&self, device_id: &str, trip: &Trip) -> Result<(), PipelineError> {
        self.written_trips
            .lock()
            .unwrap()
            .push((device_id.to_string(), trip.clone()));
        Ok(())
    }
}

/// A [`DeviceDiscovery`] backed by a fixed list, for tests that drive the
/// dispatcher end to end without a real scheduler table.
pub struct FixedDeviceList(pub Vec<(String, DateTime<Utc>)>);

impl DeviceDiscovery for FixedDeviceList {
    async fn find_devices_with_new_samples(
        &self,
        min_received_at: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, PipelineError> {
        Ok(self
            .0
            .iter()
            .filter(|(_, cursor)| *cursor >= min_received_at)
            .cloned()
            .collect())
    }
}
