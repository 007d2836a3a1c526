use chrono::{DateTime, Utc};

/// GTFS-style `route_type` discriminants. Values 1 (subway) and 4 (ferry)
/// are reserved but unused by this crate — kept so the wire representation
/// stays aligned with the upstream GTFS convention rather than inventing a
/// dense 0..3 encoding (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitRouteType {
    Tram = 0,
    Train = 2,
    Bus = 3,
}

impl TransitRouteType {
    pub fn from_gtfs_code(code: i32) -> Option<TransitRouteType> {
        match code {
            0 => Some(TransitRouteType::Tram),
            2 => Some(TransitRouteType::Train),
            3 => Some(TransitRouteType::Bus),
            _ => None,
        }
    }

    pub fn into_transport_mode(self) -> crate::model::trip::TransportMode {
        match self {
            TransitRouteType::Tram => crate::model::trip::TransportMode::Tram,
            TransitRouteType::Train => crate::model::trip::TransportMode::Train,
            TransitRouteType::Bus => crate::model::trip::TransportMode::Bus,
        }
    }
}

/// A single real-time transit vehicle position report (spec §3).
#[derive(Debug, Clone)]
pub struct TransitVehicleObservation {
    pub vehicle_ref: String,
    pub vehicle_journey_ref: Option<String>,
    pub time: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub route_type: TransitRouteType,
    pub route_name: Option<String>,
}
