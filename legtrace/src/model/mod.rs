pub mod sample;
pub mod time_window;
pub mod transit;
pub mod trip;

pub use sample::{ActivityType, LoadedSample, Sample};
pub use time_window::TimeWindow;
pub use transit::{TransitRouteType, TransitVehicleObservation};
pub use trip::{Leg, ModeGroup, TransportMode, Trip};
