// Geofence based race timing

pub mod geo;
pub mod geofence;

pub use geo::haversine_distance;
pub use geofence::{
    DEFAULT_TRIGGER_RADIUS_M, GeofenceTimer, LAP_DEBOUNCE_MS, MIN_SPRINT_DURATION_MS, TimerEvent,
    TimerState,
};
