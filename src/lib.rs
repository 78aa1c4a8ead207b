// Library interface for racebox
// This allows integration tests to access internal modules

pub mod device;
pub mod engine;
pub mod errors;
pub mod ingest;
pub mod recorder;
pub mod settings;
pub mod telemetry;
pub mod timing;
pub mod track;

// Re-export commonly used types
pub use device::{CommandSink, DeviceCommand, DeviceLink, ReplayLink};
pub use engine::{EngineConfig, TelemetryEngine};
pub use errors::RaceboxError;
pub use ingest::Connection;
pub use recorder::{RecordFormat, SessionRecorder, delete_session, list_sessions};
pub use settings::{AppSettings, SettingsStore, StorageLocation, StorageRoots};
pub use telemetry::{LiveSnapshot, RaceEvent, TelemetryOutput, TelemetrySample};
pub use timing::{GeofenceTimer, TimerState};
pub use track::{FileTrackStore, Track, TrackBuilder, TrackStore, TrackType};
