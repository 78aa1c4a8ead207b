pub mod axis_mapper;
pub mod frame_decoder;
pub mod packet;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use axis_mapper::{AxisCalibrator, AxisSource, Attitude, GyroConfig, GyroOffsets, RawAttitude};
pub use frame_decoder::FrameDecoder;
pub use packet::{PacketKind, ParsedPacket, RaceMode, parse_packet};

use crate::timing::TimerState;

/// One decoded position packet after axis mapping
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySample {
    /// Ground speed (km/h)
    pub speed_kmh: f64,
    /// Satellites used in the fix
    pub satellites: u32,
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
    /// Altitude above sea level (m)
    pub altitude_m: f64,
    /// Whether the receiver reports a valid fix
    pub gps_fix: bool,
    /// Mapped and zeroed heading (deg)
    pub heading_deg: f64,
    /// Mapped and zeroed roll (deg)
    pub roll_deg: f64,
    /// Mapped and zeroed pitch (deg)
    pub pitch_deg: f64,
    /// Longitudinal acceleration (g)
    pub lon_g: f64,
    /// Lateral acceleration (g)
    pub lat_g: f64,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    pub authenticated: bool,
    pub recording: bool,
    pub race_mode_enabled: bool,
    pub battery_percent: u32,
    pub gps_fix: bool,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LapStats {
    pub is_racing: bool,
    pub current_lap_time_ms: u64,
    pub last_lap_time_ms: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingInfo {
    pub count: u32,
    pub current_file: Option<PathBuf>,
}

/// Everything the UI needs to render a frame
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LiveSnapshot {
    pub telemetry: TelemetrySample,
    pub status: DeviceStatus,
    pub lap_stats: LapStats,
    pub recording: RecordingInfo,
    pub timer_state: TimerState,
    /// Flips at most every 500ms while packets keep arriving
    pub heartbeat: bool,
}

/// Discrete happenings the UI, alert and audio layers react to
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum RaceEvent {
    StartTriggered { manual: bool },
    LapCompleted { lap_time_ms: u64 },
    FinishTriggered { final_time_ms: u64, manual: bool },
    AuthAcknowledged,
    /// Device confirmed a password change. `new_key` is the key that was
    /// requested, if this engine issued the change.
    PasswordChanged { new_key: Option<String> },
    RecordingStarted { path: PathBuf },
    RecordingStopped { path: PathBuf, record_count: u32 },
    Disconnected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TelemetryOutput {
    Event(RaceEvent),
    Snapshot(Box<LiveSnapshot>),
}
