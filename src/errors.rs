// Error types for racebox

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum RaceboxError {
    // Errors for the device transport
    #[snafu(display("Device transport error: {reason}"))]
    TransportError { reason: String },
    #[snafu(display("Device is not connected"))]
    NotConnected,

    // Device command errors
    #[snafu(display("Device must be authenticated before {operation}"))]
    NotAuthenticated { operation: String },
    #[snafu(display("Invalid password: {reason}"))]
    InvalidPassword { reason: String },
    #[snafu(display("Invalid trigger radius: {radius}"))]
    InvalidTriggerRadius { radius: f64 },

    // Errors for the session recorder
    #[snafu(display("Error writing session file"))]
    RecorderIOError { source: io::Error },

    // Track errors
    #[snafu(display("Track validation failed: {reason}"))]
    TrackValidationError { reason: String },
    #[snafu(display("Track storage error: {reason}"))]
    TrackStorageError { reason: String },
    #[snafu(display("No track authoring in progress"))]
    NoTrackAuthoring,

    // Settings management errors
    #[snafu(display("Could not find application config directory to save settings"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing settings file"))]
    SettingsIOError { source: io::Error },
    #[snafu(display("Error serializing settings"))]
    SettingsSerializeError { source: serde_json::Error },

    // Generic file errors surfaced to the user
    #[snafu(display("File operation failed: {operation} - {reason}"))]
    FileOperationError { operation: String, reason: String },

    // CLI errors
    #[snafu(display("Invalid capture file: {path}"))]
    InvalidCaptureFile { path: String },
}
