// Append-only CSV session recording

use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, Utc};
use itertools::Itertools;
use log::{info, warn};

use crate::{
    RaceboxError,
    telemetry::{RecordingInfo, TelemetrySample},
};

const SESSION_PREFIX: &str = "Session_";
const SESSION_EXTENSION: &str = "csv";

const BASIC_COLUMNS: [&str; 7] = ["Time", "Lat", "Lon", "Alt", "Speed_kmh", "Sats", "Fix"];
const ORIENTATION_COLUMNS: [&str; 5] = ["Heading", "Roll", "Pitch", "Lon_G", "Lat_G"];

/// Column layout of a session file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordFormat {
    /// Position only
    Basic,
    /// Position plus mapped orientation and G forces
    #[default]
    Extended,
}

impl RecordFormat {
    pub fn header(&self) -> String {
        match self {
            RecordFormat::Basic => BASIC_COLUMNS.iter().join(","),
            RecordFormat::Extended => BASIC_COLUMNS.iter().chain(ORIENTATION_COLUMNS.iter()).join(","),
        }
    }

    pub fn row(&self, sample: &TelemetrySample, timestamp: &DateTime<Utc>) -> String {
        let mut row = format!(
            "{},{:.8},{:.8},{:.2},{:.2},{},{}",
            timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            sample.lat,
            sample.lon,
            sample.altitude_m,
            sample.speed_kmh,
            sample.satellites,
            u8::from(sample.gps_fix),
        );
        if *self == RecordFormat::Extended {
            row.push_str(&format!(
                ",{:.2},{:.2},{:.2},{:.3},{:.3}",
                sample.heading_deg, sample.roll_deg, sample.pitch_deg, sample.lon_g, sample.lat_g
            ));
        }
        row
    }
}

#[derive(Debug)]
struct ActiveSession {
    path: PathBuf,
    file: File,
    record_count: u32,
}

/// One open session at a time. Each sample is written straight through to
/// the file so a crash loses at most the line being written.
#[derive(Debug)]
pub struct SessionRecorder {
    records_dir: PathBuf,
    format: RecordFormat,
    session: Option<ActiveSession>,
}

impl SessionRecorder {
    pub fn new(records_dir: PathBuf, format: RecordFormat) -> Self {
        Self {
            records_dir,
            format,
            session: None,
        }
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn info(&self) -> RecordingInfo {
        match &self.session {
            Some(session) => RecordingInfo {
                count: session.record_count,
                current_file: Some(session.path.clone()),
            },
            None => RecordingInfo::default(),
        }
    }

    /// File name for a session started at `now`
    pub fn session_file_name(now: &DateTime<Local>) -> String {
        format!(
            "{}{}.{}",
            SESSION_PREFIX,
            now.format("%Y%m%d_%H%M%S"),
            SESSION_EXTENSION
        )
    }

    /// Create a session file that does not exist yet. A name already taken
    /// within the same second gets a `_1`, `_2`, ... suffix.
    fn create_session_file(&self, now: &DateTime<Local>) -> Result<(PathBuf, File), RaceboxError> {
        let stem = format!("{}{}", SESSION_PREFIX, now.format("%Y%m%d_%H%M%S"));
        for attempt in 0u32.. {
            let name = match attempt {
                0 => format!("{}.{}", stem, SESSION_EXTENSION),
                n => format!("{}_{}.{}", stem, n, SESSION_EXTENSION),
            };
            let path = self.records_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(RaceboxError::RecorderIOError { source: e }),
            }
        }
        Err(RaceboxError::RecorderIOError {
            source: std::io::Error::new(ErrorKind::AlreadyExists, "no free session file name"),
        })
    }

    /// Open a new session file and write its header. Returns `None` if a
    /// session is already open.
    pub fn start(&mut self, now: &DateTime<Local>) -> Result<Option<PathBuf>, RaceboxError> {
        if self.session.is_some() {
            return Ok(None);
        }

        fs::create_dir_all(&self.records_dir)
            .map_err(|e| RaceboxError::RecorderIOError { source: e })?;
        let (path, mut file) = self.create_session_file(now)?;
        writeln!(file, "{}", self.format.header())
            .map_err(|e| RaceboxError::RecorderIOError { source: e })?;

        info!("Recording started: {:?}", path);
        self.session = Some(ActiveSession {
            path: path.clone(),
            file,
            record_count: 0,
        });
        Ok(Some(path))
    }

    /// Write one sample. No-op when no session is open; write failures are
    /// logged and dropped so telemetry keeps flowing.
    pub fn append(&mut self, sample: &TelemetrySample, timestamp: &DateTime<Utc>) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let line = format!("{}\n", self.format.row(sample, timestamp));
        match session.file.write_all(line.as_bytes()) {
            Ok(()) => {
                session.record_count += 1;
                true
            }
            Err(e) => {
                warn!("Error while writing sample to {:?}: {}", session.path, e);
                false
            }
        }
    }

    /// Close the current session. Returns its path and record count, or
    /// `None` if nothing was recording.
    pub fn stop(&mut self) -> Option<(PathBuf, u32)> {
        let session = self.session.take()?;
        if let Err(e) = session.file.sync_all() {
            warn!("Error while syncing session file {:?}: {}", session.path, e);
        }
        info!(
            "Recording stopped: {:?} ({} records)",
            session.path, session.record_count
        );
        Some((session.path, session.record_count))
    }
}

fn is_session_file(path: &Path) -> bool {
    path.is_file()
        && path.extension().is_some_and(|ext| ext == SESSION_EXTENSION)
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(SESSION_PREFIX))
}

/// Session files in `records_dir`, most recently modified first
pub fn list_sessions(records_dir: &Path) -> Result<Vec<PathBuf>, RaceboxError> {
    if !records_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(records_dir).map_err(|e| RaceboxError::FileOperationError {
        operation: "list_sessions".to_string(),
        reason: format!("Cannot read directory: {}", e),
    })?;

    Ok(entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_session_file(path))
        .sorted_by_key(|path| {
            std::cmp::Reverse(
                fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            )
        })
        .collect())
}

pub fn delete_session(path: &Path) -> Result<(), RaceboxError> {
    fs::remove_file(path).map_err(|e| RaceboxError::FileOperationError {
        operation: "delete_session".to_string(),
        reason: format!("Failed to delete {:?}: {}", path, e),
    })
}
