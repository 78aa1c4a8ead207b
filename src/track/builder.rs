// Captures a new course from live positions while the device is in setup mode

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::errors::RaceboxError;
use crate::track::{GeoPoint, MIN_PATH_POINTS, PathPoint, Track, TrackType};

/// Positions closer than this to the previous point (in both axes) are skipped
pub const POINT_DEBOUNCE_DEG: f64 = 0.000005;

#[derive(Clone, Debug)]
pub struct TrackBuilder {
    name: String,
    track_type: TrackType,
    start: Option<GeoPoint>,
    finish: Option<GeoPoint>,
    path: Vec<PathPoint>,
    capturing: bool,
}

impl TrackBuilder {
    pub fn new(name: impl Into<String>, track_type: TrackType) -> Self {
        Self {
            name: name.into(),
            track_type,
            start: None,
            finish: None,
            path: Vec::new(),
            capturing: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn track_type(&self) -> TrackType {
        self.track_type
    }

    pub fn start(&self) -> Option<GeoPoint> {
        self.start
    }

    pub fn finish(&self) -> Option<GeoPoint> {
        self.finish
    }

    pub fn path(&self) -> &[PathPoint] {
        &self.path
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Mark the start line and (re)start path capture from scratch
    pub fn set_start(&mut self, point: GeoPoint) {
        info!("Track start set at {:.6}, {:.6}", point.lat, point.lon);
        self.start = Some(point);
        self.finish = None;
        self.path.clear();
        self.capturing = true;
    }

    /// Record a position on the path. Returns whether it was kept.
    pub fn push_position(&mut self, lat: f64, lon: f64, alt: f64) -> bool {
        if !self.capturing || (lat == 0.0 && lon == 0.0) {
            return false;
        }
        if let Some(last) = self.path.last() {
            if (last.lat - lat).abs() < POINT_DEBOUNCE_DEG
                && (last.lon - lon).abs() < POINT_DEBOUNCE_DEG
            {
                return false;
            }
        }
        self.path.push(PathPoint { lat, lon, alt });
        true
    }

    /// Mark the finish line and stop capturing
    pub fn set_finish(&mut self, point: GeoPoint) {
        info!(
            "Track finish set at {:.6}, {:.6} after {} points",
            point.lat,
            point.lon,
            self.path.len()
        );
        self.finish = Some(point);
        self.capturing = false;
    }

    pub fn build(&self, created: DateTime<Utc>) -> Result<Track, RaceboxError> {
        let start_line = self.start.ok_or_else(|| RaceboxError::TrackValidationError {
            reason: "Start line has not been set".to_string(),
        })?;
        if self.path.len() < MIN_PATH_POINTS {
            return Err(RaceboxError::TrackValidationError {
                reason: format!(
                    "Only {} path points captured, drive further before saving",
                    self.path.len()
                ),
            });
        }

        let finish_line = match (self.track_type, self.finish) {
            (TrackType::Sprint, None) => {
                return Err(RaceboxError::TrackValidationError {
                    reason: "Sprint tracks require a finish line".to_string(),
                });
            }
            (TrackType::Circuit, None) => Some(start_line),
            (_, finish) => finish,
        };

        let track = Track {
            name: self.name.trim().to_string(),
            track_type: self.track_type,
            created: Some(created),
            start_line,
            finish_line,
            path: self.path.clone(),
        };
        track
            .validate()
            .map_err(|reason| RaceboxError::TrackValidationError { reason })?;
        debug!("Built track '{}' with {} points", track.name, track.path.len());
        Ok(track)
    }
}
