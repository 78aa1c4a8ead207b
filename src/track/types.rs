// Course definitions saved by the track creator and loaded for timing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A track needs at least this many path points to be saved
pub const MIN_PATH_POINTS: usize = 5;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct PathPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    /// Closed loop, start and finish are the same gate
    Circuit,
    /// Point to point with distinct start and finish gates
    Sprint,
}

impl TrackType {
    pub fn description(&self) -> &'static str {
        match self {
            TrackType::Circuit => "Circuit",
            TrackType::Sprint => "Sprint",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub name: String,
    #[serde(rename = "type")]
    pub track_type: TrackType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    pub start_line: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_line: Option<GeoPoint>,
    #[serde(default)]
    pub path: Vec<PathPoint>,
}

impl Track {
    /// Finish gate location. Circuits without an explicit finish reuse the start.
    pub fn finish_point(&self) -> GeoPoint {
        self.finish_line.unwrap_or(self.start_line)
    }

    /// Check the rules a track must satisfy before it can be saved
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Track name cannot be empty".to_string());
        }
        if self.path.len() < MIN_PATH_POINTS {
            return Err(format!(
                "Track path has {} points, at least {} required",
                self.path.len(),
                MIN_PATH_POINTS
            ));
        }
        if self.track_type == TrackType::Sprint {
            match self.finish_line {
                None => return Err("Sprint tracks require a finish line".to_string()),
                Some(finish) if finish == self.start_line => {
                    return Err("Sprint finish line must differ from the start line".to_string());
                }
                _ => {}
            }
        }
        Ok(())
    }
}
