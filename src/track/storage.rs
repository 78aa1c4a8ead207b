// Storage implementation for track definitions

use crate::errors::RaceboxError;
use crate::track::types::Track;
use log::{debug, info};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const TRACKS_DIR_NAME: &str = "SavedTracks";
const TRACK_EXTENSION: &str = "json";

/// Trait defining the interface for track storage operations
pub trait TrackStore {
    /// Validate and persist `track` under a file name derived from `name`
    fn save(&mut self, name: &str, track: &Track) -> Result<PathBuf, RaceboxError>;

    /// Load a track from a path previously returned by `list` or `save`
    fn load(&self, path: &Path) -> Result<Track, RaceboxError>;

    /// List all persisted track files, in directory order
    fn list(&self) -> Result<Vec<PathBuf>, RaceboxError>;

    /// Remove a persisted track file
    fn delete(&mut self, path: &Path) -> Result<(), RaceboxError>;
}

/// One pretty-printed JSON file per track
pub struct FileTrackStore {
    storage_path: PathBuf,
    /// Listing as of the last save, delete or refresh
    tracks: Vec<PathBuf>,
}

impl FileTrackStore {
    /// Create a store rooted at `storage_path`, creating the directory if needed
    pub fn new(storage_path: PathBuf) -> Result<Self, RaceboxError> {
        if !storage_path.exists() {
            fs::create_dir_all(&storage_path).map_err(|e| RaceboxError::FileOperationError {
                operation: "create_tracks_dir".to_string(),
                reason: format!("Failed to create {:?}: {}", storage_path, e),
            })?;
        }

        let mut store = Self {
            storage_path,
            tracks: Vec::new(),
        };
        store.refresh()?;
        Ok(store)
    }

    /// Create the store under `<base_dir>/SavedTracks`
    pub fn in_base_dir(base_dir: &Path) -> Result<Self, RaceboxError> {
        Self::new(base_dir.join(TRACKS_DIR_NAME))
    }

    /// Reduce a display name to a filesystem-safe token. Every character
    /// outside `[A-Za-z0-9]` becomes `_`, surrounding spaces included.
    pub fn canonical_name(name: &str) -> String {
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    fn file_path_for_track(&self, name: &str) -> PathBuf {
        self.storage_path
            .join(format!("{}.{}", Self::canonical_name(name), TRACK_EXTENSION))
    }

    /// Re-read the directory listing
    pub fn refresh(&mut self) -> Result<&[PathBuf], RaceboxError> {
        self.tracks = self.list()?;
        Ok(&self.tracks)
    }

    /// Cached listing, see [`FileTrackStore::refresh`]
    pub fn tracks(&self) -> &[PathBuf] {
        &self.tracks
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Write through a temporary file so a failed save never leaves a
    /// truncated track behind
    fn write_atomically(&self, path: &Path, content: &str) -> Result<(), RaceboxError> {
        let temp_path = path.with_extension("json.tmp");
        {
            let mut temp_file =
                fs::File::create(&temp_path).map_err(|e| RaceboxError::FileOperationError {
                    operation: "create_temp_file".to_string(),
                    reason: format!("Failed to create temporary file: {}", e),
                })?;
            temp_file
                .write_all(content.as_bytes())
                .and_then(|_| temp_file.sync_all())
                .map_err(|e| RaceboxError::FileOperationError {
                    operation: "write_temp_file".to_string(),
                    reason: format!("Failed to write temporary file: {}", e),
                })?;
        }

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            RaceboxError::FileOperationError {
                operation: "atomic_move".to_string(),
                reason: format!("Failed to move temporary file into place: {}", e),
            }
        })
    }
}

impl TrackStore for FileTrackStore {
    fn save(&mut self, name: &str, track: &Track) -> Result<PathBuf, RaceboxError> {
        if name.trim().is_empty() {
            return Err(RaceboxError::TrackValidationError {
                reason: "Track name cannot be empty".to_string(),
            });
        }
        track
            .validate()
            .map_err(|reason| RaceboxError::TrackValidationError { reason })?;

        let content = serde_json::to_string_pretty(track).map_err(|e| {
            RaceboxError::TrackStorageError {
                reason: format!("Failed to serialize track: {}", e),
            }
        })?;

        let path = self.file_path_for_track(name);
        self.write_atomically(&path, &content)?;
        info!("Saved track '{}' to {:?}", track.name, path);

        self.refresh()?;
        Ok(path)
    }

    fn load(&self, path: &Path) -> Result<Track, RaceboxError> {
        let content = fs::read_to_string(path).map_err(|e| RaceboxError::TrackStorageError {
            reason: format!("Failed to read {:?}: {}", path, e),
        })?;

        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| RaceboxError::TrackStorageError {
                reason: format!("Failed to parse {:?}: {}", path, e),
            })?;
        if !value.get("startLine").is_some_and(|v| v.is_object()) {
            return Err(RaceboxError::TrackValidationError {
                reason: format!("{:?} has no start line", path),
            });
        }

        let track: Track =
            serde_json::from_value(value).map_err(|e| RaceboxError::TrackStorageError {
                reason: format!("Invalid track definition in {:?}: {}", path, e),
            })?;
        debug!("Loaded track '{}' from {:?}", track.name, path);
        Ok(track)
    }

    fn list(&self) -> Result<Vec<PathBuf>, RaceboxError> {
        let entries =
            fs::read_dir(&self.storage_path).map_err(|e| RaceboxError::FileOperationError {
                operation: "list_tracks".to_string(),
                reason: format!("Cannot read directory: {}", e),
            })?;

        Ok(entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == TRACK_EXTENSION)
            })
            .collect())
    }

    fn delete(&mut self, path: &Path) -> Result<(), RaceboxError> {
        fs::remove_file(path).map_err(|e| RaceboxError::FileOperationError {
            operation: "delete_track".to_string(),
            reason: format!("Failed to delete {:?}: {}", path, e),
        })?;
        self.refresh()?;
        Ok(())
    }
}

/// Display name for a track file ("Home_Kart.json" -> "Home_Kart")
pub fn track_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
