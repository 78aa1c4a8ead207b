pub mod builder;
pub mod storage;
pub mod types;

pub use builder::{POINT_DEBOUNCE_DEG, TrackBuilder};
pub use storage::{FileTrackStore, TRACKS_DIR_NAME, TrackStore, track_name_from_path};
pub use types::{GeoPoint, MIN_PATH_POINTS, PathPoint, Track, TrackType};
