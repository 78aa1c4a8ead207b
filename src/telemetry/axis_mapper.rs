// Axis selection, inversion and zero-level calibration for the IMU fields

use serde::{Deserialize, Serialize};

/// Which raw device axis feeds a logical vehicle axis
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AxisSource {
    #[default]
    Head,
    Roll,
    Pitch,
}

/// User axis mapping. Persisted under the `gyro_config` settings key using
/// the same field names the mobile app writes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GyroConfig {
    pub head_source: AxisSource,
    pub roll_source: AxisSource,
    pub pitch_source: AxisSource,
    pub invert_head: bool,
    pub invert_roll: bool,
    pub invert_pitch: bool,
    pub invert_lon_g: bool,
    pub invert_lat_g: bool,
    /// Exchange longitudinal and lateral G before inversion
    pub swap_g: bool,
}

impl Default for GyroConfig {
    fn default() -> Self {
        Self {
            head_source: AxisSource::Head,
            roll_source: AxisSource::Roll,
            pitch_source: AxisSource::Pitch,
            invert_head: false,
            invert_roll: false,
            invert_pitch: false,
            invert_lon_g: false,
            invert_lat_g: false,
            swap_g: false,
        }
    }
}

/// Zero point subtracted from the mapped orientation
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(default)]
pub struct GyroOffsets {
    pub head: f64,
    pub roll: f64,
    pub pitch: f64,
}

/// Orientation and acceleration exactly as the device reported them
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RawAttitude {
    pub head: f64,
    pub roll: f64,
    pub pitch: f64,
    pub lon_g: f64,
    pub lat_g: f64,
}

impl RawAttitude {
    fn axis(&self, source: AxisSource) -> f64 {
        match source {
            AxisSource::Head => self.head,
            AxisSource::Roll => self.roll,
            AxisSource::Pitch => self.pitch,
        }
    }
}

/// Orientation and acceleration in the vehicle frame
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Attitude {
    pub heading: f64,
    pub roll: f64,
    pub pitch: f64,
    pub lon_g: f64,
    pub lat_g: f64,
}

fn signed(value: f64, invert: bool) -> f64 {
    if invert { -value } else { value }
}

/// Source selection and inversion only, no offsets.
pub fn map_unzeroed(raw: &RawAttitude, config: &GyroConfig) -> Attitude {
    let (lon_g, lat_g) = if config.swap_g {
        (raw.lat_g, raw.lon_g)
    } else {
        (raw.lon_g, raw.lat_g)
    };

    Attitude {
        heading: signed(raw.axis(config.head_source), config.invert_head),
        roll: signed(raw.axis(config.roll_source), config.invert_roll),
        pitch: signed(raw.axis(config.pitch_source), config.invert_pitch),
        lon_g: signed(lon_g, config.invert_lon_g),
        lat_g: signed(lat_g, config.invert_lat_g),
    }
}

/// Map raw fields into the vehicle frame and subtract the zero offsets.
/// Accelerations are never offset.
pub fn map_axes(raw: &RawAttitude, config: &GyroConfig, offsets: &GyroOffsets) -> Attitude {
    let mapped = map_unzeroed(raw, config);
    Attitude {
        heading: mapped.heading - offsets.head,
        roll: mapped.roll - offsets.roll,
        pitch: mapped.pitch - offsets.pitch,
        ..mapped
    }
}

impl GyroOffsets {
    /// Offsets that make the given raw attitude read as zero under `config`.
    pub fn capture(raw: &RawAttitude, config: &GyroConfig) -> Self {
        let mapped = map_unzeroed(raw, config);
        Self {
            head: mapped.heading,
            roll: mapped.roll,
            pitch: mapped.pitch,
        }
    }
}

/// Holds the live mapping state read by every packet.
///
/// The config is read on each `apply` call, so preview and save take effect
/// on the very next packet.
#[derive(Debug, Default)]
pub struct AxisCalibrator {
    config: GyroConfig,
    offsets: GyroOffsets,
    last_raw: Option<RawAttitude>,
}

impl AxisCalibrator {
    pub fn new(config: GyroConfig, offsets: GyroOffsets) -> Self {
        Self {
            config,
            offsets,
            last_raw: None,
        }
    }

    pub fn apply(&mut self, raw: &RawAttitude) -> Attitude {
        self.last_raw = Some(*raw);
        map_axes(raw, &self.config, &self.offsets)
    }

    pub fn config(&self) -> &GyroConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GyroConfig) {
        self.config = config;
    }

    pub fn offsets(&self) -> &GyroOffsets {
        &self.offsets
    }

    pub fn set_offsets(&mut self, offsets: GyroOffsets) {
        self.offsets = offsets;
    }

    /// Make the most recently seen attitude the new zero. Without any sample
    /// yet the offsets are left untouched.
    pub fn set_zero(&mut self) -> GyroOffsets {
        if let Some(raw) = self.last_raw {
            self.offsets = GyroOffsets::capture(&raw, &self.config);
        }
        self.offsets
    }

    pub fn reset_zero(&mut self) {
        self.offsets = GyroOffsets::default();
    }
}
