// Parser for single device packets
//
// Wire formats (ASCII, comma separated):
//   $RC,<fix>,<sats>,<lat>,<lon>,<speed_kmh>,<alt_m>[,<head>,<roll>,<pitch>[,<lon_g>,<lat_g>]]
//   $HB,<battery>,<unused>,<fix>,<sats>
//   $ST,<fix>,<sats>,<lat>,<lon>
// plus free text acknowledgements containing "Auth OK" or "Password Updated".

use log::debug;
use serde::{Deserialize, Serialize};

use super::axis_mapper::RawAttitude;

const POSITION_PREFIX: &str = "$RC";
const HEARTBEAT_PREFIX: &str = "$HB";
const STATUS_PREFIX: &str = "$ST";

const AUTH_OK_MARKER: &str = "Auth OK";
const PASSWORD_UPDATED_MARKER: &str = "Password Updated";

const MIN_POSITION_FIELDS: usize = 7;
const MIN_STATUS_FIELDS: usize = 5;

/// Whether position packets are acted upon. Controlled by the race mode
/// toggle, never by packet content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaceMode {
    #[default]
    Inactive,
    Active,
}

impl RaceMode {
    pub fn is_active(&self) -> bool {
        *self == RaceMode::Active
    }
}

impl From<bool> for RaceMode {
    fn from(value: bool) -> Self {
        if value {
            RaceMode::Active
        } else {
            RaceMode::Inactive
        }
    }
}

/// `$RC` position and orientation report, before axis mapping
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionReport {
    pub gps_fix: bool,
    pub satellites: u32,
    pub lat: f64,
    pub lon: f64,
    pub speed_kmh: f64,
    pub altitude_m: f64,
    pub raw: RawAttitude,
}

/// `$HB` device heartbeat. Fields that failed to parse are `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub battery_percent: Option<u32>,
    pub gps_fix: Option<bool>,
    pub satellites: Option<u32>,
}

/// `$ST` setup mode position report. Fields that failed to parse are `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatusReport {
    pub gps_fix: Option<bool>,
    pub satellites: Option<u32>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PacketKind {
    Position(PositionReport),
    Heartbeat(HeartbeatReport),
    Status(StatusReport),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ParsedPacket {
    pub auth_ok: bool,
    pub password_updated: bool,
    pub kind: Option<PacketKind>,
}

/// Parse one packet. Never fails: malformed fields fall back to defaults and
/// malformed packets produce no `kind`. Acknowledgement markers are detected
/// on every packet regardless of `mode` or field errors.
pub fn parse_packet(raw: &str, mode: RaceMode) -> ParsedPacket {
    let line = raw.trim();
    let mut parsed = ParsedPacket {
        auth_ok: line.contains(AUTH_OK_MARKER),
        password_updated: line.contains(PASSWORD_UPDATED_MARKER),
        kind: None,
    };

    let fields: Vec<&str> = line.split(',').collect();
    parsed.kind = match fields[0] {
        STATUS_PREFIX => parse_status(&fields).map(PacketKind::Status),
        HEARTBEAT_PREFIX => Some(PacketKind::Heartbeat(parse_heartbeat(&fields))),
        POSITION_PREFIX if mode.is_active() => parse_position(&fields).map(PacketKind::Position),
        _ => None,
    };
    parsed
}

fn parse_position(fields: &[&str]) -> Option<PositionReport> {
    if fields.len() < MIN_POSITION_FIELDS {
        debug!("Dropping short position packet ({} fields)", fields.len());
        return None;
    }
    let Some(speed_kmh) = float_field(fields, 5) else {
        debug!("Dropping position packet with invalid speed {:?}", fields[5]);
        return None;
    };

    Some(PositionReport {
        gps_fix: fix_field(fields, 1).unwrap_or(false),
        satellites: count_field(fields, 2).unwrap_or(0),
        lat: float_field(fields, 3).unwrap_or(0.),
        lon: float_field(fields, 4).unwrap_or(0.),
        speed_kmh,
        altitude_m: float_field(fields, 6).unwrap_or(0.),
        raw: RawAttitude {
            head: float_field(fields, 7).unwrap_or(0.),
            roll: float_field(fields, 8).unwrap_or(0.),
            pitch: float_field(fields, 9).unwrap_or(0.),
            lon_g: float_field(fields, 10).unwrap_or(0.),
            lat_g: float_field(fields, 11).unwrap_or(0.),
        },
    })
}

fn parse_heartbeat(fields: &[&str]) -> HeartbeatReport {
    HeartbeatReport {
        battery_percent: count_field(fields, 1),
        gps_fix: fix_field(fields, 3),
        satellites: count_field(fields, 4),
    }
}

fn parse_status(fields: &[&str]) -> Option<StatusReport> {
    if fields.len() < MIN_STATUS_FIELDS {
        return None;
    }
    Some(StatusReport {
        gps_fix: fix_field(fields, 1),
        satellites: count_field(fields, 2),
        lat: float_field(fields, 3),
        lon: float_field(fields, 4),
    })
}

fn float_field(fields: &[&str], index: usize) -> Option<f64> {
    fields
        .get(index)
        .and_then(|f| f.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Integer field; tolerates a fractional part the way the firmware
/// sometimes prints counts ("8.0").
fn int_field(fields: &[&str], index: usize) -> Option<i64> {
    let field = fields.get(index)?.trim();
    field
        .parse::<i64>()
        .ok()
        .or_else(|| float_field(fields, index).map(|v| v.trunc() as i64))
}

fn count_field(fields: &[&str], index: usize) -> Option<u32> {
    int_field(fields, index).and_then(|v| u32::try_from(v).ok())
}

fn fix_field(fields: &[&str], index: usize) -> Option<bool> {
    int_field(fields, index).map(|v| v == 1)
}
