// Single owner of the live session state. Every packet runs through
// decode, parse, map, record and gate check in one `process` call.

use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use log::{debug, info, warn};

use crate::{
    RaceboxError,
    device::{CommandSink, DeviceCommand},
    recorder::{RecordFormat, SessionRecorder},
    settings::{AppSettings, StorageRoots},
    telemetry::{
        AxisCalibrator, DeviceStatus, FrameDecoder, GyroConfig, GyroOffsets, LapStats,
        LiveSnapshot, PacketKind, RaceEvent, RaceMode, RecordingInfo, TelemetryOutput,
        TelemetrySample, parse_packet,
        packet::{HeartbeatReport, PositionReport, StatusReport},
    },
    timing::{GeofenceTimer, TimerEvent, TimerState},
    track::{GeoPoint, Track, TrackBuilder, TrackType},
};

/// Minimum spacing between two UI snapshots
pub const SNAPSHOT_INTERVAL_MS: i64 = 100;
/// Liveness indicator flips at most this often
pub const HEARTBEAT_INTERVAL_MS: i64 = 500;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub gyro_config: GyroConfig,
    pub gyro_offsets: GyroOffsets,
    pub auth_key: String,
    pub trigger_radius: f64,
    pub records_dir: PathBuf,
    pub record_format: RecordFormat,
}

impl EngineConfig {
    /// Default settings recording into `records_dir`
    pub fn new(records_dir: PathBuf) -> Self {
        Self::from_settings(&AppSettings::default(), records_dir)
    }

    pub fn from_settings(settings: &AppSettings, records_dir: PathBuf) -> Self {
        Self {
            gyro_config: settings.gyro_config,
            gyro_offsets: settings.gyro_offsets,
            auth_key: settings.auth_key.clone(),
            trigger_radius: settings.trigger_radius,
            records_dir,
            record_format: RecordFormat::Extended,
        }
    }

    /// Records directory picked from `roots` by the stored location
    pub fn from_storage(settings: &AppSettings, roots: &StorageRoots) -> Self {
        Self::from_settings(settings, roots.records_dir(settings.storage_location))
    }
}

fn epoch_ms(now: &DateTime<Local>) -> u64 {
    now.timestamp_millis().max(0) as u64
}

pub struct TelemetryEngine {
    decoder: FrameDecoder,
    calibrator: AxisCalibrator,
    /// Mapping as last saved, restored when a preview is discarded
    saved_gyro_config: GyroConfig,
    timer: GeofenceTimer,
    recorder: SessionRecorder,
    active_track: Option<Track>,
    authoring: Option<TrackBuilder>,

    telemetry: TelemetrySample,
    status: DeviceStatus,
    race_mode: RaceMode,
    auth_key: String,
    pending_auth_key: Option<String>,

    heartbeat: bool,
    last_heartbeat_ms: i64,
    last_snapshot_ms: Option<i64>,
}

impl TelemetryEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            calibrator: AxisCalibrator::new(config.gyro_config, config.gyro_offsets),
            saved_gyro_config: config.gyro_config,
            timer: GeofenceTimer::new(config.trigger_radius),
            recorder: SessionRecorder::new(config.records_dir, config.record_format),
            active_track: None,
            authoring: None,
            telemetry: TelemetrySample::default(),
            status: DeviceStatus::default(),
            race_mode: RaceMode::Inactive,
            auth_key: config.auth_key,
            pending_auth_key: None,
            heartbeat: false,
            last_heartbeat_ms: 0,
            last_snapshot_ms: None,
        }
    }

    /// Feed raw transport bytes. Returns every event raised by the complete
    /// packets they contained, interleaved with throttled snapshots.
    pub fn process(&mut self, bytes: &[u8], now: DateTime<Local>) -> Vec<TelemetryOutput> {
        let mut outputs = Vec::new();
        self.decoder.push(bytes);
        while let Some(frame) = self.decoder.next_frame() {
            self.handle_packet(&frame, &now, &mut outputs);
        }
        outputs
    }

    fn handle_packet(&mut self, frame: &str, now: &DateTime<Local>, outputs: &mut Vec<TelemetryOutput>) {
        let now_ms = now.timestamp_millis();
        if now_ms - self.last_heartbeat_ms > HEARTBEAT_INTERVAL_MS {
            self.last_heartbeat_ms = now_ms;
            self.heartbeat = !self.heartbeat;
        }

        let parsed = parse_packet(frame, self.race_mode);
        if parsed.auth_ok && !self.status.authenticated {
            info!("Device authenticated");
            self.status.authenticated = true;
            outputs.push(TelemetryOutput::Event(RaceEvent::AuthAcknowledged));
        }
        if parsed.password_updated {
            let new_key = self.pending_auth_key.take();
            if let Some(key) = &new_key {
                self.auth_key = key.clone();
            }
            info!("Device confirmed password change");
            outputs.push(TelemetryOutput::Event(RaceEvent::PasswordChanged { new_key }));
        }

        match parsed.kind {
            Some(PacketKind::Position(report)) => {
                for event in self.handle_position(&report, now) {
                    outputs.push(TelemetryOutput::Event(event));
                }
            }
            Some(PacketKind::Heartbeat(report)) => self.handle_heartbeat(&report),
            Some(PacketKind::Status(report)) => self.handle_status(&report),
            None => {}
        }

        self.timer.tick(epoch_ms(now));
        if self
            .last_snapshot_ms
            .is_none_or(|last| now_ms - last >= SNAPSHOT_INTERVAL_MS)
        {
            self.last_snapshot_ms = Some(now_ms);
            outputs.push(TelemetryOutput::Snapshot(Box::new(self.build_snapshot())));
        }
    }

    fn handle_position(&mut self, report: &PositionReport, now: &DateTime<Local>) -> Vec<RaceEvent> {
        let attitude = self.calibrator.apply(&report.raw);
        self.telemetry = TelemetrySample {
            speed_kmh: report.speed_kmh,
            satellites: report.satellites,
            lat: report.lat,
            lon: report.lon,
            altitude_m: report.altitude_m,
            gps_fix: report.gps_fix,
            heading_deg: attitude.heading,
            roll_deg: attitude.roll,
            pitch_deg: attitude.pitch,
            lon_g: attitude.lon_g,
            lat_g: attitude.lat_g,
        };
        self.status.gps_fix = report.gps_fix;

        if let Some(builder) = self.authoring.as_mut() {
            builder.push_position(report.lat, report.lon, report.altitude_m);
        }

        self.recorder.append(&self.telemetry, &now.with_timezone(&Utc));

        let mut events = Vec::new();
        let Some(event) = self
            .timer
            .update(report.lat, report.lon, report.gps_fix, epoch_ms(now))
        else {
            return events;
        };
        match event {
            TimerEvent::StartTriggered { .. } => {
                events.push(RaceEvent::StartTriggered { manual: false });
                events.extend(self.start_recording_logged(now));
            }
            TimerEvent::LapCompleted { lap_time_ms, .. } => {
                events.push(RaceEvent::LapCompleted { lap_time_ms });
                events.extend(self.start_recording_logged(now));
            }
            TimerEvent::FinishTriggered { final_time_ms, .. } => {
                events.push(RaceEvent::FinishTriggered {
                    final_time_ms,
                    manual: false,
                });
                events.extend(self.stop_recording());
            }
        }
        events
    }

    fn handle_heartbeat(&mut self, report: &HeartbeatReport) {
        if let Some(battery) = report.battery_percent {
            self.status.battery_percent = battery;
        }
        if let Some(fix) = report.gps_fix {
            self.status.gps_fix = fix;
        }
        if let Some(satellites) = report.satellites {
            self.telemetry.satellites = satellites;
        }
    }

    fn handle_status(&mut self, report: &StatusReport) {
        if let Some(satellites) = report.satellites {
            self.telemetry.satellites = satellites;
        }
        if let Some(lat) = report.lat {
            self.telemetry.lat = lat;
        }
        if let Some(lon) = report.lon {
            self.telemetry.lon = lon;
        }
        if let (Some(builder), Some(lat), Some(lon)) = (self.authoring.as_mut(), report.lat, report.lon)
        {
            builder.push_position(lat, lon, self.telemetry.altitude_m);
        }
    }

    fn start_recording(&mut self, now: &DateTime<Local>) -> Result<Option<RaceEvent>, RaceboxError> {
        Ok(self
            .recorder
            .start(now)?
            .map(|path| RaceEvent::RecordingStarted { path }))
    }

    /// Recording failures never interrupt timing
    fn start_recording_logged(&mut self, now: &DateTime<Local>) -> Option<RaceEvent> {
        match self.start_recording(now) {
            Ok(event) => event,
            Err(e) => {
                warn!("Could not start session recording: {}", e);
                None
            }
        }
    }

    fn stop_recording(&mut self) -> Option<RaceEvent> {
        self.recorder
            .stop()
            .map(|(path, record_count)| RaceEvent::RecordingStopped { path, record_count })
    }

    fn build_snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            telemetry: self.telemetry,
            status: self.status(),
            lap_stats: self.timer.lap_stats(),
            recording: self.recorder.info(),
            timer_state: self.timer.state(),
            heartbeat: self.heartbeat,
        }
    }

    /// Unthrottled view of the live state at `now`
    pub fn snapshot(&mut self, now: DateTime<Local>) -> LiveSnapshot {
        self.timer.tick(epoch_ms(&now));
        self.build_snapshot()
    }

    pub fn telemetry(&self) -> TelemetrySample {
        self.telemetry
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            recording: self.recorder.is_recording(),
            race_mode_enabled: self.race_mode.is_active(),
            ..self.status
        }
    }

    pub fn lap_stats(&self) -> LapStats {
        self.timer.lap_stats()
    }

    pub fn timer_state(&self) -> TimerState {
        self.timer.state()
    }

    pub fn recording_info(&self) -> RecordingInfo {
        self.recorder.info()
    }

    pub fn race_mode(&self) -> RaceMode {
        self.race_mode
    }

    pub fn auth_key(&self) -> &str {
        &self.auth_key
    }

    pub fn pending_auth_key(&self) -> Option<&str> {
        self.pending_auth_key.as_deref()
    }

    pub fn active_track(&self) -> Option<&Track> {
        self.active_track.as_ref()
    }

    // Device modes and credentials

    /// Switch race mode. Turning it off stops any recording and zeroes the
    /// displayed speed.
    pub fn set_race_mode(
        &mut self,
        on: bool,
        sink: &mut impl CommandSink,
    ) -> Result<Vec<RaceEvent>, RaceboxError> {
        let command = if on {
            DeviceCommand::RaceOn
        } else {
            DeviceCommand::RaceOff
        };
        sink.send_command(&command)?;

        self.race_mode = RaceMode::from(on);
        info!("Race mode {}", if on { "enabled" } else { "disabled" });
        let mut events = Vec::new();
        if !on {
            events.extend(self.stop_recording());
            self.telemetry.speed_kmh = 0.0;
        }
        Ok(events)
    }

    /// Free recording without a track: starts race mode and a session, or
    /// stops both when a session is already running
    pub fn toggle_roam_recording(
        &mut self,
        sink: &mut impl CommandSink,
        now: DateTime<Local>,
    ) -> Result<Vec<RaceEvent>, RaceboxError> {
        if self.recorder.is_recording() {
            let mut events = self.set_race_mode(false, sink)?;
            events.extend(self.stop_recording());
            Ok(events)
        } else {
            let mut events = self.set_race_mode(true, sink)?;
            events.extend(self.start_recording(&now)?);
            Ok(events)
        }
    }

    pub fn set_setup_mode(&mut self, on: bool, sink: &mut impl CommandSink) -> Result<(), RaceboxError> {
        let command = if on {
            DeviceCommand::SetupOn
        } else {
            DeviceCommand::SetupOff
        };
        sink.send_command(&command)
    }

    pub fn authenticate(&mut self, sink: &mut impl CommandSink) -> Result<(), RaceboxError> {
        sink.send_command(&DeviceCommand::Authenticate(self.auth_key.clone()))
    }

    /// Ask the device to change its password. The engine keeps using the old
    /// key until the device confirms with "Password Updated".
    pub fn change_password(
        &mut self,
        new_password: &str,
        sink: &mut impl CommandSink,
    ) -> Result<(), RaceboxError> {
        if !self.status.authenticated {
            return Err(RaceboxError::NotAuthenticated {
                operation: "changing the password".to_string(),
            });
        }
        if new_password.trim().is_empty() {
            return Err(RaceboxError::InvalidPassword {
                reason: "new password cannot be empty".to_string(),
            });
        }
        if new_password.trim() != new_password {
            return Err(RaceboxError::InvalidPassword {
                reason: "new password cannot start or end with whitespace".to_string(),
            });
        }
        if new_password.contains(['\r', '\n']) {
            return Err(RaceboxError::InvalidPassword {
                reason: "new password cannot contain line breaks".to_string(),
            });
        }

        sink.send_command(&DeviceCommand::SetPassword(new_password.to_string()))?;
        self.pending_auth_key = Some(new_password.to_string());
        Ok(())
    }

    // Axis mapping

    pub fn gyro_config(&self) -> &GyroConfig {
        self.calibrator.config()
    }

    pub fn gyro_offsets(&self) -> &GyroOffsets {
        self.calibrator.offsets()
    }

    /// Use `config` for the following packets without treating it as saved
    pub fn preview_gyro_config(&mut self, config: GyroConfig) {
        self.calibrator.set_config(config);
    }

    /// Use `config` after it has been durably saved
    pub fn apply_gyro_config(&mut self, config: GyroConfig) {
        self.saved_gyro_config = config;
        self.calibrator.set_config(config);
    }

    /// Return to the last saved mapping
    pub fn discard_gyro_preview(&mut self) {
        self.calibrator.set_config(self.saved_gyro_config);
    }

    /// Make the current attitude the new zero. Returns the offsets to persist.
    pub fn set_zero_level(&mut self) -> GyroOffsets {
        let offsets = self.calibrator.set_zero();
        info!(
            "Zero level set (head {:.2}, roll {:.2}, pitch {:.2})",
            offsets.head, offsets.roll, offsets.pitch
        );
        offsets
    }

    pub fn reset_level(&mut self) {
        self.calibrator.reset_zero();
    }

    // Timing

    pub fn trigger_radius(&self) -> f64 {
        self.timer.trigger_radius()
    }

    pub fn set_trigger_radius(&mut self, radius: f64) -> Result<(), RaceboxError> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(RaceboxError::InvalidTriggerRadius { radius });
        }
        self.timer.set_trigger_radius(radius);
        Ok(())
    }

    pub fn load_track(&mut self, track: Track) {
        info!(
            "Track '{}' ready ({}, trigger radius {}m)",
            track.name,
            track.track_type.description(),
            self.timer.trigger_radius()
        );
        self.timer.load_track(&track);
        self.active_track = Some(track);
    }

    pub fn unload_track(&mut self) {
        self.timer.unload_track();
        self.active_track = None;
    }

    /// Start the clock and a recording now, whatever the gates say
    pub fn manual_start_race(&mut self, now: DateTime<Local>) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        events.extend(self.start_recording_logged(&now));
        self.timer.manual_start(epoch_ms(&now));
        info!("Race started manually");
        events.push(RaceEvent::StartTriggered { manual: true });
        events
    }

    /// Freeze the clock and stop recording. No-op when not racing.
    pub fn manual_stop_race(&mut self, now: DateTime<Local>) -> Vec<RaceEvent> {
        let Some(final_time_ms) = self.timer.manual_stop(epoch_ms(&now)) else {
            return Vec::new();
        };
        info!("Race stopped manually after {}ms", final_time_ms);
        let mut events = vec![RaceEvent::FinishTriggered {
            final_time_ms,
            manual: true,
        }];
        events.extend(self.stop_recording());
        events
    }

    // Track authoring

    pub fn authoring(&self) -> Option<&TrackBuilder> {
        self.authoring.as_ref()
    }

    /// Put the device in setup mode and start a new course capture
    pub fn begin_track_authoring(
        &mut self,
        name: &str,
        track_type: TrackType,
        sink: &mut impl CommandSink,
    ) -> Result<(), RaceboxError> {
        sink.send_command(&DeviceCommand::SetupOn)?;
        debug!("Authoring {} track '{}'", track_type.description(), name);
        self.authoring = Some(TrackBuilder::new(name, track_type));
        Ok(())
    }

    fn current_position(&self) -> Result<GeoPoint, RaceboxError> {
        if self.telemetry.lat == 0.0 && self.telemetry.lon == 0.0 {
            return Err(RaceboxError::TrackValidationError {
                reason: "No position received yet".to_string(),
            });
        }
        Ok(GeoPoint::new(self.telemetry.lat, self.telemetry.lon))
    }

    /// Use the current position as the start line
    pub fn mark_track_start(&mut self) -> Result<GeoPoint, RaceboxError> {
        let point = self.current_position()?;
        let builder = self.authoring.as_mut().ok_or(RaceboxError::NoTrackAuthoring)?;
        builder.set_start(point);
        Ok(point)
    }

    /// Use the current position as the finish line and leave setup mode
    pub fn mark_track_finish(&mut self, sink: &mut impl CommandSink) -> Result<GeoPoint, RaceboxError> {
        let point = self.current_position()?;
        let builder = self.authoring.as_mut().ok_or(RaceboxError::NoTrackAuthoring)?;
        builder.set_finish(point);
        sink.send_command(&DeviceCommand::SetupOff)?;
        Ok(point)
    }

    /// Build the captured course. The capture is kept on failure so more
    /// points can be added.
    pub fn finish_track_authoring(&mut self, now: DateTime<Utc>) -> Result<Track, RaceboxError> {
        let builder = self.authoring.as_ref().ok_or(RaceboxError::NoTrackAuthoring)?;
        let track = builder.build(now)?;
        self.authoring = None;
        Ok(track)
    }

    pub fn cancel_track_authoring(&mut self, sink: &mut impl CommandSink) -> Result<(), RaceboxError> {
        self.authoring = None;
        sink.send_command(&DeviceCommand::SetupOff)
    }

    /// Reset everything tied to the link. The loaded track and the last lap
    /// times are kept; an open session file is closed as-is.
    pub fn disconnect(&mut self) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        events.extend(self.stop_recording());
        self.decoder.reset();
        self.timer.reset_race();
        self.race_mode = RaceMode::Inactive;
        self.status = DeviceStatus::default();
        self.telemetry = TelemetrySample::default();
        self.pending_auth_key = None;
        self.authoring = None;
        self.last_snapshot_ms = None;
        info!("Disconnected, session state reset");
        events.push(RaceEvent::Disconnected);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::AxisSource;
    use crate::track::PathPoint;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    const START: (f64, f64) = (45.0, 9.0);
    const FINISH: (f64, f64) = (45.01, 9.0);
    const AWAY: (f64, f64) = (45.001, 9.0);
    const T0: i64 = 1_700_000_000_000;

    fn at(offset_ms: i64) -> DateTime<Local> {
        Local.timestamp_millis_opt(T0 + offset_ms).unwrap()
    }

    fn engine(temp_dir: &TempDir) -> TelemetryEngine {
        TelemetryEngine::new(EngineConfig::new(temp_dir.path().join("RaceRecords")))
    }

    fn racing_engine(temp_dir: &TempDir) -> TelemetryEngine {
        let mut engine = engine(temp_dir);
        engine.set_race_mode(true, &mut Vec::<String>::new()).unwrap();
        engine
    }

    fn rc(pos: (f64, f64)) -> String {
        format!("$RC,1,9,{},{},42.0,120.0,10,20,30,0.1,0.2", pos.0, pos.1)
    }

    /// Feed one packet followed by a bare sentinel so it is emitted right away
    fn feed(engine: &mut TelemetryEngine, packet: &str, offset_ms: i64) -> Vec<TelemetryOutput> {
        engine.process(format!("{}\n$", packet).as_bytes(), at(offset_ms))
    }

    fn events(outputs: &[TelemetryOutput]) -> Vec<RaceEvent> {
        outputs
            .iter()
            .filter_map(|output| match output {
                TelemetryOutput::Event(event) => Some(event.clone()),
                TelemetryOutput::Snapshot(_) => None,
            })
            .collect()
    }

    fn snapshots(outputs: &[TelemetryOutput]) -> usize {
        outputs
            .iter()
            .filter(|output| matches!(output, TelemetryOutput::Snapshot(_)))
            .count()
    }

    fn track(track_type: TrackType) -> Track {
        Track {
            name: "Test".to_string(),
            track_type,
            created: None,
            start_line: GeoPoint::new(START.0, START.1),
            finish_line: match track_type {
                TrackType::Circuit => None,
                TrackType::Sprint => Some(GeoPoint::new(FINISH.0, FINISH.1)),
            },
            path: vec![
                PathPoint {
                    lat: START.0,
                    lon: START.1,
                    alt: 0.
                };
                5
            ],
        }
    }

    #[test]
    fn test_position_packets_need_race_mode() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);

        feed(&mut engine, "$RC,1,8,37.1,-122.0,55.5,10.0", 0);
        assert_eq!(engine.telemetry(), TelemetrySample::default());

        engine.set_race_mode(true, &mut Vec::<String>::new()).unwrap();
        feed(&mut engine, "$RC,1,8,37.1,-122.0,55.5,10.0", 200);
        let telemetry = engine.telemetry();
        assert_eq!(telemetry.speed_kmh, 55.5);
        assert_eq!(telemetry.satellites, 8);
        assert!(telemetry.gps_fix);
        assert!(engine.status().gps_fix);
    }

    #[test]
    fn test_packet_split_across_reads() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = racing_engine(&temp_dir);

        engine.process(b"noise$RC,1,8,37.1,-1", at(0));
        engine.process(b"22.0,55.5,10.0\n", at(10));
        assert_eq!(engine.telemetry().speed_kmh, 0.0);

        engine.process(b"$HB,80,0,1,8\n", at(20));
        assert_eq!(engine.telemetry().lon, -122.0);
    }

    #[test]
    fn test_axis_mapping_follows_live_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = racing_engine(&temp_dir);

        feed(&mut engine, &rc(AWAY), 0);
        assert_eq!(engine.telemetry().heading_deg, 10.0);

        engine.preview_gyro_config(GyroConfig {
            head_source: AxisSource::Roll,
            invert_head: true,
            ..GyroConfig::default()
        });
        feed(&mut engine, &rc(AWAY), 100);
        assert_eq!(engine.telemetry().heading_deg, -20.0);

        let offsets = engine.set_zero_level();
        assert_eq!(offsets.head, -20.0);
        feed(&mut engine, &rc(AWAY), 200);
        assert_eq!(engine.telemetry().heading_deg, 0.0);

        engine.reset_level();
        engine.discard_gyro_preview();
        feed(&mut engine, &rc(AWAY), 300);
        assert_eq!(engine.telemetry().heading_deg, 10.0);
    }

    #[test]
    fn test_auth_and_password_change_flow() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);
        let mut sink: Vec<String> = Vec::new();

        assert!(matches!(
            engine.change_password("9999", &mut sink),
            Err(RaceboxError::NotAuthenticated { .. })
        ));

        engine.authenticate(&mut sink).unwrap();
        assert_eq!(sink, vec!["KEY:1234\r\n"]);

        let outputs = feed(&mut engine, "$MSG:Auth OK", 0);
        assert_eq!(events(&outputs), vec![RaceEvent::AuthAcknowledged]);
        assert!(engine.status().authenticated);
        // Repeated acknowledgements are not re-announced
        assert!(events(&feed(&mut engine, "$MSG:Auth OK", 50)).is_empty());

        let sent = sink.len();
        for rejected in ["  ", " 9999", "9999 ", "99\n99", "99\r99"] {
            assert!(
                matches!(
                    engine.change_password(rejected, &mut sink),
                    Err(RaceboxError::InvalidPassword { .. })
                ),
                "{:?} should be rejected",
                rejected
            );
        }
        assert_eq!(sink.len(), sent);
        assert_eq!(engine.pending_auth_key(), None);

        engine.change_password("99 99", &mut sink).unwrap();
        assert_eq!(sink.last().unwrap(), "CMD:SET_PASS:99 99\n");
        engine.change_password("9999", &mut sink).unwrap();
        assert_eq!(sink.last().unwrap(), "CMD:SET_PASS:9999\n");
        assert_eq!(engine.auth_key(), "1234");
        assert_eq!(engine.pending_auth_key(), Some("9999"));

        let outputs = feed(&mut engine, "$MSG:Password Updated", 100);
        assert_eq!(
            events(&outputs),
            vec![RaceEvent::PasswordChanged {
                new_key: Some("9999".to_string())
            }]
        );
        assert_eq!(engine.auth_key(), "9999");
        assert_eq!(engine.pending_auth_key(), None);
    }

    #[test]
    fn test_race_mode_off_stops_recording_and_zeroes_speed() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);
        let mut sink: Vec<String> = Vec::new();

        let events = engine.toggle_roam_recording(&mut sink, at(0)).unwrap();
        assert!(matches!(events.as_slice(), [RaceEvent::RecordingStarted { .. }]));
        assert!(engine.status().recording);
        assert!(engine.status().race_mode_enabled);

        feed(&mut engine, &rc(AWAY), 100);
        feed(&mut engine, &rc(AWAY), 200);
        assert_eq!(engine.recording_info().count, 2);

        let events = engine.set_race_mode(false, &mut sink).unwrap();
        assert!(matches!(
            events.as_slice(),
            [RaceEvent::RecordingStopped { record_count: 2, .. }]
        ));
        assert_eq!(engine.telemetry().speed_kmh, 0.0);
        assert!(!engine.status().recording);
        assert_eq!(sink, vec!["CMD:RACE_ON\n", "CMD:RACE_OFF\n"]);
    }

    #[test]
    fn test_roam_toggle_stops_when_recording() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);
        let mut sink: Vec<String> = Vec::new();

        engine.toggle_roam_recording(&mut sink, at(0)).unwrap();
        let events = engine.toggle_roam_recording(&mut sink, at(1_000)).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(engine.race_mode(), RaceMode::Inactive);
        assert!(!engine.status().recording);
    }

    #[test]
    fn test_circuit_session_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = racing_engine(&temp_dir);
        engine.load_track(track(TrackType::Circuit));
        assert_eq!(engine.timer_state(), TimerState::Armed);

        feed(&mut engine, &rc(AWAY), 0);
        let outputs = feed(&mut engine, &rc(START), 1_000);
        let start_events = events(&outputs);
        assert_eq!(start_events[0], RaceEvent::StartTriggered { manual: false });
        let Some(RaceEvent::RecordingStarted { path }) = start_events.get(1).cloned() else {
            panic!("expected a recording to start, got {:?}", start_events);
        };

        feed(&mut engine, &rc(AWAY), 20_000);
        let outputs = feed(&mut engine, &rc(START), 61_000);
        assert_eq!(
            events(&outputs),
            vec![RaceEvent::LapCompleted {
                lap_time_ms: 60_000
            }]
        );
        assert_eq!(engine.lap_stats().last_lap_time_ms, 60_000);
        assert_eq!(engine.timer_state(), TimerState::Racing);

        // Samples after the start trigger: away, start
        assert_eq!(engine.recording_info().count, 2);
        assert_eq!(engine.recording_info().current_file, Some(path.clone()));

        let events = engine.manual_stop_race(at(70_000));
        assert_eq!(
            events[0],
            RaceEvent::FinishTriggered {
                final_time_ms: 9_000,
                manual: true
            }
        );
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_sprint_finish_stops_recording() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = racing_engine(&temp_dir);
        engine.load_track(track(TrackType::Sprint));

        feed(&mut engine, &rc(START), 0);
        assert!(events(&feed(&mut engine, &rc(FINISH), 2_000)).is_empty());

        feed(&mut engine, &rc(AWAY), 3_000);
        let outputs = feed(&mut engine, &rc(FINISH), 8_000);
        let finish_events = events(&outputs);
        assert_eq!(
            finish_events[0],
            RaceEvent::FinishTriggered {
                final_time_ms: 8_000,
                manual: false
            }
        );
        assert!(matches!(finish_events[1], RaceEvent::RecordingStopped { .. }));
        assert_eq!(engine.timer_state(), TimerState::Armed);
    }

    #[test]
    fn test_samples_without_fix_recorded_but_not_timed() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);
        engine.load_track(track(TrackType::Circuit));
        engine
            .toggle_roam_recording(&mut Vec::<String>::new(), at(0))
            .unwrap();

        let outputs = feed(&mut engine, "$RC,0,3,45.0,9.0,10.0,100.0", 100);
        assert!(events(&outputs).is_empty());
        assert_eq!(engine.recording_info().count, 1);
        assert_eq!(engine.timer_state(), TimerState::Armed);
    }

    #[test]
    fn test_manual_start_without_track() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);

        let events = engine.manual_start_race(at(0));
        assert!(matches!(events[0], RaceEvent::RecordingStarted { .. }));
        assert_eq!(events[1], RaceEvent::StartTriggered { manual: true });
        assert_eq!(engine.snapshot(at(2_500)).lap_stats.current_lap_time_ms, 2_500);

        assert_eq!(engine.manual_stop_race(at(3_000)).len(), 2);
        assert!(engine.manual_stop_race(at(4_000)).is_empty());
    }

    #[test]
    fn test_heartbeat_and_status_packets() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);

        feed(&mut engine, "$HB,76,0,1,11", 0);
        let status = engine.status();
        assert_eq!(status.battery_percent, 76);
        assert!(status.gps_fix);
        assert_eq!(engine.telemetry().satellites, 11);

        // Setup mode status is honoured without race mode
        feed(&mut engine, "$ST,1,7,45.5,9.5", 100);
        let telemetry = engine.telemetry();
        assert_eq!((telemetry.satellites, telemetry.lat, telemetry.lon), (7, 45.5, 9.5));
        assert_eq!(engine.recording_info().count, 0);
    }

    #[test]
    fn test_snapshots_are_throttled() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = racing_engine(&temp_dir);

        let mut bytes = String::new();
        for _ in 0..10 {
            bytes.push_str(&rc(AWAY));
            bytes.push('\n');
        }
        bytes.push('$');
        assert_eq!(snapshots(&engine.process(bytes.as_bytes(), at(0))), 1);
        assert_eq!(snapshots(&feed(&mut engine, &rc(AWAY), 50)), 0);
        assert_eq!(snapshots(&feed(&mut engine, &rc(AWAY), 100)), 1);
    }

    #[test]
    fn test_heartbeat_flag_toggles_every_half_second() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);

        feed(&mut engine, "$HB,80,0,1,8", 0);
        let first = engine.snapshot(at(0)).heartbeat;
        feed(&mut engine, "$HB,80,0,1,8", 300);
        assert_eq!(engine.snapshot(at(300)).heartbeat, first);
        feed(&mut engine, "$HB,80,0,1,8", 600);
        assert_ne!(engine.snapshot(at(600)).heartbeat, first);
    }

    #[test]
    fn test_trigger_radius_validation() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);

        for radius in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(engine.set_trigger_radius(radius).is_err());
        }
        engine.set_trigger_radius(8.0).unwrap();
        assert_eq!(engine.trigger_radius(), 8.0);
    }

    #[test]
    fn test_disconnect_keeps_track_and_lap_times() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = racing_engine(&temp_dir);
        engine.load_track(track(TrackType::Circuit));
        feed(&mut engine, "$MSG:Auth OK", 0);
        feed(&mut engine, &rc(START), 0);
        feed(&mut engine, &rc(AWAY), 20_000);
        feed(&mut engine, &rc(START), 30_000);
        let path = engine.recording_info().current_file.unwrap();

        let events = engine.disconnect();
        assert!(matches!(events[0], RaceEvent::RecordingStopped { .. }));
        assert_eq!(events.last(), Some(&RaceEvent::Disconnected));

        let status = engine.status();
        assert!(!status.authenticated && !status.recording && !status.race_mode_enabled);
        assert_eq!(engine.timer_state(), TimerState::Armed);
        assert!(engine.active_track().is_some());
        assert_eq!(engine.lap_stats().last_lap_time_ms, 30_000);
        assert!(path.exists());
    }

    #[test]
    fn test_track_authoring_flow() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = racing_engine(&temp_dir);
        let mut sink: Vec<String> = Vec::new();

        assert!(matches!(
            engine.mark_track_start(),
            Err(RaceboxError::TrackValidationError { .. })
        ));

        engine
            .begin_track_authoring("Hill Climb", TrackType::Sprint, &mut sink)
            .unwrap();
        feed(&mut engine, "$ST,1,8,45.0,9.0", 0);
        assert_eq!(engine.mark_track_start().unwrap(), GeoPoint::new(45.0, 9.0));

        for i in 1..=6 {
            feed(&mut engine, &format!("$ST,1,8,{},9.0", 45.0 + i as f64 * 0.0001), i * 100);
        }
        feed(&mut engine, &rc((45.001, 9.0)), 800);
        engine.mark_track_finish(&mut sink).unwrap();
        // Capture has stopped
        feed(&mut engine, &rc((45.002, 9.0)), 900);

        let track = engine.finish_track_authoring(Utc::now()).unwrap();
        assert_eq!(track.path.len(), 7);
        assert_eq!(track.finish_line, Some(GeoPoint::new(45.001, 9.0)));
        assert!(engine.authoring().is_none());
        assert_eq!(sink, vec!["CMD:SETUP_ON\n", "CMD:SETUP_OFF\n"]);

        assert!(matches!(
            engine.finish_track_authoring(Utc::now()),
            Err(RaceboxError::NoTrackAuthoring)
        ));
    }

    #[test]
    fn test_incomplete_authoring_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let mut engine = engine(&temp_dir);
        let mut sink: Vec<String> = Vec::new();

        engine
            .begin_track_authoring("Short", TrackType::Circuit, &mut sink)
            .unwrap();
        feed(&mut engine, "$ST,1,8,45.0,9.0", 0);
        engine.mark_track_start().unwrap();
        assert!(engine.finish_track_authoring(Utc::now()).is_err());
        assert!(engine.authoring().is_some());

        engine.cancel_track_authoring(&mut sink).unwrap();
        assert!(engine.authoring().is_none());
        assert_eq!(sink.last().unwrap(), "CMD:SETUP_OFF\n");
    }
}
