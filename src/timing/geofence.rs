//! Geofence lap timer
//!
//! Starts, laps and finishes are triggered by entering a circular gate of
//! `trigger_radius_m` around the start or finish coordinate.
//!
//! - Each gate has an "inside" flag so lingering in the zone fires once.
//!   The flag clears when the vehicle leaves the radius.
//! - The start gate ignores re-entry within [`LAP_DEBOUNCE_MS`] of the last
//!   start while racing.
//! - On a circuit, re-entering the start gate while racing completes a lap.
//! - The sprint finish gate only fires after [`MIN_SPRINT_DURATION_MS`].
//! - Samples without a GPS fix never move the state machine.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::geo::distance_to;
use crate::telemetry::LapStats;
use crate::track::{GeoPoint, Track, TrackType};

pub const DEFAULT_TRIGGER_RADIUS_M: f64 = 3.0;

/// Minimum time between two start gate triggers while racing
pub const LAP_DEBOUNCE_MS: u64 = 10_000;

/// Minimum sprint duration before the finish gate is honoured
pub const MIN_SPRINT_DURATION_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerState {
    /// No track loaded
    Idle,
    /// Track loaded, waiting for the start gate
    Armed,
    /// Timer running
    Racing,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimerEvent {
    StartTriggered { distance_m: f64 },
    LapCompleted { lap_time_ms: u64, distance_m: f64 },
    FinishTriggered { final_time_ms: u64, distance_m: f64 },
}

/// Gate locations taken from the loaded track
#[derive(Clone, Copy, Debug)]
struct Course {
    track_type: TrackType,
    start: GeoPoint,
    finish: Option<GeoPoint>,
}

#[derive(Clone, Copy, Debug, Default)]
struct RaceGateState {
    inside_start_gate: bool,
    inside_finish_gate: bool,
    race_start_epoch_ms: u64,
}

#[derive(Debug)]
pub struct GeofenceTimer {
    course: Option<Course>,
    trigger_radius_m: f64,
    gates: RaceGateState,
    lap_stats: LapStats,
}

impl Default for GeofenceTimer {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER_RADIUS_M)
    }
}

impl GeofenceTimer {
    pub fn new(trigger_radius_m: f64) -> Self {
        Self {
            course: None,
            trigger_radius_m,
            gates: RaceGateState::default(),
            lap_stats: LapStats::default(),
        }
    }

    pub fn state(&self) -> TimerState {
        if self.lap_stats.is_racing {
            TimerState::Racing
        } else if self.course.is_some() {
            TimerState::Armed
        } else {
            TimerState::Idle
        }
    }

    pub fn lap_stats(&self) -> LapStats {
        self.lap_stats
    }

    pub fn trigger_radius(&self) -> f64 {
        self.trigger_radius_m
    }

    pub fn set_trigger_radius(&mut self, trigger_radius_m: f64) {
        self.trigger_radius_m = trigger_radius_m;
    }

    pub fn has_track(&self) -> bool {
        self.course.is_some()
    }

    /// Arm the timer for `track`, dropping any race in progress and the
    /// gate flags left over from the previous course.
    pub fn load_track(&mut self, track: &Track) {
        let finish = match track.track_type {
            TrackType::Sprint => track.finish_line,
            TrackType::Circuit => Some(track.finish_point()),
        };
        self.course = Some(Course {
            track_type: track.track_type,
            start: track.start_line,
            finish,
        });
        self.gates = RaceGateState::default();
        self.lap_stats = LapStats::default();
    }

    pub fn unload_track(&mut self) {
        self.course = None;
        self.gates = RaceGateState::default();
        self.lap_stats.is_racing = false;
    }

    /// Stop racing and clear gate flags, keeping the track and lap times
    pub fn reset_race(&mut self) {
        self.gates = RaceGateState::default();
        self.lap_stats.is_racing = false;
    }

    /// Refresh the running lap time
    pub fn tick(&mut self, now_ms: u64) {
        if self.lap_stats.is_racing {
            self.lap_stats.current_lap_time_ms = self.elapsed(now_ms);
        }
    }

    fn elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.gates.race_start_epoch_ms)
    }

    /// Feed one position sample. Returns the event it triggered, if any.
    pub fn update(&mut self, lat: f64, lon: f64, gps_fix: bool, now_ms: u64) -> Option<TimerEvent> {
        let course = self.course?;
        if !gps_fix {
            return None;
        }

        let mut event = self.check_start_gate(&course, lat, lon, now_ms);

        if let (TrackType::Sprint, Some(finish)) = (course.track_type, course.finish) {
            if self.lap_stats.is_racing {
                let finished = self.check_finish_gate(&finish, lat, lon, now_ms);
                event = event.or(finished);
            }
        }

        self.tick(now_ms);
        event
    }

    fn check_start_gate(
        &mut self,
        course: &Course,
        lat: f64,
        lon: f64,
        now_ms: u64,
    ) -> Option<TimerEvent> {
        let distance_m = distance_to(lat, lon, &course.start);
        if distance_m >= self.trigger_radius_m {
            self.gates.inside_start_gate = false;
            return None;
        }
        if self.gates.inside_start_gate {
            return None;
        }
        self.gates.inside_start_gate = true;

        if self.lap_stats.is_racing && self.elapsed(now_ms) <= LAP_DEBOUNCE_MS {
            debug!(
                "Start gate re-entered {}ms after start, ignoring",
                self.elapsed(now_ms)
            );
            return None;
        }

        let event = if self.lap_stats.is_racing && course.track_type == TrackType::Circuit {
            let lap_time_ms = self.elapsed(now_ms);
            info!("Lap completed in {}ms (gate distance {:.2}m)", lap_time_ms, distance_m);
            self.lap_stats.last_lap_time_ms = lap_time_ms;
            TimerEvent::LapCompleted {
                lap_time_ms,
                distance_m,
            }
        } else {
            info!("Start gate triggered (distance {:.2}m)", distance_m);
            TimerEvent::StartTriggered { distance_m }
        };

        self.lap_stats.is_racing = true;
        self.lap_stats.current_lap_time_ms = 0;
        self.gates.race_start_epoch_ms = now_ms;
        Some(event)
    }

    fn check_finish_gate(
        &mut self,
        finish: &GeoPoint,
        lat: f64,
        lon: f64,
        now_ms: u64,
    ) -> Option<TimerEvent> {
        let distance_m = distance_to(lat, lon, finish);
        let elapsed = self.elapsed(now_ms);
        if distance_m >= self.trigger_radius_m || elapsed <= MIN_SPRINT_DURATION_MS {
            self.gates.inside_finish_gate = false;
            return None;
        }
        if self.gates.inside_finish_gate {
            return None;
        }
        self.gates.inside_finish_gate = true;

        info!("Finish gate triggered after {}ms (distance {:.2}m)", elapsed, distance_m);
        self.freeze(elapsed);
        Some(TimerEvent::FinishTriggered {
            final_time_ms: elapsed,
            distance_m,
        })
    }

    fn freeze(&mut self, elapsed: u64) {
        self.lap_stats = LapStats {
            is_racing: false,
            current_lap_time_ms: elapsed,
            last_lap_time_ms: elapsed,
        };
    }

    /// Start racing now regardless of gate state. Gate flags are untouched.
    pub fn manual_start(&mut self, now_ms: u64) {
        self.gates.race_start_epoch_ms = now_ms;
        self.lap_stats.is_racing = true;
        self.lap_stats.current_lap_time_ms = 0;
    }

    /// Stop a running race and freeze its time. Returns the final time, or
    /// `None` when no race was running.
    pub fn manual_stop(&mut self, now_ms: u64) -> Option<u64> {
        if !self.lap_stats.is_racing {
            return None;
        }
        let elapsed = self.elapsed(now_ms);
        self.freeze(elapsed);
        Some(elapsed)
    }
}
