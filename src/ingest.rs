// Background poll loop moving bytes from the device link into the engine

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::Local;
use log::{debug, info, warn};

use crate::{
    RaceboxError,
    device::{CommandSink, DeviceCommand, DeviceLink},
    engine::TelemetryEngine,
    telemetry::{RaceEvent, TelemetryOutput},
};

pub const POLL_INTERVAL_MS: u64 = 30;
/// The device ignores a key sent too soon after connecting, so it is sent twice
pub const AUTH_DELAYS_MS: [u64; 2] = [1_500, 2_500];

#[derive(Debug, Clone)]
pub struct ConnectionTiming {
    pub poll_interval: Duration,
    pub auth_delays: Vec<Duration>,
}

impl Default for ConnectionTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            auth_delays: AUTH_DELAYS_MS.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }
}

/// A poisoned lock only means another thread panicked mid-update; the state
/// is still the best we have.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Shared<L> {
    engine: Arc<Mutex<TelemetryEngine>>,
    link: Arc<Mutex<L>>,
    outputs: Sender<TelemetryOutput>,
    stop: AtomicBool,
    torn_down: AtomicBool,
}

impl<L: DeviceLink> Shared<L> {
    fn publish(&self, outputs: impl IntoIterator<Item = TelemetryOutput>) -> bool {
        for output in outputs {
            if self.outputs.send(output).is_err() {
                debug!("Telemetry receiver dropped");
                return false;
            }
        }
        true
    }

    /// Reset the engine and drop the link. Runs once, whoever gets here first.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let events = lock(&self.engine).disconnect();
        lock(&self.link).disconnect();
        self.publish(events.into_iter().map(TelemetryOutput::Event));
    }

    fn send_auth(&self) {
        let mut engine = lock(&self.engine);
        let mut link = lock(&self.link);
        if let Err(e) = engine.authenticate(&mut *link) {
            warn!("Could not send authentication key: {}", e);
        }
    }

    /// One poll tick. Errors mean the link is gone.
    fn poll_once(&self) -> Result<Vec<TelemetryOutput>, RaceboxError> {
        let bytes = {
            let mut link = lock(&self.link);
            if !link.is_connected() {
                return Err(RaceboxError::NotConnected);
            }
            if link.available()? == 0 {
                return Ok(Vec::new());
            }
            link.read()?
        };
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(lock(&self.engine).process(&bytes, Local::now()))
    }

    fn run(&self, timing: &ConnectionTiming) {
        let connected_at = Instant::now();
        let mut auth_sent = 0;

        while !self.stop.load(Ordering::SeqCst) {
            thread::sleep(timing.poll_interval);
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            while timing
                .auth_delays
                .get(auth_sent)
                .is_some_and(|delay| connected_at.elapsed() >= *delay)
            {
                auth_sent += 1;
                debug!("Sending authentication key (attempt {})", auth_sent);
                self.send_auth();
            }

            match self.poll_once() {
                Ok(outputs) => {
                    if !self.publish(outputs) {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Device link lost: {}", e);
                    self.teardown();
                    break;
                }
            }
        }
        debug!("Poll loop stopped");
    }
}

/// A live link being polled on a background thread. Outputs arrive on the
/// channel given to [`Connection::open`]. Dropping the connection closes it.
pub struct Connection<L: DeviceLink + Send + 'static> {
    shared: Arc<Shared<L>>,
    handle: Option<JoinHandle<()>>,
}

impl<L: DeviceLink + Send + 'static> Connection<L> {
    pub fn open(
        link: L,
        engine: Arc<Mutex<TelemetryEngine>>,
        outputs: Sender<TelemetryOutput>,
    ) -> Self {
        Self::open_with_timing(link, engine, outputs, ConnectionTiming::default())
    }

    pub fn open_with_timing(
        link: L,
        engine: Arc<Mutex<TelemetryEngine>>,
        outputs: Sender<TelemetryOutput>,
        timing: ConnectionTiming,
    ) -> Self {
        let shared = Arc::new(Shared {
            engine,
            link: Arc::new(Mutex::new(link)),
            outputs,
            stop: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        });

        info!("Device connected, polling every {:?}", timing.poll_interval);
        let poll_shared = shared.clone();
        let handle = thread::spawn(move || poll_shared.run(&timing));

        Self {
            shared,
            handle: Some(handle),
        }
    }

    pub fn engine(&self) -> Arc<Mutex<TelemetryEngine>> {
        self.shared.engine.clone()
    }

    pub fn link(&self) -> Arc<Mutex<L>> {
        self.shared.link.clone()
    }

    /// Whether the poll thread is still running
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Write a raw command on the link
    pub fn send(&self, command: &DeviceCommand) -> Result<(), RaceboxError> {
        lock(&self.shared.link).send_command(command)
    }

    /// Run an engine operation that needs to talk to the device, holding both
    /// locks in the same order as the poll thread
    pub fn control<R>(&self, operation: impl FnOnce(&mut TelemetryEngine, &mut L) -> R) -> R {
        let mut engine = lock(&self.shared.engine);
        let mut link = lock(&self.shared.link);
        operation(&mut *engine, &mut *link)
    }

    /// Stop and join the poll thread, then reset the engine and disconnect
    /// the link. Safe to call more than once.
    pub fn close(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Poll thread panicked");
            }
            self.shared.teardown();
            info!("Device connection closed");
        }
    }
}

impl<L: DeviceLink + Send + 'static> Drop for Connection<L> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Events among `outputs`, snapshots skipped
pub fn race_events(outputs: &[TelemetryOutput]) -> impl Iterator<Item = &RaceEvent> {
    outputs.iter().filter_map(|output| match output {
        TelemetryOutput::Event(event) => Some(event),
        TelemetryOutput::Snapshot(_) => None,
    })
}
