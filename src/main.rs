use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, mpsc},
};

use clap::{Parser, Subcommand};
use itertools::Itertools;
use log::{info, warn};
use racebox::{
    AppSettings, Connection, EngineConfig, FileTrackStore, RaceEvent, RaceboxError, ReplayLink,
    SettingsStore, StorageRoots, TelemetryEngine, TelemetryOutput, TrackStore, list_sessions,
    track::track_name_from_path,
};

const APP_DIR_NAME: &str = "racebox";
const DEFAULT_CHUNK_BYTES: usize = 64;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Enable logging in release builds
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base directory for SavedTracks and RaceRecords
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed a raw capture of the device byte stream through the engine
    Replay {
        #[arg(short, long)]
        input: PathBuf,

        /// Track file to time against
        #[arg(short, long)]
        track: Option<PathBuf>,

        /// Gate trigger radius in meters
        #[arg(short, long)]
        radius: Option<f64>,

        /// Record a session for the whole replay
        #[arg(long)]
        record: bool,

        /// Bytes delivered per poll
        #[arg(short, long, default_value_t = DEFAULT_CHUNK_BYTES)]
        chunk: usize,
    },
    Tracks {
        #[command(subcommand)]
        command: TrackCommands,
    },
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand, Debug)]
enum TrackCommands {
    List,
    Show { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    List,
}

fn load_settings() -> AppSettings {
    match SettingsStore::from_config_dir() {
        Ok(store) => AppSettings::load(&store),
        Err(e) => {
            warn!("Using default settings: {}", e);
            AppSettings::default()
        }
    }
}

fn storage_roots(storage: Option<&Path>) -> Result<StorageRoots, RaceboxError> {
    if let Some(dir) = storage {
        return Ok(StorageRoots::single(dir.to_path_buf()));
    }
    let internal = dirs::data_local_dir()
        .ok_or(RaceboxError::NoConfigDir)?
        .join(APP_DIR_NAME);
    let external = dirs::document_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| internal.clone());
    Ok(StorageRoots { external, internal })
}

fn print_event(event: &RaceEvent) {
    match event {
        RaceEvent::StartTriggered { manual } => {
            println!("START{}", if *manual { " (manual)" } else { "" })
        }
        RaceEvent::LapCompleted { lap_time_ms } => {
            println!("LAP {:.3}s", *lap_time_ms as f64 / 1000.)
        }
        RaceEvent::FinishTriggered { final_time_ms, .. } => {
            println!("FINISH {:.3}s", *final_time_ms as f64 / 1000.)
        }
        RaceEvent::AuthAcknowledged => println!("Authenticated"),
        RaceEvent::PasswordChanged { .. } => println!("Device password updated"),
        RaceEvent::RecordingStarted { path } => println!("Recording to {}", path.display()),
        RaceEvent::RecordingStopped { path, record_count } => {
            println!("Recorded {} samples to {}", record_count, path.display())
        }
        RaceEvent::Disconnected => println!("Disconnected"),
    }
}

fn replay(
    input: &Path,
    track: Option<&Path>,
    radius: Option<f64>,
    record: bool,
    chunk: usize,
    roots: &StorageRoots,
) -> Result<(), RaceboxError> {
    if !input.is_file() {
        return Err(RaceboxError::InvalidCaptureFile {
            path: format!("{:?}", input),
        });
    }
    let capture = fs::read(input).map_err(|e| RaceboxError::FileOperationError {
        operation: "read_capture".to_string(),
        reason: e.to_string(),
    })?;

    let settings = load_settings();
    let mut engine = TelemetryEngine::new(EngineConfig::from_storage(&settings, roots));
    if let Some(radius) = radius {
        engine.set_trigger_radius(radius)?;
    }
    if let Some(track_path) = track {
        let store = FileTrackStore::new(roots.tracks_dir(settings.storage_location))?;
        engine.load_track(store.load(track_path)?);
    }

    let mut link = ReplayLink::new(capture, chunk);
    let events = if record {
        engine.toggle_roam_recording(&mut link, chrono::Local::now())?
    } else {
        engine.set_race_mode(true, &mut link)?
    };
    events.iter().for_each(print_event);

    let (sender, receiver) = mpsc::channel::<TelemetryOutput>();
    let mut connection = Connection::open(link, Arc::new(Mutex::new(engine)), sender);
    info!("Replaying {:?} in {} byte chunks", input, chunk);

    for output in receiver.iter() {
        match output {
            TelemetryOutput::Event(event) => {
                print_event(&event);
                if event == RaceEvent::Disconnected {
                    break;
                }
            }
            TelemetryOutput::Snapshot(snapshot) => println!(
                "{:>7.2} km/h  sats {:>2}  {:?}  lap {:.1}s  last {:.3}s",
                snapshot.telemetry.speed_kmh,
                snapshot.telemetry.satellites,
                snapshot.timer_state,
                snapshot.lap_stats.current_lap_time_ms as f64 / 1000.,
                snapshot.lap_stats.last_lap_time_ms as f64 / 1000.,
            ),
        }
    }
    connection.close();
    Ok(())
}

fn tracks(command: &TrackCommands, roots: &StorageRoots) -> Result<(), RaceboxError> {
    let settings = load_settings();
    let store = FileTrackStore::new(roots.tracks_dir(settings.storage_location))?;
    match command {
        TrackCommands::List => {
            for path in store.list()?.iter().sorted() {
                println!("{}\t{}", track_name_from_path(path), path.display());
            }
        }
        TrackCommands::Show { file } => {
            let track = store.load(file)?;
            println!("{} ({})", track.name, track.track_type.description());
            if let Some(created) = track.created {
                println!("  created: {}", created.to_rfc3339());
            }
            println!("  start:   {:.8}, {:.8}", track.start_line.lat, track.start_line.lon);
            let finish = track.finish_point();
            println!("  finish:  {:.8}, {:.8}", finish.lat, finish.lon);
            println!("  points:  {}", track.path.len());
        }
    }
    Ok(())
}

fn sessions(command: &SessionCommands, roots: &StorageRoots) -> Result<(), RaceboxError> {
    let settings = load_settings();
    match command {
        SessionCommands::List => {
            for path in list_sessions(&roots.records_dir(settings.storage_location))? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Args::parse();
    if cfg!(debug_assertions) || cli.verbose {
        colog::init();
    }

    ctrlc::set_handler(move || {
        println!("Exiting...");
        std::process::exit(0);
    })
    .expect("Could not set Ctrl-C handler");

    let result = storage_roots(cli.storage.as_deref()).and_then(|roots| match &cli.command {
        Commands::Replay {
            input,
            track,
            radius,
            record,
            chunk,
        } => replay(input, track.as_deref(), *radius, *record, *chunk, &roots),
        Commands::Tracks { command } => tracks(command, &roots),
        Commands::Sessions { command } => sessions(command, &roots),
    });
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
