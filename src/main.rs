//! Wavrec - A voice recorder with a scrubbable, overwritable waveform
//!
//! This is the main entry point for the Wavrec command-line application.

mod audio;
mod cli;
mod error;
mod models;
mod recordings;
mod settings;
mod shell;
mod state;
mod waveform;

use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::Path;

use cli::Commands;
use models::format_timer;
use recordings::RecordingStore;
use settings::{DconfSettings, SettingsStore};
use shell::ConsoleObserver;
use state::{Session, SessionConfig};
use waveform::AmplitudeReducer;

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    info!("Starting Wavrec");

    let store = match &args.dir {
        Some(dir) => RecordingStore::new().with_recordings_dir(dir),
        None => RecordingStore::new(),
    };

    match &args.command {
        Commands::Record => record(&args, &store),
        Commands::Play { file } => play(&args, &store, file),
        Commands::List { json } => list(&store, *json),
        Commands::Repair { file } => repair(file),
        Commands::Delete { file } => delete(&store, file),
    }
}

fn session_config(args: &cli::Args, settings: &dyn SettingsStore) -> SessionConfig {
    SessionConfig {
        audio: args.audio_config(),
        waveform: args.waveform_config(),
        speed: settings.playback_speed(),
    }
}

fn max_height(config: &SessionConfig) -> f32 {
    AmplitudeReducer::new(&config.waveform, config.audio.update_interval_millis()).max_chunk_height()
}

fn record(args: &cli::Args, store: &RecordingStore) -> anyhow::Result<()> {
    store
        .ensure_dir()
        .context("Failed to create recordings directory")?;

    let mut settings = DconfSettings;
    let config = session_config(args, &settings);
    let backend = args.open_backend()?;
    let observer = ConsoleObserver::new(config.audio.update_interval_millis());

    let mut session = Session::recorder(store.generate_path(), backend, config, Box::new(observer));
    shell::run(&mut session, store, &mut settings, max_height(&config))
}

fn play(args: &cli::Args, store: &RecordingStore, file: &str) -> anyhow::Result<()> {
    let path = store.resolve(file);
    let mut settings = DconfSettings;
    let config = session_config(args, &settings);
    let backend = args.open_backend()?;
    let observer = ConsoleObserver::new(config.audio.update_interval_millis());

    let mut session = Session::open_player(path.clone(), backend, config, Box::new(observer))
        .with_context(|| format!("Failed to open {}", path.display()))?;
    shell::run(&mut session, store, &mut settings, max_height(&config))
}

fn list(store: &RecordingStore, json: bool) -> anyhow::Result<()> {
    let recordings = store.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recordings)?);
        return Ok(());
    }

    if recordings.is_empty() {
        println!("No recordings in {}", store.recordings_dir().display());
        return Ok(());
    }
    for recording in &recordings {
        println!(
            "{:<40} {}  {}{}",
            recording.name,
            format_timer(recording.duration_millis),
            recording.modified.format("%Y-%m-%d %H:%M"),
            if recording.complete { "" } else { "  (incomplete)" }
        );
    }
    Ok(())
}

fn repair(file: &Path) -> anyhow::Result<()> {
    let (riff_size, data_size) = audio::wav::patch_header(file)?;
    println!(
        "Patched {}: riff size {}, data size {}",
        file.display(),
        riff_size,
        data_size
    );
    Ok(())
}

fn delete(store: &RecordingStore, file: &str) -> anyhow::Result<()> {
    let path = store.resolve(file);
    if store.delete(&path)? {
        println!("Deleted {}", path.display());
    } else {
        println!("No recording at {}", path.display());
    }
    Ok(())
}
