//! Command-line interface for Wavrec
//!
//! Handles argument parsing and logging configuration.

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::{AudioBackend, SimulatedBackend};
use crate::models::{AudioConfig, WaveformConfig};

/// Wavrec - Voice recorder with a scrubbable, overwritable waveform
#[derive(Parser, Debug)]
#[command(name = "wavrec")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = all deps
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Recordings directory (defaults to the local data dir)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Audio device backend
    #[arg(long, value_enum, default_value_t = BackendKind::Simulated, global = true)]
    pub backend: BackendKind,

    /// Capture sample rate in Hz
    #[arg(
        long,
        default_value_t = 44100,
        value_parser = clap::value_parser!(u32).range(1000..=384_000),
        global = true
    )]
    pub sample_rate: u32,

    /// Bytes per capture/playback window (one waveform chunk); a positive even number
    #[arg(long, default_value_t = 3528, value_parser = parse_buffer_size, global = true)]
    pub buffer_size: usize,

    /// Smooth jumps between neighbouring chunks (default)
    #[arg(long, overrides_with = "no_smooth", global = true)]
    pub smooth: bool,

    /// Draw raw chunk heights
    #[arg(long, overrides_with = "smooth", global = true)]
    pub no_smooth: bool,

    /// Height of the waveform view the chunks are scaled into
    #[arg(long, default_value_t = 120.0, global = true)]
    pub view_height: f32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a new take, driven by commands on stdin
    Record,
    /// Play an existing recording, by path or by saved name
    Play { file: String },
    /// List recordings, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Patch the header of a recording that never stopped cleanly
    Repair { file: PathBuf },
    /// Delete a recording, by path or by saved name
    Delete { file: String },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Synthetic tone in, silence out, paced in real time
    Simulated,
    /// PipeWire microphone and speakers
    Pipewire,
}

/// Windows hold whole 16-bit samples, so the size must be even
fn parse_buffer_size(value: &str) -> Result<usize, String> {
    let size: usize = value
        .parse()
        .map_err(|_| format!("`{}` is not a byte count", value))?;
    if size == 0 || size % 2 != 0 {
        return Err(format!("buffer size must be a positive even number, got {}", size));
    }
    Ok(size)
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate_hz: self.sample_rate,
            buffer_size_bytes: self.buffer_size,
            ..AudioConfig::default()
        }
    }

    pub fn waveform_config(&self) -> WaveformConfig {
        WaveformConfig {
            view_height: self.view_height,
            smooth_transition: self.smooth || !self.no_smooth,
            ..WaveformConfig::default()
        }
    }

    /// Build the selected device backend
    pub fn open_backend(&self) -> anyhow::Result<Arc<dyn AudioBackend>> {
        match self.backend {
            BackendKind::Simulated => Ok(Arc::new(SimulatedBackend { pace: true })),
            #[cfg(feature = "pipewire")]
            BackendKind::Pipewire => Ok(Arc::new(crate::audio::PipeWireBackend)),
            #[cfg(not(feature = "pipewire"))]
            BackendKind::Pipewire => {
                anyhow::bail!("wavrec was built without PipeWire support (enable the `pipewire` feature)")
            }
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    // Set wavrec modules to requested verbosity level
    builder.filter_module("wavrec", args.log_level());

    // Audio stack internals only at -vvvv
    if args.verbose >= 4 {
        builder.filter_module("pipewire", args.log_level());
        builder.filter_module("hound", args.log_level());
    }

    builder.format_timestamp_millis().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        let args = Args::parse_from(["wavrec", "-vv", "list"]);
        assert_eq!(args.log_level(), LevelFilter::Debug);
        let args = Args::parse_from(["wavrec", "list", "-q"]);
        assert_eq!(args.log_level(), LevelFilter::Error);
    }

    #[test]
    fn test_audio_flags() {
        let args = Args::parse_from([
            "wavrec",
            "--sample-rate",
            "16000",
            "--buffer-size",
            "1280",
            "--no-smooth",
            "record",
        ]);
        let audio = args.audio_config();
        assert_eq!(audio.sample_rate_hz, 16000);
        assert_eq!(audio.update_interval_millis(), 40);
        assert!(!args.waveform_config().smooth_transition);
        assert!(matches!(args.command, Commands::Record));
    }

    #[test]
    fn test_rejects_unusable_audio_flags() {
        assert!(Args::try_parse_from(["wavrec", "--sample-rate", "0", "record"]).is_err());
        assert!(Args::try_parse_from(["wavrec", "--buffer-size", "0", "record"]).is_err());
        assert!(Args::try_parse_from(["wavrec", "--buffer-size", "1001", "record"]).is_err());
        assert!(Args::try_parse_from(["wavrec", "--buffer-size", "-4", "record"]).is_err());
        assert!(Args::try_parse_from(["wavrec", "--buffer-size", "1000", "record"]).is_ok());
    }

    #[test]
    fn test_delete_subcommand() {
        let args = Args::parse_from(["wavrec", "delete", "memo"]);
        match args.command {
            Commands::Delete { file } => assert_eq!(file, "memo"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_smoothing_defaults_on() {
        let args = Args::parse_from(["wavrec", "play", "memo"]);
        assert!(args.waveform_config().smooth_transition);
        assert_eq!(args.backend, BackendKind::Simulated);
        match args.command {
            Commands::Play { file } => assert_eq!(file, "memo"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
