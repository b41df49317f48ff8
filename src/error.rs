//! Error taxonomy shared by the codec, the pipelines and the session
//!
//! Device and file errors terminate the active pipeline. State errors are
//! logged and leave everything untouched.

use std::path::PathBuf;
use thiserror::Error;

use crate::state::{Command, TransportState};

/// Failure reported by an audio capture or output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device rejected the operation (invalid operation)")]
    InvalidOperation,
    #[error("device rejected the arguments (bad value)")]
    BadValue,
    #[error("device is gone (dead object)")]
    DeadObject,
}

/// Failure touching a recording on disk
#[derive(Debug, Error)]
pub enum FileError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to seek in {path}: {source}")]
    Seek {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid wav header in {path}: {detail}")]
    Header { path: PathBuf, detail: String },
}

/// A transport command that is not legal in the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {command:?} while {state:?}")]
pub struct StateError {
    pub state: TransportState,
    pub command: Command,
}

/// Failure inside a capture or playback worker
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    File(#[from] FileError),
}

/// Anything a session operation can fail with
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Recording name must not be blank")]
    BlankName,
    #[error("A recording named {0} already exists")]
    NameTaken(String),
    #[error("Unsupported playback speed {0}")]
    InvalidSpeed(f32),
    #[error("Nothing has been recorded")]
    NothingRecorded,
}

impl From<PipelineError> for SessionError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Device(e) => SessionError::Device(e),
            PipelineError::File(e) => SessionError::File(e),
        }
    }
}
