//! Audio I/O for recordings
//!
//! This module provides:
//! - The 16-bit PCM WAV codec with deferred header patching
//! - Device seams, plus a simulated backend and an optional PipeWire one
//! - Capture and playback workers reporting to the session over a channel

mod capture;
pub mod device;
mod playback;
#[cfg(feature = "pipewire")]
mod pipewire;
pub mod wav;

pub use capture::{AudioCapture, CaptureTarget};
pub use device::{AudioBackend, SimulatedBackend};
pub use playback::{AudioPlayer, PlaybackSource};
#[cfg(feature = "pipewire")]
pub use pipewire::PipeWireBackend;

use crate::error::PipelineError;

/// Something a pipeline worker reports to the session
#[derive(Debug)]
pub enum PipelineEventKind {
    /// A window was written to the file; carries its peak magnitude
    Captured { magnitude: u16 },
    /// A window was handed to the output device
    Played,
    /// Playback reached the end of the file
    Finished,
    /// The worker stopped on an error
    Failed(PipelineError),
}

/// A worker report tagged with the pipeline run that produced it
///
/// The session drops events whose generation is not the current one.
#[derive(Debug)]
pub struct PipelineEvent {
    pub generation: u64,
    pub kind: PipelineEventKind,
}
