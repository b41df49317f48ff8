//! Playback pipeline
//!
//! Streams an existing WAV file from a given window onward to the output
//! device, posting one `Played` event per window so the session can advance
//! the pivot. End of file posts `Finished`.

use crossbeam::channel::Sender;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::device::OutputDevice;
use super::wav::read_window;
use super::{PipelineEvent, PipelineEventKind};
use crate::error::{FileError, PipelineError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub windows: u64,
    /// The file ran out before the worker was stopped
    pub finished: bool,
    pub failed: bool,
}

/// What a playback worker reads and whom it reports to
pub struct PlaybackSource {
    pub file: File,
    pub path: PathBuf,
    /// Byte offset of the first window to play
    pub offset: u64,
    pub window_bytes: usize,
    /// Rate multiplier the device was opened with
    pub device_speed: f32,
    pub events: Sender<PipelineEvent>,
    pub generation: u64,
}

/// Playback worker manager
pub struct AudioPlayer {
    is_running: Arc<AtomicBool>,
    /// Requested rate multiplier as `f32` bits
    speed: Arc<AtomicU32>,
    thread_handle: Option<JoinHandle<PlaybackStats>>,
}

impl AudioPlayer {
    pub fn new(speed: f32) -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            speed: Arc::new(AtomicU32::new(speed.to_bits())),
            thread_handle: None,
        }
    }

    /// Check if playback is running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed.load(Ordering::SeqCst))
    }

    /// Change the rate multiplier; a running worker applies it before its next window
    pub fn set_speed(&self, speed: f32) {
        self.speed.store(speed.to_bits(), Ordering::SeqCst);
    }

    /// Start playback of `source`, stopping any previous playback first
    pub fn start(&mut self, device: Box<dyn OutputDevice>, source: PlaybackSource) {
        if self.thread_handle.is_some() {
            log::debug!("Stopping previous playback before starting a new one");
            self.stop();
        }

        self.is_running.store(true, Ordering::SeqCst);
        let is_running = self.is_running.clone();
        let speed = self.speed.clone();

        let handle = thread::spawn(move || {
            let stats = run_playback_loop(device, source, &is_running, &speed);
            is_running.store(false, Ordering::SeqCst);
            stats
        });

        self.thread_handle = Some(handle);
    }

    /// Stop playback and wait for the worker
    ///
    /// Returns `None` when nothing was playing.
    pub fn stop(&mut self) -> Option<PlaybackStats> {
        self.is_running.store(false, Ordering::SeqCst);
        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                log::error!("Playback thread panicked");
                Some(PlaybackStats {
                    failed: true,
                    ..PlaybackStats::default()
                })
            }
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_playback_loop(
    mut device: Box<dyn OutputDevice>,
    source: PlaybackSource,
    is_running: &AtomicBool,
    speed: &AtomicU32,
) -> PlaybackStats {
    let PlaybackSource {
        mut file,
        path,
        offset,
        window_bytes,
        device_speed,
        events,
        generation,
    } = source;

    let mut stats = PlaybackStats::default();
    let mut failure: Option<PipelineError> = None;
    let mut applied_speed = device_speed;
    let mut buffer = vec![0u8; window_bytes];

    match file.seek(SeekFrom::Start(offset)) {
        Err(source) => {
            failure = Some(
                FileError::Seek {
                    path: path.clone(),
                    source,
                }
                .into(),
            )
        }
        Ok(_) => {
            while is_running.load(Ordering::SeqCst) {
                let read = match read_window(&mut file, &mut buffer) {
                    Ok(read) => read,
                    Err(source) => {
                        failure = Some(
                            FileError::Read {
                                path: path.clone(),
                                source,
                            }
                            .into(),
                        );
                        break;
                    }
                };
                if read == 0 {
                    stats.finished = true;
                    break;
                }

                let requested = f32::from_bits(speed.load(Ordering::SeqCst));
                if requested != applied_speed {
                    if let Err(e) = device.set_speed(requested) {
                        log::error!("Failed to apply playback speed {}: {}", requested, e);
                        failure = Some(e.into());
                        break;
                    }
                    log::debug!("Playback speed {} -> {}", applied_speed, requested);
                    applied_speed = requested;
                }

                if let Err(e) = device.write(&buffer[..read]) {
                    log::error!("Playback write failed: {}", e);
                    failure = Some(e.into());
                    break;
                }
                stats.windows += 1;

                let event = PipelineEvent {
                    generation,
                    kind: PipelineEventKind::Played,
                };
                if events.send(event).is_err() {
                    log::warn!("Session went away; stopping playback");
                    break;
                }
            }
        }
    }

    device.release();

    let terminal = match failure {
        Some(error) => {
            stats.failed = true;
            Some(PipelineEventKind::Failed(error))
        }
        None if stats.finished => Some(PipelineEventKind::Finished),
        None => None,
    };
    if let Some(kind) = terminal {
        let _ = events.send(PipelineEvent { generation, kind });
    }

    log::debug!(
        "Playback of {} ended after {} windows",
        path.display(),
        stats.windows
    );
    stats
}
