//! Capture pipeline
//!
//! A dedicated worker reads fixed-size windows from the capture device,
//! appends them to the open WAV file and posts each window's peak to the
//! session. At most one capture runs at a time.

use crossbeam::channel::Sender;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::device::CaptureDevice;
use super::wav::decode_samples;
use super::{PipelineEvent, PipelineEventKind};
use crate::error::{FileError, PipelineError};
use crate::waveform::reduce;

/// What a finished capture worker did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub windows: u64,
    pub bytes: u64,
    /// The loop ended on a device or file error
    pub failed: bool,
}

/// Where a capture worker writes and whom it reports to
pub struct CaptureTarget {
    pub file: File,
    pub path: PathBuf,
    pub window_bytes: usize,
    pub events: Sender<PipelineEvent>,
    pub generation: u64,
}

/// Capture worker manager
pub struct AudioCapture {
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<CaptureStats>>,
}

impl AudioCapture {
    pub fn new() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Check if the worker is still looping
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Start capturing into `target`, stopping any previous capture first
    pub fn start(&mut self, device: Box<dyn CaptureDevice>, target: CaptureTarget) {
        if self.thread_handle.is_some() {
            log::debug!("Stopping previous capture before starting a new one");
            self.stop();
        }

        self.is_running.store(true, Ordering::SeqCst);
        let is_running = self.is_running.clone();

        let handle = thread::spawn(move || {
            let stats = run_capture_loop(device, target, &is_running);
            is_running.store(false, Ordering::SeqCst);
            stats
        });

        self.thread_handle = Some(handle);
    }

    /// Ask the worker to finish its current window and wait for it
    ///
    /// Returns `None` when no capture was started.
    pub fn stop(&mut self) -> Option<CaptureStats> {
        self.is_running.store(false, Ordering::SeqCst);
        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                log::error!("Capture thread panicked");
                Some(CaptureStats {
                    failed: true,
                    ..CaptureStats::default()
                })
            }
        }
    }
}

impl Default for AudioCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_error(path: &Path, source: std::io::Error) -> PipelineError {
    FileError::Write {
        path: path.to_path_buf(),
        source,
    }
    .into()
}

/// Read windows until stopped or until the device or file fails
fn run_capture_loop(
    mut device: Box<dyn CaptureDevice>,
    target: CaptureTarget,
    is_running: &AtomicBool,
) -> CaptureStats {
    let CaptureTarget {
        file,
        path,
        window_bytes,
        events,
        generation,
    } = target;

    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0u8; window_bytes];
    let mut stats = CaptureStats::default();
    let mut failure: Option<PipelineError> = None;

    while is_running.load(Ordering::SeqCst) {
        let read = match device.read(&mut buffer) {
            Ok(read) => read,
            Err(e) => {
                log::error!("Record failed: {}", e);
                failure = Some(e.into());
                break;
            }
        };
        if read == 0 {
            continue;
        }

        if let Err(source) = writer.write_all(&buffer[..read]) {
            failure = Some(write_error(&path, source));
            break;
        }
        stats.windows += 1;
        stats.bytes += read as u64;

        if let Some(magnitude) = reduce(&decode_samples(&buffer[..read])) {
            let event = PipelineEvent {
                generation,
                kind: PipelineEventKind::Captured { magnitude },
            };
            if events.send(event).is_err() {
                log::warn!("Session went away; stopping capture");
                break;
            }
        }
        log::trace!("Captured window {} ({} bytes)", stats.windows, read);
    }

    device.release();

    if let Err(source) = writer.flush() {
        failure.get_or_insert_with(|| write_error(&path, source));
    }

    if let Some(error) = failure {
        stats.failed = true;
        let _ = events.send(PipelineEvent {
            generation,
            kind: PipelineEventKind::Failed(error),
        });
    }

    log::debug!(
        "Capture finished: {} windows, {} bytes",
        stats.windows,
        stats.bytes
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::testing::ScriptedBackend;
    use crate::audio::wav::encode_samples;
    use crate::error::DeviceError;
    use crossbeam::channel::unbounded;
    use std::time::Duration;

    fn target(
        dir: &tempfile::TempDir,
        events: Sender<PipelineEvent>,
    ) -> (CaptureTarget, PathBuf) {
        let path = dir.path().join("capture.wav");
        let file = File::create(&path).unwrap();
        (
            CaptureTarget {
                file,
                path: path.clone(),
                window_bytes: 8,
                events,
                generation: 7,
            },
            path,
        )
    }

    #[test]
    fn test_windows_are_written_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new();
        backend.push_window(encode_samples(&[1, -300, 20, 4]));
        backend.push_window(encode_samples(&[0, 0, 0, 0]));
        backend.push_window(encode_samples(&[7, 7, -9000, 7]));

        let (tx, rx) = unbounded();
        let (target, path) = target(&dir, tx);
        let mut capture = AudioCapture::new();
        capture.start(Box::new(backend.input()), target);

        let mut magnitudes = Vec::new();
        for _ in 0..3 {
            let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(event.generation, 7);
            match event.kind {
                PipelineEventKind::Captured { magnitude } => magnitudes.push(magnitude),
                _ => panic!("unexpected event"),
            }
        }
        assert_eq!(magnitudes, vec![300, 0, 9000]);

        let stats = capture.stop().unwrap();
        assert_eq!(stats.windows, 3);
        assert_eq!(stats.bytes, 24);
        assert!(!stats.failed);
        assert!(!capture.is_running());
        assert_eq!(backend.probe.input_releases(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);

        assert!(capture.stop().is_none());
        assert_eq!(backend.probe.input_releases(), 1);
    }

    #[test]
    fn test_device_error_ends_loop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new();
        backend.push_window(encode_samples(&[5, 5, 5, 5]));
        backend.push_error(DeviceError::DeadObject);

        let (tx, rx) = unbounded();
        let (target, _path) = target(&dir, tx);
        let mut capture = AudioCapture::new();
        capture.start(Box::new(backend.input()), target);

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first.kind, PipelineEventKind::Captured { magnitude: 5 }));
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            second.kind,
            PipelineEventKind::Failed(PipelineError::Device(DeviceError::DeadObject))
        ));

        let stats = capture.stop().unwrap();
        assert!(stats.failed);
        assert_eq!(stats.windows, 1);
        assert_eq!(backend.probe.input_releases(), 1);
    }

    #[test]
    fn test_restart_joins_previous_worker() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new();
        let (tx, _rx) = unbounded();
        let mut capture = AudioCapture::new();

        let (first, _) = target(&dir, tx.clone());
        capture.start(Box::new(backend.input()), first);
        let (second, _) = target(&dir, tx);
        capture.start(Box::new(backend.input()), second);
        assert_eq!(backend.probe.input_releases(), 1);

        capture.stop();
        assert_eq!(backend.probe.input_releases(), 2);
    }
}
