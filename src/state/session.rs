//! Recording/playback session
//!
//! The session is the only place that mutates the timeline. Pipeline
//! workers report over a channel and the session applies their events on
//! the caller's thread, so user input and pipeline progress never race.
//!
//! Leaving an active state stops and joins the worker, then applies every
//! event it had already posted. Events from older pipeline runs are dropped
//! by generation.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::transport::{Activity, Command, RecordMode, Transition, Transport, TransportState};
use crate::audio::wav::{self, decode_samples, read_window, HEADER_LEN};
use crate::audio::{
    AudioBackend, AudioCapture, AudioPlayer, CaptureTarget, PipelineEvent, PipelineEventKind,
    PlaybackSource,
};
use crate::error::{FileError, PipelineError, SessionError, StateError};
use crate::models::{AudioConfig, WaveformConfig, DEFAULT_PLAYBACK_SPEED};
use crate::recordings::RecordingStore;
use crate::settings::is_supported_speed;
use crate::waveform::{AmplitudeReducer, SectionMarkers, Timeline};

/// Notifications for whatever renders the session
///
/// Called on the session's thread, never from a pipeline worker.
pub trait SessionObserver {
    fn on_chunk_appended(&mut self, _height: f32) {}
    fn on_pivot_changed(&mut self, _pivot: usize) {}
    fn on_transport_state_changed(&mut self, _state: TransportState) {}
    fn on_pipeline_error(&mut self, _error: &PipelineError) {}
}

/// Observer that ignores everything
pub struct NullObserver;

impl SessionObserver for NullObserver {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub audio: AudioConfig,
    pub waveform: WaveformConfig,
    pub speed: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            waveform: WaveformConfig::default(),
            speed: DEFAULT_PLAYBACK_SPEED,
        }
    }
}

/// Snapshot for status lines
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStatus {
    pub state: TransportState,
    pub pivot: usize,
    pub chunks: usize,
    pub elapsed_millis: u64,
    pub total_millis: u64,
    pub sections: SectionMarkers,
    pub speed: f32,
    pub overwriting: bool,
}

pub struct Session {
    transport: Transport,
    timeline: Timeline,
    reducer: AmplitudeReducer,
    audio: AudioConfig,
    backend: Arc<dyn AudioBackend>,
    path: PathBuf,
    capture: AudioCapture,
    player: AudioPlayer,
    /// Set while a capture worker feeds the timeline
    capture_mode: Option<RecordMode>,
    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
    generation: u64,
    observer: Box<dyn SessionObserver>,
}

impl Session {
    fn new(
        activity: Activity,
        path: PathBuf,
        backend: Arc<dyn AudioBackend>,
        config: SessionConfig,
        observer: Box<dyn SessionObserver>,
    ) -> Self {
        let interval = config.audio.update_interval_millis();
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            transport: Transport::new(activity),
            timeline: Timeline::new(interval),
            reducer: AmplitudeReducer::new(&config.waveform, interval),
            audio: config.audio,
            backend,
            path,
            capture: AudioCapture::new(),
            player: AudioPlayer::new(config.speed),
            capture_mode: None,
            events_tx,
            events_rx,
            generation: 0,
            observer,
        }
    }

    /// A recording session writing its take to `path`
    pub fn recorder(
        path: PathBuf,
        backend: Arc<dyn AudioBackend>,
        config: SessionConfig,
        observer: Box<dyn SessionObserver>,
    ) -> Self {
        log::info!(
            "Recorder session on {} using {} backend",
            path.display(),
            backend.name()
        );
        Self::new(Activity::Recorder, path, backend, config, observer)
    }

    /// A playback session over an existing recording, with its waveform preloaded
    pub fn open_player(
        path: PathBuf,
        backend: Arc<dyn AudioBackend>,
        mut config: SessionConfig,
        observer: Box<dyn SessionObserver>,
    ) -> Result<Self, SessionError> {
        let header = wav::read_header(&path)?;
        if header.format.bit_depth != 16 || header.format.channels != 1 {
            return Err(FileError::Header {
                path,
                detail: format!(
                    "only 16-bit mono is supported, found {}-bit with {} channels",
                    header.format.bit_depth, header.format.channels
                ),
            }
            .into());
        }
        config.audio.sample_rate_hz = header.format.sample_rate_hz;
        if !header.is_patched() {
            log::warn!("{} was never finalized; playing what is there", path.display());
        }

        let mut session = Self::new(Activity::Player, path, backend, config, observer);
        let heights = load_chunk_heights(
            &session.path,
            session.audio.buffer_size_bytes,
            &session.reducer,
        )?;
        log::info!(
            "Loaded {} chunks from {}",
            heights.len(),
            session.path.display()
        );
        session.timeline.preload(heights);
        Ok(session)
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn activity(&self) -> Activity {
        self.transport.activity()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// File the session records into or plays from
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn audio_config(&self) -> &AudioConfig {
        &self.audio
    }

    pub fn speed(&self) -> f32 {
        self.player.speed()
    }

    /// Another handle on the pipeline event queue, for select loops
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events_rx.clone()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            pivot: self.timeline.pivot(),
            chunks: self.timeline.len(),
            elapsed_millis: self.timeline.elapsed_time(),
            total_millis: self.timeline.total_time(),
            sections: self.timeline.sections(),
            speed: self.speed(),
            overwriting: self.timeline.is_overwriting(),
        }
    }

    /// Record button: start, pause, or resume (overwriting from the pivot)
    pub fn record(&mut self) -> Result<(), SessionError> {
        self.dispatch(Command::Record)
    }

    /// Play button: start or pause playback
    pub fn play(&mut self) -> Result<(), SessionError> {
        self.dispatch(Command::Play)
    }

    pub fn stop(&mut self) -> Result<(), SessionError> {
        self.dispatch(Command::Stop)
    }

    /// Finger down on the waveform
    pub fn begin_drag(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_playing() {
            return self.dispatch(Command::DragStart);
        }
        if state.is_recording() {
            return Err(StateError {
                state,
                command: Command::DragStart,
            }
            .into());
        }
        Ok(())
    }

    /// Scrub by `delta` chunks; returns the new pivot
    pub fn drag_by(&mut self, delta: i64) -> Result<usize, SessionError> {
        let state = self.state();
        if state.is_active() {
            return Err(StateError {
                state,
                command: Command::DragStart,
            }
            .into());
        }
        self.timeline.shift(delta);
        let pivot = self.timeline.pivot();
        self.observer.on_pivot_changed(pivot);
        Ok(pivot)
    }

    /// Finger up: playback resumes unless the pivot was left at the end
    pub fn end_drag(&mut self) -> Result<(), SessionError> {
        if self.state() != TransportState::DragWhilePlaying {
            return Ok(());
        }
        let at_end = self.timeline.is_at_end();
        self.dispatch(Command::DragEnd { at_end })
    }

    /// Jump to chunk `index`, clamped; returns the applied pivot
    pub fn seek(&mut self, index: usize) -> Result<usize, SessionError> {
        self.begin_drag()?;
        let pivot = self.timeline.set_pivot(index);
        self.observer.on_pivot_changed(pivot);
        self.end_drag()?;
        Ok(pivot)
    }

    pub fn select_section(&mut self) -> SectionMarkers {
        self.timeline.select_section();
        self.timeline.sections()
    }

    /// Change playback speed; a running playback picks it up on its next window
    pub fn set_speed(&mut self, speed: f32) -> Result<(), SessionError> {
        if !is_supported_speed(speed) {
            return Err(SessionError::InvalidSpeed(speed));
        }
        log::info!("Playback speed set to {}", speed);
        self.player.set_speed(speed);
        Ok(())
    }

    /// Apply one pipeline report
    pub fn handle_event(&mut self, event: PipelineEvent) {
        if event.generation != self.generation {
            log::trace!(
                "Dropping event from pipeline run {} (current {})",
                event.generation,
                self.generation
            );
            return;
        }
        match event.kind {
            PipelineEventKind::Captured { magnitude } => self.apply_captured(magnitude),
            PipelineEventKind::Played => self.apply_played(),
            PipelineEventKind::Finished => self.complete(Command::PlaybackFinished),
            PipelineEventKind::Failed(error) => {
                log::error!("Pipeline failed: {}", error);
                self.observer.on_pipeline_error(&error);
                self.complete(Command::PipelineFailed);
            }
        }
    }

    /// Wait up to `timeout` for one pipeline event; true if one was applied
    pub fn wait_event(&mut self, timeout: Duration) -> bool {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Apply every event already queued; returns how many there were
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Finalize the take and keep it as `name`, then start a fresh take
    pub fn save(&mut self, store: &RecordingStore, name: &str) -> Result<PathBuf, SessionError> {
        self.require_recorder(Command::Reset)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::BlankName);
        }
        if self.timeline.is_empty() {
            return Err(SessionError::NothingRecorded);
        }
        if store.exists(name) {
            return Err(SessionError::NameTaken(name.to_string()));
        }

        self.settle()?;
        wav::patch_header(&self.path)?;
        let saved = store.rename_to(&self.path, name)?;
        self.reset(store.generate_path())?;
        Ok(saved)
    }

    /// Throw the take away and start a fresh one
    pub fn discard(&mut self, store: &RecordingStore) -> Result<(), SessionError> {
        self.require_recorder(Command::Reset)?;
        self.settle()?;
        store.delete(&self.path)?;
        self.reset(store.generate_path())
    }

    /// Stop whatever is running; headers of clean captures end up patched
    pub fn shutdown(&mut self) {
        if let Err(e) = self.settle() {
            log::error!("Failed to stop session cleanly: {}", e);
        }
    }

    fn require_recorder(&self, command: Command) -> Result<(), SessionError> {
        if self.activity() == Activity::Recorder {
            Ok(())
        } else {
            Err(StateError {
                state: self.state(),
                command,
            }
            .into())
        }
    }

    /// Bring an active or dragging session to a stop
    fn settle(&mut self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_active() || state == TransportState::DragWhilePlaying {
            self.stop()?;
        }
        Ok(())
    }

    fn reset(&mut self, path: PathBuf) -> Result<(), SessionError> {
        let transition = self.transport.apply(Command::Reset)?;
        self.timeline.clear();
        self.path = path;
        self.observer.on_pivot_changed(0);
        self.enter(transition)
    }

    fn dispatch(&mut self, command: Command) -> Result<(), SessionError> {
        let transition = self.transport.apply(command)?;
        self.enter(transition)
    }

    /// Pipeline-driven transition; an illegal one was already logged
    fn complete(&mut self, command: Command) {
        if let Ok(transition) = self.transport.apply(command) {
            if let Err(e) = self.enter(transition) {
                log::error!("Failed to settle after {:?}: {}", command, e);
            }
        }
    }

    /// Side effects of leaving `transition.from` and entering `transition.to`
    fn enter(&mut self, transition: Transition) -> Result<(), SessionError> {
        match transition.from {
            TransportState::Recording(_) => self.halt_capture(),
            TransportState::Playing => self.halt_playback(),
            _ => {}
        }

        let started = match transition.to {
            TransportState::Recording(mode) => self.start_capture(transition.from, mode),
            TransportState::Playing => self.start_playback(),
            TransportState::PauseRecording | TransportState::StopRecording => {
                self.timeline.end_overwrite();
                Ok(())
            }
            _ => Ok(()),
        };
        self.observer.on_transport_state_changed(transition.to);

        match started {
            Ok(()) => Ok(()),
            Err(error) => {
                log::error!("Failed to start {:?}: {}", transition.to, error);
                self.observer.on_pipeline_error(&error);
                self.complete(Command::PipelineFailed);
                Err(error.into())
            }
        }
    }

    fn start_capture(&mut self, from: TransportState, mode: RecordMode) -> Result<(), PipelineError> {
        let window_bytes = self.audio.buffer_size_bytes;
        let file = match mode {
            RecordMode::Append if from == TransportState::Initialized || !self.path.exists() => {
                self.create_take()?
            }
            RecordMode::Append => self.open_take(SeekFrom::End(0))?,
            RecordMode::Overwrite => {
                self.timeline.begin_overwrite();
                // Resuming on the last chunk rewrites its window in the file while
                // the timeline appends after it, so that chunk keeps its old height.
                let offset = HEADER_LEN + (self.timeline.pivot() * window_bytes) as u64;
                self.open_take(SeekFrom::Start(offset))?
            }
        };
        let device = self.backend.open_input(&self.audio)?;

        self.generation += 1;
        self.capture_mode = Some(mode);
        self.capture.start(
            device,
            CaptureTarget {
                file,
                path: self.path.clone(),
                window_bytes,
                events: self.events_tx.clone(),
                generation: self.generation,
            },
        );
        Ok(())
    }

    fn start_playback(&mut self) -> Result<(), PipelineError> {
        if self.timeline.is_at_end() {
            self.timeline.set_pivot(0);
            self.observer.on_pivot_changed(0);
        }
        let window_bytes = self.audio.buffer_size_bytes;
        let offset = HEADER_LEN + (self.timeline.pivot() * window_bytes) as u64;

        let file = File::open(&self.path).map_err(|source| FileError::Open {
            path: self.path.clone(),
            source,
        })?;
        let speed = self.player.speed();
        let device = self.backend.open_output(&self.audio, speed)?;

        self.generation += 1;
        self.player.start(
            device,
            PlaybackSource {
                file,
                path: self.path.clone(),
                offset,
                window_bytes,
                device_speed: speed,
                events: self.events_tx.clone(),
                generation: self.generation,
            },
        );
        Ok(())
    }

    /// Stop the capture worker and fold in what it already captured
    fn halt_capture(&mut self) {
        let stats = self.capture.stop();
        self.drain_pending();
        self.capture_mode = None;

        match stats {
            Some(stats) if !stats.failed => {
                if let Err(e) = wav::patch_header(&self.path) {
                    log::error!("Failed to finalize header: {}", e);
                }
            }
            Some(_) => log::warn!(
                "Capture into {} failed; header left unpatched",
                self.path.display()
            ),
            None => {}
        }
    }

    fn halt_playback(&mut self) {
        if let Some(stats) = self.player.stop() {
            log::debug!(
                "Playback halted after {} windows (finished: {}, failed: {})",
                stats.windows,
                stats.finished,
                stats.failed
            );
        }
        self.drain_pending();
    }

    /// Apply data events of a just-joined worker; its terminal event is moot
    fn drain_pending(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            if event.generation != self.generation {
                continue;
            }
            match event.kind {
                PipelineEventKind::Captured { magnitude } => self.apply_captured(magnitude),
                PipelineEventKind::Played => self.apply_played(),
                PipelineEventKind::Finished => log::debug!("Playback reached the end while stopping"),
                PipelineEventKind::Failed(error) => {
                    log::warn!("Pipeline failed while stopping: {}", error);
                    self.observer.on_pipeline_error(&error);
                }
            }
        }
    }

    fn apply_captured(&mut self, magnitude: u16) {
        let Some(mode) = self.capture_mode else {
            return;
        };
        let overwriting = mode == RecordMode::Overwrite;
        let prior = self.timeline.smoothing_reference(overwriting);
        let height = self.reducer.chunk_height(magnitude, prior);
        if overwriting {
            self.timeline.overwrite(height);
        } else {
            self.timeline.append(height);
        }
        self.observer.on_chunk_appended(height);
        self.observer.on_pivot_changed(self.timeline.pivot());
    }

    fn apply_played(&mut self) {
        self.timeline.shift(1);
        self.observer.on_pivot_changed(self.timeline.pivot());
    }

    fn create_take(&self) -> Result<File, FileError> {
        let mut file = File::create(&self.path).map_err(|source| FileError::Open {
            path: self.path.clone(),
            source,
        })?;
        wav::write_header(&mut file, &self.audio.wav_format()).map_err(|source| {
            FileError::Write {
                path: self.path.clone(),
                source,
            }
        })?;
        log::debug!("Created {}", self.path.display());
        Ok(file)
    }

    fn open_take(&self, position: SeekFrom) -> Result<File, FileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| FileError::Open {
                path: self.path.clone(),
                source,
            })?;
        file.seek(position).map_err(|source| FileError::Seek {
            path: self.path.clone(),
            source,
        })?;
        Ok(file)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reduce every window of an existing recording to a chunk height
fn load_chunk_heights(
    path: &Path,
    window_bytes: usize,
    reducer: &AmplitudeReducer,
) -> Result<Vec<f32>, FileError> {
    let mut file = File::open(path).map_err(|source| FileError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    file.seek(SeekFrom::Start(HEADER_LEN))
        .map_err(|source| FileError::Seek {
            path: path.to_path_buf(),
            source,
        })?;

    let mut buffer = vec![0u8; window_bytes];
    let mut heights: Vec<f32> = Vec::new();
    loop {
        let read = read_window(&mut file, &mut buffer).map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if read == 0 {
            break;
        }
        let samples = decode_samples(&buffer[..read]);
        if let Some(height) = reducer.window_height(&samples, heights.last().copied()) {
            heights.push(height);
        }
        if read < buffer.len() {
            break;
        }
    }
    Ok(heights)
}
