//! PipeWire capture and output devices
//!
//! Each device runs its own PipeWire main loop on a private thread and
//! trades PCM with the pipeline worker over a channel, which keeps the
//! device handle itself `Send`.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::device::{AudioBackend, CaptureDevice, OutputDevice};
use super::wav::decode_samples;
use crate::error::DeviceError;
use crate::models::AudioConfig;

const APP_NAME: &str = "Wavrec";
const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Commands for the PipeWire loop thread
enum PipeWireCommand {
    Stop,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipeWireBackend;

impl AudioBackend for PipeWireBackend {
    fn name(&self) -> &'static str {
        "pipewire"
    }

    fn open_input(&self, config: &AudioConfig) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        Ok(Box::new(PipeWireInput::open(config)?))
    }

    fn open_output(
        &self,
        config: &AudioConfig,
        speed: f32,
    ) -> Result<Box<dyn OutputDevice>, DeviceError> {
        Ok(Box::new(PipeWireOutput::open(*config, speed)?))
    }
}

/// A PipeWire main loop running on its own thread
struct StreamThread {
    sender: Option<pw::channel::Sender<PipeWireCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn `body` and wait until it reports the stream connected
    fn spawn<F>(name: &str, body: F) -> Result<Self, DeviceError>
    where
        F: FnOnce(pw::channel::Receiver<PipeWireCommand>, &Sender<Result<(), String>>)
            -> Result<(), String>
            + Send
            + 'static,
    {
        let (sender, receiver) = pw::channel::channel::<PipeWireCommand>();
        let (ready_tx, ready_rx) = channel::bounded(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Err(e) = body(receiver, &ready_tx) {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| {
                log::error!("Failed to spawn {}: {}", name, e);
                DeviceError::InvalidOperation
            })?;

        let mut stream = Self {
            sender: Some(sender),
            handle: Some(handle),
        };

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => {
                log::error!("PipeWire error: {}", e);
                stream.stop();
                Err(DeviceError::InvalidOperation)
            }
            Err(_) => {
                log::error!("PipeWire stream {} did not start", name);
                stream.stop();
                Err(DeviceError::DeadObject)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PipeWireCommand::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Microphone input converted to mono 16-bit PCM
pub struct PipeWireInput {
    samples: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    stream: StreamThread,
    released: bool,
}

impl PipeWireInput {
    fn open(config: &AudioConfig) -> Result<Self, DeviceError> {
        if config.bit_depth != 16 || config.channels != 1 {
            return Err(DeviceError::BadValue);
        }
        let rate = config.sample_rate_hz;
        let (samples_tx, samples_rx) = channel::unbounded();
        let stream = StreamThread::spawn("wavrec-capture", move |receiver, ready| {
            run_capture_stream(rate, samples_tx, receiver, ready)
        })?;
        log::info!("Opened PipeWire capture at {} Hz", rate);
        Ok(Self {
            samples: samples_rx,
            pending: VecDeque::new(),
            stream,
            released: false,
        })
    }
}

impl CaptureDevice for PipeWireInput {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        if self.released {
            return Err(DeviceError::InvalidOperation);
        }
        while self.pending.len() < buf.len() {
            match self.samples.recv_timeout(READ_TIMEOUT) {
                Ok(bytes) => self.pending.extend(bytes),
                // Only whole windows are handed out
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(DeviceError::DeadObject),
            }
        }
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..buf.len())) {
            *slot = byte;
        }
        Ok(buf.len())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stream.stop();
            log::debug!("Released PipeWire capture");
        }
    }
}

impl Drop for PipeWireInput {
    fn drop(&mut self) {
        self.release();
    }
}

/// Speaker output; a speed change restarts the stream at the scaled rate
pub struct PipeWireOutput {
    config: AudioConfig,
    speed: f32,
    samples: Sender<Vec<f32>>,
    stream: StreamThread,
    released: bool,
}

impl PipeWireOutput {
    fn open(config: AudioConfig, speed: f32) -> Result<Self, DeviceError> {
        if config.bit_depth != 16 || speed <= 0.0 {
            return Err(DeviceError::BadValue);
        }
        let (samples, stream) = Self::connect(&config, speed)?;
        Ok(Self {
            config,
            speed,
            samples,
            stream,
            released: false,
        })
    }

    fn connect(
        config: &AudioConfig,
        speed: f32,
    ) -> Result<(Sender<Vec<f32>>, StreamThread), DeviceError> {
        let rate = (config.sample_rate_hz as f32 * speed).round() as u32;
        let channels = u32::from(config.channels.max(1));
        // A couple of windows of slack keeps the worker paced by the sink
        let (samples_tx, samples_rx) = channel::bounded(2);
        let stream = StreamThread::spawn("wavrec-playback", move |receiver, ready| {
            run_playback_stream(rate, channels, samples_rx, receiver, ready)
        })?;
        log::info!("Opened PipeWire playback at {} Hz (speed {})", rate, speed);
        Ok((samples_tx, stream))
    }
}

impl OutputDevice for PipeWireOutput {
    fn write(&mut self, buf: &[u8]) -> Result<usize, DeviceError> {
        if self.released {
            return Err(DeviceError::InvalidOperation);
        }
        let samples: Vec<f32> = decode_samples(buf)
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect();
        match self.samples.send_timeout(samples, WRITE_TIMEOUT) {
            Ok(()) => Ok(buf.len()),
            Err(SendTimeoutError::Timeout(_)) => {
                log::warn!("PipeWire playback stalled");
                Err(DeviceError::DeadObject)
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(DeviceError::DeadObject),
        }
    }

    fn set_speed(&mut self, speed: f32) -> Result<(), DeviceError> {
        if speed <= 0.0 {
            return Err(DeviceError::BadValue);
        }
        if self.released {
            return Err(DeviceError::InvalidOperation);
        }
        self.stream.stop();
        let (samples, stream) = Self::connect(&self.config, speed)?;
        self.samples = samples;
        self.stream = stream;
        self.speed = speed;
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stream.stop();
            log::debug!("Released PipeWire playback at speed {}", self.speed);
        }
    }
}

impl Drop for PipeWireOutput {
    fn drop(&mut self) {
        self.release();
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn format_params(rate: u32, channels: u32) -> Result<Vec<u8>, String> {
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(rate);
    audio_info.set_channels(channels);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    Ok(spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| format!("Failed to serialize audio format: {:?}", e))?
    .0
    .into_inner())
}

/// Parse a negotiated raw audio format into `format`
fn update_format(format: &mut spa::param::audio::AudioInfoRaw, id: u32, param: Option<&Pod>) {
    let Some(param) = param else { return };
    if id != spa::param::ParamType::Format.as_raw() {
        return;
    }

    let (media_type, media_subtype) = match format_utils::parse_format(param) {
        Ok(v) => v,
        Err(_) => return,
    };

    if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
        return;
    }

    if let Err(e) = format.parse(param) {
        log::warn!("Failed to parse audio format: {:?}", e);
    }
}

fn run_capture_stream(
    rate: u32,
    samples: Sender<Vec<u8>>,
    receiver: pw::channel::Receiver<PipeWireCommand>,
    ready: &Sender<Result<(), String>>,
) -> Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        PipeWireCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        samples: Sender<Vec<u8>>,
    }

    let user_data = UserData {
        format: Default::default(),
        samples,
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Communication",
        *pw::keys::APP_NAME => APP_NAME,
    };

    let stream = pw::stream::StreamBox::new(&core, "wavrec-capture", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| update_format(&mut user_data.format, id, param))
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1);
            let n_samples = data.chunk().size() / (std::mem::size_of::<f32>() as u32);

            if let Some(raw_samples) = data.data() {
                // First channel only, as 16-bit little-endian PCM
                let mut pcm = Vec::with_capacity((n_samples / n_channels) as usize * 2);
                for i in (0..n_samples).step_by(n_channels as usize) {
                    let start = i as usize * std::mem::size_of::<f32>();
                    let end = start + std::mem::size_of::<f32>();
                    if end <= raw_samples.len() {
                        let sample = f32::from_le_bytes(
                            raw_samples[start..end].try_into().unwrap_or([0; 4]),
                        );
                        pcm.extend_from_slice(&to_i16(sample).to_le_bytes());
                    }
                }
                let _ = user_data.samples.send(pcm);
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    let values = format_params(rate, 1)?;
    let mut params = [Pod::from_bytes(&values).ok_or("Failed to build format pod")?];

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    let _ = ready.send(Ok(()));
    mainloop.run();

    Ok(())
}

fn run_playback_stream(
    rate: u32,
    channels: u32,
    samples: Receiver<Vec<f32>>,
    receiver: pw::channel::Receiver<PipeWireCommand>,
    ready: &Sender<Result<(), String>>,
) -> Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        PipeWireCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        samples: Receiver<Vec<f32>>,
        pending: VecDeque<f32>,
    }

    let user_data = UserData {
        format: Default::default(),
        samples,
        pending: VecDeque::new(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => APP_NAME,
    };

    let stream = pw::stream::StreamBox::new(&core, "wavrec-playback", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| update_format(&mut user_data.format, id, param))
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let stride = std::mem::size_of::<f32>() * n_channels;

            let Some(slice) = data.data() else {
                return;
            };

            let n_frames = slice.len() / stride;

            // Pull only what this quantum needs so the writer stays paced
            while user_data.pending.len() < n_frames {
                match user_data.samples.try_recv() {
                    Ok(samples) => user_data.pending.extend(samples),
                    Err(_) => break,
                }
            }

            for frame in 0..n_frames {
                // Starved: fill with silence
                let bytes = user_data.pending.pop_front().unwrap_or(0.0).to_le_bytes();
                for channel in 0..n_channels {
                    let offset = frame * stride + channel * std::mem::size_of::<f32>();
                    slice[offset..offset + 4].copy_from_slice(&bytes);
                }
            }

            let chunk = data.chunk_mut();
            *chunk.offset_mut() = 0;
            *chunk.stride_mut() = stride as i32;
            *chunk.size_mut() = (n_frames * stride) as u32;
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    let values = format_params(rate, channels)?;
    let mut params = [Pod::from_bytes(&values).ok_or("Failed to build format pod")?];

    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    let _ = ready.send(Ok(()));
    mainloop.run();

    Ok(())
}
