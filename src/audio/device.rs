//! Audio device seams used by the capture and playback pipelines
//!
//! A device is an owned handle: the session opens it through an
//! `AudioBackend`, moves it into the worker, and the worker releases it
//! exactly once when the loop ends.

use std::f32::consts::PI;
use std::thread;
use std::time::Duration;

use crate::error::DeviceError;
use crate::models::AudioConfig;

/// Source of 16-bit little-endian PCM windows
pub trait CaptureDevice: Send {
    /// Read up to `buf.len()` bytes; `Ok(0)` means nothing was ready yet
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Give the hardware back. Calling it twice is harmless.
    fn release(&mut self);
}

/// Sink for 16-bit little-endian PCM windows
pub trait OutputDevice: Send {
    fn write(&mut self, buf: &[u8]) -> Result<usize, DeviceError>;

    /// Re-initialise the playback rate multiplier
    fn set_speed(&mut self, speed: f32) -> Result<(), DeviceError>;

    /// Give the hardware back. Calling it twice is harmless.
    fn release(&mut self);
}

/// Opens devices for a session
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_input(&self, config: &AudioConfig) -> Result<Box<dyn CaptureDevice>, DeviceError>;

    fn open_output(
        &self,
        config: &AudioConfig,
        speed: f32,
    ) -> Result<Box<dyn OutputDevice>, DeviceError>;
}

fn window_duration(config: &AudioConfig, bytes: usize, speed: f32) -> Duration {
    let byte_rate = config.wav_format().byte_rate().max(1) as f32;
    Duration::from_secs_f32(bytes as f32 / byte_rate / speed.max(0.01))
}

/// Backend without hardware: a synthetic voice-like tone in, silence out
///
/// With `pace` set both devices block for the real duration of each window.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedBackend {
    pub pace: bool,
}

impl AudioBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open_input(&self, config: &AudioConfig) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        if config.bit_depth != 16 {
            return Err(DeviceError::BadValue);
        }
        Ok(Box::new(ToneInput::new(*config, self.pace)))
    }

    fn open_output(
        &self,
        config: &AudioConfig,
        speed: f32,
    ) -> Result<Box<dyn OutputDevice>, DeviceError> {
        if config.bit_depth != 16 || speed <= 0.0 {
            return Err(DeviceError::BadValue);
        }
        Ok(Box::new(NullOutput {
            config: *config,
            speed,
            pace: self.pace,
            released: false,
        }))
    }
}

/// 220 Hz tone under a slow syllable-like envelope
pub struct ToneInput {
    config: AudioConfig,
    pace: bool,
    sample_index: u64,
    released: bool,
}

impl ToneInput {
    pub fn new(config: AudioConfig, pace: bool) -> Self {
        Self {
            config,
            pace,
            sample_index: 0,
            released: false,
        }
    }

    fn next_sample(&mut self) -> i16 {
        let t = self.sample_index as f32 / self.config.sample_rate_hz.max(1) as f32;
        self.sample_index += 1;
        let envelope = (2.0 * PI * 0.7 * t).sin().abs() * (0.35 + 0.25 * (2.0 * PI * 0.13 * t).sin());
        let tone = (2.0 * PI * 220.0 * t).sin();
        (tone * envelope * i16::MAX as f32) as i16
    }
}

impl CaptureDevice for ToneInput {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        if self.released {
            return Err(DeviceError::InvalidOperation);
        }
        let len = buf.len() - buf.len() % 2;
        for pair in buf[..len].chunks_exact_mut(2) {
            pair.copy_from_slice(&self.next_sample().to_le_bytes());
        }
        if self.pace {
            thread::sleep(window_duration(&self.config, len, 1.0));
        }
        Ok(len)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::debug!("Released simulated input");
        }
    }
}

/// Discards audio, optionally taking as long as real playback would
pub struct NullOutput {
    config: AudioConfig,
    speed: f32,
    pace: bool,
    released: bool,
}

impl OutputDevice for NullOutput {
    fn write(&mut self, buf: &[u8]) -> Result<usize, DeviceError> {
        if self.released {
            return Err(DeviceError::InvalidOperation);
        }
        if self.pace {
            thread::sleep(window_duration(&self.config, buf.len(), self.speed));
        }
        Ok(buf.len())
    }

    fn set_speed(&mut self, speed: f32) -> Result<(), DeviceError> {
        if speed <= 0.0 {
            return Err(DeviceError::BadValue);
        }
        self.speed = speed;
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::debug!("Released simulated output");
        }
    }
}

/// Scripted devices for pipeline and session tests
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Script = Arc<Mutex<VecDeque<Result<Vec<u8>, DeviceError>>>>;

    /// Everything the fake devices observed
    #[derive(Clone, Default)]
    pub struct Probe {
        pub written: Arc<Mutex<Vec<u8>>>,
        pub speeds: Arc<Mutex<Vec<f32>>>,
        pub input_releases: Arc<AtomicUsize>,
        pub output_releases: Arc<AtomicUsize>,
    }

    impl Probe {
        pub fn written(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }

        pub fn speeds(&self) -> Vec<f32> {
            self.speeds.lock().unwrap().clone()
        }

        pub fn input_releases(&self) -> usize {
            self.input_releases.load(Ordering::SeqCst)
        }

        pub fn output_releases(&self) -> usize {
            self.output_releases.load(Ordering::SeqCst)
        }
    }

    /// Hands out queued windows, then reports "no data" until released
    pub struct ScriptedInput {
        script: Script,
        probe: Probe,
        released: bool,
    }

    impl CaptureDevice for ScriptedInput {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(bytes)) => {
                    let len = bytes.len().min(buf.len());
                    buf[..len].copy_from_slice(&bytes[..len]);
                    Ok(len)
                }
                Some(Err(e)) => Err(e),
                None => {
                    thread::sleep(Duration::from_millis(1));
                    Ok(0)
                }
            }
        }

        fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.probe.input_releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Collects everything written; optionally fails after a number of writes
    pub struct CollectingOutput {
        probe: Probe,
        fail_after: Option<usize>,
        writes: usize,
        released: bool,
    }

    impl OutputDevice for CollectingOutput {
        fn write(&mut self, buf: &[u8]) -> Result<usize, DeviceError> {
            if self.fail_after == Some(self.writes) {
                return Err(DeviceError::DeadObject);
            }
            self.writes += 1;
            self.probe.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn set_speed(&mut self, speed: f32) -> Result<(), DeviceError> {
            self.probe.speeds.lock().unwrap().push(speed);
            Ok(())
        }

        fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.probe.output_releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[derive(Clone, Default)]
    pub struct ScriptedBackend {
        script: Script,
        pub probe: Probe,
        pub fail_output_after: Option<usize>,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_window(&self, bytes: Vec<u8>) {
            self.script.lock().unwrap().push_back(Ok(bytes));
        }

        pub fn push_error(&self, error: DeviceError) {
            self.script.lock().unwrap().push_back(Err(error));
        }

        pub fn input(&self) -> ScriptedInput {
            ScriptedInput {
                script: self.script.clone(),
                probe: self.probe.clone(),
                released: false,
            }
        }

        pub fn output(&self) -> CollectingOutput {
            CollectingOutput {
                probe: self.probe.clone(),
                fail_after: self.fail_output_after,
                writes: 0,
                released: false,
            }
        }
    }

    impl AudioBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn open_input(&self, _config: &AudioConfig) -> Result<Box<dyn CaptureDevice>, DeviceError> {
            Ok(Box::new(self.input()))
        }

        fn open_output(
            &self,
            _config: &AudioConfig,
            speed: f32,
        ) -> Result<Box<dyn OutputDevice>, DeviceError> {
            self.probe.speeds.lock().unwrap().push(speed);
            Ok(Box::new(self.output()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::decode_samples;
    use crate::waveform::reduce;

    #[test]
    fn test_tone_input_produces_audible_windows() {
        let config = AudioConfig::default();
        let mut input = ToneInput::new(config, false);
        let mut buf = vec![0u8; config.buffer_size_bytes];
        let mut peaks = Vec::new();
        for _ in 0..40 {
            assert_eq!(input.read(&mut buf).unwrap(), buf.len());
            peaks.push(reduce(&decode_samples(&buf)).unwrap());
        }
        assert!(peaks.iter().any(|&p| p > 3000));
        assert!(peaks.iter().min() < peaks.iter().max());
    }

    #[test]
    fn test_released_devices_refuse_io() {
        let backend = SimulatedBackend { pace: false };
        let config = AudioConfig::default();
        let mut input = backend.open_input(&config).unwrap();
        input.release();
        input.release();
        assert_eq!(input.read(&mut [0u8; 4]), Err(DeviceError::InvalidOperation));

        let mut output = backend.open_output(&config, 1.0).unwrap();
        assert_eq!(output.write(&[0u8; 4]), Ok(4));
        output.release();
        assert_eq!(output.write(&[0u8; 4]), Err(DeviceError::InvalidOperation));
    }

    #[test]
    fn test_rejects_bad_speed() {
        let backend = SimulatedBackend { pace: false };
        let config = AudioConfig::default();
        assert!(backend.open_output(&config, 0.0).is_err());
        let mut output = backend.open_output(&config, 1.5).unwrap();
        assert_eq!(output.set_speed(-1.0), Err(DeviceError::BadValue));
        assert_eq!(output.set_speed(0.5), Ok(()));
    }
}
