#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audio::wav::WavFormat;

/// Playback speeds offered to the user
pub const PLAYBACK_SPEEDS: [f32; 8] = [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 1.75, 2.0];

pub const DEFAULT_PLAYBACK_SPEED: f32 = 1.0;

/// Capture and playback format shared by both pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub bit_depth: u16,
    /// Bytes per window read from or written to the device
    pub buffer_size_bytes: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44100,
            channels: 1,
            bit_depth: 16,
            // 40 ms of 16-bit mono at 44.1 kHz
            buffer_size_bytes: 3528,
        }
    }
}

impl AudioConfig {
    /// Duration of one window, which is also the duration of one chunk
    pub fn update_interval_millis(&self) -> u64 {
        (self.buffer_size_bytes as u64 * 1000) / (2 * self.sample_rate_hz as u64)
    }

    pub fn wav_format(&self) -> WavFormat {
        WavFormat {
            channels: self.channels,
            sample_rate_hz: self.sample_rate_hz,
            bit_depth: self.bit_depth,
        }
    }
}

/// Visual scaling of chunk heights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformConfig {
    pub min_chunk_height: f32,
    /// Explicit cap; `None` means "as tall as the view allows"
    pub max_chunk_height: Option<f32>,
    pub view_height: f32,
    pub top_bottom_padding: f32,
    pub smooth_transition: bool,
    /// Effective ceiling of captured peaks (full scale is 32767)
    pub max_reportable_amplitude: f32,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            min_chunk_height: 2.0,
            max_chunk_height: None,
            view_height: 120.0,
            top_bottom_padding: 8.0,
            smooth_transition: true,
            max_reportable_amplitude: 22760.0,
        }
    }
}

/// A recording found in the recordings directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub path: PathBuf,
    pub name: String,
    pub duration_millis: u64,
    pub modified: DateTime<Utc>,
    /// False when the header still carries zero sizes
    pub complete: bool,
}

/// Format milliseconds as `mm:ss.SS`
pub fn format_timer(millis: u64) -> String {
    let minutes = millis / 60_000;
    let seconds = (millis / 1000) % 60;
    let centis = (millis % 1000) / 10;
    format!("{:02}:{:02}.{:02}", minutes, seconds, centis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_interval() {
        assert_eq!(AudioConfig::default().update_interval_millis(), 40);
        let config = AudioConfig {
            buffer_size_bytes: 8820,
            ..AudioConfig::default()
        };
        assert_eq!(config.update_interval_millis(), 100);
    }

    #[test]
    fn test_format_timer() {
        assert_eq!(format_timer(0), "00:00.00");
        assert_eq!(format_timer(1_230), "00:01.23");
        assert_eq!(format_timer(754_990), "12:34.99");
    }
}
