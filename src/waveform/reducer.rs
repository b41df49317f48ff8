//! Reduction of raw PCM windows to drawable chunk heights
//!
//! A chunk is the loudest sample of one window, scaled into
//! `[min_chunk_height, max_chunk_height]`. Optional smoothing damps large jumps
//! between neighbouring chunks so the envelope stays readable.

use crate::models::WaveformConfig;

/// Ratio between neighbouring chunks above which smoothing kicks in
const ALLOWED_DIFF: f32 = 2.2;

/// Peak magnitude of a window, `None` for an empty window
pub fn reduce(samples: &[i16]) -> Option<u16> {
    samples.iter().map(|s| s.unsigned_abs()).max()
}

/// Damping divisor for a given window duration; slower windows damp harder
pub fn scale_factor(update_interval_millis: u64) -> f32 {
    match update_interval_millis {
        0..=50 => 1.6,
        51..=100 => 2.2,
        101..=150 => 2.8,
        151..=200 => 3.4,
        201..=250 => 4.2,
        251..=500 => 4.8,
        _ => 5.4,
    }
}

/// Move `point` a fraction of the way toward `compare_with` when they differ too much
fn smooth_transition(point: f32, compare_with: f32, allowed_diff: f32, scale_factor: f32) -> f32 {
    if scale_factor == 0.0 {
        return point;
    }

    let diff = (point - compare_with).abs();
    if compare_with > point {
        if compare_with / point > allowed_diff {
            return point + diff / scale_factor;
        }
    } else if point > compare_with && point / compare_with > allowed_diff {
        return point - diff / scale_factor;
    }

    point
}

/// Maps peak magnitudes to chunk heights for one session
#[derive(Debug, Clone)]
pub struct AmplitudeReducer {
    min_chunk_height: f32,
    max_chunk_height: f32,
    max_reportable_amplitude: f32,
    smoothing: Option<f32>,
}

impl AmplitudeReducer {
    /// Resolve the height range once for the session
    pub fn new(config: &WaveformConfig, update_interval_millis: u64) -> Self {
        let min_chunk_height = config.min_chunk_height.max(0.0);
        let available = config.view_height - config.top_bottom_padding * 2.0;
        let max_chunk_height = match config.max_chunk_height {
            Some(max) if max <= available => max,
            _ => available,
        }
        .max(min_chunk_height);

        Self {
            min_chunk_height,
            max_chunk_height,
            max_reportable_amplitude: config.max_reportable_amplitude,
            smoothing: config
                .smooth_transition
                .then(|| scale_factor(update_interval_millis)),
        }
    }

    pub fn min_chunk_height(&self) -> f32 {
        self.min_chunk_height
    }

    pub fn max_chunk_height(&self) -> f32 {
        self.max_chunk_height
    }

    /// Height of the chunk for `magnitude`, smoothed against `prior_height` when enabled
    pub fn chunk_height(&self, magnitude: u16, prior_height: Option<f32>) -> f32 {
        if magnitude == 0 {
            return self.min_chunk_height;
        }

        let vertical_draw_scale = self.max_chunk_height - self.min_chunk_height;
        if vertical_draw_scale == 0.0 {
            return self.min_chunk_height;
        }

        let scale = self.max_reportable_amplitude / vertical_draw_scale;
        if scale == 0.0 {
            return self.min_chunk_height;
        }

        let mut point = magnitude as f32 / scale;

        if let (Some(factor), Some(prior)) = (self.smoothing, prior_height) {
            point = smooth_transition(point, prior - self.min_chunk_height, ALLOWED_DIFF, factor);
        }

        (point + self.min_chunk_height)
            .min(self.max_chunk_height)
            .max(self.min_chunk_height)
    }

    /// Reduce a raw window straight to a height
    pub fn window_height(&self, samples: &[i16], prior_height: Option<f32>) -> Option<f32> {
        reduce(samples).map(|magnitude| self.chunk_height(magnitude, prior_height))
    }
}
