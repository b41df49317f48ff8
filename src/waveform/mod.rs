//! Waveform data: chunk reduction and the seekable chunk timeline

mod reducer;
mod timeline;

pub use reducer::{reduce, scale_factor, AmplitudeReducer};
pub use timeline::{SectionMarkers, Timeline};
