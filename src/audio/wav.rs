//! WAV container header and 16-bit PCM conversion
//!
//! Recordings are streamed straight to disk, so the header goes out first with
//! zeroed size fields and gets patched once the final length is known.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::FileError;

/// Size of the canonical RIFF/WAVE header
pub const HEADER_LEN: u64 = 44;

const RIFF_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 40;

/// Format fields written into the `fmt ` sub-chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    /// Mono: 1, Stereo: 2
    pub channels: u16,
    pub sample_rate_hz: u32,
    pub bit_depth: u16,
}

impl WavFormat {
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate_hz * self.channels as u32 * (self.bit_depth as u32 / 8)
    }

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bit_depth / 8)
    }

    /// Encode the 44-byte header with both size fields left at zero
    pub fn encode_header(&self) -> [u8; 44] {
        let mut header = [0u8; 44];
        header[0..4].copy_from_slice(b"RIFF");
        // [4..8) riff size, patched later
        header[8..12].copy_from_slice(b"WAVE");
        header[12..16].copy_from_slice(b"fmt ");
        header[16..20].copy_from_slice(&16u32.to_le_bytes());
        header[20..22].copy_from_slice(&1u16.to_le_bytes());
        header[22..24].copy_from_slice(&self.channels.to_le_bytes());
        header[24..28].copy_from_slice(&self.sample_rate_hz.to_le_bytes());
        header[28..32].copy_from_slice(&self.byte_rate().to_le_bytes());
        header[32..34].copy_from_slice(&self.block_align().to_le_bytes());
        header[34..36].copy_from_slice(&self.bit_depth.to_le_bytes());
        header[36..40].copy_from_slice(b"data");
        // [40..44) data size, patched later
        header
    }
}

/// Header fields read back from an existing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub format: WavFormat,
    pub riff_size: u32,
    pub data_size: u32,
}

impl WavHeader {
    /// A recording that never reached a clean stop still has a zero RIFF size
    pub fn is_patched(&self) -> bool {
        self.riff_size != 0
    }

    pub fn parse(bytes: &[u8; 44]) -> Result<Self, String> {
        if &bytes[0..4] != b"RIFF" {
            return Err("missing RIFF tag".to_string());
        }
        if &bytes[8..12] != b"WAVE" {
            return Err("missing WAVE tag".to_string());
        }
        if &bytes[12..16] != b"fmt " {
            return Err("missing fmt chunk".to_string());
        }
        if &bytes[36..40] != b"data" {
            return Err("missing data chunk".to_string());
        }
        let audio_format = u16::from_le_bytes([bytes[20], bytes[21]]);
        if audio_format != 1 {
            return Err(format!("unsupported audio format {}", audio_format));
        }

        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        let format = WavFormat {
            channels: u16_at(22),
            sample_rate_hz: u32_at(24),
            bit_depth: u16_at(34),
        };
        if format.sample_rate_hz == 0 {
            return Err("sample rate is zero".to_string());
        }
        if format.channels == 0 || format.bit_depth == 0 || format.bit_depth % 8 != 0 {
            return Err(format!(
                "unsupported layout: {} channels at {} bits",
                format.channels, format.bit_depth
            ));
        }
        let block_align = u16_at(32);
        let expected = u32::from(format.channels) * u32::from(format.bit_depth / 8);
        if u32::from(block_align) != expected {
            return Err(format!(
                "block align {} does not match {} channels at {} bits",
                block_align, format.channels, format.bit_depth
            ));
        }

        Ok(Self {
            format,
            riff_size: u32_at(4),
            data_size: u32_at(40),
        })
    }
}

/// Write a placeholder header; must precede the first audio sample
pub fn write_header<W: Write>(writer: &mut W, format: &WavFormat) -> io::Result<()> {
    writer.write_all(&format.encode_header())
}

/// Overwrite the RIFF and data size fields from the current stream length
///
/// Returns `(riff_size, data_size)`.
pub fn patch_sizes<F: Read + Write + Seek>(file: &mut F) -> io::Result<(u32, u32)> {
    let file_length = file.seek(SeekFrom::End(0))?;
    if file_length < HEADER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("file is {} bytes, shorter than a wav header", file_length),
        ));
    }

    let riff_size = (file_length - 8) as u32;
    let data_size = (file_length - HEADER_LEN) as u32;

    file.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
    file.write_all(&riff_size.to_le_bytes())?;
    file.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
    file.write_all(&data_size.to_le_bytes())?;
    file.flush()?;

    Ok((riff_size, data_size))
}

/// Patch the header of the file at `path` in place
pub fn patch_header(path: &Path) -> Result<(u32, u32), FileError> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| FileError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let sizes = patch_sizes(&mut file).map_err(|source| FileError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!(
        "Patched header of {:?}: riff={} data={}",
        path,
        sizes.0,
        sizes.1
    );
    Ok(sizes)
}

/// Read and validate the header of the file at `path`
pub fn read_header(path: &Path) -> Result<WavHeader, FileError> {
    let mut file = std::fs::File::open(path).map_err(|source| FileError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut bytes = [0u8; 44];
    file.read_exact(&mut bytes).map_err(|source| FileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    WavHeader::parse(&bytes).map_err(|detail| FileError::Header {
        path: path.to_path_buf(),
        detail,
    })
}

/// Interpret little-endian bytes as 16-bit samples; a trailing odd byte is dropped
pub fn decode_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn encode_samples(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Fill `buf` from `reader`, tolerating short reads
///
/// Returns the number of bytes read; less than `buf.len()` only at end of file.
pub fn read_window<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
