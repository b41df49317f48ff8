//! Recordings directory management
//!
//! New takes are written to a uniquely named working file and renamed to
//! the user's chosen name on save.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::audio::wav::{self, HEADER_LEN};
use crate::error::FileError;
use crate::models::RecordingInfo;

/// Where recordings live on disk
#[derive(Debug, Clone)]
pub struct RecordingStore {
    recordings_dir: PathBuf,
}

impl RecordingStore {
    /// Store rooted at the default recordings directory
    pub fn new() -> Self {
        let recordings_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wavrec")
            .join("recordings");

        Self { recordings_dir }
    }

    /// Set the recordings directory
    pub fn with_recordings_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.recordings_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    /// Ensure the recordings directory exists
    pub fn ensure_dir(&self) -> Result<(), FileError> {
        fs::create_dir_all(&self.recordings_dir).map_err(|source| FileError::Open {
            path: self.recordings_dir.clone(),
            source,
        })
    }

    /// Generate a unique working file path for a new take
    pub fn generate_path(&self) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let uuid = uuid::Uuid::new_v4().to_string()[..8].to_string();
        self.recordings_dir
            .join(format!("recording_{}_{}.wav", timestamp, uuid))
    }

    /// Path a recording saved as `name` ends up at
    pub fn path_for(&self, name: &str) -> PathBuf {
        let name = name.trim();
        if name.to_lowercase().ends_with(".wav") {
            self.recordings_dir.join(name)
        } else {
            self.recordings_dir.join(format!("{}.wav", name))
        }
    }

    /// Accept a path, or the name a recording was saved under
    pub fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.exists() {
            path.to_path_buf()
        } else {
            self.path_for(file)
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }

    /// Move a finished take to its user-chosen name
    pub fn rename_to(&self, source: &Path, name: &str) -> Result<PathBuf, FileError> {
        let target = self.path_for(name);
        fs::rename(source, &target).map_err(|source| FileError::Write {
            path: target.clone(),
            source,
        })?;
        log::info!("Saved recording to {}", target.display());
        Ok(target)
    }

    /// Delete a recording; returns false when it was already gone
    pub fn delete(&self, path: &Path) -> Result<bool, FileError> {
        match fs::remove_file(path) {
            Ok(()) => {
                log::info!("Deleted {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(FileError::Write {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// All recordings, newest first
    pub fn list(&self) -> Result<Vec<RecordingInfo>, FileError> {
        self.ensure_dir()?;

        let entries = fs::read_dir(&self.recordings_dir).map_err(|source| FileError::Read {
            path: self.recordings_dir.clone(),
            source,
        })?;

        let mut recordings: Vec<RecordingInfo> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase() == "wav")
                    .unwrap_or(false)
            })
            .filter_map(|path| match describe(&path) {
                Ok(info) => Some(info),
                Err(e) => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        recordings.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(recordings)
    }
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds covered by `frames` frames at `sample_rate` Hz
pub fn duration_millis(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames * 1000 / sample_rate as u64
}

/// Summarise one recording file
///
/// A file whose header was never patched is still listed, with its
/// duration estimated from the file length.
pub fn describe(path: &Path) -> Result<RecordingInfo, FileError> {
    let header = wav::read_header(path)?;
    let metadata = fs::metadata(path).map_err(|source| FileError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let complete = header.is_patched();
    let block_align = u64::from(header.format.block_align().max(1));
    let sample_rate = header.format.sample_rate_hz;

    let frames = if complete {
        match hound::WavReader::open(path) {
            Ok(reader) => u64::from(reader.duration()),
            Err(e) => {
                log::debug!("hound could not read {}: {}", path.display(), e);
                u64::from(header.data_size) / block_align
            }
        }
    } else {
        metadata.len().saturating_sub(HEADER_LEN) / block_align
    };

    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(RecordingInfo {
        path: path.to_path_buf(),
        name,
        duration_millis: duration_millis(frames, sample_rate),
        modified,
        complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::{encode_samples, patch_header, write_header};
    use crate::models::AudioConfig;
    use std::io::Write;

    fn store() -> (tempfile::TempDir, RecordingStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new().with_recordings_dir(dir.path());
        (dir, store)
    }

    /// Write `samples` mono samples at 44.1 kHz
    fn take(path: &Path, samples: usize, patch: bool) {
        let mut file = fs::File::create(path).unwrap();
        write_header(&mut file, &AudioConfig::default().wav_format()).unwrap();
        file.write_all(&encode_samples(&vec![100; samples])).unwrap();
        drop(file);
        if patch {
            patch_header(path).unwrap();
        }
    }

    #[test]
    fn test_duration_calculation() {
        assert_eq!(duration_millis(44100, 44100), 1000);
        assert_eq!(duration_millis(22050, 44100), 500);
        assert_eq!(duration_millis(16000, 16000), 1000);
        assert_eq!(duration_millis(10, 0), 0);
    }

    #[test]
    fn test_generated_paths_are_unique() {
        let (_dir, store) = store();
        let a = store.generate_path();
        let b = store.generate_path();
        assert_ne!(a, b);
        assert!(a.starts_with(store.recordings_dir()));
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("recording_"));
        assert!(name.ends_with(".wav"));
    }

    #[test]
    fn test_path_for_adds_extension_once() {
        let (_dir, store) = store();
        assert_eq!(store.path_for("memo"), store.recordings_dir().join("memo.wav"));
        assert_eq!(store.path_for(" memo.wav "), store.recordings_dir().join("memo.wav"));
    }

    #[test]
    fn test_rename_and_delete() {
        let (_dir, store) = store();
        let working = store.generate_path();
        take(&working, 10, true);

        assert!(!store.exists("memo"));
        let saved = store.rename_to(&working, "memo").unwrap();
        assert!(store.exists("memo"));
        assert!(!working.exists());

        assert!(store.delete(&saved).unwrap());
        assert!(!store.delete(&saved).unwrap());
    }

    #[test]
    fn test_delete_saved_recording_by_name_or_path() {
        let (_dir, store) = store();
        take(&store.path_for("memo"), 10, true);
        take(&store.path_for("other"), 10, true);

        let by_name = store.resolve("memo");
        assert_eq!(by_name, store.path_for("memo"));
        assert!(store.delete(&by_name).unwrap());
        assert!(!store.exists("memo"));
        assert!(!store.delete(&store.resolve("memo")).unwrap());

        let path = store.path_for("other");
        let by_path = store.resolve(&path.to_string_lossy());
        assert_eq!(by_path, path);
        assert!(store.delete(&by_path).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_empty_take_is_complete() {
        let (_dir, store) = store();
        take(&store.path_for("blank"), 0, true);
        let info = describe(&store.path_for("blank")).unwrap();
        assert!(info.complete);
        assert_eq!(info.duration_millis, 0);
    }

    #[test]
    fn test_list_reports_durations() {
        let (_dir, store) = store();
        take(&store.path_for("one-second"), 44100, true);
        take(&store.path_for("half-unpatched"), 22050, false);
        fs::write(store.recordings_dir().join("notes.txt"), "not audio").unwrap();
        fs::write(store.recordings_dir().join("broken.wav"), "RIFF").unwrap();

        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);

        let full = list.iter().find(|r| r.name == "one-second").unwrap();
        assert!(full.complete);
        assert_eq!(full.duration_millis, 1000);

        let partial = list.iter().find(|r| r.name == "half-unpatched").unwrap();
        assert!(!partial.complete);
        assert_eq!(partial.duration_millis, 500);
    }

    #[test]
    fn test_list_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new().with_recordings_dir(dir.path().join("nested"));
        assert!(store.list().unwrap().is_empty());
        assert!(store.recordings_dir().is_dir());
    }
}
