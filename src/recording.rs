//! WAV dump of scored windows for offline inspection.
//!
//! Each window becomes one mono 32-bit float file named
//! `<session>-<recorder>-<index>.wav`, where `<recorder>` is a process-wide
//! sequence number telling apart sessions that share an id or never got one.

use crate::error::{CallguardError, Result};
use crate::pipeline::router::SessionIdSlot;
use crate::pipeline::types::Window;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_RECORDER: AtomicU64 = AtomicU64::new(0);

/// Writes windows into a directory as they are scored.
#[derive(Debug, Clone)]
pub struct WindowRecorder {
    dir: PathBuf,
    sample_rate: u32,
    id_slot: SessionIdSlot,
    serial: u64,
}

impl WindowRecorder {
    /// Create a recorder writing into `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>, sample_rate: u32, id_slot: SessionIdSlot) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CallguardError::Recording {
            message: format!("cannot create dump directory {}: {}", dir.display(), e),
        })?;
        Ok(Self {
            dir,
            sample_rate,
            id_slot,
            serial: NEXT_RECORDER.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a window will be written to. Windows scored before the session id
    /// is known use `unknown` as the prefix.
    pub fn path_for(&self, index: u64) -> PathBuf {
        let prefix = self
            .id_slot
            .get()
            .map(|id| sanitize(id.as_str()))
            .unwrap_or_else(|| "unknown".to_string());
        self.dir.join(format!("{prefix}-{}-{index}.wav", self.serial))
    }

    /// Write one window and return the file path.
    pub fn write(&self, window: &Window) -> Result<PathBuf> {
        let path = self.path_for(window.index);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for &sample in &window.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(path)
    }
}

/// Keeps file names to a safe character set.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::SessionId;
    use std::time::Instant;

    fn window(index: u64, samples: Vec<f32>) -> Window {
        Window {
            covers_through: samples.len() as u64 * (index + 1),
            samples,
            index,
            completed_at: Instant::now(),
        }
    }

    #[test]
    fn test_writes_float_wav_named_after_session() {
        let dir = tempfile::tempdir().unwrap();
        let (slot, _rx) = SessionIdSlot::new();
        slot.publish(SessionId::new("MZ42"));
        let recorder = WindowRecorder::new(dir.path(), 16000, slot).unwrap();

        let samples = vec![0.0, 0.5, -0.5, 1.0];
        let path = recorder.write(&window(3, samples.clone())).unwrap();
        assert_eq!(
            path,
            dir.path().join(format!("MZ42-{}-3.wav", recorder.serial))
        );

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.sample_format, hound::SampleFormat::Float);
        let read: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_unknown_session_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let (slot, _rx) = SessionIdSlot::new();
        let recorder = WindowRecorder::new(dir.path(), 16000, slot).unwrap();
        let name = recorder.path_for(0);
        let name = name.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("unknown-"), "{name}");
        assert!(name.ends_with("-0.wav"), "{name}");
    }

    #[test]
    fn test_sessions_without_id_write_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let (slot_a, _rx_a) = SessionIdSlot::new();
        let (slot_b, _rx_b) = SessionIdSlot::new();
        let a = WindowRecorder::new(dir.path(), 16000, slot_a).unwrap();
        let b = WindowRecorder::new(dir.path(), 16000, slot_b).unwrap();

        let path_a = a.write(&window(0, vec![0.25; 8])).unwrap();
        let path_b = b.write(&window(0, vec![-0.25; 8])).unwrap();
        assert_ne!(path_a, path_b);

        let first: Vec<f32> = hound::WavReader::open(&path_a)
            .unwrap()
            .samples::<f32>()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(first, vec![0.25; 8]);
    }

    #[test]
    fn test_same_session_id_twice_does_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let (slot_a, _rx_a) = SessionIdSlot::new();
        let (slot_b, _rx_b) = SessionIdSlot::new();
        slot_a.publish(SessionId::new("MZdup"));
        slot_b.publish(SessionId::new("MZdup"));
        let a = WindowRecorder::new(dir.path(), 16000, slot_a).unwrap();
        let b = WindowRecorder::new(dir.path(), 16000, slot_b).unwrap();
        assert_ne!(a.path_for(5), b.path_for(5));
    }

    #[test]
    fn test_session_id_is_sanitized() {
        assert_eq!(sanitize("a/b c-1_x"), "a_b_c-1_x");
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let (slot, _rx) = SessionIdSlot::new();
        let recorder = WindowRecorder::new(&nested, 8000, slot).unwrap();
        assert!(recorder.dir().is_dir());
    }
}
