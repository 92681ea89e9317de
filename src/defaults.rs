//! Default configuration constants for callguard.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

/// Default raw frame size in bytes.
///
/// The media gateway delivers 160-byte messages (20ms at 8kHz, one byte per sample).
/// Twenty of them make 0.4s of audio, which keeps per-frame overhead low.
pub const FRAME_BYTES: usize = 20 * 160;

/// Default sample rate of inbound telephony audio in Hz.
pub const SOURCE_RATE: u32 = 8000;

/// Default working sample rate in Hz.
///
/// Windows are resampled to 16kHz before scoring.
pub const WORKING_RATE: u32 = 16000;

/// Default analysis window length in milliseconds.
pub const WINDOW_MS: u32 = 2000;

/// Floor added to the peak before normalization so silence does not divide by zero.
pub const NORMALIZE_EPSILON: f32 = 1e-9;

/// Midpoint of unsigned 8-bit PCM.
pub const PCM_U8_MIDPOINT: i16 = 128;

/// Half-width (in input samples) of the windowed-sinc resampling kernel.
pub const RESAMPLE_KERNEL_HALF_WIDTH: usize = 6;

/// Fraction of the Nyquist band kept by the resampling low-pass filter.
pub const RESAMPLE_ROLLOFF: f64 = 0.99;

/// Default queue capacities between adjacent stages.
pub const EVENT_QUEUE: usize = 256;
pub const FRAME_QUEUE: usize = 64;
pub const SAMPLE_QUEUE: usize = 64;
pub const WINDOW_QUEUE: usize = 4;
pub const SCORE_QUEUE: usize = 16;

/// Default time a session may spend draining before it is force-closed.
pub const DRAIN_GRACE_MS: u64 = 5000;

/// Scores below this probability of genuine speech count as spoofing evidence.
pub const GENUINE_THRESHOLD: f64 = 0.5;

/// How far (in milliseconds of audio) a score may trail an utterance and still be fresh.
pub const FRESHNESS_TOLERANCE_MS: u32 = 2000;

/// Default log level when neither the config nor `RUST_LOG` sets one.
pub const LOG_LEVEL: &str = "info";

/// Number of samples in one window at the given rate.
pub fn window_samples(window_ms: u32, working_rate: u32) -> usize {
    (window_ms as u64 * working_rate as u64 / 1000) as usize
}
