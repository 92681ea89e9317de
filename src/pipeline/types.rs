//! Data types flowing between the stations of a call session.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifier assigned to a call by the upstream media gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which leg of the call a media payload belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaTrack {
    /// Audio spoken by the remote party. The only track that is analysed.
    Inbound,
    /// Audio played back into the call.
    Outbound,
    /// Any track name the gateway may add later.
    Other(String),
}

impl MediaTrack {
    pub fn parse(name: &str) -> Self {
        match name {
            "inbound" => MediaTrack::Inbound,
            "outbound" => MediaTrack::Outbound,
            other => MediaTrack::Other(other.to_string()),
        }
    }
}

/// A decoded control or media event from the gateway, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// The gateway announced the session id.
    SessionStart { id: SessionId },
    /// Transport connected; carries nothing the pipeline needs.
    Connected,
    /// Raw audio bytes for one track.
    Media { track: MediaTrack, payload: Vec<u8> },
    /// The remote party started speaking (barge-in).
    SpeechStarted,
    /// The gateway ended the stream.
    Stop,
}

impl ControlEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlEvent::SessionStart { .. } => "session_start",
            ControlEvent::Connected => "connected",
            ControlEvent::Media { .. } => "media",
            ControlEvent::SpeechStarted => "speech_started",
            ControlEvent::Stop => "stop",
        }
    }
}

/// Queue item: either data or the termination sentinel.
///
/// `End` is never handed to a station's `process`; the runner forwards it and exits.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<T> {
    Item(T),
    End,
}

/// Exactly `frame_bytes` of raw inbound audio.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    bytes: Arc<[u8]>,
    /// Position of this frame in the session's frame sequence.
    pub sequence: u64,
}

impl RawFrame {
    pub fn new(bytes: Vec<u8>, sequence: u64) -> Self {
        Self {
            bytes: Arc::from(bytes),
            sequence,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Normalized samples at the working rate, converted from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub samples: Vec<f32>,
    /// Sequence of the frame these samples were converted from.
    pub sequence: u64,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f32>, sequence: u64) -> Self {
        Self { samples, sequence }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One fixed-length analysis window.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub samples: Vec<f32>,
    /// Zero-based index of the window within the session.
    pub index: u64,
    /// Total working-rate samples consumed by the accumulator when this window closed.
    pub covers_through: u64,
    /// When the accumulator emitted the window.
    pub completed_at: Instant,
}

impl Window {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration, minimum, maximum and peak of the window, for diagnostics.
    pub fn stats(&self, working_rate: u32) -> WindowStats {
        let (min, max) = self
            .samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
                (lo.min(s), hi.max(s))
            });
        let (min, max) = if self.samples.is_empty() {
            (0.0, 0.0)
        } else {
            (min, max)
        };
        WindowStats {
            duration: Duration::from_secs_f64(self.samples.len() as f64 / working_rate as f64),
            min,
            max,
            peak: min.abs().max(max.abs()),
        }
    }
}

/// Summary statistics of one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub duration: Duration,
    pub min: f32,
    pub max: f32,
    pub peak: f32,
}

/// Result of scoring one window.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    /// Probability that the window contains genuine speech, in [0, 1].
    pub score: f64,
    /// Index of the scored window.
    pub window_index: u64,
    /// Sample watermark of the scored window; strictly increasing per session.
    pub covers_through: u64,
    /// When scoring finished.
    pub computed_at: Instant,
    /// Time spent inside the scoring capability.
    pub inference: Duration,
}

/// Instruction to clear buffered playback for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackInterrupt {
    pub session_id: SessionId,
    /// When speech start was signalled.
    pub requested_at: Instant,
}
