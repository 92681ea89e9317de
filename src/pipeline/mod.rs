//! Streaming windowing and scoring pipeline for live call audio.
//!
//! Implements a per-session pipeline where each station runs in its own thread,
//! connected by bounded crossbeam channels for backpressure:
//!
//! ```text
//! events → reassembler → converter → accumulator → scoring → router
//!                                                              ├─ score cache
//!                                                              └─ score subscriber
//! speech start ─────────────────────────────→ interrupt dispatcher → sink
//! ```

pub mod accumulator;
pub mod converter;
pub mod error;
pub mod orchestrator;
pub mod reassembler;
pub mod router;
pub mod scoring_station;
pub mod session;
pub mod station;
pub mod types;

pub use accumulator::{OverflowPolicy, WindowAccumulator};
pub use converter::{SampleConverter, SampleEncoding};
pub use error::{CollectingReporter, ErrorReporter, LogReporter, StationError};
pub use orchestrator::{PipelineConfig, Relay};
pub use reassembler::{FrameReassembler, IngestWatermark};
pub use router::{
    ChannelInterruptSink, Freshness, InterruptSink, LatestScore, NullInterruptSink, ScoreCache,
    SessionIdSlot, SpeechSignal,
};
pub use scoring_station::ScoringStation;
pub use session::{Session, SessionState, ShutdownReport};
pub use station::{Station, StationOutcome, StationRunner};
pub use types::{
    ControlEvent, Flow, MediaTrack, PlaybackInterrupt, RawFrame, SampleBuffer, ScoreRecord,
    SessionId, Window,
};
