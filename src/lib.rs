//! callguard - real-time voice-spoof screening for relayed phone calls
//!
//! Turns a live stream of telephony media events into fixed-length analysis
//! windows, scores them off the ingestion path and routes scores and barge-in
//! interrupts to the call's consumers.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod alert;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod protocol;
pub mod recording;
pub mod replay;
pub mod scoring;

// Core capability and session types
pub use pipeline::orchestrator::{PipelineConfig, Relay};
pub use pipeline::router::{Freshness, InterruptSink, LatestScore, SpeechSignal};
pub use pipeline::session::{Session, SessionState, ShutdownReport};
pub use pipeline::types::{ControlEvent, ScoreRecord, SessionId};
pub use scoring::{Scorer, ScorerOutput};

// Error handling
pub use error::{CallguardError, Result};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.0.1+abc1234"` when git hash is available, `"0.0.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
