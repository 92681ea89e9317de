//! Process-level relay that opens isolated call sessions.

use crate::defaults;
use crate::error::{CallguardError, Result};
use crate::pipeline::accumulator::OverflowPolicy;
use crate::pipeline::converter::SampleEncoding;
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::router::InterruptSink;
use crate::pipeline::session::Session;
use crate::scoring::Scorer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runtime configuration shared by every session.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Raw frame size in bytes
    pub frame_bytes: usize,
    /// Inbound and analysis sample rates
    pub source_rate: u32,
    pub working_rate: u32,
    pub encoding: SampleEncoding,
    pub normalize_epsilon: f32,
    /// Exact number of working-rate samples per window
    pub window_samples: usize,
    pub overflow: OverflowPolicy,
    /// Channel buffer sizes
    pub event_buffer: usize,
    pub frame_buffer: usize,
    pub sample_buffer: usize,
    pub window_buffer: usize,
    pub score_buffer: usize,
    /// How long a closing session may spend draining
    pub drain_grace: Duration,
    /// How far a score may trail the utterance end and still be fresh
    pub freshness_tolerance_samples: u64,
    /// Optional directory receiving a WAV file per scored window
    pub dump_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_bytes: defaults::FRAME_BYTES,
            source_rate: defaults::SOURCE_RATE,
            working_rate: defaults::WORKING_RATE,
            encoding: SampleEncoding::default(),
            normalize_epsilon: defaults::NORMALIZE_EPSILON,
            window_samples: defaults::window_samples(defaults::WINDOW_MS, defaults::WORKING_RATE),
            overflow: OverflowPolicy::default(),
            event_buffer: defaults::EVENT_QUEUE,
            frame_buffer: defaults::FRAME_QUEUE,
            sample_buffer: defaults::SAMPLE_QUEUE,
            window_buffer: defaults::WINDOW_QUEUE,
            score_buffer: defaults::SCORE_QUEUE,
            drain_grace: Duration::from_millis(defaults::DRAIN_GRACE_MS),
            freshness_tolerance_samples: defaults::FRESHNESS_TOLERANCE_MS as u64
                * defaults::WORKING_RATE as u64
                / 1000,
            dump_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Checks the invariants the stations rely on.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("frame_bytes", self.frame_bytes),
            ("source_rate", self.source_rate as usize),
            ("working_rate", self.working_rate as usize),
            ("window_samples", self.window_samples),
            ("event_buffer", self.event_buffer),
            ("frame_buffer", self.frame_buffer),
            ("sample_buffer", self.sample_buffer),
            ("window_buffer", self.window_buffer),
            ("score_buffer", self.score_buffer),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        if (self.frame_bytes as u64 * self.working_rate as u64) % self.source_rate as u64 != 0 {
            return Err(invalid(
                "frame_bytes",
                "frame must convert to a whole number of working-rate samples",
            ));
        }
        if self.normalize_epsilon.is_nan() || self.normalize_epsilon <= 0.0 {
            return Err(invalid("normalize_epsilon", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> CallguardError {
    CallguardError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Opens sessions sharing one scorer.
///
/// The scorer is constructed once before the first session and only read by
/// sessions; each session gets its own queues, threads, cache and id slot.
pub struct Relay {
    config: PipelineConfig,
    scorer: Arc<dyn Scorer>,
    error_reporter: Arc<dyn ErrorReporter>,
}

impl Relay {
    /// Creates a relay reporting station errors through `tracing`.
    ///
    /// Fails if the scorer declares an input length other than the window length.
    pub fn new(config: PipelineConfig, scorer: Arc<dyn Scorer>) -> Result<Self> {
        config.validate()?;
        if let Some(expected) = scorer.input_len()
            && expected != config.window_samples
        {
            return Err(CallguardError::ContractViolation {
                message: format!(
                    "model {} expects {} samples per window, configured {}",
                    scorer.model_name(),
                    expected,
                    config.window_samples
                ),
            });
        }
        Ok(Self {
            config,
            scorer,
            error_reporter: Arc::new(LogReporter),
        })
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Starts a new session delivering playback interrupts to `interrupt_sink`.
    pub fn open_session(&self, interrupt_sink: Arc<dyn InterruptSink>) -> Result<Session> {
        Session::start(
            &self.config,
            self.scorer.clone(),
            self.error_reporter.clone(),
            interrupt_sink,
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
