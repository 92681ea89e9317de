use crate::defaults;
use crate::error::{CallguardError, Result};
use crate::pipeline::accumulator::OverflowPolicy;
use crate::pipeline::converter::SampleEncoding;
use crate::pipeline::orchestrator::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub window: WindowConfig,
    pub queues: QueueConfig,
    pub session: SessionConfig,
    pub alert: AlertConfig,
    pub logging: LoggingConfig,
    pub diagnostics: DiagnosticsConfig,
}

/// Inbound audio format and conversion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub frame_bytes: usize,
    pub source_rate: u32,
    pub working_rate: u32,
    pub encoding: SampleEncoding,
    pub normalize_epsilon: f32,
}

/// Analysis window configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub duration_ms: u32,
    pub overflow: OverflowPolicy,
}

/// Capacities of the queues between stations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub events: usize,
    pub frames: usize,
    pub samples: usize,
    pub windows: usize,
    pub scores: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub drain_grace_ms: u64,
}

/// Alert verdict configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub genuine_threshold: f64,
    pub freshness_tolerance_ms: u32,
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Write every scored window as a WAV file into this directory
    pub dump_dir: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_bytes: defaults::FRAME_BYTES,
            source_rate: defaults::SOURCE_RATE,
            working_rate: defaults::WORKING_RATE,
            encoding: SampleEncoding::default(),
            normalize_epsilon: defaults::NORMALIZE_EPSILON,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            duration_ms: defaults::WINDOW_MS,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            events: defaults::EVENT_QUEUE,
            frames: defaults::FRAME_QUEUE,
            samples: defaults::SAMPLE_QUEUE,
            windows: defaults::WINDOW_QUEUE,
            scores: defaults::SCORE_QUEUE,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drain_grace_ms: defaults::DRAIN_GRACE_MS,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            genuine_threshold: defaults::GENUINE_THRESHOLD,
            freshness_tolerance_ms: defaults::FRESHNESS_TOLERANCE_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CallguardError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                CallguardError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(CallguardError::ConfigFileNotFound { .. }) => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CALLGUARD_LOG_LEVEL → logging.level
    /// - CALLGUARD_WINDOW_MS → window.duration_ms
    /// - CALLGUARD_DUMP_DIR → diagnostics.dump_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("CALLGUARD_LOG_LEVEL")
            && !level.is_empty()
        {
            self.logging.level = level;
        }

        if let Ok(window) = std::env::var("CALLGUARD_WINDOW_MS")
            && !window.is_empty()
        {
            match window.parse() {
                Ok(ms) => self.window.duration_ms = ms,
                Err(_) => tracing::warn!(value = %window, "ignoring invalid CALLGUARD_WINDOW_MS"),
            }
        }

        if let Ok(dir) = std::env::var("CALLGUARD_DUMP_DIR")
            && !dir.is_empty()
        {
            self.diagnostics.dump_dir = Some(PathBuf::from(dir));
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/callguard/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("callguard").join("config.toml"))
    }

    /// Checks values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.working_rate > 0
            && (self.window.duration_ms as u64 * self.audio.working_rate as u64) % 1000 != 0
        {
            return Err(CallguardError::ConfigInvalidValue {
                key: "window.duration_ms".to_string(),
                message: "window must hold a whole number of samples".to_string(),
            });
        }
        if self.window.duration_ms == 0 {
            return Err(CallguardError::ConfigInvalidValue {
                key: "window.duration_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.alert.genuine_threshold) {
            return Err(CallguardError::ConfigInvalidValue {
                key: "alert.genuine_threshold".to_string(),
                message: format!("{} is outside [0, 1]", self.alert.genuine_threshold),
            });
        }
        if self.logging.level.parse::<tracing_subscriber::filter::EnvFilter>().is_err() {
            return Err(CallguardError::ConfigInvalidValue {
                key: "logging.level".to_string(),
                message: format!("'{}' is not a valid filter", self.logging.level),
            });
        }
        self.pipeline_config().validate()
    }

    /// Runtime pipeline configuration derived from this file.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            frame_bytes: self.audio.frame_bytes,
            source_rate: self.audio.source_rate,
            working_rate: self.audio.working_rate,
            encoding: self.audio.encoding,
            normalize_epsilon: self.audio.normalize_epsilon,
            window_samples: defaults::window_samples(
                self.window.duration_ms,
                self.audio.working_rate,
            ),
            overflow: self.window.overflow,
            event_buffer: self.queues.events,
            frame_buffer: self.queues.frames,
            sample_buffer: self.queues.samples,
            window_buffer: self.queues.windows,
            score_buffer: self.queues.scores,
            drain_grace: Duration::from_millis(self.session.drain_grace_ms),
            freshness_tolerance_samples: self.alert.freshness_tolerance_ms as u64
                * self.audio.working_rate as u64
                / 1000,
            dump_dir: self.diagnostics.dump_dir.clone(),
        }
    }
}
