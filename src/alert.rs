//! Combines the agent's content analysis with the freshness-checked voice score.

use crate::error::{CallguardError, Result};
use crate::pipeline::router::Freshness;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of fraud named by the content analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FraudType {
    Content,
    Vocal,
    #[default]
    None,
    Both,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

/// Analysis of one utterance returned by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FraudAnalysis {
    #[serde(default)]
    pub is_fraudulent: bool,
    #[serde(default)]
    pub fraud_type: FraudType,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default = "default_reasoning")]
    pub reasoning: String,
}

fn default_reasoning() -> String {
    "No analysis.".to_string()
}

impl FraudAnalysis {
    /// Parses the JSON object the agent returns as its prompt response.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CallguardError::MalformedEvent {
            message: format!("unparsable analysis: {e}"),
        })
    }
}

/// Overall outcome for one utterance.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Normal,
    ContentFraud,
    VoiceSpoof,
    Both,
}

/// Voice evidence attached to an alert.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VoiceEvidence {
    /// Probability of genuine speech; absent before the first score.
    pub score: Option<f64>,
    pub window_index: Option<u64>,
    /// Working-rate samples between the scored audio and the utterance end.
    pub lag_samples: Option<u64>,
    pub fresh: bool,
}

/// Alert event sent to the operator console.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Alert {
    pub event: &'static str,
    pub verdict: Verdict,
    pub is_fraudulent: bool,
    pub fraud_type: FraudType,
    pub confidence: Confidence,
    pub reasoning: String,
    pub voice: VoiceEvidence,
    pub timestamp_ms: u64,
}

impl Alert {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CallguardError::Other(e.to_string()))
    }
}

/// Decides verdicts from analyses and scores.
#[derive(Debug, Clone, Copy)]
pub struct AlertAssessor {
    genuine_threshold: f64,
}

impl AlertAssessor {
    /// Fresh scores below `genuine_threshold` count as voice-spoof evidence.
    pub fn new(genuine_threshold: f64) -> Self {
        Self { genuine_threshold }
    }

    pub fn assess(&self, analysis: &FraudAnalysis, freshness: &Freshness) -> Alert {
        let voice = match freshness {
            Freshness::NoScore => VoiceEvidence {
                score: None,
                window_index: None,
                lag_samples: None,
                fresh: false,
            },
            Freshness::Fresh(record) => VoiceEvidence {
                score: Some(record.score),
                window_index: Some(record.window_index),
                lag_samples: Some(0),
                fresh: true,
            },
            Freshness::Stale { record, lag } => VoiceEvidence {
                score: Some(record.score),
                window_index: Some(record.window_index),
                lag_samples: Some(*lag),
                fresh: false,
            },
        };

        let spoofed_voice = voice.fresh && voice.score.is_some_and(|s| s < self.genuine_threshold);
        let content = analysis.is_fraudulent
            && matches!(analysis.fraud_type, FraudType::Content | FraudType::Both);
        let vocal = spoofed_voice
            || (analysis.is_fraudulent
                && matches!(analysis.fraud_type, FraudType::Vocal | FraudType::Both));

        let verdict = match (content, vocal) {
            (false, false) => Verdict::Normal,
            (true, false) => Verdict::ContentFraud,
            (false, true) => Verdict::VoiceSpoof,
            (true, true) => Verdict::Both,
        };

        if verdict == Verdict::Normal {
            tracing::info!(reasoning = %analysis.reasoning, "call appears normal");
        } else {
            tracing::warn!(
                ?verdict,
                confidence = ?analysis.confidence,
                score = ?voice.score,
                reasoning = %analysis.reasoning,
                "potential fraud detected"
            );
        }

        Alert {
            event: "fraud_update",
            verdict,
            is_fraudulent: verdict != Verdict::Normal,
            fraud_type: analysis.fraud_type,
            confidence: analysis.confidence,
            reasoning: analysis.reasoning.clone(),
            voice,
            timestamp_ms: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
