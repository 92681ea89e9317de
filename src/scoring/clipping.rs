//! Deterministic signal-level heuristic used when no trained model is loaded.

use crate::error::Result;
use crate::scoring::scorer::{Scorer, ScorerOutput};

/// Fraction of full scale above which a normalized sample counts as clipped.
const CLIP_LEVEL: f32 = 0.98;

/// Scores a window by how little of it sits at full scale.
///
/// Heavily clipped or square-wave-like audio scores low; natural speech, whose
/// peaks are short, scores high. The score is `1 - clipped_fraction * gain`,
/// clamped to [0, 1].
#[derive(Debug, Clone)]
pub struct ClippingScorer {
    clip_level: f32,
    gain: f64,
}

impl ClippingScorer {
    pub fn new() -> Self {
        Self {
            clip_level: CLIP_LEVEL,
            gain: 10.0,
        }
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    fn clipped_fraction(&self, window: &[f32]) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        let clipped = window.iter().filter(|s| s.abs() >= self.clip_level).count();
        clipped as f64 / window.len() as f64
    }
}

impl Default for ClippingScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scorer for ClippingScorer {
    fn score(&self, window: &[f32]) -> Result<ScorerOutput> {
        let fraction = self.clipped_fraction(window);
        Ok(ScorerOutput::Scalar((1.0 - fraction * self.gain).clamp(0.0, 1.0)))
    }

    fn model_name(&self) -> &str {
        "clipping-heuristic"
    }
}
