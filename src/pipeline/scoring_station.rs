//! Scoring station that runs the anomaly scorer on each completed window.

use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{ScoreRecord, Window};
use crate::recording::WindowRecorder;
use crate::scoring::Scorer;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Station that scores windows one at a time.
///
/// The runner pulls one window, scores it and only then pulls the next, so at
/// most one inference is in flight per session and a slow scorer back-pressures
/// the window queue.
///
/// Failures inside the scorer (errors, non-finite output, panics) are
/// recoverable: the window produces no record and the next one is scored
/// normally. A window of the wrong length is a fatal contract violation.
pub struct ScoringStation {
    scorer: Arc<dyn Scorer>,
    window_len: usize,
    working_rate: u32,
    recorder: Option<WindowRecorder>,
    scored: u64,
    failed: u64,
}

impl ScoringStation {
    /// Create a new scoring station.
    ///
    /// # Arguments
    /// * `scorer` - Shared scoring capability
    /// * `window_len` - Exact number of samples every window must carry
    /// * `working_rate` - Sample rate of the windows, for diagnostics
    pub fn new(scorer: Arc<dyn Scorer>, window_len: usize, working_rate: u32) -> Self {
        Self {
            scorer,
            window_len,
            working_rate,
            recorder: None,
            scored: 0,
            failed: 0,
        }
    }

    /// Dump every scored window as a WAV file.
    pub fn with_recorder(mut self, recorder: Option<WindowRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Scores one window.
    pub fn score(&mut self, window: &Window) -> Result<ScoreRecord, StationError> {
        if window.len() != self.window_len {
            return Err(StationError::Fatal(format!(
                "window {} has {} samples, expected exactly {}",
                window.index,
                window.len(),
                self.window_len
            )));
        }

        let stats = window.stats(self.working_rate);
        tracing::debug!(
            index = window.index,
            duration_ms = stats.duration.as_millis() as u64,
            min = stats.min,
            max = stats.max,
            peak = stats.peak,
            queued_ms = window.completed_at.elapsed().as_millis() as u64,
            "scoring window"
        );

        if let Some(recorder) = &self.recorder {
            match recorder.write(window) {
                Ok(path) => tracing::debug!(path = %path.display(), "window dumped"),
                Err(e) => tracing::warn!(index = window.index, error = %e, "window dump failed"),
            }
        }

        let started = Instant::now();
        let scorer = &self.scorer;
        let result = panic::catch_unwind(AssertUnwindSafe(|| scorer.score(&window.samples)));
        let inference = started.elapsed();

        let probability = match result {
            Ok(Ok(output)) => output.genuine_probability(),
            Ok(Err(e)) => Err(e),
            Err(payload) => {
                self.failed += 1;
                return Err(StationError::Recoverable(format!(
                    "scorer panicked on window {}: {}",
                    window.index,
                    panic_message(payload.as_ref())
                )));
            }
        };

        match probability {
            Ok(score) => {
                self.scored += 1;
                tracing::debug!(
                    index = window.index,
                    score,
                    inference_ms = inference.as_millis() as u64,
                    "window scored"
                );
                Ok(ScoreRecord {
                    score,
                    window_index: window.index,
                    covers_through: window.covers_through,
                    computed_at: Instant::now(),
                    inference,
                })
            }
            Err(e) => {
                self.failed += 1;
                Err(StationError::Recoverable(format!(
                    "window {} not scored: {}",
                    window.index, e
                )))
            }
        }
    }

    /// Windows scored successfully.
    pub fn scored(&self) -> u64 {
        self.scored
    }

    /// Windows whose scoring failed.
    pub fn failed(&self) -> u64 {
        self.failed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Station for ScoringStation {
    type Input = Window;
    type Output = ScoreRecord;

    fn name(&self) -> &'static str {
        "scoring"
    }

    fn process(&mut self, window: Window) -> Result<Vec<ScoreRecord>, StationError> {
        self.score(&window).map(|record| vec![record])
    }

    fn shutdown(&mut self) {
        tracing::debug!(
            model = self.scorer.model_name(),
            scored = self.scored,
            failed = self.failed,
            "scoring finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{ClippingScorer, MockScorer, ScorerOutput};

    fn window(index: u64, len: usize) -> Window {
        Window {
            samples: (0..len).map(|i| ((i % 17) as f32 / 17.0) - 0.5).collect(),
            index,
            covers_through: (index + 1) * len as u64,
            completed_at: Instant::now(),
        }
    }

    #[test]
    fn test_scalar_score_becomes_record() {
        let scorer = MockScorer::new("mock").with_outputs(vec![ScorerOutput::Scalar(0.25)]);
        let mut station = ScoringStation::new(Arc::new(scorer), 100, 16000);
        let record = station.score(&window(2, 100)).unwrap();
        assert_eq!(record.score, 0.25);
        assert_eq!(record.window_index, 2);
        assert_eq!(record.covers_through, 300);
        assert_eq!(station.scored(), 1);
    }

    #[test]
    fn test_logits_are_normalized() {
        let scorer = MockScorer::new("mock").with_outputs(vec![ScorerOutput::ClassLogits([0.0, 0.0])]);
        let mut station = ScoringStation::new(Arc::new(scorer), 10, 16000);
        let record = station.score(&window(0, 10)).unwrap();
        assert!((record.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_length_is_fatal() {
        let mut station = ScoringStation::new(Arc::new(MockScorer::new("mock")), 100, 16000);
        let result = station.score(&window(0, 99));
        assert!(matches!(result, Err(StationError::Fatal(_))));
    }

    #[test]
    fn test_scorer_error_is_recoverable() {
        let scorer = MockScorer::new("mock").with_failure_on(0);
        let mut station = ScoringStation::new(Arc::new(scorer), 10, 16000);
        assert!(matches!(
            station.score(&window(0, 10)),
            Err(StationError::Recoverable(_))
        ));
        assert!(station.score(&window(1, 10)).is_ok());
        assert_eq!(station.failed(), 1);
        assert_eq!(station.scored(), 1);
    }

    #[test]
    fn test_nan_score_is_recoverable() {
        let scorer = MockScorer::new("mock").with_outputs(vec![ScorerOutput::Scalar(f64::NAN)]);
        let mut station = ScoringStation::new(Arc::new(scorer), 10, 16000);
        assert!(matches!(
            station.score(&window(0, 10)),
            Err(StationError::Recoverable(_))
        ));
    }

    #[test]
    fn test_scorer_panic_is_caught() {
        let scorer = MockScorer::new("mock").with_panic_on(0);
        let mut station = ScoringStation::new(Arc::new(scorer), 10, 16000);
        match station.score(&window(0, 10)) {
            Err(StationError::Recoverable(msg)) => assert!(msg.contains("panicked")),
            other => panic!("expected recoverable error, got {other:?}"),
        }
        assert!(station.score(&window(1, 10)).is_ok());
    }

    #[test]
    fn test_deterministic_scorer_is_idempotent() {
        let mut station = ScoringStation::new(Arc::new(ClippingScorer::new()), 200, 16000);
        let w = window(0, 200);
        let first = station.score(&w).unwrap();
        let second = station.score(&w).unwrap();
        assert_eq!(first.score, second.score);
    }

    #[test]
    fn test_recorder_dumps_scored_windows() {
        use crate::pipeline::router::SessionIdSlot;
        use crate::pipeline::types::SessionId;

        let dir = tempfile::tempdir().unwrap();
        let (slot, _rx) = SessionIdSlot::new();
        slot.publish(SessionId::new("S1"));
        let recorder = WindowRecorder::new(dir.path(), 16000, slot).unwrap();
        let expected = recorder.path_for(5);
        let mut station = ScoringStation::new(Arc::new(MockScorer::new("mock")), 10, 16000)
            .with_recorder(Some(recorder));

        station.process(window(5, 10)).unwrap();
        assert!(expected.is_file());
        let name = expected.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("S1-") && name.ends_with("-5.wav"), "{name}");
    }
}
