use crate::error::{CallguardError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Raw output of a scoring capability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScorerOutput {
    /// Probability of genuine speech, nominally in [0, 1].
    Scalar(f64),
    /// Unnormalized two-class logits; index 0 is "genuine".
    ClassLogits([f64; 2]),
}

impl ScorerOutput {
    /// Reduces the output to a probability of genuine speech in [0, 1].
    ///
    /// Scalars are clamped; logits go through a softmax and index 0 is selected.
    /// Non-finite values are a scoring failure.
    pub fn genuine_probability(&self) -> Result<f64> {
        match *self {
            ScorerOutput::Scalar(value) => {
                if !value.is_finite() {
                    return Err(CallguardError::Scoring {
                        message: format!("non-finite score {value}"),
                    });
                }
                Ok(value.clamp(0.0, 1.0))
            }
            ScorerOutput::ClassLogits(logits) => softmax_first(logits),
        }
    }
}

fn softmax_first([genuine, spoof]: [f64; 2]) -> Result<f64> {
    if !genuine.is_finite() || !spoof.is_finite() {
        return Err(CallguardError::Scoring {
            message: format!("non-finite logits [{genuine}, {spoof}]"),
        });
    }
    let max = genuine.max(spoof);
    let a = (genuine - max).exp();
    let b = (spoof - max).exp();
    Ok(a / (a + b))
}

/// Anomaly-scoring capability.
///
/// Constructed once per process and shared read-only by every session;
/// `score` must not mutate model state.
pub trait Scorer: Send + Sync {
    /// Scores one window of normalized samples at the working rate.
    ///
    /// # Arguments
    /// * `window` - Exactly one configured window of samples in [-1, 1]
    fn score(&self, window: &[f32]) -> Result<ScorerOutput>;

    /// Name of the loaded model, for logs.
    fn model_name(&self) -> &str;

    /// Window length the model was exported for, if it is fixed.
    fn input_len(&self) -> Option<usize> {
        None
    }
}

impl<T: Scorer> Scorer for Arc<T> {
    fn score(&self, window: &[f32]) -> Result<ScorerOutput> {
        (**self).score(window)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn input_len(&self) -> Option<usize> {
        (**self).input_len()
    }
}

/// Scripted scorer for tests.
///
/// Call `n` (zero-based) returns `outputs[n % outputs.len()]`, unless it is
/// configured to fail or panic.
#[derive(Debug)]
pub struct MockScorer {
    model_name: String,
    outputs: Vec<ScorerOutput>,
    fail_on: HashSet<usize>,
    panic_on: HashSet<usize>,
    delay: Duration,
    input_len: Option<usize>,
    calls: AtomicUsize,
}

impl MockScorer {
    /// Create a mock that always returns a genuine score of 0.9.
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            outputs: vec![ScorerOutput::Scalar(0.9)],
            fail_on: HashSet::new(),
            panic_on: HashSet::new(),
            delay: Duration::ZERO,
            input_len: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Outputs returned in order, cycling when exhausted.
    pub fn with_outputs(mut self, outputs: Vec<ScorerOutput>) -> Self {
        if !outputs.is_empty() {
            self.outputs = outputs;
        }
        self
    }

    /// Fail the given call with a scoring error.
    pub fn with_failure_on(mut self, call: usize) -> Self {
        self.fail_on.insert(call);
        self
    }

    /// Panic inside the given call.
    pub fn with_panic_on(mut self, call: usize) -> Self {
        self.panic_on.insert(call);
        self
    }

    /// Sleep this long in every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Declare a fixed input length.
    pub fn with_input_len(mut self, len: usize) -> Self {
        self.input_len = Some(len);
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Scorer for MockScorer {
    fn score(&self, _window: &[f32]) -> Result<ScorerOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panic_on.contains(&call) {
            panic!("mock scorer panic on call {call}");
        }
        if self.fail_on.contains(&call) {
            return Err(CallguardError::Scoring {
                message: format!("mock scoring failure on call {call}"),
            });
        }
        Ok(self.outputs[call % self.outputs.len()])
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn input_len(&self) -> Option<usize> {
        self.input_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_is_clamped() {
        assert_eq!(ScorerOutput::Scalar(0.3).genuine_probability().unwrap(), 0.3);
        assert_eq!(ScorerOutput::Scalar(1.7).genuine_probability().unwrap(), 1.0);
        assert_eq!(ScorerOutput::Scalar(-0.2).genuine_probability().unwrap(), 0.0);
    }

    #[test]
    fn test_non_finite_scalar_is_error() {
        assert!(ScorerOutput::Scalar(f64::NAN).genuine_probability().is_err());
        assert!(
            ScorerOutput::Scalar(f64::INFINITY)
                .genuine_probability()
                .is_err()
        );
    }

    #[test]
    fn test_softmax_selects_genuine_class() {
        let even = ScorerOutput::ClassLogits([0.0, 0.0]);
        assert!((even.genuine_probability().unwrap() - 0.5).abs() < 1e-12);

        let genuine = ScorerOutput::ClassLogits([3.0, -1.0]);
        let p = genuine.genuine_probability().unwrap();
        let expected = 1.0 / (1.0 + (-4.0f64).exp());
        assert!((p - expected).abs() < 1e-12);

        let spoof = ScorerOutput::ClassLogits([-2.0, 2.0]);
        assert!(spoof.genuine_probability().unwrap() < 0.05);
    }

    #[test]
    fn test_softmax_handles_large_logits() {
        let p = ScorerOutput::ClassLogits([1000.0, 990.0])
            .genuine_probability()
            .unwrap();
        assert!(p.is_finite());
        assert!(p > 0.99);
    }

    #[test]
    fn test_non_finite_logits_are_error() {
        assert!(
            ScorerOutput::ClassLogits([f64::NAN, 0.0])
                .genuine_probability()
                .is_err()
        );
    }

    #[test]
    fn test_mock_scorer_cycles_outputs() {
        let scorer = MockScorer::new("mock")
            .with_outputs(vec![ScorerOutput::Scalar(0.1), ScorerOutput::Scalar(0.2)]);
        let window = [0.0f32; 4];
        assert_eq!(scorer.score(&window).unwrap(), ScorerOutput::Scalar(0.1));
        assert_eq!(scorer.score(&window).unwrap(), ScorerOutput::Scalar(0.2));
        assert_eq!(scorer.score(&window).unwrap(), ScorerOutput::Scalar(0.1));
        assert_eq!(scorer.calls(), 3);
    }

    #[test]
    fn test_mock_scorer_fails_on_configured_call() {
        let scorer = MockScorer::new("mock").with_failure_on(1);
        let window = [0.0f32; 4];
        assert!(scorer.score(&window).is_ok());
        match scorer.score(&window) {
            Err(CallguardError::Scoring { message }) => assert!(message.contains("call 1")),
            other => panic!("expected scoring error, got {other:?}"),
        }
        assert!(scorer.score(&window).is_ok());
    }

    #[test]
    fn test_scorer_trait_is_object_safe() {
        let scorer: Arc<dyn Scorer> = Arc::new(MockScorer::new("boxed"));
        assert_eq!(scorer.model_name(), "boxed");
        assert_eq!(scorer.score(&[0.5]).unwrap(), ScorerOutput::Scalar(0.9));
        assert_eq!(scorer.input_len(), None);

        let inner = Arc::new(MockScorer::new("fixed").with_input_len(32000));
        let fixed: Arc<dyn Scorer> = Arc::new(inner);
        assert_eq!(fixed.input_len(), Some(32000));
    }
}
