pub mod clipping;
pub mod scorer;

pub use clipping::ClippingScorer;
pub use scorer::{MockScorer, Scorer, ScorerOutput};
