//! Concatenates converted samples into fixed-length analysis windows.

use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{SampleBuffer, Window};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// What happens to samples beyond the window boundary when a window closes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Surplus samples start the next window; windows are contiguous.
    #[default]
    Carry,
    /// Surplus samples are dropped; the next window starts with the next push,
    /// leaving a gap in coverage.
    Discard,
}

/// Accumulator state; `Emitting` only exists for the duration of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Accumulating,
    Emitting,
}

/// Threshold-driven window builder.
///
/// Emission depends only on the sample count, never on wall-clock time, so
/// window boundaries are exact multiples of accumulated audio.
pub struct WindowAccumulator {
    window_len: usize,
    policy: OverflowPolicy,
    pieces: Vec<Vec<f32>>,
    buffered: usize,
    /// Samples consumed since the session started, including discarded overflow.
    consumed: u64,
    next_index: u64,
    state: AccumulatorState,
}

impl WindowAccumulator {
    pub fn new(window_len: usize, policy: OverflowPolicy) -> Self {
        Self {
            window_len,
            policy,
            pieces: Vec::new(),
            buffered: 0,
            consumed: 0,
            next_index: 0,
            state: AccumulatorState::Accumulating,
        }
    }

    /// Adds samples; returns the windows completed by this push.
    ///
    /// With `Carry`, one large push can complete several windows. With
    /// `Discard`, at most one window is emitted and the rest is dropped.
    pub fn push(&mut self, samples: Vec<f32>) -> Vec<Window> {
        if samples.is_empty() {
            return Vec::new();
        }

        self.buffered += samples.len();
        self.pieces.push(samples);

        let mut windows = Vec::new();
        while self.buffered >= self.window_len {
            self.state = AccumulatorState::Emitting;
            windows.push(self.emit());
            self.state = AccumulatorState::Accumulating;
            if self.policy == OverflowPolicy::Discard {
                break;
            }
        }
        windows
    }

    fn emit(&mut self) -> Window {
        let mut joined: Vec<f32> = Vec::with_capacity(self.buffered);
        for piece in self.pieces.drain(..) {
            joined.extend(piece);
        }

        let overflow = joined.split_off(self.window_len);
        self.consumed += self.window_len as u64;

        match self.policy {
            OverflowPolicy::Carry => {
                self.buffered = overflow.len();
                if !overflow.is_empty() {
                    self.pieces.push(overflow);
                }
            }
            OverflowPolicy::Discard => {
                if !overflow.is_empty() {
                    tracing::debug!(samples = overflow.len(), "overflow discarded");
                }
                self.consumed += overflow.len() as u64;
                self.buffered = 0;
            }
        }

        let window = Window {
            samples: joined,
            index: self.next_index,
            covers_through: self.consumed,
            completed_at: Instant::now(),
        };
        self.next_index += 1;
        window
    }

    /// Samples waiting for the next window.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }
}

impl Station for WindowAccumulator {
    type Input = SampleBuffer;
    type Output = Window;

    fn name(&self) -> &'static str {
        "accumulator"
    }

    fn process(&mut self, buffer: SampleBuffer) -> Result<Vec<Window>, StationError> {
        let windows = self.push(buffer.samples);
        for window in &windows {
            tracing::debug!(
                index = window.index,
                covers_through = window.covers_through,
                last_frame = buffer.sequence,
                "window complete"
            );
        }
        Ok(windows)
    }

    fn shutdown(&mut self) {
        if self.buffered > 0 {
            tracing::debug!(samples = self.buffered, "partial window dropped at shutdown");
        }
    }
}
