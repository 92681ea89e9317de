//! Converts raw telephony frames into normalized samples at the working rate.
//!
//! Each frame goes through three fixed steps:
//! 1. decode bytes into a signed waveform (unsigned 8-bit PCM recentred on 128, or µ-law)
//! 2. resample from the source rate to the working rate with a windowed-sinc filter
//! 3. peak-normalize by `max(|x|) + epsilon`
//!
//! The converter keeps no state between frames, so converting the same frame
//! twice yields identical output.

use crate::defaults;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{RawFrame, SampleBuffer};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// How inbound bytes encode audio samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    /// Unsigned 8-bit PCM, midpoint 128.
    #[default]
    PcmU8,
    /// G.711 µ-law.
    Mulaw,
}

impl SampleEncoding {
    fn decode(self, byte: u8) -> f64 {
        match self {
            SampleEncoding::PcmU8 => (byte as i16 - defaults::PCM_U8_MIDPOINT) as f64,
            SampleEncoding::Mulaw => mulaw_to_linear(byte) as f64,
        }
    }
}

/// Decodes one G.711 µ-law byte to 16-bit linear PCM.
fn mulaw_to_linear(mu: u8) -> i32 {
    const BIAS: i32 = 0x84;
    let mu = !mu;
    let negative = (mu & 0x80) != 0;
    let segment = ((mu & 0x70) >> 4) as i32;
    let mantissa = (mu & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << segment) - BIAS;
    if negative { -magnitude } else { magnitude }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Fixed-ratio polyphase resampler with a Hann-windowed sinc kernel.
///
/// Input outside the frame is treated as zero, so every frame is resampled
/// independently of its neighbours.
#[derive(Debug, Clone)]
pub struct Resampler {
    up: usize,
    down: usize,
    half_width: usize,
    /// One kernel per output phase, `2 * half_width` taps each.
    kernels: Vec<Vec<f64>>,
}

impl Resampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        let g = gcd(source_rate, target_rate).max(1);
        let up = (target_rate / g) as usize;
        let down = (source_rate / g) as usize;

        let band = (up as f64 / down as f64).min(1.0);
        let cutoff = band * defaults::RESAMPLE_ROLLOFF;
        let half_width = (defaults::RESAMPLE_KERNEL_HALF_WIDTH as f64 / band).ceil() as usize;

        let kernels = (0..up)
            .map(|phase| {
                let offset = phase as f64 / up as f64;
                (0..2 * half_width)
                    .map(|tap| {
                        let k = tap as f64 - (half_width as f64 - 1.0);
                        windowed_sinc(k - offset, cutoff, half_width as f64)
                    })
                    .collect()
            })
            .collect();

        Self {
            up,
            down,
            half_width,
            kernels,
        }
    }

    /// Output length for `input_len` input samples.
    pub fn output_len(&self, input_len: usize) -> usize {
        (input_len * self.up).div_ceil(self.down)
    }

    pub fn is_identity(&self) -> bool {
        self.up == self.down
    }

    pub fn process(&self, input: &[f64]) -> Vec<f64> {
        if self.is_identity() {
            return input.to_vec();
        }

        let len = input.len() as isize;
        let first_tap = self.half_width as isize - 1;

        (0..self.output_len(input.len()))
            .map(|j| {
                let position = j * self.down;
                let base = (position / self.up) as isize;
                let kernel = &self.kernels[position % self.up];
                kernel
                    .iter()
                    .enumerate()
                    .filter_map(|(tap, weight)| {
                        let idx = base + tap as isize - first_tap;
                        (0..len).contains(&idx).then(|| input[idx as usize] * weight)
                    })
                    .sum()
            })
            .collect()
    }
}

/// Low-pass kernel value at offset `t` (in input samples).
fn windowed_sinc(t: f64, cutoff: f64, half_width: f64) -> f64 {
    if t.abs() >= half_width {
        return 0.0;
    }
    let window = (PI * t / half_width / 2.0).cos().powi(2);
    let x = PI * cutoff * t;
    let sinc = if x == 0.0 { 1.0 } else { x.sin() / x };
    cutoff * sinc * window
}

/// Stateless frame-to-samples converter.
#[derive(Debug, Clone)]
pub struct SampleConverter {
    encoding: SampleEncoding,
    resampler: Resampler,
    epsilon: f64,
    frame_bytes: usize,
}

impl SampleConverter {
    pub fn new(frame_bytes: usize, source_rate: u32, working_rate: u32) -> Self {
        Self {
            encoding: SampleEncoding::default(),
            resampler: Resampler::new(source_rate, working_rate),
            epsilon: defaults::NORMALIZE_EPSILON as f64,
            frame_bytes,
        }
    }

    pub fn with_encoding(mut self, encoding: SampleEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon as f64;
        self
    }

    /// Samples produced for one frame.
    pub fn output_len(&self) -> usize {
        self.resampler.output_len(self.frame_bytes)
    }

    /// Converts one frame into normalized working-rate samples.
    pub fn convert(&self, frame: &RawFrame) -> SampleBuffer {
        let waveform: Vec<f64> = frame
            .bytes()
            .iter()
            .map(|&b| self.encoding.decode(b))
            .collect();

        let resampled = self.resampler.process(&waveform);

        let peak = resampled.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
        let scale = peak + self.epsilon;
        let samples = resampled.iter().map(|s| (s / scale) as f32).collect();

        SampleBuffer::new(samples, frame.sequence)
    }
}

impl Station for SampleConverter {
    type Input = RawFrame;
    type Output = SampleBuffer;

    fn name(&self) -> &'static str {
        "converter"
    }

    fn process(&mut self, frame: RawFrame) -> Result<Vec<SampleBuffer>, StationError> {
        if frame.len() != self.frame_bytes {
            return Err(StationError::Fatal(format!(
                "frame {} has {} bytes, expected {}",
                frame.sequence,
                frame.len(),
                self.frame_bytes
            )));
        }
        Ok(vec![self.convert(&frame)])
    }
}
