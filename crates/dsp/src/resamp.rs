// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex32;

use crate::window;

/// Number of polyphase branches (time resolution of 1/64 input sample)
const NUM_PHASES: usize = 64;
/// Taps per branch per unit of decimation
const TAPS_PER_CYCLE: f64 = 16.0;
const MIN_TAPS_PER_PHASE: usize = 16;
const MAX_TAPS_PER_PHASE: usize = 2048;
const STOPBAND_DB: f64 = 60.0;

/// Arbitrary-ratio polyphase resampler.
///
/// A Kaiser-windowed prototype lowpass designed at `NUM_PHASES` times the
/// input rate is decomposed into polyphase branches (branch `p` gets taps
/// `p, p+P, p+2P, ...`). Each output sample picks the branch nearest to its
/// fractional input position and runs one dot product over the input
/// delay line. The cutoff follows the output Nyquist when decimating.
///
/// The number of outputs per block is `~len * ratio` but not exactly
/// predictable; fractional position and the delay line carry over between
/// calls so consecutive blocks resample as one continuous stream.
pub struct Resampler {
    ratio: f64,
    /// Input samples advanced per output sample (1 / ratio)
    step: f64,
    /// Polyphase branches: [NUM_PHASES][taps_per_phase]
    coeffs: Vec<Vec<f32>>,
    /// Last taps_per_phase - 1 input samples
    history: Vec<Complex32>,
    /// Position of the next output, relative to the start of the next block
    position: f64,
    work: Vec<Complex32>,
}

impl Resampler {
    /// Create a resampler producing `ratio` output samples per input sample.
    pub fn new(ratio: f64) -> Self {
        assert!(
            ratio.is_finite() && ratio > 0.0,
            "resample ratio must be positive, got {}",
            ratio
        );

        let bandwidth = ratio.min(1.0);
        let taps_per_phase = ((TAPS_PER_CYCLE / bandwidth).ceil() as usize)
            .clamp(MIN_TAPS_PER_PHASE, MAX_TAPS_PER_PHASE);
        let cutoff = 0.5 * bandwidth / NUM_PHASES as f64;
        let prototype = window::lowpass_prototype(
            NUM_PHASES * taps_per_phase,
            cutoff,
            STOPBAND_DB,
            NUM_PHASES as f64,
        );

        // Decompose prototype into polyphase branches
        let mut coeffs = vec![vec![0.0f32; taps_per_phase]; NUM_PHASES];
        for (p, branch) in coeffs.iter_mut().enumerate() {
            for (t, c) in branch.iter_mut().enumerate() {
                *c = prototype[p + t * NUM_PHASES];
            }
        }

        Self {
            ratio,
            step: 1.0 / ratio,
            coeffs,
            history: vec![Complex32::new(0.0, 0.0); taps_per_phase - 1],
            position: 0.0,
            work: Vec::new(),
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn taps_per_phase(&self) -> usize {
        self.history.len() + 1
    }

    /// Clear the delay line and fractional position.
    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = Complex32::new(0.0, 0.0));
        self.position = 0.0;
    }

    /// Resample a block. `output` is cleared and refilled.
    pub fn process(&mut self, input: &[Complex32], output: &mut Vec<Complex32>) {
        output.clear();
        if input.is_empty() {
            return;
        }
        output.reserve((input.len() as f64 * self.ratio).ceil() as usize + 1);

        let hist = self.history.len();
        self.work.clear();
        self.work.extend_from_slice(&self.history);
        self.work.extend_from_slice(input);

        let n = input.len() as f64;
        let mut t = self.position;
        while t < n {
            let base = t.floor();
            let newest = hist + base as usize;
            let phase = (((t - base) * NUM_PHASES as f64) as usize).min(NUM_PHASES - 1);

            let mut acc = Complex32::new(0.0, 0.0);
            for (k, &c) in self.coeffs[phase].iter().enumerate() {
                acc += self.work[newest - k] * c;
            }
            output.push(acc);
            t += self.step;
        }
        self.position = t - n;

        let start = self.work.len() - hist;
        self.history.copy_from_slice(&self.work[start..]);
    }
}
