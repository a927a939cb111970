// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::window;

/// Windowed forward FFT producing DC-centred magnitudes.
///
/// Output bin 0 is the most negative frequency (-fs/2), bin `size / 2` is DC.
/// Magnitudes are `|X[k]| / size` with a Blackman-Harris window applied to
/// the input.
pub struct MagnitudeFft {
    fft: Arc<dyn Fft<f32>>,
    size: usize,
    window: Vec<f32>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl MagnitudeFft {
    /// Plan a forward FFT for `size` points.
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch_len = fft.get_inplace_scratch_len();
        Self {
            fft,
            size,
            window: window::blackman_harris(size),
            buffer: vec![Complex32::new(0.0, 0.0); size],
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        }
    }

    /// Transform exactly `size` samples into `size` magnitudes.
    pub fn process(&mut self, input: &[Complex32], magnitudes: &mut [f32]) {
        assert_eq!(
            input.len(),
            self.size,
            "input length {} != FFT size {}",
            input.len(),
            self.size
        );
        assert_eq!(
            magnitudes.len(),
            self.size,
            "output length {} != FFT size {}",
            magnitudes.len(),
            self.size
        );

        for ((dst, &src), &w) in self.buffer.iter_mut().zip(input).zip(&self.window) {
            *dst = src * w;
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        // Swap halves so negative frequencies come first
        let half = self.size / 2;
        let scale = 1.0 / self.size as f32;
        let upper = self.size - half;
        for (i, c) in self.buffer[upper..].iter().enumerate() {
            magnitudes[i] = c.norm() * scale;
        }
        for (i, c) in self.buffer[..upper].iter().enumerate() {
            magnitudes[half + i] = c.norm() * scale;
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
