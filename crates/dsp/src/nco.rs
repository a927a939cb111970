// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex32;
use std::f64::consts::TAU;

/// Numerically controlled oscillator used as a frequency shifter.
///
/// Phase is kept in f64 and wrapped every block so long runs do not lose
/// precision. Frequency is in radians per sample and may be negative.
#[derive(Debug, Clone)]
pub struct Nco {
    phase: f64,
    phase_inc: f64,
}

impl Nco {
    pub fn new(freq_rad: f64) -> Self {
        Self {
            phase: 0.0,
            phase_inc: freq_rad,
        }
    }

    /// Build an oscillator that shifts by `shift_hz` at `sample_rate`.
    pub fn for_shift(shift_hz: f64, sample_rate: f64) -> Self {
        let mut nco = Self::new(0.0);
        nco.set_shift(shift_hz, sample_rate);
        nco
    }

    pub fn set_frequency(&mut self, freq_rad: f64) {
        self.phase_inc = freq_rad;
    }

    pub fn set_shift(&mut self, shift_hz: f64, sample_rate: f64) {
        self.phase_inc = if sample_rate > 0.0 {
            TAU * shift_hz / sample_rate
        } else {
            0.0
        };
    }

    pub fn frequency(&self) -> f64 {
        self.phase_inc
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Mix a block down by the oscillator frequency: `y[n] = x[n] * e^(-j*phase[n])`.
    ///
    /// A component at +f moves to DC; a negative frequency mixes up.
    /// `output` is cleared and refilled.
    pub fn mix_down(&mut self, input: &[Complex32], output: &mut Vec<Complex32>) {
        output.clear();
        output.reserve(input.len());

        let phase_start = self.phase;
        for (idx, &sample) in input.iter().enumerate() {
            let phase = phase_start + idx as f64 * self.phase_inc;
            let (sin, cos) = phase.sin_cos();
            output.push(sample * Complex32::new(cos as f32, -(sin as f32)));
        }
        self.phase = (phase_start + input.len() as f64 * self.phase_inc).rem_euclid(TAU);
    }
}
