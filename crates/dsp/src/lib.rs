// Copyright 2025-2026 CEMAXECUTER LLC

//! Numeric collaborators for the visual pipeline: windowed magnitude FFT,
//! arbitrary-ratio polyphase resampler, NCO mixer and exponential smoothing.

pub mod fft;
pub mod nco;
pub mod resamp;
pub mod smooth;
pub mod window;

pub use num_complex::Complex32;
