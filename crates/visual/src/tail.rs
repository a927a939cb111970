// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex32;

/// Sliding window holding the most recent `capacity` samples.
///
/// Used to stitch short, resampled blocks into full FFT windows. The window
/// is "primed" once it holds `capacity` samples.
#[derive(Debug, Clone, Default)]
pub struct TailWindow {
    buf: Vec<Complex32>,
    capacity: usize,
}

impl TailWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Change the capacity, discarding held samples.
    pub fn resize(&mut self, capacity: usize) {
        self.buf.clear();
        self.buf.reserve(capacity);
        self.capacity = capacity;
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.buf.len() == self.capacity
    }

    /// Append samples, keeping only the newest `capacity`.
    pub fn push(&mut self, samples: &[Complex32]) {
        if self.capacity == 0 {
            return;
        }
        if samples.len() >= self.capacity {
            self.buf.clear();
            self.buf
                .extend_from_slice(&samples[samples.len() - self.capacity..]);
            return;
        }

        let overflow = (self.buf.len() + samples.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend_from_slice(samples);
    }

    /// Held samples, oldest first.
    pub fn window(&self) -> &[Complex32] {
        &self.buf
    }
}
