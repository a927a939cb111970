// Copyright 2025-2026 CEMAXECUTER LLC

/// Smallest smoothing rate accepted; lower values are clamped up to it.
pub const MIN_AVERAGE_RATE: f32 = 1e-4;

/// Clamp an averaging rate into `[MIN_AVERAGE_RATE, 1]`. NaN means no smoothing.
pub fn clamp_rate(rate: f32) -> f64 {
    if rate.is_nan() {
        return 1.0;
    }
    rate.clamp(MIN_AVERAGE_RATE, 1.0) as f64
}

/// Two cascaded exponential moving averages.
///
/// `fast` follows the input, `slow` follows `fast`:
///   fast += rate * (x - fast)
///   slow += rate * (fast - slow)
/// The first update after construction or `reset` seeds both layers with
/// the measurement. A rate of 1 makes both layers equal the latest input.
#[derive(Debug, Clone, Default)]
pub struct DoubleMovingAverage {
    fast: f64,
    slow: f64,
    seeded: bool,
}

impl DoubleMovingAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64, rate: f64) -> f64 {
        if !self.seeded {
            self.fast = value;
            self.slow = value;
            self.seeded = true;
        } else {
            self.fast += rate * (value - self.fast);
            self.slow += rate * (self.fast - self.slow);
        }
        self.slow
    }

    pub fn fast(&self) -> f64 {
        self.fast
    }

    pub fn slow(&self) -> f64 {
        self.slow
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Per-bin double moving average over a spectrum curve.
#[derive(Debug, Clone, Default)]
pub struct SpectrumSmoother {
    fast: Vec<f64>,
    slow: Vec<f64>,
}

impl SpectrumSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bins currently tracked (0 until the first update).
    pub fn len(&self) -> usize {
        self.slow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slow.is_empty()
    }

    pub fn reset(&mut self) {
        self.fast.clear();
        self.slow.clear();
    }

    /// Feed one raw spectrum and write the slow layer into `out`.
    ///
    /// A length change reseeds every bin from `raw`.
    pub fn update(&mut self, raw: &[f32], rate: f64, out: &mut [f32]) {
        assert_eq!(raw.len(), out.len(), "smoother input/output length mismatch");

        if self.slow.len() != raw.len() {
            self.fast = raw.iter().map(|&v| v as f64).collect();
            self.slow = self.fast.clone();
        } else {
            for ((fast, slow), &x) in self.fast.iter_mut().zip(self.slow.iter_mut()).zip(raw) {
                *fast += rate * (x as f64 - *fast);
                *slow += rate * (*fast - *slow);
            }
        }

        for (dst, &s) in out.iter_mut().zip(&self.slow) {
            *dst = s as f32;
        }
    }
}
