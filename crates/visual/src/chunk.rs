// Copyright 2025-2026 CEMAXECUTER LLC

use num_complex::Complex32;

/// Contiguous run of IQ samples captured at one tuning.
#[derive(Debug, Clone, Default)]
pub struct SampleChunk {
    /// Center frequency the samples were captured at (Hz)
    pub frequency: i64,
    /// Samples per second; 0 means unknown
    pub sample_rate: u32,
    pub data: Vec<Complex32>,
}

impl SampleChunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Wall-clock span covered by the samples, in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.data.len() as f64 / self.sample_rate as f64
    }
}

/// Floor used when converting magnitudes to dB.
const MIN_MAGNITUDE: f64 = 1e-12;

/// One smoothed spectrum line.
///
/// `spectrum_points` is DC-centred: point 0 is `center_frequency - bandwidth/2`.
#[derive(Debug, Clone, Default)]
pub struct SpectrumFrame {
    pub spectrum_points: Vec<f32>,
    /// Smoothed peak magnitude
    pub fft_ceiling: f64,
    /// Smoothed minimum magnitude
    pub fft_floor: f64,
    pub center_frequency: i64,
    /// Span covered by the points (Hz)
    pub bandwidth: u64,
}

impl SpectrumFrame {
    pub fn len(&self) -> usize {
        self.spectrum_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectrum_points.is_empty()
    }

    /// Frequency in Hz at the center of point `index`.
    pub fn bin_frequency(&self, index: usize) -> f64 {
        let n = self.spectrum_points.len();
        if n == 0 {
            return self.center_frequency as f64;
        }
        let bin_width = self.bandwidth as f64 / n as f64;
        self.center_frequency as f64 + (index as f64 - (n / 2) as f64) * bin_width
    }

    /// Points scaled to [0, 1] on a dB axis between floor and ceiling.
    ///
    /// A degenerate range (ceiling at or below floor) or non-finite input
    /// yields 0 for the affected points.
    pub fn display_points(&self) -> Vec<f32> {
        let floor_db = to_db(self.fft_floor);
        let range_db = to_db(self.fft_ceiling) - floor_db;
        if !range_db.is_finite() || range_db <= 0.0 {
            return vec![0.0; self.spectrum_points.len()];
        }

        self.spectrum_points
            .iter()
            .map(|&p| {
                let v = (to_db(p as f64) - floor_db) / range_db;
                if v.is_finite() {
                    v.clamp(0.0, 1.0) as f32
                } else {
                    0.0
                }
            })
            .collect()
    }
}

fn to_db(magnitude: f64) -> f64 {
    20.0 * magnitude.max(MIN_MAGNITUDE).log10()
}
