// Copyright 2025-2026 CEMAXECUTER LLC

//! Spectrum transform stage.
//!
//! Per chunk: shift the requested center to DC, resample down to the
//! requested bandwidth, slide the result into an FFT-sized tail window and,
//! once primed, transform it. Magnitudes are smoothed per bin with a double
//! moving average; the spectrum's peak and minimum are smoothed the same way
//! to give a stable display ceiling and floor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use num_complex::Complex32;
use sv_dsp::fft::MagnitudeFft;
use sv_dsp::nco::Nco;
use sv_dsp::resamp::Resampler;
use sv_dsp::smooth::{clamp_rate, DoubleMovingAverage, SpectrumSmoother};

use crate::chunk::{SampleChunk, SpectrumFrame};
use crate::config::{ConfigSnapshot, VisualConfig};
use crate::pool::{BufferPool, Shared};
use crate::stage::Stage;
use crate::tail::TailWindow;

pub struct SpectrumProcessor {
    config: Arc<VisualConfig>,
    pool: BufferPool<SpectrumFrame>,
    /// Input samples needed per FFT window at the current resample ratio
    desired_input_size: Arc<AtomicUsize>,

    fft_size: usize,
    fft: Option<MagnitudeFft>,
    tail: TailWindow,
    raw: Vec<f32>,
    smoother: SpectrumSmoother,
    ceiling: DoubleMovingAverage,
    floor: DoubleMovingAverage,

    // Resampling, rebuilt when bandwidth or input rate change
    resample_bandwidth: u64,
    resample_input_rate: u32,
    resample_ratio: f64,
    resampler: Option<Resampler>,
    resample_buffer: Vec<Complex32>,

    // Frequency shift, recomputed when center, input tuning or rate change
    shift_center: i64,
    shift_input_frequency: i64,
    shift_input_rate: u32,
    shift_frequency: i64,
    nco: Nco,
    shift_buffer: Vec<Complex32>,

    was_view: bool,
    emitted: u64,
}

impl SpectrumProcessor {
    pub fn new(config: Arc<VisualConfig>) -> Self {
        let fft_size = config.fft_size();
        let mut processor = Self {
            config,
            pool: BufferPool::new(),
            desired_input_size: Arc::new(AtomicUsize::new(fft_size)),
            fft_size: 0,
            fft: None,
            tail: TailWindow::default(),
            raw: Vec::new(),
            smoother: SpectrumSmoother::new(),
            ceiling: DoubleMovingAverage::new(),
            floor: DoubleMovingAverage::new(),
            resample_bandwidth: 0,
            resample_input_rate: 0,
            resample_ratio: 1.0,
            resampler: None,
            resample_buffer: Vec::new(),
            shift_center: 0,
            shift_input_frequency: 0,
            shift_input_rate: 0,
            shift_frequency: 0,
            nco: Nco::new(0.0),
            shift_buffer: Vec::new(),
            was_view: true,
            emitted: 0,
        };
        processor.setup(fft_size);
        processor
    }

    /// Input samples needed to fill one FFT window after resampling.
    pub fn desired_input_size(&self) -> usize {
        self.desired_input_size.load(Ordering::Relaxed)
    }

    /// Shared view of [`desired_input_size`](Self::desired_input_size) for
    /// upstream stages on other threads.
    pub fn desired_input_handle(&self) -> Arc<AtomicUsize> {
        self.desired_input_size.clone()
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Frequency offset currently removed from the input (Hz).
    pub fn shift_frequency(&self) -> i64 {
        self.shift_frequency
    }

    pub fn resample_ratio(&self) -> f64 {
        self.resample_ratio
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn pool(&self) -> &BufferPool<SpectrumFrame> {
        &self.pool
    }

    /// Re-plan for a new FFT size. Discards the tail and all smoothing state.
    fn setup(&mut self, fft_size: usize) {
        self.fft_size = fft_size;
        self.fft = if fft_size > 0 {
            Some(MagnitudeFft::new(fft_size))
        } else {
            None
        };
        self.tail.resize(fft_size);
        self.raw.clear();
        self.raw.resize(fft_size, 0.0);
        self.smoother.reset();
        self.ceiling.reset();
        self.floor.reset();
        self.publish_desired_input_size();
        log::debug!("spectrum: FFT size {}", fft_size);
    }

    fn publish_desired_input_size(&self) {
        let desired = (self.fft_size as f64 / self.resample_ratio).ceil() as usize;
        self.desired_input_size.store(desired, Ordering::Relaxed);
    }

    fn update_resampler(&mut self, bandwidth: u64, input_rate: u32) {
        if bandwidth == self.resample_bandwidth && input_rate == self.resample_input_rate {
            return;
        }
        self.resample_bandwidth = bandwidth;
        self.resample_input_rate = input_rate;

        // Held samples were taken at the old rate, even when the ratio is unchanged
        self.tail.clear();

        let ratio = if bandwidth == 0 || bandwidth >= input_rate as u64 {
            1.0
        } else {
            bandwidth as f64 / input_rate as f64
        };
        if ratio == self.resample_ratio && self.resampler.is_some() == (ratio < 1.0) {
            if let Some(resampler) = self.resampler.as_mut() {
                resampler.reset();
            }
            return;
        }

        self.resample_ratio = ratio;
        self.resampler = if ratio < 1.0 {
            Some(Resampler::new(ratio))
        } else {
            None
        };
        self.publish_desired_input_size();
        log::debug!(
            "spectrum: resample ratio {:.6} ({} Hz of {} Hz)",
            ratio,
            bandwidth,
            input_rate
        );
    }

    fn update_shift(&mut self, center: i64, input_frequency: i64, input_rate: u32) {
        if center == self.shift_center
            && input_frequency == self.shift_input_frequency
            && input_rate == self.shift_input_rate
        {
            return;
        }
        self.shift_center = center;
        self.shift_input_frequency = input_frequency;
        self.shift_input_rate = input_rate;

        let in_band = |offset: i64| (offset.unsigned_abs() as f64) < input_rate as f64 / 2.0;
        let shift = match center.checked_sub(input_frequency) {
            Some(offset) if in_band(offset) => offset,
            _ => {
                log::debug!(
                    "spectrum: center {} Hz outside input band {} Hz +/- {} Hz, not shifting",
                    center,
                    input_frequency,
                    input_rate / 2
                );
                0
            }
        };

        self.shift_frequency = shift;
        self.nco.set_shift(shift as f64, input_rate as f64);
        self.nco.reset();
    }

    fn transform(&mut self, cfg: &ConfigSnapshot, input: &SampleChunk) -> Option<Shared<SpectrumFrame>> {
        let fft = self.fft.as_mut()?;
        fft.process(self.tail.window(), &mut self.raw);

        let rate = clamp_rate(cfg.average_rate);
        let (mut peak, mut low) = (f32::NEG_INFINITY, f32::INFINITY);
        for &m in &self.raw {
            peak = peak.max(m);
            low = low.min(m);
        }

        let mut frame = self.pool.acquire();
        frame.spectrum_points.resize(self.fft_size, 0.0);
        self.smoother
            .update(&self.raw, rate, &mut frame.spectrum_points);
        frame.fft_ceiling = self.ceiling.update(peak as f64, rate);
        frame.fft_floor = self.floor.update(low as f64, rate);
        frame.center_frequency = input.frequency + self.shift_frequency;
        frame.bandwidth = if self.resampler.is_some() {
            self.resample_bandwidth
        } else {
            input.sample_rate as u64
        };

        self.emitted += 1;
        Some(frame.share())
    }
}

impl Stage for SpectrumProcessor {
    type Input = SampleChunk;
    type Output = SpectrumFrame;

    fn process(&mut self, input: &SampleChunk, out: &mut Vec<Shared<SpectrumFrame>>) {
        let cfg = self.config.snapshot();

        if !cfg.is_view {
            // Nothing from before the gap may reach the next active window
            if self.was_view {
                self.tail.clear();
                if let Some(resampler) = self.resampler.as_mut() {
                    resampler.reset();
                }
                self.nco.reset();
                self.was_view = false;
            }
            return;
        }
        self.was_view = true;

        if cfg.fft_size != self.fft_size {
            self.setup(cfg.fft_size);
        }
        if self.fft_size == 0 || input.data.is_empty() || input.sample_rate == 0 {
            return;
        }

        self.update_resampler(cfg.bandwidth, input.sample_rate);
        self.update_shift(cfg.center_frequency, input.frequency, input.sample_rate);

        let shifted: &[Complex32] = if self.shift_frequency != 0 {
            self.nco.mix_down(&input.data, &mut self.shift_buffer);
            &self.shift_buffer
        } else {
            &input.data
        };

        let pushed = match self.resampler.as_mut() {
            Some(resampler) => {
                resampler.process(shifted, &mut self.resample_buffer);
                self.tail.push(&self.resample_buffer);
                self.resample_buffer.len()
            }
            None => {
                self.tail.push(shifted);
                shifted.len()
            }
        };

        // Still priming, or nothing new since the last transform
        if pushed == 0 || !self.tail.is_full() {
            return;
        }

        if let Some(frame) = self.transform(&cfg, input) {
            out.push(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQ: i64 = 100_000_000;

    fn tone_chunk(sample_rate: u32, offset_hz: f64, amplitude: f32, start: usize, n: usize) -> SampleChunk {
        let data = (start..start + n)
            .map(|i| {
                let p = 2.0 * std::f64::consts::PI * offset_hz * i as f64 / sample_rate as f64;
                Complex32::new(p.cos() as f32, p.sin() as f32) * amplitude
            })
            .collect();
        SampleChunk {
            frequency: FREQ,
            sample_rate,
            data,
        }
    }

    fn processor(fft_size: usize) -> SpectrumProcessor {
        let cfg = VisualConfig::new();
        cfg.set_fft_size(fft_size);
        cfg.set_center_frequency(FREQ);
        cfg.set_bandwidth(0);
        cfg.set_average_rate(1.0);
        SpectrumProcessor::new(Arc::new(cfg))
    }

    fn peak_bin(points: &[f32]) -> usize {
        points
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
            .0
    }

    fn run(p: &mut SpectrumProcessor, chunk: &SampleChunk) -> Vec<Shared<SpectrumFrame>> {
        let mut out = Vec::new();
        p.process(chunk, &mut out);
        out
    }

    #[test]
    fn test_tone_lands_in_expected_bin() {
        // 1 kHz bins
        let mut p = processor(1024);
        let out = run(&mut p, &tone_chunk(1_024_000, 64_000.0, 1.0, 0, 1024));
        assert_eq!(out.len(), 1);
        let frame = &out[0];
        assert_eq!(frame.spectrum_points.len(), 1024);
        assert_eq!(peak_bin(&frame.spectrum_points), 512 + 64);
        assert_eq!(frame.center_frequency, FREQ);
        assert_eq!(frame.bandwidth, 1_024_000);
        assert_eq!(frame.bin_frequency(576), (FREQ + 64_000) as f64);
    }

    #[test]
    fn test_shift_moves_center_to_dc() {
        let mut p = processor(1024);
        p.config.set_center_frequency(FREQ + 64_000);
        let out = run(&mut p, &tone_chunk(1_024_000, 64_000.0, 1.0, 0, 1024));
        assert_eq!(p.shift_frequency(), 64_000);
        assert_eq!(peak_bin(&out[0].spectrum_points), 512);
        assert_eq!(out[0].center_frequency, FREQ + 64_000);
    }

    #[test]
    fn test_shift_outside_band_is_ignored() {
        let mut p = processor(1024);
        p.config.set_center_frequency(FREQ + 600_000);
        let out = run(&mut p, &tone_chunk(1_024_000, 64_000.0, 1.0, 0, 1024));
        assert_eq!(p.shift_frequency(), 0);
        assert_eq!(peak_bin(&out[0].spectrum_points), 576);
        assert_eq!(out[0].center_frequency, FREQ);
    }

    #[test]
    fn test_resampled_bandwidth() {
        let mut p = processor(1024);
        p.config.set_bandwidth(512_000);
        let out = run(&mut p, &tone_chunk(1_024_000, 64_000.0, 1.0, 0, 4096));
        assert_eq!(p.resample_ratio(), 0.5);
        assert_eq!(p.desired_input_size(), 2048);
        assert_eq!(out.len(), 1);
        // 500 Hz bins after decimating by two
        assert_eq!(peak_bin(&out[0].spectrum_points), 512 + 128);
        assert_eq!(out[0].bandwidth, 512_000);
    }

    #[test]
    fn test_desired_input_size_follows_ratio() {
        let mut p = processor(1024);
        assert_eq!(p.desired_input_size(), 1024);
        let handle = p.desired_input_handle();

        p.config.set_bandwidth(250_000);
        run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 0, 100));
        assert_eq!(handle.load(Ordering::Relaxed), 4096);

        // Bandwidth at or above the input rate disables resampling
        p.config.set_bandwidth(2_000_000);
        run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 0, 100));
        assert_eq!(p.resample_ratio(), 1.0);
        assert_eq!(handle.load(Ordering::Relaxed), 1024);
    }

    #[test]
    fn test_no_output_while_priming() {
        let mut p = processor(256);
        let mut start = 0;
        let mut counts = Vec::new();
        for _ in 0..4 {
            counts.push(run(&mut p, &tone_chunk(1_000_000, 10_000.0, 1.0, start, 100)).len());
            start += 100;
        }
        assert_eq!(counts, vec![0, 0, 1, 1]);
        assert_eq!(p.emitted(), 2);
    }

    #[test]
    fn test_empty_and_unknown_rate_chunks_ignored() {
        let mut p = processor(64);
        assert!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 0, 0)).is_empty());
        assert!(run(&mut p, &tone_chunk(0, 0.0, 1.0, 0, 128)).is_empty());

        p.config.set_fft_size(0);
        assert!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 0, 128)).is_empty());
        assert_eq!(p.emitted(), 0);
    }

    #[test]
    fn test_fft_size_change_replans() {
        let mut p = processor(256);
        assert_eq!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 0, 300)).len(), 1);

        p.config.set_fft_size(512);
        assert!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 300, 300)).is_empty());
        assert_eq!(p.fft_size(), 512);
        assert_eq!(p.desired_input_size(), 512);

        let out = run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 600, 300));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].spectrum_points.len(), 512);
    }

    #[test]
    fn test_inactive_view_drops_input_and_reprimes() {
        let mut p = processor(256);
        assert_eq!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 0, 256)).len(), 1);

        p.config.set_view(false);
        assert!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 256, 256)).is_empty());

        p.config.set_view(true);
        // Tail was discarded: a short chunk is not enough for a window
        assert!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 512, 100)).is_empty());
        assert_eq!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 612, 156)).len(), 1);
    }

    #[test]
    fn test_view_gap_resets_filter_state() {
        let configure = |p: &SpectrumProcessor| {
            p.config.set_bandwidth(512_000);
            p.config.set_center_frequency(FREQ + 32_000);
        };
        let mut gated = processor(1024);
        configure(&gated);
        let mut fresh = processor(1024);
        configure(&fresh);

        assert_eq!(run(&mut gated, &tone_chunk(1_024_000, 64_000.0, 1.0, 0, 4096)).len(), 1);
        gated.config.set_view(false);
        assert!(run(&mut gated, &tone_chunk(1_024_000, 64_000.0, 1.0, 4096, 4096)).is_empty());
        gated.config.set_view(true);

        // 2048 inputs resample to exactly one window, filter warm-up included
        let chunk = tone_chunk(1_024_000, 64_000.0, 1.0, 8192, 2048);
        let a = run(&mut gated, &chunk);
        let b = run(&mut fresh, &chunk);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        let peak = b[0].fft_ceiling as f32;
        for (i, (x, y)) in a[0].spectrum_points.iter().zip(&b[0].spectrum_points).enumerate() {
            assert!((x - y).abs() <= 1e-5 * peak, "bin {}: {} != {}", i, x, y);
        }
    }

    #[test]
    fn test_input_rate_change_clears_tail() {
        let mut p = processor(256);
        assert!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 0, 200)).is_empty());

        // Same ratio (no resampling) but the held samples are at the old rate
        assert!(run(&mut p, &tone_chunk(2_000_000, 0.0, 1.0, 0, 100)).is_empty());
        let out = run(&mut p, &tone_chunk(2_000_000, 0.0, 1.0, 100, 156));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bandwidth, 2_000_000);
    }

    #[test]
    fn test_proportional_rate_and_bandwidth_change_reprimes() {
        let mut p = processor(256);
        p.config.set_bandwidth(500_000);
        assert_eq!(run(&mut p, &tone_chunk(1_000_000, 0.0, 1.0, 0, 1024)).len(), 1);
        assert_eq!(p.resample_ratio(), 0.5);

        p.config.set_bandwidth(1_000_000);
        assert!(run(&mut p, &tone_chunk(2_000_000, 0.0, 1.0, 0, 200)).is_empty());
        assert_eq!(p.resample_ratio(), 0.5);
        let out = run(&mut p, &tone_chunk(2_000_000, 0.0, 1.0, 200, 400));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bandwidth, 1_000_000);
    }

    #[test]
    fn test_stream_retune_recomputes_shift() {
        let mut p = processor(1024);
        p.config.set_center_frequency(FREQ + 64_000);
        let out = run(&mut p, &tone_chunk(1_024_000, 64_000.0, 1.0, 0, 1024));
        assert_eq!(peak_bin(&out[0].spectrum_points), 512);

        // Source retuned up 32 kHz: the same signal now sits at +32 kHz
        let mut retuned = tone_chunk(1_024_000, 32_000.0, 1.0, 1024, 1024);
        retuned.frequency = FREQ + 32_000;
        let out = run(&mut p, &retuned);
        assert_eq!(p.shift_frequency(), 32_000);
        assert_eq!(out.len(), 1);
        assert_eq!(peak_bin(&out[0].spectrum_points), 512);
        assert_eq!(out[0].center_frequency, FREQ + 64_000);
    }

    #[test]
    fn test_extreme_center_frequency_is_not_shifted() {
        let mut p = processor(1024);
        p.config.set_center_frequency(i64::MIN);
        let out = run(&mut p, &tone_chunk(1_024_000, 64_000.0, 1.0, 0, 1024));
        assert_eq!(p.shift_frequency(), 0);
        assert_eq!(peak_bin(&out[0].spectrum_points), 576);
        assert_eq!(out[0].center_frequency, FREQ);

        p.config.set_center_frequency(i64::MAX);
        let mut below = tone_chunk(1_024_000, 64_000.0, 1.0, 1024, 1024);
        below.frequency = -FREQ;
        let out = run(&mut p, &below);
        assert_eq!(p.shift_frequency(), 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].center_frequency, -FREQ);
    }

    #[test]
    fn test_rate_one_reports_raw_spectrum() {
        let mut p = processor(128);
        let out = run(&mut p, &tone_chunk(128_000, 8_000.0, 0.5, 0, 128));
        let frame = &out[0];
        let max = frame
            .spectrum_points
            .iter()
            .cloned()
            .fold(f32::MIN, f32::max);
        let min = frame
            .spectrum_points
            .iter()
            .cloned()
            .fold(f32::MAX, f32::min);
        assert_eq!(frame.fft_ceiling, max as f64);
        assert_eq!(frame.fft_floor, min as f64);
        assert!(frame.fft_floor <= frame.fft_ceiling);
    }

    #[test]
    fn test_ceiling_converges_within_rate_bound() {
        let rate = 0.1f32;
        let mut smoothed = processor(1024);
        smoothed.config.set_average_rate(rate);
        let mut reference = processor(1024);

        let mut start = 0;
        for _ in 0..5 {
            let quiet = tone_chunk(1_024_000, 64_000.0, 0.1, start, 1024);
            run(&mut smoothed, &quiet);
            start += 1024;
        }

        let steps = (30.0 / rate as f64).ceil() as usize;
        let mut last = None;
        let mut expected = 0.0;
        for _ in 0..steps {
            let loud = tone_chunk(1_024_000, 64_000.0, 1.0, start, 1024);
            last = run(&mut smoothed, &loud).pop();
            expected = run(&mut reference, &loud)[0].fft_ceiling;
            start += 1024;
        }

        let frame = last.unwrap();
        assert!(
            (frame.fft_ceiling - expected).abs() < 1e-4 * expected,
            "ceiling {} expected {}",
            frame.fft_ceiling,
            expected
        );
        let peak = frame.spectrum_points[576] as f64;
        assert!((peak - expected).abs() < 1e-3 * expected);
    }

    #[test]
    fn test_smoothing_lags_step_change() {
        let mut p = processor(256);
        p.config.set_average_rate(0.2);
        let bin = 128 + 16;
        let first = run(&mut p, &tone_chunk(256_000, 16_000.0, 0.1, 0, 256));
        let quiet = first[0].spectrum_points[bin] as f64;
        let out = run(&mut p, &tone_chunk(256_000, 16_000.0, 1.0, 256, 256));

        // Raw jumps tenfold; fast layer reaches 2.8x, slow layer 1.36x
        let ratio = out[0].spectrum_points[bin] as f64 / quiet;
        assert!((ratio - 1.36).abs() < 0.01, "smoothed ratio {}", ratio);
        assert!((out[0].fft_ceiling / first[0].fft_ceiling - 1.36).abs() < 0.01);
    }

    #[test]
    fn test_frames_recycle() {
        let mut p = processor(64);
        let out = run(&mut p, &tone_chunk(64_000, 0.0, 1.0, 0, 64));
        assert_eq!(p.pool().outstanding(), 1);
        drop(out);
        assert_eq!(p.pool().outstanding(), 0);
        run(&mut p, &tone_chunk(64_000, 0.0, 1.0, 64, 64));
        assert_eq!(p.pool().allocated(), 1);
    }
}
