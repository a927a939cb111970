// Copyright 2025-2026 CEMAXECUTER LLC

//! Rate-adaptive frame distribution.
//!
//! Incoming chunks are cut into non-overlapping windows of the configured
//! size. A fractional accumulator decides which windows are forwarded so
//! that, averaged over time, `lines_per_second` windows leave per second of
//! sample time no matter how the input is chunked. Windows that are not
//! selected are dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::chunk::SampleChunk;
use crate::config::VisualConfig;
use crate::pool::{BufferPool, Shared};
use crate::stage::Stage;

/// Tolerance on the one-line threshold. Per-window contributions that sum to
/// exactly one in real arithmetic can land a few ulps short in f64.
const LINE_EPSILON: f64 = 1e-9;

pub struct FrameDistributor {
    config: Arc<VisualConfig>,
    /// Overrides `config.fft_size` as the window length when set
    window_source: Option<Arc<AtomicUsize>>,
    pool: BufferPool<SampleChunk>,
    line_rate_accum: f64,
    emitted: u64,
}

impl FrameDistributor {
    pub fn new(config: Arc<VisualConfig>) -> Self {
        Self {
            config,
            window_source: None,
            pool: BufferPool::new(),
            line_rate_accum: 0.0,
            emitted: 0,
        }
    }

    /// Take the window length from a downstream stage (see
    /// `SpectrumProcessor::desired_input_handle`) instead of the configured FFT size.
    pub fn with_window_source(mut self, window: Arc<AtomicUsize>) -> Self {
        self.window_source = Some(window);
        self
    }

    /// Fraction of a line owed but not yet emitted.
    pub fn accumulator(&self) -> f64 {
        self.line_rate_accum
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn pool(&self) -> &BufferPool<SampleChunk> {
        &self.pool
    }

    fn window_size(&self) -> usize {
        match &self.window_source {
            Some(w) => w.load(Ordering::Relaxed),
            None => self.config.fft_size(),
        }
    }

    fn emit(&mut self, input: &SampleChunk, offset: usize, len: usize, out: &mut Vec<Shared<SampleChunk>>) {
        let mut frame = self.pool.acquire();
        frame.frequency = input.frequency;
        frame.sample_rate = input.sample_rate;
        frame.data.clear();
        frame.data.extend_from_slice(&input.data[offset..offset + len]);
        out.push(frame.share());
        self.emitted += 1;
    }
}

impl Stage for FrameDistributor {
    type Input = SampleChunk;
    type Output = SampleChunk;

    fn process(&mut self, input: &SampleChunk, out: &mut Vec<Shared<SampleChunk>>) {
        let fft_size = self.window_size();
        let lines_per_second = self.config.lines_per_second();
        let len = input.data.len();

        if fft_size == 0 || lines_per_second <= 0 || input.sample_rate == 0 || len == 0 {
            return;
        }

        let window = fft_size.min(len);
        let available = len / window;
        let step = lines_per_second as f64 * input.duration() / available as f64;

        // Nothing can cross the threshold in this chunk
        if self.line_rate_accum + step * available as f64 + LINE_EPSILON < 1.0 {
            self.line_rate_accum += step * available as f64;
            return;
        }

        for i in 0..available {
            self.line_rate_accum += step;
            if self.line_rate_accum + LINE_EPSILON >= 1.0 {
                self.emit(input, i * window, window, out);
                let whole = (self.line_rate_accum + LINE_EPSILON).floor();
                self.line_rate_accum = (self.line_rate_accum - whole).max(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;

    fn chunk(sample_rate: u32, len: usize) -> SampleChunk {
        SampleChunk {
            frequency: 100_000_000,
            sample_rate,
            data: (0..len).map(|i| Complex32::new(i as f32, 0.0)).collect(),
        }
    }

    fn distributor(fft_size: usize, lps: i32) -> FrameDistributor {
        let cfg = VisualConfig::new();
        cfg.set_fft_size(fft_size);
        cfg.set_lines_per_second(lps);
        FrameDistributor::new(Arc::new(cfg))
    }

    /// xorshift64, enough to vary chunk sizes reproducibly
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }
    }

    #[test]
    fn test_one_line_after_fifty_ms_at_twenty_lps() {
        // 2 MS/s, 20k-sample chunks = 10 ms each; 20 lines/s owes one line per 50 ms
        let mut dist = distributor(1024, 20);
        let input = chunk(2_000_000, 20_000);
        let mut out = Vec::new();

        for _ in 0..4 {
            dist.process(&input, &mut out);
        }
        assert!(out.is_empty());
        assert!((dist.accumulator() - 0.8).abs() < 1e-9);

        dist.process(&input, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.len(), 1024);
        assert_eq!(out[0].frequency, 100_000_000);
        assert_eq!(out[0].sample_rate, 2_000_000);
        assert!(dist.accumulator() < 0.05);
    }

    #[test]
    fn test_rate_converges_for_uneven_chunks() {
        let sample_rate = 2_000_000u32;
        for lps in [1, 7, 20, 60, 333, 1000] {
            let mut dist = distributor(1024, lps);
            let mut rng = Rng(0x9E37_79B9_7F4A_7C15 ^ lps as u64);
            let mut out = Vec::new();
            let mut total_samples = 0u64;

            for _ in 0..400 {
                let len = 100 + (rng.next() % 20_000) as usize;
                total_samples += len as u64;
                dist.process(&chunk(sample_rate, len), &mut out);
                out.clear();
            }

            let elapsed = total_samples as f64 / sample_rate as f64;
            let expected = lps as f64 * elapsed;
            let got = dist.emitted() as f64;
            assert!(
                (got - expected).abs() <= 1.0,
                "lps {}: emitted {} over {:.3}s, expected {:.2}",
                lps,
                got,
                elapsed,
                expected
            );
        }
    }

    #[test]
    fn test_windows_do_not_overlap() {
        // 1 s chunk of 10 windows at 10 lps: every window is due
        let mut dist = distributor(100, 10);
        let mut out = Vec::new();
        dist.process(&chunk(1000, 1000), &mut out);
        assert_eq!(out.len(), 10);

        let offsets: Vec<usize> = out.iter().map(|f| f.data[0].re as usize).collect();
        for pair in offsets.windows(2) {
            assert!(pair[1] >= pair[0] + 100, "overlap: {:?}", offsets);
        }
        for f in &out {
            let first = f.data[0].re as usize;
            assert_eq!(f.data.len(), 100);
            assert_eq!(f.data[99].re as usize, first + 99);
        }
    }

    #[test]
    fn test_selected_windows_spread_over_chunk() {
        // Half the windows due: expect every other one
        let mut dist = distributor(100, 5);
        let mut out = Vec::new();
        dist.process(&chunk(1000, 1000), &mut out);
        let offsets: Vec<usize> = out.iter().map(|f| f.data[0].re as usize).collect();
        assert_eq!(offsets, vec![100, 300, 500, 700, 900]);
    }

    #[test]
    fn test_short_chunk_clamps_window() {
        let mut dist = distributor(4096, 100);
        let mut out = Vec::new();
        // 1000 samples at 1 kS/s = 1 s, owes 100 lines but has one window
        dist.process(&chunk(1000, 1000), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.len(), 1000);
        assert_eq!(dist.accumulator(), 0.0);
    }

    #[test]
    fn test_disabled_inputs_leave_state_alone() {
        let mut dist = distributor(1024, 20);
        let mut out = Vec::new();
        dist.process(&chunk(2_000_000, 20_000), &mut out);
        let acc = dist.accumulator();
        assert!(acc > 0.0);

        // Empty chunk
        dist.process(&chunk(2_000_000, 0), &mut out);
        // Unknown sample rate
        dist.process(&chunk(0, 20_000), &mut out);

        dist.config.set_lines_per_second(0);
        dist.process(&chunk(2_000_000, 20_000), &mut out);
        dist.config.set_lines_per_second(-5);
        dist.process(&chunk(2_000_000, 20_000), &mut out);

        dist.config.set_lines_per_second(20);
        dist.config.set_fft_size(0);
        dist.process(&chunk(2_000_000, 20_000), &mut out);

        assert!(out.is_empty());
        assert_eq!(dist.accumulator(), acc);
        assert_eq!(dist.emitted(), 0);
    }

    #[test]
    fn test_window_source_overrides_fft_size() {
        let window = Arc::new(AtomicUsize::new(250));
        let mut dist = distributor(1024, 4).with_window_source(window.clone());
        let mut out = Vec::new();
        dist.process(&chunk(1000, 1000), &mut out);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|f| f.data.len() == 250));

        window.store(500, Ordering::Relaxed);
        out.clear();
        dist.process(&chunk(1000, 1000), &mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|f| f.data.len() == 500));
    }

    #[test]
    fn test_emitted_frames_recycle() {
        let mut dist = distributor(100, 10);
        let mut out = Vec::new();
        dist.process(&chunk(1000, 1000), &mut out);
        assert_eq!(dist.pool().outstanding(), 10);
        out.clear();
        assert_eq!(dist.pool().outstanding(), 0);

        dist.process(&chunk(1000, 1000), &mut out);
        assert_eq!(dist.pool().allocated(), 10);
    }
}
