// Copyright 2025-2026 CEMAXECUTER LLC

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use num_complex::Complex32;
use sv_visual::{BufferPool, SampleChunk, Shared};

use crate::{SdrSource, SourceError, Throttle};

#[derive(Debug, Clone)]
struct Tone {
    offset_hz: f64,
    amplitude: f32,
    phase: f64,
}

/// Synthetic IQ source: tones at fixed offsets plus uniform noise.
///
/// Chunk lengths cycle through a configurable sequence so consumers see
/// irregular chunking. Output is deterministic for a given seed.
pub struct ToneSource {
    sample_rate: u32,
    center_freq: i64,
    tones: Vec<Tone>,
    noise_amplitude: f32,
    rng: u64,
    chunk_sizes: Vec<usize>,
    next_size: usize,
    /// Stop after this many chunks; None runs until stopped
    max_chunks: Option<u64>,
    realtime: bool,
    running: Arc<AtomicBool>,
    pool: BufferPool<SampleChunk>,
}

impl ToneSource {
    pub fn new(sample_rate: u32, center_freq: i64) -> Self {
        Self {
            sample_rate,
            center_freq,
            tones: Vec::new(),
            noise_amplitude: 0.0,
            rng: 0x2545_F491_4F6C_DD1D,
            chunk_sizes: vec![16384],
            next_size: 0,
            max_chunks: None,
            realtime: false,
            running: Arc::new(AtomicBool::new(false)),
            pool: BufferPool::new(),
        }
    }

    /// Add a complex tone `offset_hz` away from the center frequency.
    pub fn with_tone(mut self, offset_hz: f64, amplitude: f32) -> Self {
        self.tones.push(Tone {
            offset_hz,
            amplitude,
            phase: 0.0,
        });
        self
    }

    pub fn with_noise(mut self, amplitude: f32) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        // xorshift must not start at zero
        self.rng = seed.max(1);
        self
    }

    /// Chunk lengths to cycle through. Zero-length entries are skipped.
    pub fn with_chunk_sizes(mut self, sizes: Vec<usize>) -> Self {
        let sizes: Vec<usize> = sizes.into_iter().filter(|&s| s > 0).collect();
        if !sizes.is_empty() {
            self.chunk_sizes = sizes;
            self.next_size = 0;
        }
        self
    }

    pub fn with_max_chunks(mut self, max: u64) -> Self {
        self.max_chunks = Some(max);
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn pool(&self) -> &BufferPool<SampleChunk> {
        &self.pool
    }

    fn next_noise(&mut self) -> f32 {
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        // Top 24 bits to [-1, 1)
        ((self.rng >> 40) as f32 / (1u64 << 23) as f32) - 1.0
    }

    /// Synthesize the next `n` samples into `out` (cleared first).
    pub fn generate(&mut self, n: usize, out: &mut Vec<Complex32>) {
        out.clear();
        out.resize(n, Complex32::new(0.0, 0.0));

        let rate = self.sample_rate.max(1) as f64;
        for tone in &mut self.tones {
            let inc = TAU * tone.offset_hz / rate;
            for (i, s) in out.iter_mut().enumerate() {
                let (sin, cos) = (tone.phase + i as f64 * inc).sin_cos();
                *s += Complex32::new(cos as f32, sin as f32) * tone.amplitude;
            }
            tone.phase = (tone.phase + n as f64 * inc).rem_euclid(TAU);
        }

        if self.noise_amplitude > 0.0 {
            for i in 0..n {
                let noise = Complex32::new(self.next_noise(), self.next_noise());
                out[i] += noise * self.noise_amplitude;
            }
        }
    }

    fn next_chunk_size(&mut self) -> usize {
        let size = self.chunk_sizes[self.next_size];
        self.next_size = (self.next_size + 1) % self.chunk_sizes.len();
        size
    }
}

impl SdrSource for ToneSource {
    fn start(&mut self, tx: Sender<Shared<SampleChunk>>) -> Result<(), SourceError> {
        if self.sample_rate == 0 {
            return Err(SourceError::Config("tone source needs a sample rate".into()));
        }

        self.running.store(true, Ordering::Relaxed);
        log::info!(
            "generating {} tone(s) at {} Hz, {} Hz center",
            self.tones.len(),
            self.sample_rate,
            self.center_freq
        );

        let mut throttle = self.realtime.then(|| Throttle::new(self.sample_rate));
        let mut sent = 0u64;

        while self.running.load(Ordering::Relaxed) {
            if self.max_chunks.is_some_and(|max| sent >= max) {
                break;
            }

            let n = self.next_chunk_size();
            let mut chunk = self.pool.acquire();
            chunk.frequency = self.center_freq;
            chunk.sample_rate = self.sample_rate;
            self.generate(n, &mut chunk.data);

            if tx.send(chunk.share()).is_err() {
                break; // receiver dropped
            }
            sent += 1;

            if let Some(throttle) = throttle.as_mut() {
                throttle.wait(n);
            }
        }

        log::debug!("tone source stopped after {} chunks", sent);
        self.running.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn center_frequency(&self) -> i64 {
        self.center_freq
    }

    fn stop_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
