// Copyright 2025-2026 CEMAXECUTER LLC

pub mod error;
pub mod file;
pub mod tone;

use crossbeam::channel::Sender;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sv_visual::{SampleChunk, Shared};

pub use error::SourceError;

/// Common trait for all IQ sources
pub trait SdrSource: Send {
    /// Start streaming chunks into the channel.
    /// Runs until the stop flag is cleared, the receiver is dropped or the
    /// source is exhausted.
    fn start(&mut self, tx: Sender<Shared<SampleChunk>>) -> Result<(), SourceError>;

    /// Get the sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Get the center frequency in Hz
    fn center_frequency(&self) -> i64;

    /// Running flag shared with the streaming loop. Storing `false` from any
    /// thread stops a source whose `start` is blocked on another thread.
    fn stop_flag(&self) -> Arc<AtomicBool>;
}

/// Paces a source to wall-clock time by sample count.
pub(crate) struct Throttle {
    sample_rate: u32,
    start: Instant,
    samples: u64,
}

impl Throttle {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            start: Instant::now(),
            samples: 0,
        }
    }

    /// Account for `n` samples sent and sleep until they are due.
    pub(crate) fn wait(&mut self, n: usize) {
        if self.sample_rate == 0 {
            return;
        }
        self.samples += n as u64;
        let due = Duration::from_secs_f64(self.samples as f64 / self.sample_rate as f64);
        let elapsed = self.start.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
    }
}
