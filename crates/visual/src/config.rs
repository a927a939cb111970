// Copyright 2025-2026 CEMAXECUTER LLC

//! Runtime-adjustable pipeline settings.
//!
//! Every field is its own atomic. Writers (control thread, UI) and readers
//! (stage threads) never block each other. Stages take one [`ConfigSnapshot`]
//! at the top of each invocation so a single chunk is processed with one
//! consistent-enough view; fields changed mid-invocation are seen next time.

use atomic_float::AtomicF32;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, AtomicUsize, Ordering};

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_LINES_PER_SECOND: i32 = 30;
pub const DEFAULT_AVERAGE_RATE: f32 = 0.65;

/// Shared settings for the distributor and spectrum stages.
#[derive(Debug)]
pub struct VisualConfig {
    center_frequency: AtomicI64,
    /// 0 = no resampling
    bandwidth: AtomicU64,
    fft_size: AtomicUsize,
    lines_per_second: AtomicI32,
    is_view: AtomicBool,
    average_rate: AtomicF32,
}

/// Plain copy of every field, read once per stage invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigSnapshot {
    pub center_frequency: i64,
    pub bandwidth: u64,
    pub fft_size: usize,
    pub lines_per_second: i32,
    pub is_view: bool,
    pub average_rate: f32,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            center_frequency: 0,
            bandwidth: 0,
            fft_size: DEFAULT_FFT_SIZE,
            lines_per_second: DEFAULT_LINES_PER_SECOND,
            is_view: true,
            average_rate: DEFAULT_AVERAGE_RATE,
        }
    }
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self::from_snapshot(&ConfigSnapshot::default())
    }
}

impl VisualConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(s: &ConfigSnapshot) -> Self {
        Self {
            center_frequency: AtomicI64::new(s.center_frequency),
            bandwidth: AtomicU64::new(s.bandwidth),
            fft_size: AtomicUsize::new(s.fft_size),
            lines_per_second: AtomicI32::new(s.lines_per_second),
            is_view: AtomicBool::new(s.is_view),
            average_rate: AtomicF32::new(s.average_rate),
        }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            center_frequency: self.center_frequency(),
            bandwidth: self.bandwidth(),
            fft_size: self.fft_size(),
            lines_per_second: self.lines_per_second(),
            is_view: self.is_view(),
            average_rate: self.average_rate(),
        }
    }

    pub fn center_frequency(&self) -> i64 {
        self.center_frequency.load(Ordering::Relaxed)
    }

    pub fn set_center_frequency(&self, hz: i64) {
        self.center_frequency.store(hz, Ordering::Relaxed);
    }

    pub fn bandwidth(&self) -> u64 {
        self.bandwidth.load(Ordering::Relaxed)
    }

    pub fn set_bandwidth(&self, hz: u64) {
        self.bandwidth.store(hz, Ordering::Relaxed);
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size.load(Ordering::Relaxed)
    }

    pub fn set_fft_size(&self, size: usize) {
        self.fft_size.store(size, Ordering::Relaxed);
    }

    pub fn lines_per_second(&self) -> i32 {
        self.lines_per_second.load(Ordering::Relaxed)
    }

    pub fn set_lines_per_second(&self, lps: i32) {
        self.lines_per_second.store(lps, Ordering::Relaxed);
    }

    pub fn is_view(&self) -> bool {
        self.is_view.load(Ordering::Relaxed)
    }

    pub fn set_view(&self, view: bool) {
        self.is_view.store(view, Ordering::Relaxed);
    }

    pub fn average_rate(&self) -> f32 {
        self.average_rate.load(Ordering::Relaxed)
    }

    pub fn set_average_rate(&self, rate: f32) {
        self.average_rate.store(rate, Ordering::Relaxed);
    }
}
