// Copyright 2025-2026 CEMAXECUTER LLC

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sv_visual::config::{DEFAULT_AVERAGE_RATE, DEFAULT_FFT_SIZE, DEFAULT_LINES_PER_SECOND};

/// Settings file. Every field has a default; the CLI overrides what it sets.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub view: ViewSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSettings {
    /// IQ file; the synthetic tone source is used when absent
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_center_freq")]
    pub center_freq: i64,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default)]
    pub realtime: bool,
    #[serde(default)]
    pub looping: bool,
    /// Synthetic tone offset from center (Hz)
    #[serde(default = "default_tone_offset")]
    pub tone_offset: f64,
    #[serde(default = "default_noise")]
    pub noise: f32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewSettings {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_lps")]
    pub lines_per_second: i32,
    /// 0 = full input bandwidth
    #[serde(default)]
    pub bandwidth: u64,
    /// View center relative to the source center (Hz)
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_average_rate")]
    pub average_rate: f32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    /// JSON lines destination, "-" for stdout
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
    #[serde(default)]
    pub zmq: Option<String>,
    #[serde(default)]
    pub zmq_control: Option<String>,
    #[serde(default)]
    pub zmq_curve_keyfile: Option<String>,
    #[serde(default = "default_sensor_id")]
    pub sensor_id: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            file: None,
            format: default_format(),
            sample_rate: default_sample_rate(),
            center_freq: default_center_freq(),
            block_size: default_block_size(),
            realtime: false,
            looping: false,
            tone_offset: default_tone_offset(),
            noise: default_noise(),
        }
    }
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            lines_per_second: default_lps(),
            bandwidth: 0,
            offset: 0,
            average_rate: default_average_rate(),
            enabled: default_enabled(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            path: None,
            stats_interval: default_stats_interval(),
            zmq: None,
            zmq_control: None,
            zmq_curve_keyfile: None,
            sensor_id: default_sensor_id(),
        }
    }
}

fn default_format() -> String { "ci16".into() }
fn default_sample_rate() -> u32 { 2_000_000 }
fn default_center_freq() -> i64 { 100_000_000 }
fn default_block_size() -> usize { 16384 }
fn default_tone_offset() -> f64 { 250_000.0 }
fn default_noise() -> f32 { 0.01 }
fn default_fft_size() -> usize { DEFAULT_FFT_SIZE }
fn default_lps() -> i32 { DEFAULT_LINES_PER_SECOND }
fn default_average_rate() -> f32 { DEFAULT_AVERAGE_RATE }
fn default_enabled() -> bool { true }
fn default_stats_interval() -> u64 { 5 }
fn default_sensor_id() -> String { "spectrum-view".into() }

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.source.sample_rate == 0 {
            bail!("sample rate must be non-zero");
        }
        if self.source.block_size == 0 {
            bail!("block size must be non-zero");
        }
        if self.view.fft_size == 0 {
            bail!("FFT size must be non-zero");
        }
        if self.view.lines_per_second < 0 {
            bail!("lines per second must not be negative");
        }
        if !(self.view.average_rate > 0.0 && self.view.average_rate <= 1.0) {
            bail!("average rate must be in (0, 1], got {}", self.view.average_rate);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let s = Settings::from_toml("").unwrap();
        assert_eq!(s.source.sample_rate, 2_000_000);
        assert_eq!(s.view.fft_size, DEFAULT_FFT_SIZE);
        assert!(s.view.enabled);
        assert!(s.output.path.is_none());
        s.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let s = Settings::from_toml(
            r#"
            [source]
            file = "capture.cf32"
            format = "cf32"
            center_freq = 433920000

            [view]
            bandwidth = 200000
            offset = -50000
            lines_per_second = 10
            "#,
        )
        .unwrap();
        assert_eq!(s.source.file, Some(PathBuf::from("capture.cf32")));
        assert_eq!(s.source.center_freq, 433_920_000);
        assert_eq!(s.source.sample_rate, 2_000_000);
        assert_eq!(s.view.bandwidth, 200_000);
        assert_eq!(s.view.offset, -50_000);
        assert_eq!(s.view.lines_per_second, 10);
        assert_eq!(s.view.average_rate, DEFAULT_AVERAGE_RATE);
        assert_eq!(s.output.stats_interval, 5);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Settings::from_toml("[view]\nfft = 1024\n").is_err());
    }

    #[test]
    fn test_validate() {
        let mut s = Settings::default();
        s.view.average_rate = 0.0;
        assert!(s.validate().is_err());
        s.view.average_rate = 1.0;
        s.view.lines_per_second = -1;
        assert!(s.validate().is_err());
        s.view.lines_per_second = 0;
        s.validate().unwrap();
    }
}
