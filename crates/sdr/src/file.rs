// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use num_complex::Complex32;
use sv_visual::{BufferPool, SampleChunk, Shared};

use crate::{SdrSource, SourceError, Throttle};

/// IQ sample format for file input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Complex int8 (CS8): pairs of i8
    Ci8,
    /// Complex int16 (CS16): pairs of i16, little-endian
    Ci16,
    /// Complex float32 (CF32): pairs of f32, little-endian
    Cf32,
}

impl SampleFormat {
    /// Bytes per complex sample
    pub fn sample_bytes(self) -> usize {
        match self {
            SampleFormat::Ci8 => 2,
            SampleFormat::Ci16 => 4,
            SampleFormat::Cf32 => 8,
        }
    }

    /// Convert whole samples from `raw` into `out` (cleared first), scaled to [-1, 1].
    pub fn convert(self, raw: &[u8], out: &mut Vec<Complex32>) {
        out.clear();
        let bytes = self.sample_bytes();
        out.reserve(raw.len() / bytes);

        for s in raw.chunks_exact(bytes) {
            let sample = match self {
                SampleFormat::Ci8 => Complex32::new(
                    s[0] as i8 as f32 / 128.0,
                    s[1] as i8 as f32 / 128.0,
                ),
                SampleFormat::Ci16 => Complex32::new(
                    i16::from_le_bytes([s[0], s[1]]) as f32 / 32768.0,
                    i16::from_le_bytes([s[2], s[3]]) as f32 / 32768.0,
                ),
                SampleFormat::Cf32 => Complex32::new(
                    f32::from_le_bytes([s[0], s[1], s[2], s[3]]),
                    f32::from_le_bytes([s[4], s[5], s[6], s[7]]),
                ),
            };
            out.push(sample);
        }
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ci8" | "cs8" => Ok(SampleFormat::Ci8),
            "ci16" | "cs16" => Ok(SampleFormat::Ci16),
            "cf32" | "fc32" => Ok(SampleFormat::Cf32),
            other => Err(format!(
                "unknown sample format: {} (use ci8, ci16, or cf32)",
                other
            )),
        }
    }
}

/// Fill `buf` as far as the reader allows. Returns bytes read; short only at EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// IQ file reader: reads samples from a file and sends them as pooled chunks.
pub struct FileSource {
    path: PathBuf,
    format: SampleFormat,
    sample_rate: u32,
    center_freq: i64,
    /// Number of complex samples per chunk
    block_size: usize,
    /// Pace output to the sample rate
    realtime: bool,
    /// Rewind at end of file
    looping: bool,
    running: Arc<AtomicBool>,
    pool: BufferPool<SampleChunk>,
}

impl FileSource {
    pub fn new(
        path: impl Into<PathBuf>,
        format: SampleFormat,
        sample_rate: u32,
        center_freq: i64,
    ) -> Self {
        Self {
            path: path.into(),
            format,
            sample_rate,
            center_freq,
            block_size: 65536, // 64K complex samples per chunk
            realtime: false,
            looping: false,
            running: Arc::new(AtomicBool::new(false)),
            pool: BufferPool::new(),
        }
    }

    pub fn set_block_size(&mut self, size: usize) {
        self.block_size = size;
    }

    pub fn set_realtime(&mut self, realtime: bool) {
        self.realtime = realtime;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn pool(&self) -> &BufferPool<SampleChunk> {
        &self.pool
    }
}

impl SdrSource for FileSource {
    fn start(&mut self, tx: Sender<Shared<SampleChunk>>) -> Result<(), SourceError> {
        if self.block_size == 0 {
            return Err(SourceError::Config("block size must be non-zero".into()));
        }
        let file = File::open(&self.path).map_err(|source| SourceError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut reader = BufReader::with_capacity(1024 * 1024, file);

        self.running.store(true, Ordering::Relaxed);
        log::info!(
            "reading IQ from {} ({:?}, {} Hz, {} Hz center{})",
            self.path.display(),
            self.format,
            self.sample_rate,
            self.center_freq,
            if self.looping { ", looping" } else { "" }
        );

        let sample_bytes = self.format.sample_bytes();
        let mut raw = vec![0u8; self.block_size * sample_bytes];
        let mut throttle = self.realtime.then(|| Throttle::new(self.sample_rate));
        let mut sent_since_rewind = 0u64;

        while self.running.load(Ordering::Relaxed) {
            let n = read_full(&mut reader, &mut raw)?;
            let samples = n / sample_bytes;

            if samples == 0 {
                if self.looping && sent_since_rewind > 0 {
                    log::debug!("end of file, rewinding: {}", self.path.display());
                    reader.seek(SeekFrom::Start(0))?;
                    sent_since_rewind = 0;
                    continue;
                }
                log::info!("end of file: {}", self.path.display());
                break;
            }

            let mut chunk = self.pool.acquire();
            chunk.frequency = self.center_freq;
            chunk.sample_rate = self.sample_rate;
            self.format
                .convert(&raw[..samples * sample_bytes], &mut chunk.data);

            if tx.send(chunk.share()).is_err() {
                break; // receiver dropped
            }
            sent_since_rewind += 1;

            if let Some(throttle) = throttle.as_mut() {
                throttle.wait(samples);
            }
        }

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
