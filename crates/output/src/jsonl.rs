// Copyright 2025-2026 CEMAXECUTER LLC

use std::io::{self, Write};

use serde_json::{json, Value};
use sv_visual::{SampleChunk, SpectrumFrame};

/// JSON form of a spectrum frame.
pub fn spectrum_json(frame: &SpectrumFrame) -> Value {
    json!({
        "type": "spectrum",
        "center_freq": frame.center_frequency,
        "bandwidth": frame.bandwidth,
        "ceiling": frame.fft_ceiling,
        "floor": frame.fft_floor,
        "points": frame.spectrum_points,
    })
}

/// JSON summary of a waterfall window (samples are not included).
pub fn waterfall_json(chunk: &SampleChunk) -> Value {
    json!({
        "type": "waterfall",
        "freq": chunk.frequency,
        "sample_rate": chunk.sample_rate,
        "len": chunk.data.len(),
    })
}

/// Writes frames as newline-delimited JSON.
pub struct FrameWriter<W: Write> {
    writer: W,
    lines: u64,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, lines: 0 }
    }

    pub fn write_spectrum(&mut self, frame: &SpectrumFrame) -> io::Result<()> {
        self.write_value(&spectrum_json(frame))
    }

    pub fn write_waterfall(&mut self, chunk: &SampleChunk) -> io::Result<()> {
        self.write_value(&waterfall_json(chunk))
    }

    pub fn write_value(&mut self, value: &Value) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    /// Lines written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
