// Copyright 2025-2026 CEMAXECUTER LLC

//! Visualization pipeline: rate-adaptive frame distribution and spectrum
//! transform stages over a shared, reference-counted buffer pool.

pub mod chunk;
pub mod config;
pub mod distributor;
pub mod pool;
pub mod spectrum;
pub mod stage;
pub mod tail;

pub use chunk::{SampleChunk, SpectrumFrame};
pub use config::{ConfigSnapshot, VisualConfig};
pub use distributor::FrameDistributor;
pub use pool::{BufferPool, Pooled, Shared};
pub use spectrum::SpectrumProcessor;
pub use stage::{spawn_stage, Fanout, Stage, StageHandle, StageStats};
