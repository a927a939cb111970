// Copyright 2025-2026 CEMAXECUTER LLC

use std::io;
use std::path::PathBuf;

/// Failures surfaced by capture sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read error: {0}")]
    Read(#[from] io::Error),

    #[error("invalid source configuration: {0}")]
    Config(String),
}
