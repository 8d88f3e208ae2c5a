use std::path::PathBuf;

use thiserror::Error;

/// Failure to read an image file. Missing or malformed metadata is never
/// reported through this type.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Io { path, .. } => path,
        }
    }
}

/// Invalid settings, detected once at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Error indicating the operation was cancelled.
#[derive(Debug, Clone, Copy, Error)]
#[error("Operation cancelled")]
pub struct Cancelled;
