//! Error types shared by every stage of an ingestion run.

use std::path::PathBuf;

use crate::raster::RasterError;

/// Errors produced while classifying, measuring or exporting an input file.
#[derive(Debug, thiserror::Error)]
pub enum SpotError {
    /// The raster engine could not open or read the file.
    #[error("unable to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: RasterError,
    },

    /// The file opened but its bands do not describe a DEM or an RGB raster.
    #[error("cannot classify {}: {reason}", .path.display())]
    ClassificationAmbiguous { path: PathBuf, reason: String },

    /// A downstream export writer failed.
    #[error("{stage} export failed: {cause:#}")]
    ExportWriter {
        stage: &'static str,
        cause: anyhow::Error,
    },

    /// An external tool (mesh converter or compressor) exited unsuccessfully.
    #[error("external tool `{tool}` failed ({})", .status.map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}")))]
    ExternalTool { tool: String, status: Option<i32> },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// File-system failure outside the raster engine.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SpotError {
    pub fn writer(stage: &'static str, cause: impl Into<anyhow::Error>) -> Self {
        Self::ExportWriter {
            stage,
            cause: cause.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from opening or reading a raster.
    pub fn is_open_error(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SpotError>;
