use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("cannot decode image: {0}")]
    ImageDecode(String),
    #[error("font unavailable: {0}")]
    FontLoad(String),
    #[error("watermark text is empty")]
    EmptyText,
    #[error(
        "cannot fit image under {limit} bytes; smallest candidate was {smallest} bytes at {width}x{height}"
    )]
    ResizeConvergence {
        limit: u64,
        smallest: u64,
        width: u32,
        height: u32,
    },
    #[error("cannot write {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("raster operation failed: {0}")]
    Raster(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatermarkError {
    /// True for outcomes that mean "nothing to stamp" rather than a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, WatermarkError::EmptyText)
    }
}

pub type Result<T> = std::result::Result<T, WatermarkError>;
