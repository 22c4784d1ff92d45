use std::io;
use std::path::PathBuf;

use thiserror::Error;
use v4l::FourCC;

/// Errors raised while configuring or running a capture session
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unable to open device {}: {source}", path.display())]
    DeviceOpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to set format: {0}")]
    FormatNegotiationFailed(#[source] io::Error),

    #[error("device negotiated unsupported pixel format {0}")]
    UnsupportedFormat(FourCC),

    #[error("unable to set framerate: {0}")]
    FramerateNegotiationFailed(#[source] io::Error),

    #[error("request for buffers failed: {0}")]
    BufferRequestFailed(#[source] io::Error),

    #[error("device returned {granted} buffers, at least 2 are required")]
    InsufficientBuffers { granted: u32 },

    #[error("mmap for buffer {index} failed: {source}")]
    MappingFailed {
        index: u32,
        #[source]
        source: io::Error,
    },

    #[error("unable to start stream: {0}")]
    StreamStartFailed(#[source] io::Error),

    #[error("unable to spawn capture thread: {0}")]
    ThreadSpawnFailed(#[source] io::Error),

    #[error("capture stream fault: {0}")]
    AcquisitionFault(#[source] io::Error),

    #[error("session is not configured")]
    NotConfigured,

    #[error("invalid capture settings: {0}")]
    InvalidSettings(String),
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
