//! The kernel video-capture protocol as seen by the capture engine
//!
//! Everything the session and the capture loop need from a device goes
//! through [`VideoDevice`]. The kernel implementation lives in
//! [`crate::capture::v4l2`]; tests drive the same engine with a simulated
//! device.

use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use v4l::FourCC;

/// Time per frame as a rational number of seconds (1/30 is 30 fps)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Framerate {
    pub numerator: u32,
    pub denominator: u32,
}

impl Framerate {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Frames per second, zero for a degenerate interval
    pub fn fps(&self) -> f64 {
        if self.numerator == 0 {
            return 0.0;
        }
        self.denominator as f64 / self.numerator as f64
    }
}

/// Requested pixel format and frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    pub fourcc: FourCC,
    pub width: u32,
    pub height: u32,
}

/// Format the device actually selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub fourcc: FourCC,
    pub width: u32,
    pub height: u32,
    pub bytes_per_line: u32,
    pub size_image: u32,
}

/// Length and map offset of one device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub length: usize,
    pub offset: u64,
}

/// A filled buffer handed back by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
    /// Capture time reported by the driver
    pub timestamp: Duration,
}

/// One open video capture node.
///
/// Methods take `&self` so the capture thread and the control context can
/// share the handle; the control context only calls `stream_off` after the
/// thread has stopped using it.
pub trait VideoDevice: Send + Sync + 'static {
    /// A process mapping of one device buffer; dropping it unmaps the buffer.
    type Mapping: AsRef<[u8]> + Send + Sync + 'static;

    fn set_format(&self, request: &FormatRequest) -> io::Result<NegotiatedFormat>;

    fn set_frame_interval(&self, interval: Framerate) -> io::Result<Framerate>;

    /// Request `count` memory-mapped buffers, returning how many were granted
    fn request_buffers(&self, count: u32) -> io::Result<u32>;

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo>;

    fn map_buffer(&self, info: &BufferInfo) -> io::Result<Self::Mapping>;

    fn queue_buffer(&self, index: u32) -> io::Result<()>;

    /// Non-blocking dequeue; `WouldBlock` when nothing is ready
    fn dequeue_buffer(&self) -> io::Result<DequeuedBuffer>;

    fn stream_on(&self) -> io::Result<()>;

    fn stream_off(&self) -> io::Result<()>;

    /// Wait until a filled buffer can be dequeued. `Ok(false)` on timeout.
    fn wait_readable(&self, timeout: Duration) -> io::Result<bool>;
}

/// Opens device nodes by path
pub trait DeviceOpener: Send + Sync {
    type Device: VideoDevice;

    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}
