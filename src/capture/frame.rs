use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::format::VideoFormat;
use super::layout::{PlaneLayout, MAX_PLANES};

/// Zero-copy view of one captured frame.
///
/// Plane data borrows the mapped device buffer and is only valid until the
/// buffer goes back to the device, which happens right after the sink
/// returns.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    /// Device capture timestamp
    pub timestamp: Duration,
    pub color: ColorInfo,
    planes: [FramePlane<'a>; MAX_PLANES],
    plane_count: usize,
}

impl<'a> Frame<'a> {
    pub fn planes(&self) -> &[FramePlane<'a>] {
        &self.planes[..self.plane_count]
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp.as_nanos() as u64
    }

    /// Copy the plane data out of the device buffer
    pub fn to_owned_frame(&self) -> OwnedFrame {
        let planes = self
            .planes()
            .iter()
            .map(|plane| OwnedPlane {
                data: Bytes::copy_from_slice(plane.data),
                stride: plane.stride,
            })
            .collect();

        OwnedFrame {
            planes,
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                format: self.format,
                device_timestamp: self.timestamp,
                color: self.color,
            }),
            timestamp: Instant::now(),
        }
    }
}

/// One plane of a [`Frame`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FramePlane<'a> {
    pub data: &'a [u8],
    pub stride: u32,
}

/// YUV to RGB conversion parameters attached to every frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorInfo {
    pub matrix: [f32; 16],
    pub range_min: [f32; 3],
    pub range_max: [f32; 3],
}

impl ColorInfo {
    /// BT.601, limited (studio swing) range
    pub const fn bt601_partial() -> Self {
        Self {
            matrix: [
                1.164_384, 0.000_000, 1.596_027, -0.874_202, //
                1.164_384, -0.391_762, -0.812_968, 0.531_668, //
                1.164_384, 2.017_232, 0.000_000, -1.085_631, //
                0.000_000, 0.000_000, 0.000_000, 1.000_000,
            ],
            range_min: [16.0 / 255.0, 16.0 / 255.0, 16.0 / 255.0],
            range_max: [235.0 / 255.0, 240.0 / 255.0, 240.0 / 255.0],
        }
    }
}

impl Default for ColorInfo {
    fn default() -> Self {
        Self::bt601_partial()
    }
}

/// Everything about a frame that is fixed for one configuration
#[derive(Debug, Clone, Copy)]
pub struct FrameTemplate {
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    pub color: ColorInfo,
    pub layout: PlaneLayout,
}

impl FrameTemplate {
    pub fn new(width: u32, height: u32, format: VideoFormat, layout: PlaneLayout) -> Self {
        Self {
            width,
            height,
            format,
            color: ColorInfo::default(),
            layout,
        }
    }

    /// Resolve plane slices against one mapped buffer
    pub fn frame<'a>(&self, buffer: &'a [u8], timestamp: Duration, sequence: u64) -> Frame<'a> {
        let mut planes = [FramePlane::default(); MAX_PLANES];
        for (slot, plane) in planes.iter_mut().zip(self.layout.planes()) {
            *slot = FramePlane {
                data: &buffer[plane.range(buffer.len())],
                stride: plane.stride,
            };
        }

        Frame {
            sequence,
            width: self.width,
            height: self.height,
            format: self.format,
            timestamp,
            color: self.color,
            planes,
            plane_count: self.layout.len(),
        }
    }
}

/// Frame data copied out of the device, safe to keep and share
#[derive(Clone)]
pub struct OwnedFrame {
    pub planes: Vec<OwnedPlane>,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// When the copy was made, for latency tracking
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
pub struct OwnedPlane {
    /// Immutable plane data - can be shared across threads without copying
    pub data: Bytes,
    pub stride: u32,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    pub device_timestamp: Duration,
    pub color: ColorInfo,
}
