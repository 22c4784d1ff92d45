//! Plane offsets within one contiguous capture buffer
//!
//! V4L2 single-planar formats place every plane in the same buffer, so the
//! data pointer for each plane is the buffer base plus a fixed offset that
//! only depends on the negotiated format, height and line stride.

use v4l::FourCC;

/// Upper bound on planes in any supported format
pub const MAX_PLANES: usize = 4;

/// Where one plane starts inside a capture buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plane {
    /// Bytes between the starts of consecutive rows
    pub stride: u32,
    /// Byte offset from the buffer base
    pub offset: usize,
    /// Bytes belonging to this plane
    pub size: usize,
}

impl Plane {
    /// Byte range of this plane clamped to a buffer of `len` bytes
    pub fn range(&self, len: usize) -> std::ops::Range<usize> {
        let start = self.offset.min(len);
        let end = self.offset.saturating_add(self.size).min(len);
        start..end
    }
}

/// Ordered plane descriptors for the active configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaneLayout {
    planes: [Plane; MAX_PLANES],
    count: usize,
}

impl PlaneLayout {
    /// Compute the layout for a native pixel format.
    ///
    /// Odd dimensions truncate through integer division.
    pub fn plan(fourcc: FourCC, _width: u32, height: u32, stride: u32) -> Self {
        let luma_size = stride as usize * height as usize;
        let luma = Plane {
            stride,
            offset: 0,
            size: luma_size,
        };
        let chroma = |offset| Plane {
            stride: stride / 2,
            offset,
            size: luma_size / 4,
        };

        match &fourcc.repr {
            b"NV12" => Self::from_planes(&[
                luma,
                Plane {
                    stride: stride / 2,
                    offset: luma_size,
                    size: luma_size / 2,
                },
            ]),
            b"YU12" => Self::from_planes(&[luma, chroma(luma_size), chroma(luma_size * 5 / 4)]),
            b"YV12" => Self::from_planes(&[luma, chroma(luma_size * 5 / 4), chroma(luma_size)]),
            _ => Self::from_planes(&[luma]),
        }
    }

    fn from_planes(planes: &[Plane]) -> Self {
        let mut layout = Self::default();
        for (slot, plane) in layout.planes.iter_mut().zip(planes) {
            *slot = *plane;
        }
        layout.count = planes.len().min(MAX_PLANES);
        layout
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
