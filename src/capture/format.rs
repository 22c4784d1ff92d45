//! Device pixel formats and their output counterparts

use serde::{Deserialize, Serialize};
use v4l::FourCC;

/// Native V4L2 pixel format identifiers understood by the capture engine
pub mod native {
    use v4l::FourCC;

    pub const YVYU: FourCC = FourCC { repr: *b"YVYU" };
    pub const YUYV: FourCC = FourCC { repr: *b"YUYV" };
    pub const UYVY: FourCC = FourCC { repr: *b"UYVY" };
    pub const NV12: FourCC = FourCC { repr: *b"NV12" };
    pub const YUV420: FourCC = FourCC { repr: *b"YU12" };
    pub const YVU420: FourCC = FourCC { repr: *b"YV12" };

    /// Every identifier the translator maps to an output format
    pub const SUPPORTED: [FourCC; 6] = [YVYU, YUYV, UYVY, NV12, YUV420, YVU420];
}

/// Pixel formats delivered to the frame sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoFormat {
    /// Packed 4:2:2, Y0 V Y1 U
    Yvyu,
    /// Packed 4:2:2, Y0 U Y1 V
    Yuy2,
    /// Packed 4:2:2, U Y0 V Y1
    Uyvy,
    /// Semi-planar 4:2:0, luma plane followed by interleaved UV
    Nv12,
    /// Planar 4:2:0, luma then U then V
    I420,
}

impl VideoFormat {
    /// Number of planes a frame of this format carries
    pub fn plane_count(self) -> usize {
        match self {
            VideoFormat::Yvyu | VideoFormat::Yuy2 | VideoFormat::Uyvy => 1,
            VideoFormat::Nv12 => 2,
            VideoFormat::I420 => 3,
        }
    }
}

/// Map a device pixel format to the format handed to the sink.
///
/// Both planar 4:2:0 chroma orders map to [`VideoFormat::I420`]; the frame
/// layout planner swaps the chroma plane offsets for `YV12` so the sink
/// always sees U before V.
pub fn translate(fourcc: FourCC) -> Option<VideoFormat> {
    match &fourcc.repr {
        b"YVYU" => Some(VideoFormat::Yvyu),
        b"YUYV" => Some(VideoFormat::Yuy2),
        b"UYVY" => Some(VideoFormat::Uyvy),
        b"NV12" => Some(VideoFormat::Nv12),
        b"YU12" | b"YV12" => Some(VideoFormat::I420),
        _ => None,
    }
}

/// Parse a four character code such as `"YUYV"`
pub fn parse_fourcc(code: &str) -> Option<FourCC> {
    let bytes: [u8; 4] = code.as_bytes().try_into().ok()?;
    Some(FourCC::new(&bytes))
}
