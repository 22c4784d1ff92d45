//! Device probing for settings pickers
//!
//! These helpers talk to the driver through the `v4l` crate and are not
//! used by the capture engine itself, which only consumes a resolved device
//! path.

use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use v4l::capability::Flags;
use v4l::format::description::Flags as FormatFlags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::device::Framerate;
use crate::capture::format;

/// Frame sizes offered when the driver reports stepwise or continuous sizes
pub const FALLBACK_RESOLUTIONS: &[(u32, u32)] = &[
    // 4:3
    (160, 120),
    (320, 240),
    (480, 320),
    (640, 480),
    (800, 600),
    (1024, 768),
    (1280, 960),
    (1440, 1050),
    (1440, 1080),
    (1600, 1200),
    // 16:9
    (640, 360),
    (960, 540),
    (1280, 720),
    (1600, 900),
    (1920, 1080),
    (1920, 1200),
    // tv
    (432, 520),
    (480, 320),
    (480, 530),
    (486, 440),
    (576, 310),
    (576, 520),
    (576, 570),
    (720, 576),
    (1024, 576),
];

/// Frame intervals offered when the driver reports stepwise or continuous
/// intervals
pub const FALLBACK_FRAMERATES: &[Framerate] = &[
    Framerate::new(1, 60),
    Framerate::new(1, 50),
    Framerate::new(1, 30),
    Framerate::new(1, 25),
    Framerate::new(1, 20),
    Framerate::new(1, 15),
    Framerate::new(1, 10),
    Framerate::new(1, 5),
];

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub card: String,
}

impl FoundDevice {
    pub fn new(path: String, card: String) -> Self {
        Self { path, card }
    }
}

/// One pixel format advertised by a device
#[derive(Debug, Clone)]
pub struct FormatEntry {
    pub fourcc: FourCC,
    /// Driver description, suffixed with " (Emulated)" for emulated formats
    pub description: String,
    /// Whether the capture engine can deliver this format
    pub available: bool,
}

/// Every video4linux node that reports video capture capability
pub fn list_devices() -> Vec<FoundDevice> {
    let mut found = Vec::new();

    for node in v4l::context::enum_devices() {
        let path = node.path().to_string_lossy().into_owned();
        let dev = match Device::with_path(node.path()) {
            Ok(dev) => dev,
            Err(_) => {
                info!("Unable to open {}", path);
                continue;
            }
        };

        match dev.query_caps() {
            Ok(caps) if caps.capabilities.contains(Flags::VIDEO_CAPTURE) => {
                info!("Found device '{}' at {}", caps.card, path);
                found.push(FoundDevice::new(path, caps.card));
            }
            Ok(_) => info!("{} seems to not support video capture", path),
            Err(_) => info!("Failed to query capabilities for {}", path),
        }
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}

/// Auto-detect the first capture device
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    list_devices()
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("No suitable capture device found"))
}

/// Pixel formats of a device, marking the ones the engine supports
pub fn list_formats(path: impl AsRef<Path>) -> Result<Vec<FormatEntry>> {
    let dev = Device::with_path(path)?;
    let mut entries = Vec::new();

    for desc in dev.enum_formats()? {
        let mut description = desc.description.clone();
        if desc.flags.contains(FormatFlags::EMULATED) {
            description.push_str(" (Emulated)");
        }

        let available = format::translate(desc.fourcc).is_some();
        info!(
            "Pixelformat: {} ({})",
            description,
            if available { "available" } else { "unavailable" }
        );
        entries.push(FormatEntry {
            fourcc: desc.fourcc,
            description,
            available,
        });
    }

    Ok(entries)
}

/// Frame sizes for a format: discrete sizes when the driver lists them,
/// the fallback table otherwise
pub fn list_resolutions(path: impl AsRef<Path>, fourcc: FourCC) -> Result<Vec<(u32, u32)>> {
    let dev = Device::with_path(path)?;
    let sizes = dev.enum_framesizes(fourcc)?;

    let discrete: Vec<(u32, u32)> = sizes
        .iter()
        .filter_map(|size| match &size.size {
            FrameSizeEnum::Discrete(d) => Some((d.width, d.height)),
            FrameSizeEnum::Stepwise(_) => None,
        })
        .collect();

    if !discrete.is_empty() {
        return Ok(discrete);
    }

    info!("Stepwise and Continuous framesizes are currently hardcoded");
    Ok(FALLBACK_RESOLUTIONS.to_vec())
}

/// Frame intervals for a format and size: discrete intervals when the
/// driver lists them, the fallback table otherwise
pub fn list_framerates(
    path: impl AsRef<Path>,
    fourcc: FourCC,
    width: u32,
    height: u32,
) -> Result<Vec<Framerate>> {
    let dev = Device::with_path(path)?;
    let intervals = dev.enum_frameintervals(fourcc, width, height)?;

    let discrete: Vec<Framerate> = intervals
        .iter()
        .filter_map(|interval| match &interval.interval {
            FrameIntervalEnum::Discrete(f) => Some(Framerate::new(f.numerator, f.denominator)),
            FrameIntervalEnum::Stepwise(_) => None,
        })
        .collect();

    if !discrete.is_empty() {
        return Ok(discrete);
    }

    info!("Stepwise and Continuous framerates are currently hardcoded");
    Ok(FALLBACK_FRAMERATES.to_vec())
}
