pub mod capture;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use v4l::FourCC;

use crate::capture::device::Framerate;
use crate::capture::error::CaptureError;
use crate::capture::format;

/// Prefix for environment overrides, e.g. `V4L2_INPUT__CAPTURE__WIDTH=1280`
pub const ENV_PREFIX: &str = "V4L2_INPUT";

/// Currently applied configuration, swapped atomically on reload
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureSettings,
    pub stream: StreamConfig,
    pub pipeline: PipelineConfig,
}

/// User-selected capture settings. Changing any field restarts capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Device node; empty selects the first capture device found
    pub device_path: String,
    /// Four character code of the requested pixel format
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    /// Frame interval numerator (1 for 1/30 s)
    pub fps_numerator: u32,
    /// Frame interval denominator (30 for 1/30 s)
    pub fps_denominator: u32,
}

/// Streaming engine tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Buffers requested from the driver; it may grant fewer
    pub buffer_count: u32,
    /// Upper bound on how long the capture thread waits for a frame
    pub wait_timeout_ms: u64,
    /// Pin the capture thread to this CPU core
    pub capture_core: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".into(),
            pixel_format: "YUYV".into(),
            width: 640,
            height: 480,
            fps_numerator: 1,
            fps_denominator: 30,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: 4,
            wait_timeout_ms: 1000,
            capture_core: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 8,
        }
    }
}

impl CaptureSettings {
    pub fn fourcc(&self) -> Result<FourCC, CaptureError> {
        format::parse_fourcc(&self.pixel_format).ok_or_else(|| {
            CaptureError::InvalidSettings(format!("bad pixel format {:?}", self.pixel_format))
        })
    }

    pub fn framerate(&self) -> Framerate {
        Framerate::new(self.fps_numerator, self.fps_denominator)
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `V4L2_INPUT__*` environment
    /// variables
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
