// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Stream configuration and validation.

use crate::{
    error::{Error, Result},
    stream::MemoryType,
};
use serde_json::Value;
use std::{fmt, fs::File, path::Path};
use tracing::debug;

/// Buffer count used when a configuration does not ask for one.
pub const DEFAULT_BUFFER_COUNT: usize = 4;

/// A four character pixel format code, as used by V4L2.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub [u8; 4]);

/// YUYV 4:2:2 YUV packed format (common camera output format)
pub const YUYV: PixelFormat = PixelFormat(*b"YUYV");

/// NV12 4:2:0 YUV semi-planar format
pub const NV12: PixelFormat = PixelFormat(*b"NV12");

/// RGB 24-bit pixel format
pub const RGB3: PixelFormat = PixelFormat(*b"RGB3");

/// RGBA 32-bit pixel format
pub const RGBA: PixelFormat = PixelFormat(*b"RGBA");

/// 10-bit Bayer RGGB packed, what the sensor hands to the ISP.
pub const PRGGB10: PixelFormat = PixelFormat(*b"pRAA");

impl PixelFormat {
    /// The little endian code the kernel uses.
    pub fn code(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Average storage bits per pixel across all planes.
    pub fn bits_per_pixel(&self) -> Option<usize> {
        match *self {
            YUYV => Some(16),
            NV12 => Some(12),
            RGB3 => Some(24),
            RGBA => Some(32),
            PRGGB10 => Some(10),
            _ => None,
        }
    }
}

impl From<u32> for PixelFormat {
    fn from(code: u32) -> Self {
        PixelFormat(code.to_le_bytes())
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Requested format and buffering for one stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfiguration {
    pub pixel_format: PixelFormat,
    pub size: Size,
    pub memory_type: MemoryType,
    pub buffer_count: usize,
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            pixel_format: YUYV,
            size: Size::new(320, 240),
            memory_type: MemoryType::Internal,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}

impl fmt::Display for StreamConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{:#010x}", self.size, self.pixel_format.code())
    }
}

impl StreamConfiguration {
    /// Parses one stream entry of a JSON configuration.
    ///
    /// Missing keys keep their default value.
    pub fn from_json(json: &Value) -> Result<Self> {
        let mut cfg = StreamConfiguration::default();

        if let Some(fmt) = json["pixelFormat"].as_str() {
            let bytes: [u8; 4] = fmt.as_bytes().try_into().map_err(|_| {
                Error::InvalidConfiguration(format!("pixel format {fmt:?} is not a fourcc"))
            })?;
            cfg.pixel_format = PixelFormat(bytes);
        }

        if let Some(width) = json["width"].as_u64() {
            cfg.size.width = json_u32("width", width)?;
        }
        if let Some(height) = json["height"].as_u64() {
            cfg.size.height = json_u32("height", height)?;
        }

        match json["memoryType"].as_str() {
            None | Some("internal") => {}
            Some("external") => cfg.memory_type = MemoryType::External,
            Some(other) => {
                return Err(Error::InvalidConfiguration(format!(
                    "unknown memory type {other:?}"
                )));
            }
        }

        if let Some(count) = json["bufferCount"].as_u64() {
            cfg.buffer_count = usize::try_from(count).map_err(|_| {
                Error::InvalidConfiguration(format!("bufferCount {count} out of range"))
            })?;
        }

        Ok(cfg)
    }

    /// Bytes needed to hold one frame of this configuration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if the pixel format has no known
    /// depth or the size does not fit in memory.
    pub fn frame_size(&self) -> Result<usize> {
        let bits = self.pixel_format.bits_per_pixel().ok_or_else(|| {
            Error::InvalidConfiguration(format!("unknown depth for {}", self.pixel_format))
        })?;

        (self.size.width as usize)
            .checked_mul(self.size.height as usize)
            .and_then(|pixels| pixels.checked_mul(bits))
            .map(|bits| bits.div_ceil(8))
            .ok_or_else(|| {
                Error::InvalidConfiguration(format!("frame size {} overflows", self.size))
            })
    }
}

fn json_u32(key: &str, value: u64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::InvalidConfiguration(format!("{key} {value} out of range")))
}

/// Result of [`CameraConfiguration::validate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigStatus {
    Valid,
    /// The configuration was changed to something the pipeline supports.
    Adjusted,
    Invalid,
}

/// The set of stream configurations requested for a camera.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CameraConfiguration {
    streams: Vec<StreamConfiguration>,
}

impl CameraConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration for a single stream, as the ISP pipeline
    /// generates it.
    pub fn generate() -> Self {
        Self {
            streams: vec![StreamConfiguration::default()],
        }
    }

    /// Loads a configuration from a JSON file holding a `streams` array.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let json: Value = serde_json::from_reader(file)
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        let Some(streams) = json["streams"].as_array() else {
            return Err(Error::InvalidConfiguration(
                "did not find streams as an array".to_string(),
            ));
        };

        let streams = streams
            .iter()
            .map(StreamConfiguration::from_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { streams })
    }

    pub fn add(&mut self, cfg: StreamConfiguration) {
        self.streams.push(cfg);
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StreamConfiguration> {
        self.streams.get(index)
    }

    pub fn streams(&self) -> &[StreamConfiguration] {
        &self.streams
    }

    /// Adjusts the configuration to what a single ISP output can produce.
    ///
    /// Only one stream is supported, extra streams are dropped. A zero
    /// buffer count is replaced by [`DEFAULT_BUFFER_COUNT`].
    pub fn validate(&mut self) -> ConfigStatus {
        if self.streams.is_empty() {
            return ConfigStatus::Invalid;
        }

        let mut status = ConfigStatus::Valid;

        if self.streams.len() > 1 {
            self.streams.truncate(1);
            status = ConfigStatus::Adjusted;
        }

        let cfg = &mut self.streams[0];
        if cfg.buffer_count == 0 {
            cfg.buffer_count = DEFAULT_BUFFER_COUNT;
            status = ConfigStatus::Adjusted;
        }

        debug!("validated configuration {} -> {:?}", cfg, status);
        status
    }
}
