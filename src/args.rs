// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_camera_hal::{
    config::{CameraConfiguration, Size, StreamConfiguration},
    stream::MemoryType,
};
use std::{error::Error, path::PathBuf};

/// Stream memory provider.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum MemorySetting {
    /// Buffers exported by the ISP output
    Internal,
    /// Buffers allocated by the application and imported per frame
    External,
}

impl From<MemorySetting> for MemoryType {
    fn from(value: MemorySetting) -> Self {
        match value {
            MemorySetting::Internal => MemoryType::Internal,
            MemorySetting::External => MemoryType::External,
        }
    }
}

/// Backing memory for exported buffers.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum AllocatorSetting {
    /// Anonymous shared memory, works on any Linux host
    Memfd,
    /// Physically contiguous DMA heap
    Cma,
    /// System DMA heap
    System,
}

/// Command-line arguments for the EdgeFirst virtual ISP pipeline.
///
/// Runs the sensor → ISP buffer circulation against virtual devices and
/// reports the achieved frame rate. Arguments can be specified via command
/// line or environment variables.
///
/// # Example
///
/// ```bash
/// edgefirst-camera-hal --buffers 6 --memory external --frames 600
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of buffers in the bounce pool and the stream pool
    #[arg(short, long, env = "BUFFERS", default_value = "4")]
    pub buffers: usize,

    /// Number of frames to deliver before stopping
    #[arg(short, long, env = "FRAMES", default_value = "120")]
    pub frames: u64,

    /// Stream memory provider
    #[arg(long, env = "MEMORY", default_value = "internal", value_enum)]
    pub memory: MemorySetting,

    /// Stream resolution in pixels (width height)
    #[arg(
        long,
        env = "STREAM_SIZE",
        default_value = "320 240",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub stream_size: Vec<u32>,

    /// Backing memory for exported buffers
    #[arg(long, env = "ALLOCATOR", default_value = "memfd", value_enum)]
    pub allocator: AllocatorSetting,

    /// Stream configuration JSON file, overrides the stream arguments
    #[arg(long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    /// The camera configuration requested by the arguments.
    pub fn camera_configuration(&self) -> Result<CameraConfiguration, Box<dyn Error>> {
        if let Some(path) = &self.config {
            return Ok(CameraConfiguration::load(path)?);
        }

        let mut config = CameraConfiguration::new();
        config.add(StreamConfiguration {
            size: Size::new(self.stream_size[0], self.stream_size[1]),
            memory_type: self.memory.into(),
            buffer_count: self.buffers,
            ..Default::default()
        });
        Ok(config)
    }
}
