// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Camera HAL
//!
//! Buffer management and pipeline core for cameras built from a raw sensor
//! and a memory-to-memory ISP. It manages the DMA buffers that carry frames
//! between the sensor, the ISP and the application, and circulates them
//! through the two hardware stages on every completion event.
//!
//! ## Features
//!
//! - **Buffer Pools**: Index-stable pools of multi-planar buffers with lazy
//!   CPU mappings.
//! - **External Memory**: Application allocated dma-bufs are bound to pool
//!   slots through a per-stream handle cache.
//! - **ISP Pipeline**: Closed-loop bounce buffers between the sensor and the
//!   ISP, with ordered start/stop and full rollback on start failure.
//! - **Virtual Devices**: An in-process device implementation to drive the
//!   pipeline without hardware.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_camera_hal::{
//!     alloc::MemfdAllocator,
//!     config::CameraConfiguration,
//!     device::{DeviceRole, EventDispatcher},
//!     frame::FrameStatus,
//!     pipeline::{IspDevices, IspPipeline},
//!     request::{Request, RequestQueue},
//!     vimc::VirtualDevice,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = EventDispatcher::new();
//! let device = |name: &str, role| {
//!     let notifier = dispatcher.notifier(role);
//!     VirtualDevice::new(name, notifier, Box::new(MemfdAllocator), vec![320 * 240 * 2])
//! };
//! let devices = IspDevices {
//!     source: device("unicam", DeviceRole::Source),
//!     isp_input: device("isp-output0", DeviceRole::IspInput),
//!     isp_output: device("isp-capture1", DeviceRole::IspOutput),
//! };
//! let mut pipeline = IspPipeline::new(dispatcher, devices, RequestQueue::new());
//!
//! pipeline.configure(&mut CameraConfiguration::generate())?;
//! pipeline.export_frame_buffers()?;
//! pipeline.start()?;
//!
//! let stream = pipeline.stream().id();
//! let mut request = Request::new(0);
//! request.add_buffer(stream, pipeline.stream().create_buffer(0)?)?;
//! pipeline.queue_request(request)?;
//!
//! pipeline.isp_output_mut().complete_next(FrameStatus::Success)?;
//! pipeline.process_events();
//! let done = pipeline.sink().try_completed();
//! assert!(done.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! The core is single threaded. All device completions are funnelled
//! through one [`device::EventDispatcher`] and handled one at a time by the
//! pipeline that owns it.

pub mod alloc;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod plane;
pub mod pool;
pub mod request;
pub mod stream;
pub mod vimc;

pub use error::{Error, Result};
