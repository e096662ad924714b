// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use args::{AllocatorSetting, Args};
use clap::Parser;
use edgefirst_camera_hal::{
    alloc::{DmaHeapAllocator, MemfdAllocator, PlaneAllocator},
    device::{DeviceRole, EventDispatcher},
    frame::FrameStatus,
    pipeline::{IspDevices, IspPipeline},
    request::{Request, RequestQueue},
    stream::MemoryType,
    vimc::VirtualDevice,
};
use std::{error::Error, os::fd::AsRawFd, time::Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, EnvFilter, Layer};

mod args;

type Pipeline = IspPipeline<VirtualDevice, RequestQueue>;

fn allocator(setting: AllocatorSetting) -> Result<Box<dyn PlaneAllocator>, Box<dyn Error>> {
    Ok(match setting {
        AllocatorSetting::Memfd => Box::new(MemfdAllocator),
        AllocatorSetting::Cma => Box::new(DmaHeapAllocator::cma()?),
        AllocatorSetting::System => Box::new(DmaHeapAllocator::system()?),
    })
}

fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stdout_log = tracing_subscriber::fmt::layer().with_filter(filter);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(LevelFilter::INFO)),
        Err(_) => None,
    };

    let tracy = if args.tracy {
        tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default())
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn update_fps(prev: &mut Instant, history: &mut [f64], index: &mut usize) -> f64 {
    let now = Instant::now();
    let elapsed = now.duration_since(*prev);
    *prev = now;

    history[*index] = 1.0 / elapsed.as_secs_f64().max(1e-9);
    *index = (*index + 1) % history.len();

    history.iter().sum::<f64>() / history.len() as f64
}

/// Runs one frame through the sensor, the ISP input and the ISP output.
fn step(pipeline: &mut Pipeline) -> Result<(), Box<dyn Error>> {
    pipeline.source_mut().complete_next(FrameStatus::Success)?;
    pipeline.process_events();
    pipeline.isp_input_mut().complete_next(FrameStatus::Success)?;
    pipeline.process_events();
    pipeline.isp_output_mut().complete_next(FrameStatus::Success)?;
    pipeline.process_events();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args)?;

    let mut config = args.camera_configuration()?;
    let plane_size = match config.get(0) {
        Some(cfg) => cfg.frame_size()?,
        None => 0,
    };

    let dispatcher = EventDispatcher::new();
    let device = |name: &str, role| -> Result<VirtualDevice, Box<dyn Error>> {
        Ok(VirtualDevice::new(
            name,
            dispatcher.notifier(role),
            allocator(args.allocator)?,
            vec![plane_size],
        ))
    };
    let devices = IspDevices {
        source: device("unicam", DeviceRole::Source)?,
        isp_input: device("isp-output0", DeviceRole::IspInput)?,
        isp_output: device("isp-capture1", DeviceRole::IspOutput)?,
    };

    let mut pipeline = IspPipeline::new(dispatcher, devices, RequestQueue::new());
    let status = pipeline.configure(&mut config)?;
    info!("configuration {:?}: {}", status, pipeline.stream().configuration());
    pipeline.export_frame_buffers()?;

    // Application memory for external streams, kept open while streaming.
    let app_allocator = allocator(args.allocator)?;
    let mut app_memory = Vec::new();

    let stream = pipeline.stream().id();
    let count = pipeline.stream().configuration().buffer_count;
    let mut requests = Vec::with_capacity(count);
    for index in 0..count {
        let buffer = match pipeline.stream().memory_type() {
            MemoryType::Internal => pipeline.stream().create_buffer(index)?,
            MemoryType::External => {
                let fd = app_allocator.allocate(plane_size)?;
                let buffer = pipeline
                    .stream()
                    .create_buffer_from_handles([fd.as_raw_fd(), -1, -1])?;
                app_memory.push(fd);
                buffer
            }
        };
        let mut request = Request::new(index as u64);
        request.add_buffer(stream, buffer)?;
        requests.push(request);
    }

    pipeline.start()?;
    for request in requests {
        pipeline.queue_request(request)?;
    }

    let completed = pipeline.sink().completed();
    let mut prev = Instant::now();
    let mut history = vec![0.0; 30];
    let mut index = 0;
    let mut delivered = 0;
    while delivered < args.frames {
        step(&mut pipeline)?;

        while let Ok(Some(mut request)) = completed.try_recv() {
            delivered += 1;
            let fps = update_fps(&mut prev, &mut history, &mut index);
            if let Some(buffer) = request.find_buffer(stream) {
                debug!(
                    "request {} sequence {} fps {:.0}",
                    request.cookie(),
                    buffer.metadata().sequence,
                    fps
                );
            }

            // Recycle the buffer into a new request.
            let Some(buffer) = request.take_buffer(stream) else {
                warn!("request {} returned without a buffer", request.cookie());
                continue;
            };
            let mut next = Request::new(request.cookie());
            next.add_buffer(stream, buffer)?;
            pipeline.queue_request(next)?;
        }
    }

    pipeline.stop();
    pipeline.free_frame_buffers()?;
    info!(
        "delivered {} frames, average {:.0} fps",
        delivered,
        history.iter().sum::<f64>() / history.len() as f64
    );
    Ok(())
}
