// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Buffer circulation for a sensor feeding a memory-to-memory ISP.
//!
//! ```text
//!   source ──► isp input ──► (ISP) ──► isp output ──► application
//!     ▲            │
//!     └── bounce ──┘
//! ```
//!
//! Raw frames travel in an application-invisible bounce pool: every slot is
//! queued to the source on start, forwarded to the ISP input when the
//! source fills it, and recycled back to the source once the ISP has read
//! it. Only the ISP output queue holds application buffers, which are
//! handed to their request on completion.

use crate::{
    config::{CameraConfiguration, ConfigStatus},
    device::{BufferEvent, DeviceRole, EventDispatcher, VideoDevice},
    error::{Error, RequestError, Result},
    frame::{FrameBuffer, FrameStatus},
    pool::BufferPool,
    request::{Request, RequestId},
    stream::{MemoryType, Stream, StreamId},
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Receives application buffers and requests once the pipeline is done
/// with them.
pub trait CompletionSink {
    /// Takes custody of a request whose buffer was queued to the device.
    fn register(&mut self, request: Request);

    /// Returns a completed buffer to the request holding it.
    fn complete_buffer(&mut self, request: RequestId, buffer: FrameBuffer);

    /// Signals that all buffers of `request` are complete.
    fn complete_request(&mut self, request: RequestId);
}

/// The three video devices of an ISP pipeline.
pub struct IspDevices<D> {
    pub source: D,
    pub isp_input: D,
    pub isp_output: D,
}

/// Two-stage sensor → ISP pipeline handler for one camera.
pub struct IspPipeline<D: VideoDevice, S: CompletionSink> {
    dispatcher: EventDispatcher,
    source: D,
    isp_input: D,
    isp_output: D,
    stream: Stream,
    bounce_pool: BufferPool,
    idle: Vec<FrameBuffer>,
    in_flight: usize,
    streaming: bool,
    sink: S,
}

impl<D: VideoDevice, S: CompletionSink> IspPipeline<D, S> {
    /// Builds a pipeline around `devices`. Their completion notifiers must
    /// come from `dispatcher`.
    pub fn new(dispatcher: EventDispatcher, devices: IspDevices<D>, sink: S) -> Self {
        Self {
            dispatcher,
            source: devices.source,
            isp_input: devices.isp_input,
            isp_output: devices.isp_output,
            stream: Stream::new(),
            bounce_pool: BufferPool::new(),
            idle: Vec::new(),
            in_flight: 0,
            streaming: false,
            sink,
        }
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    pub fn source(&self) -> &D {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut D {
        &mut self.source
    }

    pub fn isp_input(&self) -> &D {
        &self.isp_input
    }

    pub fn isp_input_mut(&mut self) -> &mut D {
        &mut self.isp_input
    }

    pub fn isp_output(&self) -> &D {
        &self.isp_output
    }

    pub fn isp_output_mut(&mut self) -> &mut D {
        &mut self.isp_output
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn bounce_pool(&self) -> &BufferPool {
        &self.bounce_pool
    }

    /// Bounce buffers not queued to any device.
    pub fn idle_buffers(&self) -> &[FrameBuffer] {
        &self.idle
    }

    /// Bounce buffers currently owned by the source or the ISP input.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Validates `config` and applies its single stream configuration.
    pub fn configure(&mut self, config: &mut CameraConfiguration) -> Result<ConfigStatus> {
        if self.streaming {
            return Err(Error::Busy);
        }

        let status = config.validate();
        let cfg = match (status, config.get(0)) {
            (ConfigStatus::Invalid, _) | (_, None) => {
                return Err(Error::InvalidConfiguration(
                    "no stream configuration".to_string(),
                ))
            }
            (_, Some(cfg)) => cfg.clone(),
        };

        info!("configuring {} {:?}", cfg, cfg.memory_type);
        self.stream.set_configuration(cfg);
        Ok(status)
    }

    /// Allocates the bounce pool and the stream's buffers.
    ///
    /// The source exports memory into the bounce pool and the ISP input
    /// imports it. The ISP output exports the stream's buffers for internal
    /// memory streams or prepares to import application memory.
    ///
    /// On failure every pool and device is left without buffers.
    pub fn export_frame_buffers(&mut self) -> Result<()> {
        if self.streaming {
            return Err(Error::Busy);
        }

        if let Err(err) = self.allocate_frame_buffers() {
            error!("failed to export frame buffers: {}", err);
            for device in [&mut self.source, &mut self.isp_input, &mut self.isp_output] {
                if let Err(err) = device.release_buffers() {
                    warn!("failed to release {} buffers: {}", device.name(), err);
                }
            }
            self.bounce_pool.destroy_buffers();
            self.stream.destroy_buffers();
            return Err(err);
        }

        debug!(
            "exported {} bounce and {} stream buffers",
            self.bounce_pool.count(),
            self.stream.count()
        );
        Ok(())
    }

    fn allocate_frame_buffers(&mut self) -> Result<()> {
        let cfg = self.stream.configuration().clone();

        self.bounce_pool.create_buffers(cfg.buffer_count)?;
        self.source.export_buffers(&mut self.bounce_pool)?;
        self.isp_input.import_buffers(&self.bounce_pool)?;

        self.stream.create_buffers(cfg.memory_type, cfg.buffer_count)?;
        match cfg.memory_type {
            MemoryType::Internal => self
                .isp_output
                .export_buffers(self.stream.buffer_pool_mut())?,
            MemoryType::External => self.isp_output.import_buffers(self.stream.buffer_pool())?,
        }
        Ok(())
    }

    /// Releases device buffers and destroys the pools.
    pub fn free_frame_buffers(&mut self) -> Result<()> {
        if self.streaming {
            return Err(Error::Busy);
        }

        self.source.release_buffers()?;
        self.isp_input.release_buffers()?;
        self.isp_output.release_buffers()?;

        self.idle.clear();
        self.bounce_pool.destroy_buffers();
        self.stream.destroy_buffers();
        Ok(())
    }

    /// Starts the pipeline.
    ///
    /// The ISP queues are started before the source so that no raw frame
    /// can complete without a consumer. If any stage fails, the stages
    /// already started are stopped in reverse order before the error is
    /// returned.
    pub fn start(&mut self) -> Result<()> {
        if self.streaming {
            return Err(Error::Busy);
        }
        if self.bounce_pool.is_empty() {
            return Err(Error::NoBuffers("bounce pool".to_string()));
        }

        if let Err(err) = self.isp_input.stream_on() {
            error!("failed to start {}: {}", self.isp_input.name(), err);
            return Err(err);
        }

        if let Err(err) = self.isp_output.stream_on() {
            error!("failed to start {}: {}", self.isp_output.name(), err);
            self.isp_input.stream_off();
            self.process_events();
            return Err(err);
        }

        self.idle.clear();
        self.in_flight = 0;
        let mut result = Ok(());
        for (index, mem) in self.bounce_pool.buffers().iter().enumerate() {
            let buffer = FrameBuffer::from_slot(None, index, mem);
            match self.source.queue_buffer(buffer) {
                Ok(()) => self.in_flight += 1,
                Err(err) => {
                    let (err, buffer) = err.into_parts();
                    error!("failed to queue {} to {}: {}", buffer, self.source.name(), err);
                    self.idle.push(buffer);
                    result = Err(err);
                    break;
                }
            }
        }

        if result.is_ok() {
            result = self.source.stream_on();
            if let Err(err) = &result {
                error!("failed to start {}: {}", self.source.name(), err);
            }
        }

        if let Err(err) = result {
            self.source.stream_off();
            self.isp_output.stream_off();
            self.isp_input.stream_off();
            self.process_events();
            return Err(err);
        }

        self.streaming = true;
        info!("pipeline started with {} bounce buffers", self.in_flight);
        Ok(())
    }

    /// Stops the pipeline.
    ///
    /// Devices are stopped from the application end backwards. Their
    /// cancelled buffers are then drained: application buffers complete
    /// their requests as cancelled and bounce buffers go idle before being
    /// discarded.
    pub fn stop(&mut self) {
        if !self.streaming {
            return;
        }

        self.isp_output.stream_off();
        self.isp_input.stream_off();
        self.source.stream_off();
        self.streaming = false;

        self.process_events();

        if self.in_flight != 0 {
            warn!("{} bounce buffers unaccounted for at stop", self.in_flight);
        }
        debug!("discarding {} bounce buffers", self.idle.len());
        self.idle.clear();
        info!("pipeline stopped");
    }

    /// Queues the pipeline stream's buffer of `request` to the ISP output.
    ///
    /// External buffers are bound to a pool slot first. On failure the
    /// request is handed back with its buffer re-attached.
    pub fn queue_request(&mut self, mut request: Request) -> Result<(), RequestError> {
        if !self.streaming {
            return Err(RequestError::new(Error::NotStreaming, request));
        }

        let stream = self.stream.id();
        let Some(mut buffer) = request.take_buffer(stream) else {
            error!("attempt to queue {} with invalid stream", request.id());
            let err = Error::NotFound(request.id().value());
            return Err(RequestError::new(err, request));
        };

        let external = self.stream.memory_type() == MemoryType::External;
        if external {
            if let Err(err) = self.stream.map_buffer(&mut buffer) {
                restore_buffer(&mut request, stream, buffer);
                return Err(RequestError::new(err, request));
            }
        }

        buffer.set_request(Some(request.id()));
        match self.isp_output.queue_buffer(buffer) {
            Ok(()) => {
                self.sink.register(request);
                Ok(())
            }
            Err(err) => {
                let (err, mut buffer) = err.into_parts();
                buffer.set_request(None);
                if external {
                    if let Err(e) = self.stream.unmap_buffer(&mut buffer) {
                        warn!("failed to return slot of {}: {}", buffer, e);
                    }
                }
                restore_buffer(&mut request, stream, buffer);
                Err(RequestError::new(err, request))
            }
        }
    }

    /// Handles every pending completion event and returns how many there
    /// were.
    pub fn process_events(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self.dispatcher.try_next() {
            self.handle_event(event);
            count += 1;
        }
        count
    }

    /// Waits up to `timeout` for one completion event and handles it.
    pub fn dispatch(&mut self, timeout: Duration) -> bool {
        match self.dispatcher.next_timeout(timeout) {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    pub fn handle_event(&mut self, event: BufferEvent) {
        match event.role {
            DeviceRole::Source => self.source_ready(event.buffer),
            DeviceRole::IspInput => self.isp_input_ready(event.buffer),
            DeviceRole::IspOutput => self.isp_output_ready(event.buffer),
        }
    }

    /// A raw frame is ready: hand it to the ISP.
    fn source_ready(&mut self, mut buffer: FrameBuffer) {
        // TODO: requeue to the source instead of forwarding once a retry
        // policy for device errors is defined.
        match buffer.status() {
            FrameStatus::Cancelled => return self.retire(buffer),
            FrameStatus::Error => warn!("{} reported error on {}", self.source.name(), buffer),
            FrameStatus::Success => {}
        }
        if !self.streaming {
            buffer.cancel();
            return self.retire(buffer);
        }

        if let Err(err) = self.isp_input.queue_buffer(buffer) {
            let (err, buffer) = err.into_parts();
            error!("failed to queue {} to {}: {}", buffer, self.isp_input.name(), err);
            self.retire(buffer);
        }
    }

    /// The ISP has consumed a raw frame: give the buffer back to the source.
    fn isp_input_ready(&mut self, mut buffer: FrameBuffer) {
        match buffer.status() {
            FrameStatus::Cancelled => return self.retire(buffer),
            FrameStatus::Error => warn!("{} reported error on {}", self.isp_input.name(), buffer),
            FrameStatus::Success => {}
        }
        if !self.streaming {
            buffer.cancel();
            return self.retire(buffer);
        }

        if let Err(err) = self.source.queue_buffer(buffer) {
            let (err, buffer) = err.into_parts();
            error!("failed to queue {} to {}: {}", buffer, self.source.name(), err);
            self.retire(buffer);
        }
    }

    /// A processed frame is ready: deliver it to its request.
    fn isp_output_ready(&mut self, mut buffer: FrameBuffer) {
        let Some(request) = buffer.request() else {
            warn!("{} completed {} without a request", self.isp_output.name(), buffer);
            return;
        };

        if self.stream.memory_type() == MemoryType::External {
            if let Err(err) = self.stream.unmap_buffer(&mut buffer) {
                warn!("failed to return slot of {}: {}", buffer, err);
            }
        }

        buffer.set_request(None);
        self.sink.complete_buffer(request, buffer);
        self.sink.complete_request(request);
    }

    fn retire(&mut self, buffer: FrameBuffer) {
        debug!("{} idle", buffer);
        self.in_flight = self.in_flight.saturating_sub(1);
        self.idle.push(buffer);
    }
}

impl<D: VideoDevice, S: CompletionSink> Drop for IspPipeline<D, S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn restore_buffer(request: &mut Request, stream: StreamId, buffer: FrameBuffer) {
    if let Err(err) = request.add_buffer(stream, buffer) {
        warn!("failed to restore buffer to {}: {}", request.id(), err.error);
    }
}
