// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-process video device, modelled on the kernel's virtual media
//! controller driver.
//!
//! The device keeps queued buffers in memory and completes them when told
//! to, which lets the pipeline be driven without hardware. Faults can be
//! injected to exercise the error paths.

use crate::{
    alloc::PlaneAllocator,
    device::{CompletionNotifier, VideoDevice},
    error::{Error, QueueError, Result},
    frame::{FrameBuffer, FrameMetadata, FrameStatus, PlaneMetadata},
    plane::Plane,
    pool::BufferPool,
};
use std::{collections::VecDeque, io, time::Instant};
use tracing::{debug, trace};

pub struct VirtualDevice {
    name: String,
    notifier: CompletionNotifier,
    allocator: Box<dyn PlaneAllocator>,
    plane_sizes: Vec<usize>,
    buffer_count: Option<usize>,
    streaming: bool,
    queue: VecDeque<FrameBuffer>,
    sequence: u32,
    epoch: Instant,
    fail_stream_on: bool,
    fail_queue: bool,
    stream_on_count: usize,
    stream_off_count: usize,
    queue_log: Vec<Option<usize>>,
}

impl VirtualDevice {
    /// Creates a device whose exported buffers have one plane per entry of
    /// `plane_sizes`.
    pub fn new(
        name: impl Into<String>,
        notifier: CompletionNotifier,
        allocator: Box<dyn PlaneAllocator>,
        plane_sizes: Vec<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            notifier,
            allocator,
            plane_sizes,
            buffer_count: None,
            streaming: false,
            queue: VecDeque::new(),
            sequence: 0,
            epoch: Instant::now(),
            fail_stream_on: false,
            fail_queue: false,
            stream_on_count: 0,
            stream_off_count: 0,
            queue_log: Vec::new(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn buffer_count(&self) -> Option<usize> {
        self.buffer_count
    }

    /// Buffers currently queued, in completion order.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_indices(&self) -> Vec<Option<usize>> {
        self.queue.iter().map(|b| b.index()).collect()
    }

    /// Slot index of every buffer ever accepted by `queue_buffer`.
    pub fn queue_log(&self) -> &[Option<usize>] {
        &self.queue_log
    }

    pub fn stream_on_count(&self) -> usize {
        self.stream_on_count
    }

    pub fn stream_off_count(&self) -> usize {
        self.stream_off_count
    }

    /// Makes the next `stream_on` calls fail.
    pub fn set_fail_stream_on(&mut self, fail: bool) {
        self.fail_stream_on = fail;
    }

    /// Makes the next `queue_buffer` calls fail.
    pub fn set_fail_queue(&mut self, fail: bool) {
        self.fail_queue = fail;
    }

    /// Completes the oldest queued buffer with `status`.
    ///
    /// Returns `false` when nothing is queued.
    pub fn complete_next(&mut self, status: FrameStatus) -> Result<bool> {
        self.complete_at(0, status)
    }

    /// Completes the queued buffer backed by pool slot `index`, out of
    /// queue order if needed.
    pub fn complete_index(&mut self, index: usize, status: FrameStatus) -> Result<bool> {
        match self.queue.iter().position(|b| b.index() == Some(index)) {
            Some(position) => self.complete_at(position, status),
            None => Ok(false),
        }
    }

    /// Completes every queued buffer and returns how many there were.
    pub fn complete_all(&mut self, status: FrameStatus) -> Result<usize> {
        let mut count = 0;
        while self.complete_next(status)? {
            count += 1;
        }
        Ok(count)
    }

    fn complete_at(&mut self, position: usize, status: FrameStatus) -> Result<bool> {
        if !self.streaming {
            return Err(Error::NotStreaming);
        }
        let Some(mut buffer) = self.queue.remove(position) else {
            return Ok(false);
        };

        let planes = buffer
            .planes()
            .iter()
            .map(|plane| PlaneMetadata {
                bytes_used: match status {
                    FrameStatus::Success => plane.length,
                    _ => 0,
                },
            })
            .collect();
        let metadata = FrameMetadata {
            sequence: self.sequence,
            timestamp: self.epoch.elapsed().as_nanos() as u64,
            planes,
        };
        self.sequence = self.sequence.wrapping_add(1);

        trace!("{} completed {} {:?}", self.name, buffer, status);
        buffer.complete(status, metadata);
        self.notifier.notify(buffer);
        Ok(true)
    }
}

impl VideoDevice for VirtualDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn export_buffers(&mut self, pool: &mut BufferPool) -> Result<()> {
        if pool.is_empty() {
            return Err(Error::NoBuffers(self.name.clone()));
        }

        for mem in pool.buffers_mut() {
            let planes = mem.planes_mut();
            planes.clear();
            for &size in &self.plane_sizes {
                let fd = self.allocator.allocate(size)?;
                let mut plane = Plane::new();
                plane.assign_handle(fd, size)?;
                planes.push(plane);
            }
        }

        debug!("{} exported {} buffers", self.name, pool.count());
        self.buffer_count = Some(pool.count());
        Ok(())
    }

    fn import_buffers(&mut self, pool: &BufferPool) -> Result<()> {
        if pool.is_empty() {
            return Err(Error::NoBuffers(self.name.clone()));
        }

        debug!("{} imported {} buffers", self.name, pool.count());
        self.buffer_count = Some(pool.count());
        Ok(())
    }

    fn release_buffers(&mut self) -> Result<()> {
        if self.streaming {
            return Err(Error::Busy);
        }
        self.buffer_count = None;
        Ok(())
    }

    fn queue_buffer(&mut self, buffer: FrameBuffer) -> Result<(), QueueError> {
        let Some(count) = self.buffer_count else {
            return Err(QueueError::new(Error::NoBuffers(self.name.clone()), buffer));
        };
        if self.fail_queue {
            let err = Error::device(self.name.clone(), io::Error::from_raw_os_error(libc::EIO));
            return Err(QueueError::new(err, buffer));
        }
        if let Some(index) = buffer.index().filter(|&index| index >= count) {
            return Err(QueueError::new(Error::InvalidIndex { index, count }, buffer));
        }

        trace!("{} queued {}", self.name, buffer);
        self.queue_log.push(buffer.index());
        self.queue.push_back(buffer);
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        if self.fail_stream_on {
            return Err(Error::device(
                self.name.clone(),
                io::Error::from_raw_os_error(libc::EIO),
            ));
        }
        if self.buffer_count.is_none() {
            return Err(Error::NoBuffers(self.name.clone()));
        }

        self.streaming = true;
        self.stream_on_count += 1;
        debug!("{} stream on", self.name);
        Ok(())
    }

    fn stream_off(&mut self) {
        self.streaming = false;
        self.stream_off_count += 1;

        let cancelled = self.queue.len();
        while let Some(mut buffer) = self.queue.pop_front() {
            buffer.cancel();
            self.notifier.notify(buffer);
        }
        debug!("{} stream off, {} buffers cancelled", self.name, cancelled);
    }
}
