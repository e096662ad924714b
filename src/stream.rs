// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    config::StreamConfiguration,
    error::{Error, Result},
    frame::{FrameBuffer, HandleSet},
    plane::{dup_handle, Plane, NO_HANDLE},
    pool::BufferPool,
};
use std::{
    collections::VecDeque,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, warn};

/// Who provides the memory behind a stream's buffers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MemoryType {
    /// Buffers are allocated by the device and exported to the application.
    #[default]
    Internal,
    /// Buffers are allocated by the application and imported per frame.
    External,
}

/// Stable identity of a [`Stream`], used as a non-owning back-reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        StreamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "stream{}", self.0)
    }
}

/// One independent output of a camera.
///
/// The stream owns the buffer pool for its output. With external memory it
/// also keeps a cache of recently seen handle sets so that a buffer the
/// application queues again lands in the same pool slot and keeps its
/// mappings.
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    pool: BufferPool,
    memory_type: MemoryType,
    configuration: StreamConfiguration,
    /// Free slots, oldest first.
    cache: VecDeque<(HandleSet, usize)>,
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream {
    pub fn new() -> Self {
        Self {
            id: StreamId::next(),
            pool: BufferPool::new(),
            memory_type: MemoryType::Internal,
            configuration: StreamConfiguration::default(),
            cache: VecDeque::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn configuration(&self) -> &StreamConfiguration {
        &self.configuration
    }

    pub(crate) fn set_configuration(&mut self, configuration: StreamConfiguration) {
        self.configuration = configuration;
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn buffer_pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    pub fn count(&self) -> usize {
        self.pool.count()
    }

    /// Number of slots currently available to [`Stream::map_buffer`].
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Snapshot of the external buffer cache, oldest entry first.
    pub fn cache_entries(&self) -> impl Iterator<Item = &(HandleSet, usize)> {
        self.cache.iter()
    }

    /// Allocates `count` pool slots for `memory` type buffers, dropping any
    /// previous pool.
    pub fn create_buffers(&mut self, memory: MemoryType, count: usize) -> Result<()> {
        self.destroy_buffers();
        self.memory_type = memory;
        self.pool.create_buffers(count)?;

        if memory == MemoryType::External {
            self.cache = (0..count).map(|index| (HandleSet::EMPTY, index)).collect();
        }

        debug!("{} created {} {:?} buffers", self.id, count, memory);
        Ok(())
    }

    pub fn destroy_buffers(&mut self) {
        self.pool.destroy_buffers();
        self.cache.clear();
    }

    /// Creates a frame buffer for pool slot `index` of an internal memory
    /// stream.
    pub fn create_buffer(&self, index: usize) -> Result<FrameBuffer> {
        self.expect_memory(MemoryType::Internal)?;

        let mem = self.pool.get(index).ok_or(Error::InvalidIndex {
            index,
            count: self.pool.count(),
        })?;
        Ok(FrameBuffer::from_slot(Some(self.id), index, mem))
    }

    /// Creates a frame buffer wrapping application allocated handles for an
    /// external memory stream.
    ///
    /// The handles are not touched until the buffer is queued. The first
    /// handle must be valid, a set without any handle is rejected with
    /// [`Error::InvalidHandle`].
    pub fn create_buffer_from_handles(
        &self,
        handles: impl Into<HandleSet>,
    ) -> Result<FrameBuffer> {
        self.expect_memory(MemoryType::External)?;

        let handles = handles.into();
        if handles.is_empty() {
            warn!("{} buffer without memory handles", self.id);
            return Err(Error::InvalidHandle(NO_HANDLE));
        }
        Ok(FrameBuffer::from_handles(self.id, handles))
    }

    /// Binds an external buffer to a pool slot and returns the slot index,
    /// which is also recorded in the buffer.
    ///
    /// A slot previously used with exactly the same handles is reused,
    /// otherwise the oldest free slot is taken. The slot's planes are rebuilt
    /// in both cases: equal descriptor numbers are not proof of the same
    /// memory since a closed descriptor's number can be reused.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMemoryType`] on an internal memory stream.
    /// - [`Error::OutOfResources`] when every slot is in use.
    /// - An I/O error if a handle cannot be duplicated.
    pub fn map_buffer(&mut self, buffer: &mut FrameBuffer) -> Result<usize> {
        self.expect_memory(MemoryType::External)?;

        let handles = *buffer.handles();
        let position = self
            .cache
            .iter()
            .position(|(cached, _)| *cached == handles)
            .unwrap_or(0);

        let Some(&(cached, index)) = self.cache.get(position) else {
            return Err(Error::OutOfResources);
        };

        if let Err(err) = self.rebuild_slot(index, buffer) {
            // The slot no longer matches any handle set.
            self.cache[position].0 = HandleSet::EMPTY;
            return Err(err);
        }

        if cached == handles {
            debug!("{} cache hit {} slot {}", self.id, handles, index);
        } else {
            debug!("{} mapped {} to slot {}", self.id, handles, index);
        }

        if let Some(mem) = self.pool.get(index) {
            let lengths: Vec<usize> = mem.planes().iter().map(|p| p.length()).collect();
            buffer.set_plane_lengths(&lengths);
        }
        buffer.set_index(Some(index));

        self.cache.remove(position);
        Ok(index)
    }

    fn rebuild_slot(&mut self, index: usize, buffer: &FrameBuffer) -> Result<()> {
        let count = self.pool.count();
        let mem = self
            .pool
            .get_mut(index)
            .ok_or(Error::InvalidIndex { index, count })?;

        let planes = mem.planes_mut();
        planes.clear();
        for desc in buffer.planes() {
            let fd = match dup_handle(desc.handle) {
                Ok(fd) => fd,
                Err(err) => {
                    planes.clear();
                    return Err(err);
                }
            };
            let mut plane = Plane::new();
            plane.assign_handle(fd, desc.length)?;
            planes.push(plane);
        }
        Ok(())
    }

    /// Returns the slot of a completed external buffer to the cache and
    /// detaches the buffer from it.
    pub fn unmap_buffer(&mut self, buffer: &mut FrameBuffer) -> Result<()> {
        self.expect_memory(MemoryType::External)?;

        let count = self.pool.count();
        let index = buffer.index().ok_or(Error::Unmapped)?;
        if index >= count {
            return Err(Error::InvalidIndex { index, count });
        }
        if self.cache.len() >= count {
            warn!("{} unmap of slot {} with a full cache", self.id, index);
            return Err(Error::CacheOverflow(self.cache.len()));
        }

        self.cache.push_back((*buffer.handles(), index));
        buffer.set_index(None);
        Ok(())
    }

    fn expect_memory(&self, expected: MemoryType) -> Result<()> {
        if self.memory_type != expected {
            warn!("{} invalid stream memory type", self.id);
            return Err(Error::InvalidMemoryType {
                expected,
                actual: self.memory_type,
            });
        }
        Ok(())
    }
}
