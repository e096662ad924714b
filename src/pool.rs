// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{Error, Result},
    plane::Plane,
};
use tracing::debug;

/// The ordered planes forming the storage of one buffer.
///
/// Plane order is significant: for multi-planar formats plane 0 holds luma
/// and the following planes hold chroma.
#[derive(Debug, Default)]
pub struct BufferMemory {
    planes: Vec<Plane>,
}

impl BufferMemory {
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn planes_mut(&mut self) -> &mut Vec<Plane> {
        &mut self.planes
    }
}

/// A fixed-size, index-stable set of buffer slots.
///
/// Slots are never moved once created so frame buffers can refer to them by
/// index. The only way to change the slot count is to recreate the pool.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Vec<BufferMemory>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the pool contents with `count` empty slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the slot table cannot be allocated.
    /// The pool is left empty on failure.
    pub fn create_buffers(&mut self, count: usize) -> Result<()> {
        self.destroy_buffers();

        let mut buffers = Vec::new();
        buffers
            .try_reserve_exact(count)
            .map_err(|_| Error::OutOfMemory(count))?;
        buffers.resize_with(count, BufferMemory::default);

        self.buffers = buffers;
        debug!("buffer pool created with {} slots", count);
        Ok(())
    }

    /// Releases every slot together with its planes.
    pub fn destroy_buffers(&mut self) {
        if !self.buffers.is_empty() {
            debug!("buffer pool destroyed {} slots", self.buffers.len());
        }
        self.buffers = Vec::new();
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffers(&self) -> &[BufferMemory] {
        &self.buffers
    }

    /// Mutable access to the slots. Slots can be edited but not added or
    /// removed.
    pub fn buffers_mut(&mut self) -> &mut [BufferMemory] {
        &mut self.buffers
    }

    pub fn get(&self, index: usize) -> Option<&BufferMemory> {
        self.buffers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BufferMemory> {
        self.buffers.get_mut(index)
    }
}
