// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Backing-memory allocators used when a device exports its own buffers.

use crate::error::{Error, Result};
use dma_heap::{Heap, HeapKind};
use libc::{ftruncate, memfd_create, MFD_CLOEXEC};
use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
};
use tracing::debug;

/// Source of shareable memory handles for buffer planes.
pub trait PlaneAllocator {
    /// Allocates `length` bytes and returns the handle owning them.
    fn allocate(&self, length: usize) -> Result<OwnedFd>;
}

/// Allocates planes from a Linux DMA heap (`/dev/dma_heap/*`).
///
/// Memory from the CMA heap is physically contiguous and can be handed to
/// the ISP and sensor DMA engines without copies.
pub struct DmaHeapAllocator {
    heap: Heap,
}

impl DmaHeapAllocator {
    pub fn new(kind: HeapKind) -> Result<Self> {
        let heap = Heap::new(kind).map_err(|e| Error::Allocation(e.to_string()))?;
        Ok(Self { heap })
    }

    pub fn cma() -> Result<Self> {
        Self::new(HeapKind::Cma)
    }

    pub fn system() -> Result<Self> {
        Self::new(HeapKind::System)
    }
}

impl PlaneAllocator for DmaHeapAllocator {
    fn allocate(&self, length: usize) -> Result<OwnedFd> {
        let fd = self
            .heap
            .allocate(length)
            .map_err(|e| Error::Allocation(e.to_string()))?;
        debug!("dma heap alloc'd {} bytes fd:{}", length, fd.as_raw_fd());
        Ok(fd)
    }
}

/// Allocates planes from anonymous shared memory.
///
/// Used by virtual devices and on hosts without DMA heaps. The handles are
/// shareable and mappable like dma-bufs but are not physically contiguous.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemfdAllocator;

impl PlaneAllocator for MemfdAllocator {
    fn allocate(&self, length: usize) -> Result<OwnedFd> {
        let raw = unsafe { memfd_create(c"edgefirst-plane".as_ptr(), MFD_CLOEXEC) };
        if raw < 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        if unsafe { ftruncate(fd.as_raw_fd(), length as libc::off_t) } != 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }

        debug!("memfd alloc'd {} bytes fd:{}", length, raw);
        Ok(fd)
    }
}
