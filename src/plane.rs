// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::error::{Error, Result};
use libc::{
    fcntl, lseek, mmap, munmap, F_DUPFD_CLOEXEC, MAP_FAILED, MAP_SHARED, PROT_READ, PROT_WRITE,
    SEEK_CUR, SEEK_END, SEEK_SET,
};
use std::{
    ffi::c_void,
    fmt, io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    ptr::{null_mut, NonNull},
    slice::{from_raw_parts, from_raw_parts_mut},
};
use tracing::{debug, warn};

/// Sentinel marking an unused handle slot.
pub const NO_HANDLE: RawFd = -1;

/// Duplicates a raw handle owned by someone else into an [`OwnedFd`].
///
/// External buffers arrive as bare descriptor numbers whose lifetime is
/// controlled by the application, so the pool keeps its own reference.
pub fn dup_handle(fd: RawFd) -> Result<OwnedFd> {
    if fd < 0 {
        return Err(Error::InvalidHandle(fd));
    }

    let dup = unsafe { fcntl(fd, F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        let err = io::Error::last_os_error();
        warn!("failed to duplicate handle {}: {}", fd, err);
        return Err(Error::Io(err));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}

/// Size of the memory object behind `fd`, or `None` when it cannot seek.
pub fn handle_length(fd: BorrowedFd<'_>) -> Option<usize> {
    // Duplicated descriptors share the offset with the application's.
    let offset = unsafe { lseek(fd.as_raw_fd(), 0, SEEK_CUR) };
    if offset < 0 {
        return None;
    }
    let end = unsafe { lseek(fd.as_raw_fd(), 0, SEEK_END) };
    unsafe { lseek(fd.as_raw_fd(), offset, SEEK_SET) };
    if end < 0 {
        return None;
    }
    Some(end as usize)
}

/// A single contiguous memory region backing part of a buffer.
///
/// The plane owns its memory handle. The CPU mapping is created lazily on
/// the first access and torn down before the handle is closed.
///
/// # Example
///
/// ```no_run
/// use edgefirst_camera_hal::{alloc::{MemfdAllocator, PlaneAllocator}, plane::Plane};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fd = MemfdAllocator::default().allocate(4096)?;
/// let mut plane = Plane::new();
/// plane.assign_handle(fd, 4096)?;
/// plane.data_mut()?[0] = 0xff;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Plane {
    fd: Option<OwnedFd>,
    length: usize,
    mem: Option<NonNull<u8>>,
}

impl Plane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `fd` as the plane's memory handle.
    ///
    /// A `length` of zero is replaced by the size reported by the handle
    /// itself, if it can tell.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleAlreadyAssigned`] if the plane already holds a
    /// handle. The new descriptor is closed in that case.
    pub fn assign_handle(&mut self, fd: OwnedFd, length: usize) -> Result<()> {
        if self.fd.is_some() {
            return Err(Error::HandleAlreadyAssigned);
        }

        let length = match length {
            0 => handle_length(fd.as_fd()).unwrap_or(0),
            n => n,
        };

        self.fd = Some(fd);
        self.length = length;
        Ok(())
    }

    pub fn handle(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Raw descriptor number, or [`NO_HANDLE`] when none is assigned.
    pub fn raw_handle(&self) -> RawFd {
        self.fd.as_ref().map_or(NO_HANDLE, |fd| fd.as_raw_fd())
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_mapped(&self) -> bool {
        self.mem.is_some()
    }

    /// Maps the plane into the process address space.
    ///
    /// Calling this on an already mapped plane leaves the mapping untouched.
    pub fn map(&mut self) -> Result<()> {
        if self.mem.is_some() {
            return Ok(());
        }

        let fd = self.fd.as_ref().ok_or(Error::NoHandle)?;
        if self.length == 0 {
            return Err(Error::InvalidLength);
        }

        let mem = unsafe {
            mmap(
                null_mut(),
                self.length,
                PROT_READ | PROT_WRITE,
                MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if mem == MAP_FAILED {
            let err = io::Error::last_os_error();
            warn!("failed to map plane fd:{}: {}", fd.as_raw_fd(), err);
            return Err(Error::Io(err));
        }

        debug!("mapped plane fd:{} length:{}", fd.as_raw_fd(), self.length);
        self.mem = NonNull::new(mem.cast::<u8>());
        Ok(())
    }

    /// Releases the CPU mapping, if any.
    pub fn unmap(&mut self) -> Result<()> {
        let Some(mem) = self.mem else {
            return Ok(());
        };

        if unsafe { munmap(mem.as_ptr().cast::<c_void>(), self.length) } != 0 {
            let err = io::Error::last_os_error();
            warn!("failed to unmap plane: {}", err);
            return Err(Error::Io(err));
        }

        self.mem = None;
        Ok(())
    }

    /// CPU view of the plane, mapping it on first use.
    pub fn data(&mut self) -> Result<&[u8]> {
        self.map()?;
        match self.mem {
            Some(mem) => Ok(unsafe { from_raw_parts(mem.as_ptr(), self.length) }),
            None => Err(Error::NoHandle),
        }
    }

    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        self.map()?;
        match self.mem {
            Some(mem) => Ok(unsafe { from_raw_parts_mut(mem.as_ptr(), self.length) }),
            None => Err(Error::NoHandle),
        }
    }
}

impl Drop for Plane {
    fn drop(&mut self) {
        // Unmap before the handle closes with `fd`.
        let _ = self.unmap();
    }
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Plane")
            .field("fd", &self.raw_handle())
            .field("length", &self.length)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}
