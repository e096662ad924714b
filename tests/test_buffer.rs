// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_camera_hal::{
    alloc::{DmaHeapAllocator, MemfdAllocator, PlaneAllocator},
    plane::{dup_handle, Plane},
    pool::BufferPool,
    Error,
};
use serial_test::serial;
use std::{error::Error as StdError, os::fd::AsRawFd};

#[test]
fn test_pool_count() -> Result<(), Box<dyn StdError>> {
    let mut pool = BufferPool::new();
    assert!(pool.is_empty());

    for count in [0, 1, 4, 16] {
        pool.create_buffers(count)?;
        assert_eq!(pool.count(), count);
        assert!(pool.get(count).is_none());
        if count > 0 {
            assert!(pool.get(count - 1).is_some());
        }
    }

    pool.destroy_buffers();
    assert_eq!(pool.count(), 0);
    assert!(pool.get(0).is_none());

    Ok(())
}

#[test]
fn test_pool_recreate() -> Result<(), Box<dyn StdError>> {
    let mut pool = BufferPool::new();
    pool.create_buffers(2)?;

    let mut plane = Plane::new();
    plane.assign_handle(MemfdAllocator.allocate(4096)?, 4096)?;
    pool.get_mut(1).ok_or("missing slot")?.planes_mut().push(plane);
    assert_eq!(pool.buffers()[1].planes().len(), 1);

    // Creating again drops the previous slots and their planes.
    pool.create_buffers(3)?;
    assert_eq!(pool.count(), 3);
    assert!(pool.buffers().iter().all(|mem| mem.planes().is_empty()));

    Ok(())
}

#[test]
fn test_pool_slots_stable() -> Result<(), Box<dyn StdError>> {
    let mut pool = BufferPool::new();
    pool.create_buffers(4)?;

    for (index, mem) in pool.buffers_mut().iter_mut().enumerate() {
        let mut plane = Plane::new();
        plane.assign_handle(MemfdAllocator.allocate(4096)?, 4096)?;
        plane.data_mut()?[0] = index as u8;
        mem.planes_mut().push(plane);
    }

    for index in 0..4 {
        let mem = pool.get_mut(index).ok_or("missing slot")?;
        assert_eq!(mem.planes_mut()[0].data()?[0], index as u8);
    }

    Ok(())
}

#[test]
fn test_plane_map() -> Result<(), Box<dyn StdError>> {
    let mut plane = Plane::new();
    assert!(!plane.is_mapped());
    plane.assign_handle(MemfdAllocator.allocate(4096)?, 4096)?;
    assert_eq!(plane.length(), 4096);

    plane.map()?;
    assert!(plane.is_mapped());
    let first = plane.data()?.as_ptr();

    // Mapping again keeps the existing mapping.
    plane.map()?;
    assert_eq!(plane.data()?.as_ptr(), first);

    plane.unmap()?;
    assert!(!plane.is_mapped());
    plane.unmap()?;

    Ok(())
}

#[test]
fn test_plane_lazy_map() -> Result<(), Box<dyn StdError>> {
    let mut plane = Plane::new();
    plane.assign_handle(MemfdAllocator.allocate(4096)?, 4096)?;
    assert!(!plane.is_mapped());

    plane.data_mut()?.fill(0x5a);
    assert!(plane.is_mapped());
    assert!(plane.data()?.iter().all(|&b| b == 0x5a));

    Ok(())
}

#[test]
fn test_plane_handle_errors() -> Result<(), Box<dyn StdError>> {
    let mut plane = Plane::new();
    assert!(plane.handle().is_none());
    assert!(matches!(plane.map(), Err(Error::NoHandle)));

    plane.assign_handle(MemfdAllocator.allocate(4096)?, 4096)?;
    let raw = plane.raw_handle();
    let err = plane.assign_handle(MemfdAllocator.allocate(4096)?, 4096);
    assert!(matches!(err, Err(Error::HandleAlreadyAssigned)));
    assert_eq!(plane.raw_handle(), raw);

    Ok(())
}

#[test]
fn test_plane_length_from_handle() -> Result<(), Box<dyn StdError>> {
    let mut plane = Plane::new();
    plane.assign_handle(MemfdAllocator.allocate(8192)?, 0)?;
    assert_eq!(plane.length(), 8192);
    assert_eq!(plane.data()?.len(), 8192);

    Ok(())
}

#[test]
fn test_plane_shared_memory() -> Result<(), Box<dyn StdError>> {
    let fd = MemfdAllocator.allocate(4096)?;

    let mut writer = Plane::new();
    writer.assign_handle(dup_handle(fd.as_raw_fd())?, 4096)?;
    let mut reader = Plane::new();
    reader.assign_handle(dup_handle(fd.as_raw_fd())?, 4096)?;
    assert_ne!(writer.raw_handle(), reader.raw_handle());

    writer.data_mut()?[100] = 42;
    assert_eq!(reader.data()?[100], 42);

    // The planes own duplicates, the original handle stays usable.
    drop(writer);
    drop(reader);
    assert!(dup_handle(fd.as_raw_fd()).is_ok());

    Ok(())
}

#[test]
fn test_dup_invalid_handle() {
    assert!(matches!(dup_handle(-1), Err(Error::InvalidHandle(-1))));
    assert!(dup_handle(i32::MAX).is_err());
}

#[test]
#[serial]
#[ignore = "requires /dev/dma_heap/linux,cma"]
fn test_dma_heap_plane() -> Result<(), Box<dyn StdError>> {
    let heap = DmaHeapAllocator::cma()?;
    let mut plane = Plane::new();
    plane.assign_handle(heap.allocate(1920 * 1080 * 2)?, 0)?;
    assert_eq!(plane.length(), 1920 * 1080 * 2);

    plane.data_mut()?.fill(0x80);
    assert_eq!(plane.data()?[0], 0x80);

    Ok(())
}
