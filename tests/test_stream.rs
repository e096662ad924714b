// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_camera_hal::{
    alloc::{MemfdAllocator, PlaneAllocator},
    frame::HandleSet,
    plane::{dup_handle, Plane, NO_HANDLE},
    stream::{MemoryType, Stream},
    Error,
};
use std::{
    error::Error as StdError,
    os::fd::{AsRawFd, OwnedFd},
};

fn memfd(length: usize) -> Result<OwnedFd, Box<dyn StdError>> {
    Ok(MemfdAllocator.allocate(length)?)
}

fn handles(fd: &OwnedFd) -> HandleSet {
    HandleSet::new([fd.as_raw_fd(), NO_HANDLE, NO_HANDLE])
}

fn external(count: usize) -> Result<Stream, Box<dyn StdError>> {
    let mut stream = Stream::new();
    stream.create_buffers(MemoryType::External, count)?;
    Ok(stream)
}

fn sorted_cache(stream: &Stream) -> Vec<(HandleSet, usize)> {
    let mut entries: Vec<_> = stream.cache_entries().copied().collect();
    entries.sort_by_key(|&(_, index)| index);
    entries
}

#[test]
fn test_create_external() -> Result<(), Box<dyn StdError>> {
    let stream = external(4)?;
    assert_eq!(stream.count(), 4);
    assert_eq!(stream.cached(), 4);

    let entries: Vec<_> = stream.cache_entries().copied().collect();
    let expected: Vec<_> = (0..4).map(|i| (HandleSet::EMPTY, i)).collect();
    assert_eq!(entries, expected);

    Ok(())
}

#[test]
fn test_create_internal() -> Result<(), Box<dyn StdError>> {
    let mut stream = Stream::new();
    stream.create_buffers(MemoryType::Internal, 3)?;
    assert_eq!(stream.count(), 3);
    assert_eq!(stream.cached(), 0);

    let buffer = stream.create_buffer(2)?;
    assert_eq!(buffer.index(), Some(2));
    assert_eq!(buffer.stream(), Some(stream.id()));
    assert!(buffer.request().is_none());

    let err = stream.create_buffer(3);
    assert!(matches!(err, Err(Error::InvalidIndex { index: 3, count: 3 })));

    Ok(())
}

#[test]
fn test_destroy_clears_cache() -> Result<(), Box<dyn StdError>> {
    let mut stream = external(4)?;
    stream.destroy_buffers();
    assert_eq!(stream.count(), 0);
    assert_eq!(stream.cached(), 0);

    Ok(())
}

#[test]
fn test_memory_type_mismatch() -> Result<(), Box<dyn StdError>> {
    let fd = memfd(4096)?;

    let mut internal = Stream::new();
    internal.create_buffers(MemoryType::Internal, 2)?;
    assert!(matches!(
        internal.create_buffer_from_handles(handles(&fd)),
        Err(Error::InvalidMemoryType {
            expected: MemoryType::External,
            actual: MemoryType::Internal
        })
    ));

    let ext = external(2)?;
    let mut buffer = ext.create_buffer_from_handles(handles(&fd))?;
    assert!(matches!(
        ext.create_buffer(0),
        Err(Error::InvalidMemoryType { .. })
    ));
    assert!(matches!(
        internal.map_buffer(&mut buffer),
        Err(Error::InvalidMemoryType { .. })
    ));

    Ok(())
}

#[test]
fn test_external_buffer() -> Result<(), Box<dyn StdError>> {
    let fd = memfd(4096)?;
    let stream = external(2)?;

    let buffer = stream.create_buffer_from_handles([fd.as_raw_fd(), NO_HANDLE, NO_HANDLE])?;
    assert_eq!(buffer.handles(), &handles(&fd));
    assert_eq!(buffer.planes().len(), 1);
    assert_eq!(buffer.planes()[0].handle, fd.as_raw_fd());
    assert!(buffer.index().is_none());

    Ok(())
}

#[test]
fn test_empty_handles_rejected() -> Result<(), Box<dyn StdError>> {
    let fd = memfd(4096)?;
    let stream = external(2)?;

    assert!(matches!(
        stream.create_buffer_from_handles(HandleSet::EMPTY),
        Err(Error::InvalidHandle(NO_HANDLE))
    ));
    assert!(matches!(
        stream.create_buffer_from_handles([NO_HANDLE, fd.as_raw_fd(), NO_HANDLE]),
        Err(Error::InvalidHandle(NO_HANDLE))
    ));
    assert_eq!(stream.cached(), 2);

    Ok(())
}

#[test]
fn test_map_keeps_file_offset() -> Result<(), Box<dyn StdError>> {
    let fd = memfd(4096)?;
    let offset = unsafe { libc::lseek(fd.as_raw_fd(), 1000, libc::SEEK_SET) };
    assert_eq!(offset, 1000);

    let mut stream = external(1)?;
    let mut buffer = stream.create_buffer_from_handles(handles(&fd))?;
    stream.map_buffer(&mut buffer)?;
    assert_eq!(buffer.planes()[0].length, 4096);

    let offset = unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_CUR) };
    assert_eq!(offset, 1000);

    Ok(())
}

#[test]
fn test_map_unmap() -> Result<(), Box<dyn StdError>> {
    let fd = memfd(4096)?;
    let mut stream = external(2)?;
    let mut buffer = stream.create_buffer_from_handles(handles(&fd))?;

    let index = stream.map_buffer(&mut buffer)?;
    assert_eq!(index, 0);
    assert_eq!(buffer.index(), Some(0));
    assert_eq!(buffer.planes()[0].length, 4096);
    assert_eq!(stream.cached(), 1);

    let planes = stream.buffer_pool().buffers()[index].planes();
    assert_eq!(planes.len(), 1);
    assert_eq!(planes[0].length(), 4096);
    assert_ne!(planes[0].raw_handle(), fd.as_raw_fd());

    stream.unmap_buffer(&mut buffer)?;
    assert!(buffer.index().is_none());
    assert_eq!(stream.cached(), 2);
    let last = stream.cache_entries().last().copied();
    assert_eq!(last, Some((handles(&fd), 0)));

    Ok(())
}

#[test]
fn test_round_trip_preserves_cache() -> Result<(), Box<dyn StdError>> {
    let fds = [memfd(4096)?, memfd(4096)?, memfd(4096)?];
    let mut stream = external(3)?;
    let mut buffers = fds
        .iter()
        .map(|fd| stream.create_buffer_from_handles(handles(fd)))
        .collect::<Result<Vec<_>, _>>()?;

    for buffer in buffers.iter_mut() {
        stream.map_buffer(buffer)?;
    }
    for buffer in buffers.iter_mut() {
        stream.unmap_buffer(buffer)?;
    }

    for buffer in buffers.iter_mut() {
        let before = sorted_cache(&stream);
        stream.map_buffer(buffer)?;
        stream.unmap_buffer(buffer)?;
        assert_eq!(sorted_cache(&stream), before);
    }

    Ok(())
}

#[test]
fn test_map_same_memory() -> Result<(), Box<dyn StdError>> {
    let fd = memfd(4096)?;
    let mut stream = external(1)?;
    let mut buffer = stream.create_buffer_from_handles(handles(&fd))?;

    let index = stream.map_buffer(&mut buffer)?;
    let mem = stream.buffer_pool_mut().get_mut(index).ok_or("missing slot")?;
    mem.planes_mut()[0].data_mut()?[7] = 0xa5;

    let mut app = Plane::new();
    app.assign_handle(dup_handle(fd.as_raw_fd())?, 4096)?;
    assert_eq!(app.data()?[7], 0xa5);

    Ok(())
}

#[test]
fn test_out_of_resources() -> Result<(), Box<dyn StdError>> {
    let fds = [memfd(4096)?, memfd(4096)?, memfd(4096)?, memfd(4096)?];
    let mut stream = external(3)?;
    let mut buffers = fds
        .iter()
        .map(|fd| stream.create_buffer_from_handles(handles(fd)))
        .collect::<Result<Vec<_>, _>>()?;

    let (last, mapped) = buffers.split_last_mut().ok_or("no buffers")?;
    for (expected, buffer) in mapped.iter_mut().enumerate() {
        assert_eq!(stream.map_buffer(buffer)?, expected);
    }
    assert_eq!(stream.cached(), 0);

    assert!(matches!(stream.map_buffer(last), Err(Error::OutOfResources)));
    assert!(last.index().is_none());

    // Freeing one slot makes room again.
    stream.unmap_buffer(&mut mapped[1])?;
    assert_eq!(stream.map_buffer(last)?, 1);

    Ok(())
}

#[test]
fn test_zero_slots() -> Result<(), Box<dyn StdError>> {
    let fd = memfd(4096)?;
    let mut stream = external(0)?;
    let mut buffer = stream.create_buffer_from_handles(handles(&fd))?;
    assert!(matches!(
        stream.map_buffer(&mut buffer),
        Err(Error::OutOfResources)
    ));

    Ok(())
}

#[test]
fn test_slot_reuse() -> Result<(), Box<dyn StdError>> {
    let a = memfd(4096)?;
    let b = memfd(4096)?;
    let mut stream = external(2)?;
    let mut buf_a = stream.create_buffer_from_handles(handles(&a))?;
    let mut buf_b = stream.create_buffer_from_handles(handles(&b))?;

    assert_eq!(stream.map_buffer(&mut buf_a)?, 0);
    assert_eq!(stream.map_buffer(&mut buf_b)?, 1);
    stream.unmap_buffer(&mut buf_b)?;
    stream.unmap_buffer(&mut buf_a)?;

    // A is recognised and gets slot 0 back even though it is not the
    // oldest free entry.
    assert_eq!(stream.map_buffer(&mut buf_a)?, 0);
    stream.unmap_buffer(&mut buf_a)?;
    assert_eq!(stream.map_buffer(&mut buf_b)?, 1);
    stream.unmap_buffer(&mut buf_b)?;

    let entries: Vec<_> = stream.cache_entries().copied().collect();
    assert_eq!(entries, vec![(handles(&a), 0), (handles(&b), 1)]);

    Ok(())
}

#[test]
fn test_hit_before_oldest() -> Result<(), Box<dyn StdError>> {
    let fds = [memfd(4096)?, memfd(4096)?, memfd(4096)?];
    let mut stream = external(3)?;
    let mut buffers = fds
        .iter()
        .map(|fd| stream.create_buffer_from_handles(handles(fd)))
        .collect::<Result<Vec<_>, _>>()?;

    for buffer in buffers.iter_mut() {
        stream.map_buffer(buffer)?;
    }
    for buffer in buffers.iter_mut() {
        stream.unmap_buffer(buffer)?;
    }

    assert_eq!(stream.map_buffer(&mut buffers[2])?, 2);
    assert_eq!(stream.map_buffer(&mut buffers[0])?, 0);
    assert_eq!(stream.map_buffer(&mut buffers[1])?, 1);

    Ok(())
}

#[test]
fn test_miss_evicts_oldest() -> Result<(), Box<dyn StdError>> {
    let a = memfd(4096)?;
    let b = memfd(4096)?;
    let c = memfd(4096)?;
    let mut stream = external(2)?;
    let mut buf_a = stream.create_buffer_from_handles(handles(&a))?;
    let mut buf_b = stream.create_buffer_from_handles(handles(&b))?;
    let mut buf_c = stream.create_buffer_from_handles(handles(&c))?;

    stream.map_buffer(&mut buf_a)?;
    stream.map_buffer(&mut buf_b)?;
    stream.unmap_buffer(&mut buf_b)?;
    stream.unmap_buffer(&mut buf_a)?;

    // B was returned first so it is the one forgotten.
    assert_eq!(stream.map_buffer(&mut buf_c)?, 1);
    let entries: Vec<_> = stream.cache_entries().copied().collect();
    assert_eq!(entries, vec![(handles(&a), 0)]);

    Ok(())
}

#[test]
fn test_multi_plane() -> Result<(), Box<dyn StdError>> {
    let y = memfd(640 * 480)?;
    let uv = memfd(640 * 240)?;
    let mut stream = external(1)?;
    let mut buffer =
        stream.create_buffer_from_handles([y.as_raw_fd(), uv.as_raw_fd(), NO_HANDLE])?;

    let index = stream.map_buffer(&mut buffer)?;
    let lengths: Vec<_> = buffer.planes().iter().map(|p| p.length).collect();
    assert_eq!(lengths, vec![640 * 480, 640 * 240]);
    assert_eq!(stream.buffer_pool().buffers()[index].planes().len(), 2);

    Ok(())
}

#[test]
fn test_map_failure_resets_entry() -> Result<(), Box<dyn StdError>> {
    let fd = memfd(4096)?;
    let mut stream = external(1)?;
    let mut good = stream.create_buffer_from_handles(handles(&fd))?;
    stream.map_buffer(&mut good)?;
    stream.unmap_buffer(&mut good)?;
    assert_eq!(stream.cache_entries().next().copied(), Some((handles(&fd), 0)));

    let mut bad = stream.create_buffer_from_handles([-5, NO_HANDLE, NO_HANDLE])?;
    assert!(matches!(
        stream.map_buffer(&mut bad),
        Err(Error::InvalidHandle(-5))
    ));
    assert!(bad.index().is_none());

    // The slot stays available but no longer matches the old handles.
    assert_eq!(stream.cached(), 1);
    assert_eq!(stream.cache_entries().next().copied(), Some((HandleSet::EMPTY, 0)));
    assert!(stream.buffer_pool().buffers()[0].planes().is_empty());

    assert_eq!(stream.map_buffer(&mut good)?, 0);
    assert_eq!(stream.buffer_pool().buffers()[0].planes().len(), 1);

    Ok(())
}

#[test]
fn test_unmap_errors() -> Result<(), Box<dyn StdError>> {
    let fds = [memfd(4096)?, memfd(4096)?, memfd(4096)?];
    let mut other = external(3)?;
    let mut buffers = fds
        .iter()
        .map(|fd| other.create_buffer_from_handles(handles(fd)))
        .collect::<Result<Vec<_>, _>>()?;
    for buffer in buffers.iter_mut() {
        other.map_buffer(buffer)?;
    }

    let mut stream = external(2)?;
    let mut unmapped = stream.create_buffer_from_handles(handles(&fds[0]))?;
    assert!(matches!(
        stream.unmap_buffer(&mut unmapped),
        Err(Error::Unmapped)
    ));

    // Slot 2 does not exist in a two slot stream.
    assert!(matches!(
        stream.unmap_buffer(&mut buffers[2]),
        Err(Error::InvalidIndex { index: 2, count: 2 })
    ));

    // Every slot is already free, a further return is refused.
    assert_eq!(stream.cached(), 2);
    assert!(matches!(
        stream.unmap_buffer(&mut buffers[0]),
        Err(Error::CacheOverflow(2))
    ));
    assert_eq!(stream.cached(), 2);
    assert_eq!(buffers[0].index(), Some(0));

    let mut internal = Stream::new();
    internal.create_buffers(MemoryType::Internal, 3)?;
    assert!(matches!(
        internal.unmap_buffer(&mut buffers[1]),
        Err(Error::InvalidMemoryType { .. })
    ));

    Ok(())
}
