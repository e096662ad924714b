// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    plane::NO_HANDLE,
    pool::BufferMemory,
    request::RequestId,
    stream::StreamId,
};
use std::{fmt, os::fd::RawFd};

/// Maximum number of planes carried by an external buffer.
pub const MAX_PLANES: usize = 3;

/// Completion state of a frame buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FrameStatus {
    /// Completed normally, metadata is valid.
    #[default]
    Success,
    /// The device reported an error, metadata may be partial.
    Error,
    /// Abandoned without device involvement, typically on stop.
    Cancelled,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaneMetadata {
    pub bytes_used: usize,
}

/// Capture information filled in by the device on completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u32,
    /// Capture timestamp in nanoseconds.
    pub timestamp: u64,
    pub planes: Vec<PlaneMetadata>,
}

/// Describes one plane of a frame: its handle and length in bytes.
///
/// The handle is a plain descriptor number. Ownership of the memory stays
/// with the pool slot or the application that supplied it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FramePlane {
    pub handle: RawFd,
    pub length: usize,
}

/// The handles of an external buffer, trailing unused entries set to
/// [`NO_HANDLE`].
///
/// Equality is order sensitive and is what the stream cache uses to
/// recognise a buffer it has already mapped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandleSet([RawFd; MAX_PLANES]);

impl HandleSet {
    pub const EMPTY: HandleSet = HandleSet([NO_HANDLE; MAX_PLANES]);

    pub fn new(handles: [RawFd; MAX_PLANES]) -> Self {
        Self(handles)
    }

    /// The handles up to the first [`NO_HANDLE`].
    pub fn iter(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.0.iter().copied().take_while(|&fd| fd != NO_HANDLE)
    }

    pub fn as_array(&self) -> &[RawFd; MAX_PLANES] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == NO_HANDLE
    }
}

impl Default for HandleSet {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl From<[RawFd; MAX_PLANES]> for HandleSet {
    fn from(handles: [RawFd; MAX_PLANES]) -> Self {
        Self(handles)
    }
}

impl fmt::Display for HandleSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{},{},{}}}", self.0[0], self.0[1], self.0[2])
    }
}

/// One frame transaction exchanged between pipeline stages.
///
/// A frame buffer has a single owner at a time. It is moved into a device
/// queue when queued and handed back through the completion event, so it
/// cannot be cloned.
#[derive(Debug)]
pub struct FrameBuffer {
    planes: Vec<FramePlane>,
    handles: HandleSet,
    index: Option<usize>,
    stream: Option<StreamId>,
    request: Option<RequestId>,
    status: FrameStatus,
    metadata: FrameMetadata,
    cookie: u64,
}

impl FrameBuffer {
    fn with_planes(planes: Vec<FramePlane>, handles: HandleSet) -> Self {
        Self {
            planes,
            handles,
            index: None,
            stream: None,
            request: None,
            status: FrameStatus::Success,
            metadata: FrameMetadata::default(),
            cookie: 0,
        }
    }

    /// Frame buffer referring to slot `index` of a pool.
    pub(crate) fn from_slot(stream: Option<StreamId>, index: usize, mem: &BufferMemory) -> Self {
        let planes: Vec<FramePlane> = mem
            .planes()
            .iter()
            .map(|plane| FramePlane {
                handle: plane.raw_handle(),
                length: plane.length(),
            })
            .collect();

        let mut handles = [NO_HANDLE; MAX_PLANES];
        for (slot, plane) in handles.iter_mut().zip(&planes) {
            *slot = plane.handle;
        }

        let mut buffer = Self::with_planes(planes, HandleSet(handles));
        buffer.index = Some(index);
        buffer.stream = stream;
        buffer
    }

    /// Frame buffer wrapping application supplied handles. Lengths are
    /// resolved when the stream maps the buffer.
    pub(crate) fn from_handles(stream: StreamId, handles: HandleSet) -> Self {
        let planes = handles
            .iter()
            .map(|handle| FramePlane { handle, length: 0 })
            .collect();

        let mut buffer = Self::with_planes(planes, handles);
        buffer.stream = Some(stream);
        buffer
    }

    pub fn planes(&self) -> &[FramePlane] {
        &self.planes
    }

    pub fn handles(&self) -> &HandleSet {
        &self.handles
    }

    /// Pool slot backing this buffer. External buffers only get one while
    /// mapped by their stream.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: Option<usize>) {
        self.index = index;
    }

    pub(crate) fn set_plane_lengths(&mut self, lengths: &[usize]) {
        for (plane, &length) in self.planes.iter_mut().zip(lengths) {
            plane.length = length;
        }
    }

    pub fn stream(&self) -> Option<StreamId> {
        self.stream
    }

    /// The request currently holding this buffer, if queued.
    pub fn request(&self) -> Option<RequestId> {
        self.request
    }

    pub(crate) fn set_request(&mut self, request: Option<RequestId>) {
        self.request = request;
    }

    pub fn status(&self) -> FrameStatus {
        self.status
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn set_cookie(&mut self, cookie: u64) {
        self.cookie = cookie;
    }

    /// Marks the buffer cancelled and clears its metadata.
    pub fn cancel(&mut self) {
        self.status = FrameStatus::Cancelled;
        self.metadata = FrameMetadata::default();
    }

    /// Records a device completion. Called by device implementations just
    /// before they emit the completion event.
    pub fn complete(&mut self, status: FrameStatus, metadata: FrameMetadata) {
        self.status = status;
        self.metadata = metadata;
    }
}

impl fmt::Display for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "buffer {} {} {:?}", index, self.handles, self.status),
            None => write!(f, "buffer - {} {:?}", self.handles, self.status),
        }
    }
}
