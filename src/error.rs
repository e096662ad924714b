// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error type shared by the buffer and pipeline layers.

use crate::{
    frame::FrameBuffer,
    request::Request,
    stream::{MemoryType, StreamId},
};
use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// More external buffers were presented than the stream has slots for.
    #[error("no free buffer slot in the stream cache")]
    OutOfResources,

    #[error("buffer index {index} out of range for pool of {count}")]
    InvalidIndex { index: usize, count: usize },

    #[error("failed to allocate {0} buffer slots")]
    OutOfMemory(usize),

    #[error("buffer is not bound to a pool slot")]
    Unmapped,

    #[error("stream cache already holds {0} entries")]
    CacheOverflow(usize),

    #[error("operation requires {expected:?} memory but the stream uses {actual:?}")]
    InvalidMemoryType {
        expected: MemoryType,
        actual: MemoryType,
    },

    #[error("plane already holds a memory handle")]
    HandleAlreadyAssigned,

    #[error("plane has no memory handle")]
    NoHandle,

    #[error("invalid memory handle {0}")]
    InvalidHandle(i32),

    #[error("plane length is zero")]
    InvalidLength,

    #[error("{0} has no buffers allocated")]
    NoBuffers(String),

    #[error("pipeline is streaming")]
    Busy,

    #[error("pipeline is not streaming")]
    NotStreaming,

    #[error("request {0} has no buffer for the pipeline stream")]
    NotFound(u64),

    #[error("buffer is already attached to request {0}")]
    AlreadyQueued(u64),

    #[error("request already has a buffer for {0}")]
    DuplicateStream(StreamId),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("{device}: {source}")]
    Device {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("buffer allocation failed: {0}")]
    Allocation(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps an OS error raised by `device`.
    pub fn device(device: impl Into<String>, source: io::Error) -> Self {
        Error::Device {
            device: device.into(),
            source,
        }
    }
}

/// Returned by [`VideoDevice::queue_buffer`](crate::device::VideoDevice::queue_buffer)
/// when the device refuses a buffer. The buffer is handed back so it is never
/// lost on the error path.
#[derive(Debug, Error)]
#[error("failed to queue buffer: {error}")]
pub struct QueueError {
    #[source]
    pub error: Error,
    pub buffer: FrameBuffer,
}

impl QueueError {
    pub fn new(error: Error, buffer: FrameBuffer) -> Self {
        Self { error, buffer }
    }

    pub fn into_parts(self) -> (Error, FrameBuffer) {
        (self.error, self.buffer)
    }
}

/// Returned when a request cannot be queued to a pipeline. The request is
/// handed back with its buffers attached.
#[derive(Debug, Error)]
#[error("failed to queue {}: {error}", .request.id())]
pub struct RequestError {
    #[source]
    pub error: Error,
    pub request: Request,
}

impl RequestError {
    pub fn new(error: Error, request: Request) -> Self {
        Self { error, request }
    }

    pub fn into_parts(self) -> (Error, Request) {
        (self.error, self.request)
    }
}
