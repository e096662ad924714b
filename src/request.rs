// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{Error, QueueError},
    frame::{FrameBuffer, FrameStatus},
    pipeline::CompletionSink,
    stream::StreamId,
};
use kanal::{Receiver, Sender};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::{debug, warn};

/// Stable identity of a [`Request`], used as a non-owning back-reference
/// from queued frame buffers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        RequestId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "request{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RequestStatus {
    #[default]
    Pending,
    Complete,
    /// At least one buffer was cancelled.
    Cancelled,
}

/// An application capture request: one buffer per stream it captures to.
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    cookie: u64,
    buffers: HashMap<StreamId, FrameBuffer>,
    status: RequestStatus,
    cancelled: bool,
    done: bool,
}

impl Request {
    pub fn new(cookie: u64) -> Self {
        Self {
            id: RequestId::next(),
            cookie,
            buffers: HashMap::new(),
            status: RequestStatus::Pending,
            cancelled: false,
            done: false,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Attaches `buffer` as the capture target for `stream`.
    ///
    /// # Errors
    ///
    /// Fails, handing the buffer back, if the buffer is still held by a
    /// queued request or this request already has a buffer for `stream`.
    pub fn add_buffer(&mut self, stream: StreamId, buffer: FrameBuffer) -> Result<(), QueueError> {
        if let Some(owner) = buffer.request() {
            return Err(QueueError::new(Error::AlreadyQueued(owner.value()), buffer));
        }
        if self.buffers.contains_key(&stream) {
            return Err(QueueError::new(Error::DuplicateStream(stream), buffer));
        }

        self.buffers.insert(stream, buffer);
        Ok(())
    }

    pub fn find_buffer(&self, stream: StreamId) -> Option<&FrameBuffer> {
        self.buffers.get(&stream)
    }

    /// Detaches the buffer for `stream`, typically to queue it to a device.
    pub fn take_buffer(&mut self, stream: StreamId) -> Option<FrameBuffer> {
        self.buffers.remove(&stream)
    }

    pub fn buffers(&self) -> impl Iterator<Item = (&StreamId, &FrameBuffer)> {
        self.buffers.iter()
    }

    fn attach_completed(&mut self, buffer: FrameBuffer) {
        if buffer.status() == FrameStatus::Cancelled {
            self.cancelled = true;
        }
        if let Some(stream) = buffer.stream() {
            self.buffers.insert(stream, buffer);
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.status = if self.cancelled {
            RequestStatus::Cancelled
        } else {
            RequestStatus::Complete
        };
    }
}

/// Tracks requests queued to a pipeline and hands them back to the
/// application in queue order once complete.
///
/// Completed requests are published on a channel so the application can
/// drain them from wherever it runs its capture loop.
pub struct RequestQueue {
    queued: VecDeque<Request>,
    tx: Sender<Request>,
    rx: Receiver<Request>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        let (tx, rx) = kanal::unbounded();
        Self {
            queued: VecDeque::new(),
            tx,
            rx,
        }
    }

    /// Number of requests queued and not yet handed back.
    pub fn pending(&self) -> usize {
        self.queued.len()
    }

    /// Receiver of completed requests.
    pub fn completed(&self) -> Receiver<Request> {
        self.rx.clone()
    }

    /// Returns the next completed request without blocking.
    pub fn try_completed(&self) -> Option<Request> {
        self.rx.try_recv().ok().flatten()
    }
}

impl CompletionSink for RequestQueue {
    fn register(&mut self, request: Request) {
        debug!("{} queued", request.id());
        self.queued.push_back(request);
    }

    fn complete_buffer(&mut self, request: RequestId, buffer: FrameBuffer) {
        match self.queued.iter_mut().find(|r| r.id() == request) {
            Some(r) => r.attach_completed(buffer),
            None => warn!("completed {} for unknown {}", buffer, request),
        }
    }

    fn complete_request(&mut self, request: RequestId) {
        if let Some(r) = self.queued.iter_mut().find(|r| r.id() == request) {
            r.finish();
        }

        while self.queued.front().is_some_and(|r| r.done) {
            let Some(r) = self.queued.pop_front() else {
                break;
            };
            debug!("{} complete {:?}", r.id(), r.status());
            if self.tx.send(r).is_err() {
                warn!("completed request dropped, receiver closed");
            }
        }
    }
}
