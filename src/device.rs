// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Contract between the pipeline and the video devices it drives.
//!
//! Devices report completed buffers through a [`CompletionNotifier`] handed
//! out by the [`EventDispatcher`]. Every notifier feeds the same channel and
//! the pipeline is its only consumer, so completions are handled one at a
//! time in the order the devices produced them.

use crate::{
    error::{QueueError, Result},
    frame::FrameBuffer,
    pool::BufferPool,
};
use kanal::{Receiver, Sender};
use std::{fmt, time::Duration};
use tracing::warn;

/// Position of a device in the sensor to ISP chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// Sensor capture device producing raw frames.
    Source,
    /// ISP queue consuming raw frames.
    IspInput,
    /// ISP queue producing processed frames for the application.
    IspOutput,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DeviceRole::Source => "source",
            DeviceRole::IspInput => "isp-input",
            DeviceRole::IspOutput => "isp-output",
        };
        f.write_str(name)
    }
}

/// A buffer handed back by a device once it is done with it.
#[derive(Debug)]
pub struct BufferEvent {
    pub role: DeviceRole,
    pub buffer: FrameBuffer,
}

/// Sending half of the completion channel, owned by one device.
#[derive(Clone)]
pub struct CompletionNotifier {
    role: DeviceRole,
    tx: Sender<BufferEvent>,
}

impl CompletionNotifier {
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Reports `buffer` as completed. The buffer's status and metadata must
    /// already be set.
    pub fn notify(&self, buffer: FrameBuffer) {
        let role = self.role;
        if self.tx.send(BufferEvent { role, buffer }).is_err() {
            warn!("{} completion dropped, dispatcher closed", role);
        }
    }
}

impl fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("role", &self.role)
            .finish()
    }
}

/// Serialises completion events from all devices of a pipeline.
pub struct EventDispatcher {
    tx: Sender<BufferEvent>,
    rx: Receiver<BufferEvent>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = kanal::unbounded();
        Self { tx, rx }
    }

    /// Creates the notifier a device in `role` uses to report completions.
    pub fn notifier(&self, role: DeviceRole) -> CompletionNotifier {
        CompletionNotifier {
            role,
            tx: self.tx.clone(),
        }
    }

    /// Next pending event, if any.
    pub fn try_next(&self) -> Option<BufferEvent> {
        self.rx.try_recv().ok().flatten()
    }

    /// Waits up to `timeout` for the next event.
    ///
    /// The dispatcher holds a sender of its own, so the channel stays open
    /// for as long as the dispatcher lives and the only way to get nothing
    /// is the timeout expiring.
    pub fn next_timeout(&self, timeout: Duration) -> Option<BufferEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// A V4L2 style buffer queue.
///
/// Device discovery, format negotiation and the ioctl sequences live behind
/// this trait. Queued buffers are owned by the device until it reports them
/// through its [`CompletionNotifier`].
pub trait VideoDevice {
    fn name(&self) -> &str;

    /// Allocates device memory for every slot of `pool` and describes it in
    /// the slots' planes.
    fn export_buffers(&mut self, pool: &mut BufferPool) -> Result<()>;

    /// Prepares the device to receive buffers whose memory lives in `pool`.
    fn import_buffers(&mut self, pool: &BufferPool) -> Result<()>;

    fn release_buffers(&mut self) -> Result<()>;

    /// Queues `buffer` to the device. The buffer is handed back on failure.
    fn queue_buffer(&mut self, buffer: FrameBuffer) -> Result<(), QueueError>;

    fn stream_on(&mut self) -> Result<()>;

    /// Stops streaming. Every buffer still queued is cancelled and reported
    /// through the notifier.
    fn stream_off(&mut self);
}
