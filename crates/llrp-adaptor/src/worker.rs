// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-adaptor outbound stage.
//!
//! The registry never calls an adaptor's `send` on the caller's thread.
//! Entries go into a bounded [`WorkQueue`] drained by one pump thread, so a
//! slow or unreachable remote adaptor only ever fills its own queue.

use crate::adaptor::AdaptorHandle;
use crate::codec::{Message, MessageCodec};
use crate::error::{Error, ExceptionEvent, Result};
use crate::handler::ExceptionSink;
use crate::sync::{CancelToken, WorkQueue, PUMP_WAKE_INTERVAL};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Where an adaptor lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdaptorKind {
    Local,
    Remote,
}

/// One outbound message waiting for its adaptor.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub adaptor: String,
    pub reader: String,
    pub message: Message,
}

/// Bounded queue plus pump in front of one adaptor handle.
pub struct AdaptorWorker {
    name: String,
    kind: AdaptorKind,
    address: Option<String>,
    handle: Arc<dyn AdaptorHandle>,
    codec: Arc<dyn MessageCodec>,
    queue: WorkQueue<QueueEntry>,
    threshold: usize,
    failures: AtomicU32,
    token: CancelToken,
    pump: Mutex<Option<JoinHandle<()>>>,
    sink: Arc<dyn ExceptionSink>,
}

impl AdaptorWorker {
    /// Create a stopped worker; call [`start`](Self::start) to spawn its pump.
    pub fn new(
        name: impl Into<String>,
        address: Option<String>,
        handle: Arc<dyn AdaptorHandle>,
        codec: Arc<dyn MessageCodec>,
        threshold: usize,
        sink: Arc<dyn ExceptionSink>,
    ) -> Arc<Self> {
        let kind = if handle.is_local() {
            AdaptorKind::Local
        } else {
            AdaptorKind::Remote
        };
        Arc::new(Self {
            name: name.into(),
            kind,
            address,
            handle,
            codec,
            queue: WorkQueue::new(),
            threshold,
            failures: AtomicU32::new(0),
            token: CancelToken::new(),
            pump: Mutex::new(None),
            sink,
        })
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut pump = self.pump.lock();
        if pump.is_some() {
            return Ok(());
        }
        let worker = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("llrp-worker-{}", self.name))
            .spawn(move || worker.run())
            .map_err(|e| {
                Error::MsgSending(format!("cannot start worker for '{}': {}", self.name, e))
            })?;
        *pump = Some(handle);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AdaptorKind {
        self.kind
    }

    pub fn is_local(&self) -> bool {
        self.kind == AdaptorKind::Local
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn handle(&self) -> &Arc<dyn AdaptorHandle> {
        &self.handle
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether an enqueue would currently be accepted.
    pub fn is_ready(&self) -> bool {
        !self.token.is_cancelled() && self.queue.len() < self.threshold
    }

    /// Append without blocking; fails with `QueueFull` at the threshold.
    pub fn enqueue(&self, entry: QueueEntry) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::QueueFull(format!(
                "worker for '{}' is shut down",
                self.name
            )));
        }
        self.queue.try_push(entry, self.threshold).map_err(|_| {
            Error::QueueFull(format!(
                "adaptor '{}' has {} pending messages",
                self.name, self.threshold
            ))
        })
    }

    pub fn connection_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Count one failed call to a remote adaptor.
    pub fn record_remote_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_remote_success(&self) {
        self.failures.store(0, Ordering::Release);
    }

    /// Stop the pump; queued entries are dropped.
    pub fn tear_down(&self) {
        self.token.cancel();
        self.queue.wake();
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            if pump.thread().id() != thread::current().id() && pump.join().is_err() {
                log::warn!("[worker] pump of '{}' panicked", self.name);
            }
        }
        let dropped = self.queue.len();
        self.queue.clear();
        if dropped > 0 {
            log::debug!(
                "[worker] '{}' torn down with {} queued entries",
                self.name,
                dropped
            );
        }
    }

    fn run(&self) {
        while !self.token.is_cancelled() {
            if let Some(entry) = self.queue.pop_timeout(PUMP_WAKE_INTERVAL) {
                self.dispatch(entry);
            }
        }
    }

    fn dispatch(&self, entry: QueueEntry) {
        let bytes = match self.codec.encode(&entry.message) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.post(
                    &Error::MsgSyntax(format!("cannot encode {}: {}", entry.message.kind(), e)),
                    &entry.reader,
                );
                return;
            }
        };

        match self.handle.send(&entry.reader, &bytes) {
            Ok(()) => self.record_remote_success(),
            Err(e @ Error::AdapterLost(_)) => {
                let failures = self.record_remote_failure();
                log::debug!(
                    "[worker] '{}' unreachable ({} consecutive failures)",
                    self.name,
                    failures
                );
                self.post(&e, &entry.reader);
            }
            // Reader already posted the decode failure
            Err(Error::MsgSyntax(_)) => {}
            Err(e) => {
                self.post(&Error::MsgSending(e.to_string()), &entry.reader);
            }
        }
    }

    fn post(&self, error: &Error, reader: &str) {
        self.sink
            .post(&ExceptionEvent::new(error, self.name.as_str(), reader));
    }
}

impl Drop for AdaptorWorker {
    fn drop(&mut self) {
        self.token.cancel();
        self.queue.wake();
    }
}

impl std::fmt::Debug for AdaptorWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptorWorker")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("queued", &self.queue.len())
            .field("failures", &self.connection_failures())
            .finish()
    }
}
