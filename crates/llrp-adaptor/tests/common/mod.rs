// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use llrp_adaptor::{
    AdaptorConfig, ConfigError, ConfigStore, Connector, ErrorKind, ExceptionEvent, ExceptionSink,
    FrameHandler, Link, LlrpCodec, Message, MessageCodec, MessageHandler, MessageKind,
    MemoryConfigStore,
};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn frame(kind: MessageKind, id: u32, body: Vec<u8>) -> Vec<u8> {
    LlrpCodec::default()
        .encode(&Message::new(kind, id, body))
        .expect("encode")
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Exception sink recording every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ExceptionEvent>>,
    cond: Condvar,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ExceptionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Wait until at least one event of `kind` was posted.
    pub fn wait_for(&self, kind: ErrorKind, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        while !events.iter().any(|e| e.kind == kind) {
            if self.cond.wait_until(&mut events, deadline).timed_out() {
                return events.iter().any(|e| e.kind == kind);
            }
        }
        true
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ExceptionSink for RecordingSink {
    fn post(&self, event: &ExceptionEvent) {
        self.events.lock().push(event.clone());
        self.cond.notify_all();
    }
}

/// Message handler recording `(adaptor, reader, message)` triples.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<(String, String, Message)>>,
    cond: Condvar,
}

impl RecordingHandler {
    pub fn wait_count(&self, n: usize, timeout: Duration) -> Vec<(String, String, Message)> {
        let deadline = Instant::now() + timeout;
        let mut seen = self.seen.lock();
        while seen.len() < n {
            if self.cond.wait_until(&mut seen, deadline).timed_out() {
                break;
            }
        }
        seen.clone()
    }
}

impl MessageHandler for RecordingHandler {
    fn handle(&self, adaptor: &str, reader: &str, message: &Message) {
        self.seen
            .lock()
            .push((adaptor.to_string(), reader.to_string(), message.clone()));
        self.cond.notify_all();
    }
}

/// Loopback stand-in for a physical interrogator.
pub struct FakeInterrogator {
    listener: TcpListener,
}

impl FakeInterrogator {
    pub fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").expect("bind"),
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().expect("local addr").port()
    }

    pub fn accept(&self) -> TcpStream {
        let (stream, _) = self.listener.accept().expect("accept");
        stream.set_read_timeout(Some(WAIT)).expect("timeout");
        stream
    }
}

/// Read one frame from an interrogator-side stream and decode it.
pub fn read_message(stream: &mut TcpStream) -> Message {
    let bytes = llrp_adaptor::codec::read_frame(stream, 1 << 20).expect("read frame");
    LlrpCodec::default().decode(&bytes).expect("decode")
}

/// A port nobody listens on right now.
pub fn free_port() -> u16 {
    let reserved = TcpListener::bind("127.0.0.1:0").expect("bind");
    reserved.local_addr().expect("local addr").port()
}

/// Connector handing out in-memory links; closing a link dialed to an
/// address in `failing_close` fails.
#[derive(Default)]
pub struct MockConnector {
    failing_close: HashSet<String>,
    written: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MockConnector {
    pub fn failing_close_for(addresses: &[&str]) -> Self {
        Self {
            failing_close: addresses.iter().map(|a| a.to_string()).collect(),
            written: Arc::default(),
        }
    }

    pub fn written(&self) -> Vec<(String, Vec<u8>)> {
        self.written.lock().clone()
    }
}

impl Connector for MockConnector {
    fn dial(
        &self,
        address: &str,
        _port: u16,
        _handler: Arc<dyn FrameHandler>,
    ) -> io::Result<Arc<dyn Link>> {
        Ok(Arc::new(MockLink {
            address: address.to_string(),
            fail_close: self.failing_close.contains(address),
            closed: AtomicBool::new(false),
            written: Arc::clone(&self.written),
        }))
    }

    fn listen(&self, port: u16, handler: Arc<dyn FrameHandler>) -> io::Result<Arc<dyn Link>> {
        self.dial("listener", port, handler)
    }
}

struct MockLink {
    address: String,
    fail_close: bool,
    closed: AtomicBool,
    written: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl Link for MockLink {
    fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        self.written
            .lock()
            .push((self.address.clone(), frame.to_vec()));
        Ok(())
    }

    fn has_peer(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            Err(io::Error::new(io::ErrorKind::Other, "socket stuck"))
        } else {
            Ok(())
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Store whose load and store can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryConfigStore,
    pub fail_load: AtomicBool,
    pub fail_store: AtomicBool,
}

impl FlakyStore {
    pub fn with(adaptors: Vec<AdaptorConfig>) -> Self {
        Self {
            inner: MemoryConfigStore::new(adaptors),
            ..Default::default()
        }
    }

    pub fn snapshot(&self) -> Vec<AdaptorConfig> {
        self.inner.snapshot()
    }
}

impl ConfigStore for FlakyStore {
    fn load(&self) -> Result<Vec<AdaptorConfig>, ConfigError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(ConfigError::Invalid("source unreadable".into()));
        }
        self.inner.load()
    }

    fn store(&self, adaptors: &[AdaptorConfig]) -> Result<(), ConfigError> {
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(ConfigError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "read-only",
            )));
        }
        self.inner.store(adaptors)
    }
}
