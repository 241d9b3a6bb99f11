// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One interrogator connection.
//!
//! A connected reader runs up to three threads, all bound to the session's
//! [`CancelToken`]:
//!
//! ```text
//!   send() --> outbound queue --> outbound pump --> Link --> wire
//!   wire --> SessionSink --> inbound queue --> inbound pump --> Adaptor + fan-out
//!   watchdog: every (misses x period) ms, alive must have been refreshed
//! ```
//!
//! A session is torn down exactly once: whoever takes it out of the state
//! (an explicit `disconnect`, a failing write, a closed socket, or the
//! watchdog) cancels the token, closes the link and joins the other threads.

use crate::adaptor::Adaptor;
use crate::codec::{Message, MessageCodec};
use crate::config::ReaderConfig;
use crate::error::{Error, ExceptionEvent, Result};
use crate::fanout::{AsyncSubscriber, NotificationFanout};
use crate::sync::{CancelToken, WorkQueue, PUMP_WAKE_INTERVAL};
use crate::transport::{Connector, FrameHandler, Link};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poll period of an outbound pump waiting for a passive link to get its peer.
const PEER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Connection phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Deep copy of a reader's settings and counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderMetaData {
    pub name: String,
    pub adaptor: String,
    pub address: String,
    pub port: u16,
    pub client_initiated: bool,
    pub connect_immediately: bool,
    pub state: ConnectionState,
    pub connected: bool,
    pub alive: bool,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub session_packets_sent: u64,
    pub session_packets_received: u64,
    pub keepalive_period_ms: u32,
    pub allowed_keepalive_misses: u32,
    pub report_keepalive: bool,
    pub throw_on_timeout: bool,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    session_sent: AtomicU64,
    session_received: AtomicU64,
}

impl Counters {
    fn start_session(&self) {
        self.session_sent.store(0, Ordering::Relaxed);
        self.session_received.store(0, Ordering::Relaxed);
    }

    fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.session_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.session_received.fetch_add(1, Ordering::Relaxed);
    }
}

struct Session {
    token: CancelToken,
    link: Arc<dyn Link>,
    workers: Vec<JoinHandle<()>>,
}

struct ReaderState {
    phase: ConnectionState,
    session: Option<Session>,
}

/// A named connection to one physical interrogator.
pub struct Reader {
    name: String,
    adaptor: String,
    settings: RwLock<ReaderConfig>,
    owner: Weak<Adaptor>,
    codec: Arc<dyn MessageCodec>,
    connector: Arc<dyn Connector>,
    state: Mutex<ReaderState>,
    alive: AtomicBool,
    keepalive_reporting: AtomicBool,
    counters: Counters,
    outbound: WorkQueue<Message>,
    inbound: WorkQueue<Message>,
    fanout: NotificationFanout,
    next_id: AtomicU32,
}

impl Reader {
    pub(crate) fn new(
        adaptor: &str,
        settings: ReaderConfig,
        owner: Weak<Adaptor>,
        codec: Arc<dyn MessageCodec>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: settings.name.clone(),
            adaptor: adaptor.to_string(),
            settings: RwLock::new(settings),
            owner,
            codec,
            connector,
            state: Mutex::new(ReaderState {
                phase: ConnectionState::Disconnected,
                session: None,
            }),
            alive: AtomicBool::new(false),
            keepalive_reporting: AtomicBool::new(false),
            counters: Counters::default(),
            outbound: WorkQueue::new(),
            inbound: WorkQueue::new(),
            fanout: NotificationFanout::new(),
            next_id: AtomicU32::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adaptor_name(&self) -> &str {
        &self.adaptor
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> ReaderConfig {
        self.settings.read().clone()
    }

    /// Replace keepalive and reporting settings; takes effect on the next connect.
    pub fn update_settings(&self, settings: ReaderConfig) -> Result<()> {
        if settings.name != self.name {
            return Err(Error::ReaderNotExist(format!(
                "settings for '{}' applied to reader '{}'",
                settings.name, self.name
            )));
        }
        *self.settings.write() = settings;
        Ok(())
    }

    /// Snapshot of settings and counters.
    pub fn meta(&self) -> ReaderMetaData {
        let settings = self.settings.read().clone();
        let state = self.state();
        ReaderMetaData {
            name: self.name.clone(),
            adaptor: self.adaptor.clone(),
            address: settings.address,
            port: settings.port,
            client_initiated: settings.client_initiated,
            connect_immediately: settings.connect_immediately,
            state,
            connected: state == ConnectionState::Connected,
            alive: self.is_alive(),
            packets_sent: self.counters.sent.load(Ordering::Relaxed),
            packets_received: self.counters.received.load(Ordering::Relaxed),
            session_packets_sent: self.counters.session_sent.load(Ordering::Relaxed),
            session_packets_received: self.counters.session_received.load(Ordering::Relaxed),
            keepalive_period_ms: settings.keepalive_period_ms,
            allowed_keepalive_misses: settings.allowed_keepalive_misses,
            report_keepalive: settings.report_keepalive,
            throw_on_timeout: settings.throw_on_timeout,
        }
    }

    pub fn register_for_async(&self, subscriber: Arc<dyn AsyncSubscriber>) -> bool {
        self.fanout.add(subscriber)
    }

    pub fn deregister_from_async(&self, subscriber: &Arc<dyn AsyncSubscriber>) -> bool {
        self.fanout.remove(subscriber)
    }

    /// Open the connection and start the session threads.
    ///
    /// Connecting an already connected reader is a no-op.
    pub fn connect(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.phase != ConnectionState::Disconnected {
                return Ok(());
            }
            state.phase = ConnectionState::Connecting;
        }

        let settings = self.settings.read().clone();
        self.counters.start_session();
        self.outbound.clear();
        self.inbound.clear();
        self.alive.store(false, Ordering::Release);
        self.keepalive_reporting
            .store(settings.report_keepalive, Ordering::Release);

        let token = CancelToken::new();
        let sink: Arc<dyn FrameHandler> = Arc::new(SessionSink {
            reader: Arc::downgrade(self),
            token: token.clone(),
        });

        let opened = if settings.client_initiated {
            self.connector.dial(&settings.address, settings.port, sink)
        } else {
            self.connector.listen(settings.port, sink)
        };
        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                token.cancel();
                self.state.lock().phase = ConnectionState::Disconnected;
                let mode = if settings.client_initiated {
                    "connect to"
                } else {
                    "listen on"
                };
                let err = Error::ReaderLost(format!(
                    "{} {}:{} failed: {}",
                    mode, settings.address, settings.port, e
                ));
                self.report(&err);
                return Err(err);
            }
        };

        let mut state = self.state.lock();
        if state.phase != ConnectionState::Connecting {
            // Disconnected while the socket was opening
            drop(state);
            token.cancel();
            let _ = link.close();
            return Err(Error::ReaderLost(format!(
                "connect of '{}' aborted by disconnect",
                self.name
            )));
        }

        if settings.client_initiated {
            let id = self.next_message_id();
            self.outbound
                .push(self.codec.keepalive_spec(settings.keepalive_period_ms, id));
        }

        match self.spawn_workers(&token, &link, &settings) {
            Ok(workers) => {
                state.phase = ConnectionState::Connected;
                state.session = Some(Session {
                    token,
                    link,
                    workers,
                });
                log::debug!(
                    "[reader] {}/{} connected ({})",
                    self.adaptor,
                    self.name,
                    if settings.client_initiated {
                        "client-initiated"
                    } else {
                        "listening"
                    }
                );
                Ok(())
            }
            Err(e) => {
                state.phase = ConnectionState::Disconnected;
                drop(state);
                token.cancel();
                self.outbound.wake();
                self.inbound.wake();
                let _ = link.close();
                let err = Error::ReaderLost(format!("cannot start session threads: {}", e));
                self.report(&err);
                Err(err)
            }
        }
    }

    fn spawn_workers(
        self: &Arc<Self>,
        token: &CancelToken,
        link: &Arc<dyn Link>,
        settings: &ReaderConfig,
    ) -> io::Result<Vec<JoinHandle<()>>> {
        let mut workers = Vec::with_capacity(3);

        let (reader, t, l) = (Arc::clone(self), token.clone(), Arc::clone(link));
        workers.push(
            thread::Builder::new()
                .name(format!("llrp-out-{}", self.name))
                .spawn(move || reader.outbound_pump(&t, &l))?,
        );

        let (reader, t) = (Arc::clone(self), token.clone());
        workers.push(
            thread::Builder::new()
                .name(format!("llrp-in-{}", self.name))
                .spawn(move || reader.inbound_pump(&t))?,
        );

        if settings.client_initiated {
            let (reader, t) = (Arc::clone(self), token.clone());
            let window = settings.keepalive_window();
            let throw_on_timeout = settings.throw_on_timeout;
            workers.push(
                thread::Builder::new()
                    .name(format!("llrp-watchdog-{}", self.name))
                    .spawn(move || reader.watchdog(&t, window, throw_on_timeout))?,
            );
        }

        Ok(workers)
    }

    /// Close the connection and stop every session thread.
    ///
    /// Teardown always runs to completion; the first close or join failure
    /// is returned afterwards as `ReaderLost`.
    pub fn disconnect(&self) -> Result<()> {
        let session = {
            let mut state = self.state.lock();
            state.phase = ConnectionState::Disconnected;
            state.session.take()
        };
        match session {
            Some(session) => self.finish_teardown(session),
            None => Ok(()),
        }
    }

    /// Disconnect, then connect again with the current settings.
    pub fn reconnect(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.disconnect() {
            log::debug!("[reader] {}/{} reconnect: {}", self.adaptor, self.name, e);
        }
        self.connect()
    }

    /// Tear down only if `token` still names the live session.
    fn teardown_if_current(&self, token: &CancelToken) -> Option<Result<()>> {
        let session = {
            let mut state = self.state.lock();
            let current = matches!(&state.session, Some(s) if s.token.same_as(token));
            if !current {
                return None;
            }
            state.phase = ConnectionState::Disconnected;
            state.session.take()
        };
        session.map(|s| self.finish_teardown(s))
    }

    fn finish_teardown(&self, session: Session) -> Result<()> {
        self.keepalive_reporting.store(false, Ordering::Release);
        session.token.cancel();
        self.outbound.wake();
        self.inbound.wake();

        let mut first_error = session
            .link
            .close()
            .err()
            .map(|e| Error::ReaderLost(format!("close of '{}' failed: {}", self.name, e)));

        let current = thread::current().id();
        for worker in session.workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() && first_error.is_none() {
                first_error = Some(Error::ReaderLost(format!(
                    "session thread of '{}' panicked",
                    self.name
                )));
            }
        }

        log::debug!("[reader] {}/{} disconnected", self.adaptor, self.name);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Decode `bytes` and queue them for the wire.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::MsgSending(format!(
                "reader '{}' is not connected",
                self.name
            )));
        }
        let message = match self.codec.decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                let err = Error::MsgSyntax(format!("outbound to '{}': {}", self.name, e));
                self.report(&err);
                return Err(err);
            }
        };
        self.outbound.push(message);
        Ok(())
    }

    /// Outbound messages not yet written.
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    fn next_message_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn outbound_pump(&self, token: &CancelToken, link: &Arc<dyn Link>) {
        while !token.is_cancelled() {
            if !link.has_peer() {
                token.wait_timeout(PEER_POLL_INTERVAL);
                continue;
            }
            let Some(message) = self.outbound.pop_timeout(PUMP_WAKE_INTERVAL) else {
                continue;
            };
            let frame = match self.codec.encode(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    self.report(&Error::MsgSyntax(format!(
                        "cannot encode {}: {}",
                        message.kind(),
                        e
                    )));
                    continue;
                }
            };
            if let Err(e) = link.write_frame(&frame) {
                if self.teardown_if_current(token).is_some() {
                    self.report(&Error::ReaderLost(format!("write failed: {}", e)));
                }
                return;
            }
            self.counters.record_sent();
        }
    }

    fn inbound_pump(&self, token: &CancelToken) {
        while !token.is_cancelled() {
            if let Some(message) = self.inbound.pop_timeout(PUMP_WAKE_INTERVAL) {
                self.deliver_message(&message);
            }
        }
    }

    fn deliver_message(&self, message: &Message) {
        if let Some(owner) = self.owner.upgrade() {
            let failed = owner.message_received(&self.name, message);
            if failed > 0 {
                self.report(&Error::MsgSending(format!(
                    "{} adaptor subscriber(s) failed on {}",
                    failed,
                    message.kind()
                )));
            }
        }
        let failed = self.fanout.deliver_message(&self.adaptor, &self.name, message);
        if failed > 0 {
            self.report(&Error::MsgSending(format!(
                "{} reader subscriber(s) failed on {}",
                failed,
                message.kind()
            )));
        }
    }

    fn watchdog(&self, token: &CancelToken, window: Duration, throw_on_timeout: bool) {
        loop {
            if token.wait_timeout(window) {
                return;
            }
            if !self.alive.swap(false, Ordering::AcqRel) {
                if self.teardown_if_current(token).is_some() {
                    log::warn!(
                        "[reader] {}/{} missed keepalives for {:?}",
                        self.adaptor,
                        self.name,
                        window
                    );
                    if throw_on_timeout {
                        self.report(&Error::ReaderLost(format!(
                            "no keepalive within {} ms",
                            window.as_millis()
                        )));
                    }
                }
                return;
            }
        }
    }

    fn frame_received(&self, token: &CancelToken, frame: &[u8]) {
        if token.is_cancelled() {
            return;
        }
        self.counters.record_received();

        let message = match self.codec.decode(frame) {
            Ok(message) => message,
            Err(e) => {
                self.report(&Error::MsgSyntax(format!("inbound frame: {}", e)));
                return;
            }
        };

        if self.codec.is_keepalive(&message) {
            self.alive.store(true, Ordering::Release);
            if !self.keepalive_reporting.load(Ordering::Acquire) {
                return;
            }
        }
        self.inbound.push(message);
    }

    fn connection_closed(&self, token: &CancelToken, error: Option<io::Error>) {
        if token.is_cancelled() {
            return;
        }
        if self.teardown_if_current(token).is_some() {
            let detail = match error {
                Some(e) => format!("connection error: {}", e),
                None => "connection closed by interrogator".to_string(),
            };
            self.report(&Error::ReaderLost(detail));
        }
    }

    /// Post a background failure to the owning adaptor and this reader's subscribers.
    fn report(&self, error: &Error) {
        let event = ExceptionEvent::new(error, self.adaptor.as_str(), self.name.as_str());
        log::debug!("[reader] {}", event);
        if let Some(owner) = self.owner.upgrade() {
            owner.error_occurred(&event);
        }
        self.fanout.deliver_error(&event);
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("name", &self.name)
            .field("adaptor", &self.adaptor)
            .field("state", &self.state())
            .finish()
    }
}

/// Transport callback bound to one session.
struct SessionSink {
    reader: Weak<Reader>,
    token: CancelToken,
}

impl FrameHandler for SessionSink {
    fn on_frame(&self, frame: Vec<u8>) {
        if let Some(reader) = self.reader.upgrade() {
            reader.frame_received(&self.token, &frame);
        }
    }

    fn on_closed(&self, error: Option<io::Error>) {
        if let Some(reader) = self.reader.upgrade() {
            reader.connection_closed(&self.token, error);
        }
    }
}
