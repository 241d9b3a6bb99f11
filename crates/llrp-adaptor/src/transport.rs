// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket layer between a reader and its interrogator.
//!
//! A [`Connector`] opens a [`Link`] either actively (client-initiated, we
//! dial the interrogator) or passively (reader-initiated, we bind a port and
//! accept the interrogator's connection). Each link owns a receive thread
//! that splits the stream into LLRP frames and hands them to a
//! [`FrameHandler`].
//!
//! ```text
//!   Reader outbound pump --write_frame()--> Link --> socket
//!   socket --> receive thread --on_frame()--> FrameHandler (Reader session)
//! ```

use crate::codec::{read_frame, DEFAULT_MAX_MESSAGE_SIZE};
use parking_lot::Mutex;
use socket2::{Domain, SockRef, Socket, Type};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default connect timeout for client-initiated links.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll period of a passive link waiting for its peer.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Receiver side of a link.
pub trait FrameHandler: Send + Sync {
    /// A complete frame arrived.
    fn on_frame(&self, frame: Vec<u8>);

    /// The stream ended; `None` for an orderly close by the peer.
    fn on_closed(&self, error: Option<io::Error>);
}

/// Sender side of an open connection.
pub trait Link: Send + Sync {
    /// Write one complete frame.
    fn write_frame(&self, frame: &[u8]) -> io::Result<()>;

    /// Whether a peer is attached (always true once a dial succeeded).
    fn has_peer(&self) -> bool;

    /// Close the connection or listener; the receive thread exits on its own.
    fn close(&self) -> io::Result<()>;

    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Factory for links.
pub trait Connector: Send + Sync {
    /// Dial `address:port` (client-initiated connection).
    fn dial(
        &self,
        address: &str,
        port: u16,
        handler: Arc<dyn FrameHandler>,
    ) -> io::Result<Arc<dyn Link>>;

    /// Bind `port` and wait for the interrogator to connect (reader-initiated).
    fn listen(&self, port: u16, handler: Arc<dyn FrameHandler>) -> io::Result<Arc<dyn Link>>;
}

/// Plain TCP connector.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    connect_timeout: Duration,
    max_frame_size: usize,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, max_frame_size: usize) -> Self {
        Self {
            connect_timeout,
            max_frame_size,
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Connector for TcpConnector {
    fn dial(
        &self,
        address: &str,
        port: u16,
        handler: Arc<dyn FrameHandler>,
    ) -> io::Result<Arc<dyn Link>> {
        let target = (address, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("cannot resolve {}:{}", address, port),
            )
        })?;

        let stream = TcpStream::connect_timeout(&target, self.connect_timeout)?;
        configure_stream(&stream);
        let rx = stream.try_clone()?;
        let control = stream.try_clone()?;

        let link = Arc::new(TcpLink {
            writer: Mutex::new(Some(stream)),
            control: Mutex::new(Some(control)),
            peer: Mutex::new(Some(target)),
            closed: AtomicBool::new(false),
        });

        let max = self.max_frame_size;
        thread::Builder::new()
            .name(format!("llrp-rx-{}", target))
            .spawn(move || receive_loop(rx, max, handler))?;

        log::debug!("[transport] dialed {}", target);
        Ok(link)
    }

    fn listen(&self, port: u16, handler: Arc<dyn FrameHandler>) -> io::Result<Arc<dyn Link>> {
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        socket.listen(1)?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;

        let link = Arc::new(TcpLink {
            writer: Mutex::new(None),
            control: Mutex::new(None),
            peer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let accept_link = Arc::clone(&link);
        let max = self.max_frame_size;
        thread::Builder::new()
            .name(format!("llrp-accept-{}", port))
            .spawn(move || accept_loop(listener, accept_link, max, handler))?;

        log::debug!("[transport] listening on {}", bind_addr);
        Ok(link)
    }
}

fn configure_stream(stream: &TcpStream) {
    stream.set_nodelay(true).ok();
    if let Err(e) = SockRef::from(stream).set_keepalive(true) {
        log::debug!("[transport] SO_KEEPALIVE not applied: {}", e);
    }
}

fn accept_loop(
    listener: TcpListener,
    link: Arc<TcpLink>,
    max_frame_size: usize,
    handler: Arc<dyn FrameHandler>,
) {
    let stream = loop {
        if link.closed.load(Ordering::Acquire) {
            return;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("[transport] interrogator connected from {}", peer);
                *link.peer.lock() = Some(peer);
                break stream;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                handler.on_closed(Some(e));
                return;
            }
        }
    };
    // One peer per reader
    drop(listener);

    if let Err(e) = stream.set_nonblocking(false) {
        handler.on_closed(Some(e));
        return;
    }
    configure_stream(&stream);

    let clones = stream
        .try_clone()
        .and_then(|rx| stream.try_clone().map(|control| (rx, control)));
    let (rx, control) = match clones {
        Ok(clones) => clones,
        Err(e) => {
            handler.on_closed(Some(e));
            return;
        }
    };
    {
        // close() sets the flag before taking this lock
        let mut slot = link.control.lock();
        if link.closed.load(Ordering::Acquire) {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        *slot = Some(control);
        *link.writer.lock() = Some(stream);
    }

    receive_loop(rx, max_frame_size, handler);
}

fn receive_loop(mut stream: TcpStream, max_frame_size: usize, handler: Arc<dyn FrameHandler>) {
    loop {
        match read_frame(&mut stream, max_frame_size) {
            Ok(frame) => handler.on_frame(frame),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                handler.on_closed(None);
                return;
            }
            Err(e) => {
                handler.on_closed(Some(e));
                return;
            }
        }
    }
}

struct TcpLink {
    /// Held for the whole of a blocking write.
    writer: Mutex<Option<TcpStream>>,
    /// Clone of the same socket; never locked across I/O, so `close` can
    /// interrupt a write stalled on a peer that stopped reading.
    control: Mutex<Option<TcpStream>>,
    peer: Mutex<Option<SocketAddr>>,
    closed: AtomicBool,
}

impl Link for TcpLink {
    fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "link closed"));
        }
        let mut writer = self.writer.lock();
        match writer.as_mut() {
            Some(stream) => {
                stream.write_all(frame)?;
                stream.flush()
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no interrogator attached",
            )),
        }
    }

    fn has_peer(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.control.lock().is_some()
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        match self.control.lock().take() {
            Some(stream) => match stream.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
                _ => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }
}
