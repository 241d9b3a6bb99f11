// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serves a registry's local adaptors to remote registries.

use super::client::DEFAULT_RPC_TIMEOUT;
use super::protocol::{read_json, write_json, Notification, Request, Response};
use crate::adaptor::{Adaptor, AdaptorHandle};
use crate::codec::{Message, MessageCodec};
use crate::error::{Error, ExceptionEvent, Result};
use crate::fanout::AsyncSubscriber;
use crate::registry::Registry;
use crate::sync::CancelToken;
use parking_lot::Mutex;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// RPC endpoint for the local adaptors of one registry.
pub struct AdaptorServer {
    local_addr: SocketAddr,
    token: CancelToken,
    accept: Option<JoinHandle<()>>,
}

impl AdaptorServer {
    /// Bind `addr` and start accepting.
    pub fn bind(registry: &Arc<Registry>, addr: impl Into<SocketAddr>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr.into())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let token = CancelToken::new();
        let ctx = ServerContext {
            registry: Arc::downgrade(registry),
            token: token.clone(),
        };
        let accept = thread::Builder::new()
            .name(format!("llrp-rpc-{}", local_addr.port()))
            .spawn(move || ctx.accept_loop(listener))?;

        log::info!("[remote] serving local adaptors on {}", local_addr);
        Ok(Self {
            local_addr,
            token,
            accept: Some(accept),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting; open subscriptions end when their peers disconnect.
    pub fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
    }
}

impl Drop for AdaptorServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
struct ServerContext {
    registry: Weak<Registry>,
    token: CancelToken,
}

impl ServerContext {
    fn accept_loop(self, listener: TcpListener) {
        while !self.token.is_cancelled() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let ctx = self.clone();
                    let spawned = thread::Builder::new()
                        .name("llrp-rpc-conn".into())
                        .spawn(move || ctx.serve(stream, peer));
                    if let Err(e) = spawned {
                        log::warn!("[remote] cannot serve {}: {}", peer, e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.token.wait_timeout(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    log::warn!("[remote] accept failed: {}", e);
                    self.token.wait_timeout(ACCEPT_POLL_INTERVAL);
                }
            }
        }
    }

    fn serve(self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream
            .set_nonblocking(false)
            .and_then(|_| stream.set_read_timeout(Some(DEFAULT_RPC_TIMEOUT)))
            .and_then(|_| stream.set_write_timeout(Some(DEFAULT_RPC_TIMEOUT)))
        {
            log::debug!("[remote] {}: {}", peer, e);
            return;
        }
        let request: Request = match read_json(&mut stream) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("[remote] bad request from {}: {}", peer, e);
                return;
            }
        };
        log::trace!("[remote] {} -> {:?}", peer, request);

        if let Request::Subscribe { adaptor } = request {
            self.subscribe(stream, &adaptor);
            return;
        }

        let response = match self.handle(request) {
            Ok(response) => response,
            Err(e) => Response::from_error(&e),
        };
        if let Err(e) = write_json(&mut stream, &response) {
            log::debug!("[remote] reply to {} failed: {}", peer, e);
        }
    }

    fn registry(&self) -> Result<Arc<Registry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| Error::ManagementNotInitialized("registry shut down".into()))
    }

    /// Exact name first, then a unique case-insensitive match.
    fn lookup(&self, name: &str) -> Result<Arc<Adaptor>> {
        let registry = self.registry()?;
        if let Ok(adaptor) = registry.local_adaptor(name) {
            return Ok(adaptor);
        }
        let candidates: Vec<String> = registry
            .adaptor_names()?
            .into_iter()
            .filter(|n| n.eq_ignore_ascii_case(name))
            .collect();
        match candidates.as_slice() {
            [only] => registry.local_adaptor(only),
            _ => Err(Error::AdapterNotExist(name.to_string())),
        }
    }

    fn handle(&self, request: Request) -> Result<Response> {
        match request {
            Request::Resolve { adaptor } => Ok(Response::Name {
                name: self.lookup(&adaptor)?.adaptor_name().to_string(),
            }),
            Request::DefineReader { adaptor, config } => {
                self.lookup(&adaptor)?.define_reader(&config)?;
                self.registry()?.commit();
                Ok(Response::Ok)
            }
            Request::UndefineReader { adaptor, reader } => {
                let result = self.lookup(&adaptor)?.undefine_reader(&reader);
                self.registry()?.commit();
                result.map(|_| Response::Ok)
            }
            Request::UndefineAllReaders { adaptor } => {
                self.lookup(&adaptor)?.undefine_all_readers()?;
                self.registry()?.commit();
                Ok(Response::Ok)
            }
            Request::Send {
                adaptor,
                reader,
                bytes,
            } => {
                self.lookup(&adaptor)?.send(&reader, &bytes)?;
                Ok(Response::Ok)
            }
            Request::SendToAll { adaptor, bytes } => {
                self.lookup(&adaptor)?.send_to_all(&bytes)?;
                Ok(Response::Ok)
            }
            Request::ConnectReader { adaptor, reader } => {
                self.lookup(&adaptor)?.connect_reader(&reader)?;
                Ok(Response::Ok)
            }
            Request::DisconnectReader { adaptor, reader } => {
                self.lookup(&adaptor)?.disconnect_reader(&reader)?;
                Ok(Response::Ok)
            }
            Request::ReconnectReader { adaptor, reader } => {
                self.lookup(&adaptor)?.reconnect_reader(&reader)?;
                Ok(Response::Ok)
            }
            Request::UpdateReader { adaptor, config } => {
                self.lookup(&adaptor)?.update_reader(&config)?;
                self.registry()?.commit();
                Ok(Response::Ok)
            }
            Request::ReaderNames { adaptor } => Ok(Response::Names {
                names: self.lookup(&adaptor)?.reader_names()?,
            }),
            Request::ReaderMeta { adaptor, reader } => Ok(Response::Meta {
                meta: self.lookup(&adaptor)?.reader_meta(&reader)?,
            }),
            Request::Subscribe { adaptor } => Err(Error::MsgSending(format!(
                "subscription to '{}' needs its own connection",
                adaptor
            ))),
        }
    }

    fn subscribe(&self, mut stream: TcpStream, name: &str) {
        let adaptor = match self.lookup(name) {
            Ok(adaptor) => adaptor,
            Err(e) => {
                let _ = write_json(&mut stream, &Response::from_error(&e));
                return;
            }
        };
        let codec = match self.registry() {
            Ok(registry) => registry.codec(),
            Err(e) => {
                let _ = write_json(&mut stream, &Response::from_error(&e));
                return;
            }
        };
        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                log::debug!("[remote] subscription to '{}': {}", name, e);
                return;
            }
        };
        if write_json(&mut stream, &Response::Ok).is_err() {
            return;
        }

        let publisher: Arc<dyn AsyncSubscriber> = Arc::new(Publisher {
            writer: Mutex::new(writer),
            codec,
            failed: AtomicBool::new(false),
        });
        if let Err(e) = adaptor.register_for_async(Arc::clone(&publisher)) {
            log::debug!("[remote] subscription to '{}': {}", name, e);
            return;
        }
        log::debug!("[remote] subscription to '{}' opened", adaptor.adaptor_name());

        // Block until the subscriber hangs up
        let _ = stream.set_read_timeout(None);
        let mut scratch = [0u8; 64];
        while !self.token.is_cancelled() {
            match stream.read(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }

        let _ = adaptor.deregister_from_async(&publisher);
        log::debug!("[remote] subscription to '{}' closed", adaptor.adaptor_name());
    }
}

/// Forwards one adaptor's notifications to a subscription connection.
struct Publisher {
    writer: Mutex<TcpStream>,
    codec: Arc<dyn MessageCodec>,
    failed: AtomicBool,
}

impl Publisher {
    fn push(&self, notification: &Notification) {
        if self.failed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = write_json(&mut *self.writer.lock(), notification) {
            log::debug!("[remote] subscription write failed: {}", e);
            self.failed.store(true, Ordering::Release);
        }
    }
}

impl AsyncSubscriber for Publisher {
    fn on_message(&self, adaptor: &str, reader: &str, message: &Message) {
        match self.codec.encode(message) {
            Ok(bytes) => self.push(&Notification::Message {
                adaptor: adaptor.to_string(),
                reader: reader.to_string(),
                bytes,
            }),
            Err(e) => log::debug!("[remote] cannot forward {}: {}", message.kind(), e),
        }
    }

    fn on_error(&self, event: &ExceptionEvent) {
        self.push(&Notification::Error {
            event: event.clone(),
        });
    }
}
