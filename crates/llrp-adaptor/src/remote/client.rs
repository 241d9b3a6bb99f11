// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client side of the remote adaptor protocol.

use super::protocol::{read_json, write_json, Notification, Request, Response};
use super::RemoteResolver;
use crate::adaptor::AdaptorHandle;
use crate::codec::MessageCodec;
use crate::config::ReaderConfig;
use crate::error::{Error, ExceptionEvent, Result};
use crate::fanout::AsyncSubscriber;
use crate::reader::ReaderMetaData;
use crate::sync::CancelToken;
use parking_lot::Mutex;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Connect/read/write timeout of one remote call.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

struct Subscription {
    subscriber: Arc<dyn AsyncSubscriber>,
    token: CancelToken,
    stream: TcpStream,
    thread: JoinHandle<()>,
}

/// [`AdaptorHandle`] backed by an `AdaptorServer` in another process.
///
/// Every call opens its own connection; an unreachable peer surfaces as
/// `AdapterLost`.
pub struct RemoteAdaptor {
    name: String,
    address: String,
    timeout: Duration,
    codec: Arc<dyn MessageCodec>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl RemoteAdaptor {
    /// Resolve `name` at `address` (`host:port`) and adopt the name the server reports.
    pub fn connect(
        name: &str,
        address: &str,
        codec: Arc<dyn MessageCodec>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut adaptor = Self {
            name: name.to_string(),
            address: address.to_string(),
            timeout,
            codec,
            subscriptions: Mutex::new(Vec::new()),
        };
        let canonical = adaptor.name()?;
        if canonical != name {
            log::info!(
                "[remote] adaptor '{}' at {} reports itself as '{}'",
                name,
                address,
                canonical
            );
        }
        adaptor.name = canonical;
        Ok(adaptor)
    }

    pub fn adaptor_name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn open(&self) -> Result<TcpStream> {
        let lost = |e: io::Error| Error::AdapterLost(format!("{}: {}", self.address, e));
        let target: SocketAddr = self
            .address
            .to_socket_addrs()
            .map_err(lost)?
            .next()
            .ok_or_else(|| Error::AdapterLost(format!("cannot resolve {}", self.address)))?;
        let stream = TcpStream::connect_timeout(&target, self.timeout).map_err(lost)?;
        stream.set_nodelay(true).ok();
        stream.set_write_timeout(Some(self.timeout)).map_err(lost)?;
        Ok(stream)
    }

    fn call(&self, request: &Request) -> Result<Response> {
        let mut stream = self.open()?;
        let lost = |e: io::Error| Error::AdapterLost(format!("{}: {}", self.address, e));
        stream.set_read_timeout(Some(self.timeout)).map_err(lost)?;
        write_json(&mut stream, request).map_err(lost)?;
        match read_json(&mut stream).map_err(lost)? {
            Response::Error { kind, message } => Err(Error::new(kind, message)),
            response => Ok(response),
        }
    }

    fn call_ok(&self, request: &Request) -> Result<()> {
        match self.call(request)? {
            Response::Ok => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn cancel(subscription: Subscription) {
        subscription.token.cancel();
        let _ = subscription.stream.shutdown(Shutdown::Both);
        if subscription.thread.thread().id() != thread::current().id() {
            let _ = subscription.thread.join();
        }
    }
}

fn unexpected(response: &Response) -> Error {
    Error::MsgSending(format!("unexpected remote response {:?}", response))
}

fn same_subscriber(a: &Arc<dyn AsyncSubscriber>, b: &Arc<dyn AsyncSubscriber>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl AdaptorHandle for RemoteAdaptor {
    fn name(&self) -> Result<String> {
        match self.call(&Request::Resolve {
            adaptor: self.name.clone(),
        })? {
            Response::Name { name } => Ok(name),
            other => Err(unexpected(&other)),
        }
    }

    fn define_reader(&self, config: &ReaderConfig) -> Result<()> {
        self.call_ok(&Request::DefineReader {
            adaptor: self.name.clone(),
            config: config.clone(),
        })
    }

    fn undefine_reader(&self, reader: &str) -> Result<()> {
        self.call_ok(&Request::UndefineReader {
            adaptor: self.name.clone(),
            reader: reader.to_string(),
        })
    }

    fn undefine_all_readers(&self) -> Result<()> {
        self.call_ok(&Request::UndefineAllReaders {
            adaptor: self.name.clone(),
        })
    }

    fn send(&self, reader: &str, bytes: &[u8]) -> Result<()> {
        self.call_ok(&Request::Send {
            adaptor: self.name.clone(),
            reader: reader.to_string(),
            bytes: bytes.to_vec(),
        })
    }

    fn send_to_all(&self, bytes: &[u8]) -> Result<()> {
        self.call_ok(&Request::SendToAll {
            adaptor: self.name.clone(),
            bytes: bytes.to_vec(),
        })
    }

    fn connect_reader(&self, reader: &str) -> Result<()> {
        self.call_ok(&Request::ConnectReader {
            adaptor: self.name.clone(),
            reader: reader.to_string(),
        })
    }

    fn disconnect_reader(&self, reader: &str) -> Result<()> {
        self.call_ok(&Request::DisconnectReader {
            adaptor: self.name.clone(),
            reader: reader.to_string(),
        })
    }

    fn reconnect_reader(&self, reader: &str) -> Result<()> {
        self.call_ok(&Request::ReconnectReader {
            adaptor: self.name.clone(),
            reader: reader.to_string(),
        })
    }

    fn update_reader(&self, config: &ReaderConfig) -> Result<()> {
        self.call_ok(&Request::UpdateReader {
            adaptor: self.name.clone(),
            config: config.clone(),
        })
    }

    fn reader_names(&self) -> Result<Vec<String>> {
        match self.call(&Request::ReaderNames {
            adaptor: self.name.clone(),
        })? {
            Response::Names { names } => Ok(names),
            other => Err(unexpected(&other)),
        }
    }

    fn reader_meta(&self, reader: &str) -> Result<ReaderMetaData> {
        match self.call(&Request::ReaderMeta {
            adaptor: self.name.clone(),
            reader: reader.to_string(),
        })? {
            Response::Meta { meta } => Ok(meta),
            other => Err(unexpected(&other)),
        }
    }

    /// Open a notification stream feeding `subscriber`.
    fn register_for_async(&self, subscriber: Arc<dyn AsyncSubscriber>) -> Result<()> {
        if self
            .subscriptions
            .lock()
            .iter()
            .any(|s| same_subscriber(&s.subscriber, &subscriber))
        {
            return Ok(());
        }

        let mut stream = self.open()?;
        let lost = |e: io::Error| Error::AdapterLost(format!("{}: {}", self.address, e));
        stream.set_read_timeout(Some(self.timeout)).map_err(lost)?;
        write_json(
            &mut stream,
            &Request::Subscribe {
                adaptor: self.name.clone(),
            },
        )
        .map_err(lost)?;
        match read_json(&mut stream).map_err(lost)? {
            Response::Ok => {}
            Response::Error { kind, message } => return Err(Error::new(kind, message)),
            other => return Err(unexpected(&other)),
        }
        // Notifications arrive at the interrogators' pace
        stream.set_read_timeout(None).map_err(lost)?;

        let token = CancelToken::new();
        let rx = stream.try_clone().map_err(lost)?;
        let stream_loop = NotificationStream {
            adaptor: self.name.clone(),
            address: self.address.clone(),
            codec: Arc::clone(&self.codec),
            subscriber: Arc::clone(&subscriber),
            token: token.clone(),
        };
        let thread = thread::Builder::new()
            .name(format!("llrp-remote-{}", self.name))
            .spawn(move || stream_loop.run(rx))
            .map_err(lost)?;

        self.subscriptions.lock().push(Subscription {
            subscriber,
            token,
            stream,
            thread,
        });
        Ok(())
    }

    fn deregister_from_async(&self, subscriber: &Arc<dyn AsyncSubscriber>) -> Result<()> {
        let found = {
            let mut subs = self.subscriptions.lock();
            subs.iter()
                .position(|s| same_subscriber(&s.subscriber, subscriber))
                .map(|index| subs.remove(index))
        };
        if let Some(subscription) = found {
            Self::cancel(subscription);
        }
        Ok(())
    }

    fn is_local(&self) -> bool {
        false
    }
}

impl Drop for RemoteAdaptor {
    fn drop(&mut self) {
        for subscription in self.subscriptions.get_mut().drain(..) {
            Self::cancel(subscription);
        }
    }
}

struct NotificationStream {
    adaptor: String,
    address: String,
    codec: Arc<dyn MessageCodec>,
    subscriber: Arc<dyn AsyncSubscriber>,
    token: CancelToken,
}

impl NotificationStream {
    fn run(self, mut stream: TcpStream) {
        loop {
            let notification = match read_json::<_, Notification>(&mut stream) {
                Ok(notification) => notification,
                Err(e) => {
                    if !self.token.is_cancelled() {
                        let err = Error::AdapterLost(format!(
                            "subscription to {} ended: {}",
                            self.address, e
                        ));
                        self.subscriber
                            .on_error(&ExceptionEvent::new(&err, self.adaptor.as_str(), ""));
                    }
                    return;
                }
            };
            if self.token.is_cancelled() {
                return;
            }
            match notification {
                Notification::Message {
                    adaptor,
                    reader,
                    bytes,
                } => match self.codec.decode(&bytes) {
                    Ok(message) => self.subscriber.on_message(&adaptor, &reader, &message),
                    Err(e) => {
                        let err = Error::MsgSyntax(format!("remote notification: {}", e));
                        self.subscriber
                            .on_error(&ExceptionEvent::new(&err, adaptor, reader));
                    }
                },
                Notification::Error { event } => self.subscriber.on_error(&event),
            }
        }
    }
}

/// [`RemoteResolver`] producing [`RemoteAdaptor`] handles.
pub struct RpcResolver {
    codec: Arc<dyn MessageCodec>,
    timeout: Duration,
}

impl RpcResolver {
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            codec,
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl RemoteResolver for RpcResolver {
    fn resolve(&self, name: &str, address: &str) -> Result<Arc<dyn AdaptorHandle>> {
        let adaptor = RemoteAdaptor::connect(name, address, Arc::clone(&self.codec), self.timeout)?;
        Ok(Arc::new(adaptor))
    }
}
