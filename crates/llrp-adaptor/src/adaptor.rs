// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named collections of readers.
//!
//! [`AdaptorHandle`] is the contract the registry programs against. The
//! local [`Adaptor`] owns its readers directly; `remote::RemoteAdaptor`
//! forwards every call to an adaptor living in another process.

use crate::codec::{Message, MessageCodec};
use crate::config::{ConfigError, ReaderConfig};
use crate::error::{Error, ExceptionEvent, Result};
use crate::fanout::{AsyncSubscriber, NotificationFanout};
use crate::reader::{Reader, ReaderMetaData};
use crate::transport::{Connector, TcpConnector};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Uniform adaptor API, local or remote.
pub trait AdaptorHandle: Send + Sync {
    /// Name the adaptor reports for itself.
    fn name(&self) -> Result<String>;

    fn define_reader(&self, config: &ReaderConfig) -> Result<()>;

    fn undefine_reader(&self, reader: &str) -> Result<()>;

    /// Remove every reader; individual failures are posted, not returned.
    fn undefine_all_readers(&self) -> Result<()>;

    /// Hand encoded message bytes to one reader.
    fn send(&self, reader: &str, bytes: &[u8]) -> Result<()>;

    /// Hand encoded message bytes to every reader; the first failure propagates.
    fn send_to_all(&self, bytes: &[u8]) -> Result<()>;

    fn connect_reader(&self, reader: &str) -> Result<()>;

    fn disconnect_reader(&self, reader: &str) -> Result<()>;

    /// Drop the session and open a new one in the same mode.
    fn reconnect_reader(&self, reader: &str) -> Result<()>;

    /// Replace a reader's settings; they apply from the next connect.
    fn update_reader(&self, config: &ReaderConfig) -> Result<()>;

    fn reader_names(&self) -> Result<Vec<String>>;

    fn reader_meta(&self, reader: &str) -> Result<ReaderMetaData>;

    fn register_for_async(&self, subscriber: Arc<dyn AsyncSubscriber>) -> Result<()>;

    fn deregister_from_async(&self, subscriber: &Arc<dyn AsyncSubscriber>) -> Result<()>;

    fn is_local(&self) -> bool;

    /// Disconnect every reader without removing it.
    fn disconnect_all(&self) -> Result<()> {
        for reader in self.reader_names()? {
            self.disconnect_reader(&reader)?;
        }
        Ok(())
    }
}

/// In-process adaptor.
pub struct Adaptor {
    name: String,
    me: Weak<Adaptor>,
    readers: RwLock<BTreeMap<String, Arc<Reader>>>,
    fanout: NotificationFanout,
    codec: Arc<dyn MessageCodec>,
    connector: Arc<dyn Connector>,
}

impl Adaptor {
    pub fn new(name: impl Into<String>, codec: Arc<dyn MessageCodec>) -> Arc<Self> {
        Self::with_connector(name, codec, Arc::new(TcpConnector::default()))
    }

    pub fn with_connector(
        name: impl Into<String>,
        codec: Arc<dyn MessageCodec>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me| Self {
            name,
            me: me.clone(),
            readers: RwLock::new(BTreeMap::new()),
            fanout: NotificationFanout::new(),
            codec,
            connector,
        })
    }

    pub fn adaptor_name(&self) -> &str {
        &self.name
    }

    /// Define a reader with default keepalive settings.
    ///
    /// `port` falls back to the IANA LLRP port.
    pub fn define(
        &self,
        name: &str,
        address: &str,
        port: Option<u16>,
        client_initiated: bool,
        connect_immediately: bool,
    ) -> Result<Arc<Reader>> {
        let mut config = ReaderConfig::new(name, address)
            .client_initiated(client_initiated)
            .connect_immediately(connect_immediately);
        if let Some(port) = port {
            config = config.port(port);
        }
        self.define_with(config)
    }

    /// Define a reader from a full configuration.
    ///
    /// A failed immediate connect leaves the reader defined; the failure
    /// has already been posted as `ReaderLost`.
    pub fn define_with(&self, config: ReaderConfig) -> Result<Arc<Reader>> {
        config.validate().map_err(rejected)?;
        let connect = config.connect_immediately;
        let reader = {
            let mut readers = self.readers.write();
            if readers.contains_key(&config.name) {
                return Err(Error::DuplicateName(format!(
                    "reader '{}' on adaptor '{}'",
                    config.name, self.name
                )));
            }
            let reader = Reader::new(
                &self.name,
                config,
                self.me.clone(),
                Arc::clone(&self.codec),
                Arc::clone(&self.connector),
            );
            readers.insert(reader.name().to_string(), Arc::clone(&reader));
            reader
        };
        log::debug!("[adaptor] {} defined reader {}", self.name, reader.name());

        if connect {
            if let Err(e) = reader.connect() {
                log::debug!("[adaptor] {} initial connect: {}", self.name, e);
            }
        }
        Ok(reader)
    }

    pub fn reader(&self, name: &str) -> Result<Arc<Reader>> {
        self.readers.read().get(name).cloned().ok_or_else(|| {
            Error::ReaderNotExist(format!("'{}' on adaptor '{}'", name, self.name))
        })
    }

    pub fn contains_reader(&self, name: &str) -> bool {
        self.readers.read().contains_key(name)
    }

    pub fn reader_count(&self) -> usize {
        self.readers.read().len()
    }

    /// Current settings of every reader, ordered by name.
    pub fn reader_configs(&self) -> Vec<ReaderConfig> {
        self.readers.read().values().map(|r| r.settings()).collect()
    }

    /// Remove a reader, then disconnect it.
    pub fn undefine(&self, name: &str) -> Result<()> {
        let reader = self.readers.write().remove(name).ok_or_else(|| {
            Error::ReaderNotExist(format!("'{}' on adaptor '{}'", name, self.name))
        })?;
        log::debug!("[adaptor] {} undefined reader {}", self.name, name);
        reader.disconnect()
    }

    /// Remove every reader; a failing disconnect is posted and the rest proceed.
    ///
    /// Returns the number of failures posted.
    pub fn undefine_all(&self) -> usize {
        let readers = std::mem::take(&mut *self.readers.write());
        let mut failures = 0;
        for (name, reader) in readers {
            if let Err(e) = reader.disconnect() {
                failures += 1;
                self.post(&e, &name);
            }
        }
        failures
    }

    /// Disconnect every reader, keeping the definitions.
    pub fn disconnect_readers(&self) -> usize {
        let readers: Vec<_> = self.readers.read().values().cloned().collect();
        let mut failures = 0;
        for reader in readers {
            if let Err(e) = reader.disconnect() {
                failures += 1;
                self.post(&e, reader.name());
            }
        }
        failures
    }

    /// Called by a reader's inbound pump; returns the number of failed subscribers.
    pub(crate) fn message_received(&self, reader: &str, message: &Message) -> usize {
        self.fanout.deliver_message(&self.name, reader, message)
    }

    /// Called by readers for background failures.
    pub(crate) fn error_occurred(&self, event: &ExceptionEvent) {
        self.fanout.deliver_error(event);
    }

    fn post(&self, error: &Error, reader: &str) {
        let event = ExceptionEvent::new(error, self.name.as_str(), reader);
        log::debug!("[adaptor] {}", event);
        self.fanout.deliver_error(&event);
    }
}

/// Reader settings that cannot drive a session are refused before any state changes.
fn rejected(error: ConfigError) -> Error {
    Error::MsgSending(format!("reader settings rejected: {}", error))
}

impl AdaptorHandle for Adaptor {
    fn name(&self) -> Result<String> {
        Ok(self.name.clone())
    }

    fn define_reader(&self, config: &ReaderConfig) -> Result<()> {
        self.define_with(config.clone()).map(|_| ())
    }

    fn undefine_reader(&self, reader: &str) -> Result<()> {
        self.undefine(reader)
    }

    fn undefine_all_readers(&self) -> Result<()> {
        self.undefine_all();
        Ok(())
    }

    fn send(&self, reader: &str, bytes: &[u8]) -> Result<()> {
        self.reader(reader)?.send(bytes)
    }

    fn send_to_all(&self, bytes: &[u8]) -> Result<()> {
        let readers: Vec<_> = self.readers.read().values().cloned().collect();
        for reader in readers {
            reader.send(bytes)?;
        }
        Ok(())
    }

    fn connect_reader(&self, reader: &str) -> Result<()> {
        self.reader(reader)?.connect()
    }

    fn disconnect_reader(&self, reader: &str) -> Result<()> {
        self.reader(reader)?.disconnect()
    }

    fn reconnect_reader(&self, reader: &str) -> Result<()> {
        self.reader(reader)?.reconnect()
    }

    fn update_reader(&self, config: &ReaderConfig) -> Result<()> {
        config.validate().map_err(rejected)?;
        self.reader(&config.name)?.update_settings(config.clone())
    }

    fn reader_names(&self) -> Result<Vec<String>> {
        Ok(self.readers.read().keys().cloned().collect())
    }

    fn reader_meta(&self, reader: &str) -> Result<ReaderMetaData> {
        Ok(self.reader(reader)?.meta())
    }

    fn register_for_async(&self, subscriber: Arc<dyn AsyncSubscriber>) -> Result<()> {
        self.fanout.add(subscriber);
        Ok(())
    }

    fn deregister_from_async(&self, subscriber: &Arc<dyn AsyncSubscriber>) -> Result<()> {
        self.fanout.remove(subscriber);
        Ok(())
    }

    fn is_local(&self) -> bool {
        true
    }

    fn disconnect_all(&self) -> Result<()> {
        self.disconnect_readers();
        Ok(())
    }
}

impl Drop for Adaptor {
    fn drop(&mut self) {
        for reader in self.readers.get_mut().values() {
            let _ = reader.disconnect();
        }
    }
}

impl std::fmt::Debug for Adaptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adaptor")
            .field("name", &self.name)
            .field("readers", &self.readers.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{LlrpCodec, MessageKind};
    use crate::error::ErrorKind;

    fn adaptor() -> Arc<Adaptor> {
        Adaptor::new("DEFAULT", Arc::new(LlrpCodec::default()))
    }

    #[test]
    fn test_duplicate_reader_rejected() {
        let adaptor = adaptor();
        adaptor.define("R1", "10.0.0.1", None, true, false).unwrap();
        let err = adaptor
            .define("R1", "10.0.0.2", Some(5085), true, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateName);
        assert_eq!(adaptor.reader_names().unwrap(), vec!["R1".to_string()]);
        assert_eq!(adaptor.reader_meta("R1").unwrap().address, "10.0.0.1");
    }

    #[test]
    fn test_invalid_reader_settings_rejected() {
        let adaptor = adaptor();
        let zero_period = ReaderConfig::new("R1", "127.0.0.1").keepalive(0, 3);
        let err = adaptor.define_with(zero_period).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MsgSendingError);
        assert!(!adaptor.contains_reader("R1"));

        let no_address = ReaderConfig::new("R2", "").connect_immediately(false);
        assert!(adaptor.define_reader(&no_address).is_err());
        assert_eq!(adaptor.reader_count(), 0);

        adaptor
            .define_with(ReaderConfig::new("R3", "127.0.0.1").connect_immediately(false))
            .unwrap();
        let err = adaptor
            .update_reader(&ReaderConfig::new("R3", "127.0.0.1").keepalive(0, 3))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MsgSendingError);
        assert_eq!(
            adaptor.reader("R3").unwrap().settings().keepalive_period_ms,
            crate::config::DEFAULT_KEEPALIVE_PERIOD_MS
        );
    }

    #[test]
    fn test_undefine_unknown_reader() {
        let adaptor = adaptor();
        let err = adaptor.undefine_reader("ghost").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReaderNotExist);
        assert_eq!(
            adaptor.send("ghost", &[]).unwrap_err().kind(),
            ErrorKind::ReaderNotExist
        );
    }

    #[test]
    fn test_send_to_all_propagates_first_failure() {
        let adaptor = adaptor();
        adaptor.define("R1", "10.0.0.1", None, true, false).unwrap();
        let frame = LlrpCodec::default()
            .encode(&Message::new(MessageKind::ADD_ROSPEC, 1, vec![]))
            .unwrap();
        let err = adaptor.send_to_all(&frame).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MsgSendingError);
        assert!(adaptor.send_to_all(&frame[..3]).is_err());
    }

    #[test]
    fn test_default_port_applied() {
        let adaptor = adaptor();
        adaptor.define("R1", "10.0.0.1", None, true, false).unwrap();
        assert_eq!(adaptor.reader_meta("R1").unwrap().port, 5084);
        assert_eq!(adaptor.reader_count(), 1);
        adaptor.undefine("R1").unwrap();
        assert!(!adaptor.contains_reader("R1"));
    }
}
