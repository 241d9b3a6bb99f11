// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LLRP Adaptor Core
//!
//! Connection management and message queueing for fleets of LLRP RFID
//! interrogators.
//!
//! # Architecture
//!
//! ```text
//!   caller --enqueue_message()--> Registry
//!                                    |
//!                         AdaptorWorker (bounded queue, 1 pump)
//!                                    |
//!                     Adaptor (local) | RemoteAdaptor (JSON/TCP)
//!                                    |
//!                  Reader: outbound queue --> outbound pump --> interrogator
//!                          inbound queue  <-- socket receive thread
//!                                |
//!                          inbound pump --> Adaptor fan-out --> Registry handlers
//!                                       \-> Reader fan-out
//! ```
//!
//! # Features
//!
//! - **Two-stage queueing**: the registry never blocks on a slow adaptor,
//!   an adaptor never blocks on a slow socket
//! - **Keepalive watchdog**: client-initiated readers are dropped after
//!   `misses x period` without a keepalive
//! - **Remote adaptors**: the same API over the network via [`remote`]
//! - **Persistent topology**: adaptors and readers stored through a
//!   [`ConfigStore`] (TOML by default)
//!
//! # Quick Start
//!
//! ```no_run
//! use llrp_adaptor::{
//!     AdaptorHandle, LogSink, ReaderConfig, Registry, RegistrySetup, TomlConfigStore,
//!     DEFAULT_ADAPTOR,
//! };
//! use std::sync::Arc;
//!
//! let registry = Registry::new();
//! registry.initialize(RegistrySetup::new(
//!     Arc::new(TomlConfigStore::new("topology.toml")),
//!     Arc::new(LogSink),
//! ));
//!
//! let adaptor = registry.adaptor(DEFAULT_ADAPTOR)?;
//! adaptor.define_reader(&ReaderConfig::new("dock-door-1", "10.0.0.21"))?;
//! # Ok::<(), llrp_adaptor::Error>(())
//! ```

pub mod adaptor;
pub mod codec;
pub mod config;
pub mod error;
pub mod fanout;
pub mod handler;
pub mod reader;
pub mod registry;
pub mod remote;
pub mod sync;
pub mod transport;
pub mod worker;

pub use adaptor::{Adaptor, AdaptorHandle};
pub use codec::{CodecError, LlrpCodec, Message, MessageCodec, MessageKind};
pub use config::{
    AdaptorConfig, ConfigError, ConfigStore, MemoryConfigStore, ReaderConfig, RegistryConfig,
    TomlConfigStore,
};
pub use error::{Error, ErrorKind, ExceptionEvent, Result};
pub use fanout::{AsyncSubscriber, NotificationFanout};
pub use handler::{CallbackHandler, ExceptionSink, LogSink, MessageHandler};
pub use reader::{ConnectionState, Reader, ReaderMetaData};
pub use registry::{Registry, RegistrySetup, DEFAULT_ADAPTOR};
pub use remote::{AdaptorServer, RemoteAdaptor, RemoteResolver, RpcResolver};
pub use transport::{Connector, FrameHandler, Link, TcpConnector};
pub use worker::{AdaptorKind, AdaptorWorker, QueueEntry};
