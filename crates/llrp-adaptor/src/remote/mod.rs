// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adaptors proxied from another process.
//!
//! ```text
//!   Registry --define(name, "host:port")--> RemoteResolver
//!       |                                        |
//!       v                                        v
//!   RemoteAdaptor ==== JSON over TCP ====> AdaptorServer --> local Adaptor
//!       ^                                        |
//!       +------- subscription stream <-----------+
//! ```

mod client;
mod protocol;
mod server;

pub use client::{RemoteAdaptor, RpcResolver, DEFAULT_RPC_TIMEOUT};
pub use protocol::{read_json, write_json, Notification, Request, Response, MAX_RPC_FRAME};
pub use server::AdaptorServer;

use crate::adaptor::AdaptorHandle;
use crate::error::Result;
use std::sync::Arc;

/// Lookup of adaptors living in another process.
pub trait RemoteResolver: Send + Sync {
    /// Resolve `name` at `address`; the handle reports the remote's own name.
    fn resolve(&self, name: &str, address: &str) -> Result<Arc<dyn AdaptorHandle>>;
}
