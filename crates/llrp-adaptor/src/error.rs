// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy shared by readers, adaptors, workers and the registry.
//!
//! Every failure carries an [`ErrorKind`]. Structural calls return the
//! [`Error`] to the caller; background threads have no caller and wrap the
//! error into an [`ExceptionEvent`] which travels through the notification
//! fan-out to the registry's exception sink.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Enumerated failure categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Adaptor or reader name already defined.
    DuplicateName,
    /// Reader name unknown to the adaptor.
    ReaderNotExist,
    /// Adaptor name unknown to the registry.
    AdapterNotExist,
    /// Connection to a physical reader failed or timed out.
    ReaderLost,
    /// Remote adaptor could not be reached.
    AdapterLost,
    /// Message could not be handed to the reader or wire.
    MsgSendingError,
    /// Message bytes could not be decoded or encoded.
    MsgSyntaxError,
    /// Worker queue saturated or worker not ready.
    QueueFull,
    /// Registry not initialized, or its configuration failed to load.
    ManagementNotInitialized,
    /// Topology could not be persisted.
    ConfigNotStorable,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::DuplicateName => "DuplicateName",
            ErrorKind::ReaderNotExist => "ReaderNotExist",
            ErrorKind::AdapterNotExist => "AdapterNotExist",
            ErrorKind::ReaderLost => "ReaderLost",
            ErrorKind::AdapterLost => "AdapterLost",
            ErrorKind::MsgSendingError => "MsgSendingError",
            ErrorKind::MsgSyntaxError => "MsgSyntaxError",
            ErrorKind::QueueFull => "QueueFull",
            ErrorKind::ManagementNotInitialized => "ManagementNotInitialized",
            ErrorKind::ConfigNotStorable => "ConfigNotStorable",
        };
        write!(f, "{}", s)
    }
}

/// Crate error type.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("name already defined: {0}")]
    DuplicateName(String),

    #[error("reader does not exist: {0}")]
    ReaderNotExist(String),

    #[error("adaptor does not exist: {0}")]
    AdapterNotExist(String),

    #[error("reader lost: {0}")]
    ReaderLost(String),

    #[error("adaptor lost: {0}")]
    AdapterLost(String),

    #[error("message sending failed: {0}")]
    MsgSending(String),

    #[error("message syntax error: {0}")]
    MsgSyntax(String),

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("management not initialized: {0}")]
    ManagementNotInitialized(String),

    #[error("configuration not storable: {0}")]
    ConfigNotStorable(String),
}

impl Error {
    /// Rebuild an error from its kind and detail text (used on the RPC boundary).
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            ErrorKind::DuplicateName => Error::DuplicateName(detail),
            ErrorKind::ReaderNotExist => Error::ReaderNotExist(detail),
            ErrorKind::AdapterNotExist => Error::AdapterNotExist(detail),
            ErrorKind::ReaderLost => Error::ReaderLost(detail),
            ErrorKind::AdapterLost => Error::AdapterLost(detail),
            ErrorKind::MsgSendingError => Error::MsgSending(detail),
            ErrorKind::MsgSyntaxError => Error::MsgSyntax(detail),
            ErrorKind::QueueFull => Error::QueueFull(detail),
            ErrorKind::ManagementNotInitialized => Error::ManagementNotInitialized(detail),
            ErrorKind::ConfigNotStorable => Error::ConfigNotStorable(detail),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateName(_) => ErrorKind::DuplicateName,
            Error::ReaderNotExist(_) => ErrorKind::ReaderNotExist,
            Error::AdapterNotExist(_) => ErrorKind::AdapterNotExist,
            Error::ReaderLost(_) => ErrorKind::ReaderLost,
            Error::AdapterLost(_) => ErrorKind::AdapterLost,
            Error::MsgSending(_) => ErrorKind::MsgSendingError,
            Error::MsgSyntax(_) => ErrorKind::MsgSyntaxError,
            Error::QueueFull(_) => ErrorKind::QueueFull,
            Error::ManagementNotInitialized(_) => ErrorKind::ManagementNotInitialized,
            Error::ConfigNotStorable(_) => ErrorKind::ConfigNotStorable,
        }
    }

    /// Detail text without the kind prefix.
    pub fn detail(&self) -> &str {
        match self {
            Error::DuplicateName(s)
            | Error::ReaderNotExist(s)
            | Error::AdapterNotExist(s)
            | Error::ReaderLost(s)
            | Error::AdapterLost(s)
            | Error::MsgSending(s)
            | Error::MsgSyntax(s)
            | Error::QueueFull(s)
            | Error::ManagementNotInitialized(s)
            | Error::ConfigNotStorable(s) => s,
        }
    }
}

/// An error annotated with the adaptor and reader it concerns.
///
/// Reader or adaptor name is empty when the event is not tied to one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEvent {
    pub kind: ErrorKind,
    pub adaptor: String,
    pub reader: String,
    pub message: String,
}

impl ExceptionEvent {
    pub fn new(error: &Error, adaptor: impl Into<String>, reader: impl Into<String>) -> Self {
        Self {
            kind: error.kind(),
            adaptor: adaptor.into(),
            reader: reader.into(),
            message: error.detail().to_string(),
        }
    }

    /// Turn the event back into an error of the same kind.
    pub fn to_error(&self) -> Error {
        Error::new(self.kind, self.message.clone())
    }
}

impl std::fmt::Display for ExceptionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] adaptor='{}' reader='{}': {}",
            self.kind, self.adaptor, self.reader, self.message
        )
    }
}
