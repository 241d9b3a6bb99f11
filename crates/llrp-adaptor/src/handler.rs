// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry-side consumers: inbound message handlers and the exception sink.

use crate::codec::Message;
use crate::error::ExceptionEvent;

/// Consumer of inbound messages dispatched by the registry.
///
/// Registered either as a full handler (every message) or as a partial
/// handler bound to one message kind.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, adaptor: &str, reader: &str, message: &Message);
}

/// Closure-backed [`MessageHandler`].
pub struct CallbackHandler<F>
where
    F: Fn(&str, &str, &Message) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(&str, &str, &Message) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> MessageHandler for CallbackHandler<F>
where
    F: Fn(&str, &str, &Message) + Send + Sync,
{
    fn handle(&self, adaptor: &str, reader: &str, message: &Message) {
        (self.callback)(adaptor, reader, message);
    }
}

/// Destination of every posted [`ExceptionEvent`].
pub trait ExceptionSink: Send + Sync {
    fn post(&self, event: &ExceptionEvent);
}

impl<F> ExceptionSink for F
where
    F: Fn(&ExceptionEvent) + Send + Sync,
{
    fn post(&self, event: &ExceptionEvent) {
        self(event)
    }
}

/// Sink writing every event to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ExceptionSink for LogSink {
    fn post(&self, event: &ExceptionEvent) {
        log::warn!("[registry] {}", event);
    }
}
