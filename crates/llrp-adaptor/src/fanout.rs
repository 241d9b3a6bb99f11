// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscriber fan-out for inbound messages and error events.

use crate::codec::Message;
use crate::error::ExceptionEvent;
use parking_lot::RwLock;
use std::sync::Arc;

/// Receiver of asynchronous adaptor/reader notifications.
///
/// # Thread Safety
/// Callbacks run on reader pump threads (or the remote subscription
/// thread); implementations must be `Send + Sync`.
///
/// # Panics
/// A panicking callback is caught by [`NotificationFanout`] and counted as a
/// delivery failure; the remaining subscribers still receive the event.
pub trait AsyncSubscriber: Send + Sync {
    /// Called for every inbound message forwarded by a reader.
    fn on_message(&self, adaptor: &str, reader: &str, message: &Message);

    /// Called for every error raised in a background thread.
    fn on_error(&self, event: &ExceptionEvent);
}

/// Thread-safe subscriber list.
///
/// Subscribers are identified by `Arc` pointer, so the same subscriber is
/// never registered twice.
#[derive(Default)]
pub struct NotificationFanout {
    subscribers: RwLock<Vec<Arc<dyn AsyncSubscriber>>>,
}

fn same_subscriber(a: &Arc<dyn AsyncSubscriber>, b: &Arc<dyn AsyncSubscriber>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; returns `false` if it was already present.
    pub fn add(&self, subscriber: Arc<dyn AsyncSubscriber>) -> bool {
        let mut subs = self.subscribers.write();
        if subs.iter().any(|s| same_subscriber(s, &subscriber)) {
            return false;
        }
        subs.push(subscriber);
        true
    }

    /// Remove a subscriber; returns `false` if it was not registered.
    pub fn remove(&self, subscriber: &Arc<dyn AsyncSubscriber>) -> bool {
        let mut subs = self.subscribers.write();
        match subs.iter().position(|s| same_subscriber(s, subscriber)) {
            Some(index) => {
                subs.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    pub fn clear(&self) {
        self.subscribers.write().clear();
    }

    /// Deliver a message to every subscriber with panic isolation.
    ///
    /// Returns the number of subscribers whose callback panicked.
    pub fn deliver_message(&self, adaptor: &str, reader: &str, message: &Message) -> usize {
        // Snapshot so callbacks may (de)register without deadlocking
        let subs = self.subscribers.read().clone();
        let mut failures = 0;

        for sub in &subs {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                sub.on_message(adaptor, reader, message);
            }));
            if result.is_err() {
                failures += 1;
                log::debug!(
                    "[fanout] subscriber panicked delivering {} from {}/{}",
                    message.kind(),
                    adaptor,
                    reader
                );
            }
        }

        failures
    }

    /// Deliver an error event to every subscriber with panic isolation.
    pub fn deliver_error(&self, event: &ExceptionEvent) -> usize {
        let subs = self.subscribers.read().clone();
        let mut failures = 0;

        for sub in &subs {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                sub.on_error(event);
            }));
            if result.is_err() {
                failures += 1;
                log::debug!("[fanout] subscriber panicked delivering error {}", event);
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MessageKind;
    use crate::error::{Error, ErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        messages: AtomicUsize,
        errors: AtomicUsize,
    }

    impl AsyncSubscriber for Counting {
        fn on_message(&self, _adaptor: &str, _reader: &str, _message: &Message) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _event: &ExceptionEvent) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl AsyncSubscriber for Panicking {
        fn on_message(&self, _adaptor: &str, _reader: &str, _message: &Message) {
            panic!("subscriber failure");
        }

        fn on_error(&self, _event: &ExceptionEvent) {
            panic!("subscriber failure");
        }
    }

    fn report() -> Message {
        Message::new(MessageKind::RO_ACCESS_REPORT, 1, vec![0xAA])
    }

    #[test]
    fn test_remove_stops_delivery_to_that_subscriber_only() {
        let fanout = NotificationFanout::new();
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());
        let first_dyn: Arc<dyn AsyncSubscriber> = first.clone();
        let second_dyn: Arc<dyn AsyncSubscriber> = second.clone();

        assert!(fanout.add(first_dyn.clone()));
        assert!(fanout.add(second_dyn));
        assert!(fanout.remove(&first_dyn));
        assert_eq!(fanout.len(), 1);

        assert_eq!(fanout.deliver_message("DEFAULT", "r1", &report()), 0);
        assert_eq!(first.messages.load(Ordering::SeqCst), 0);
        assert_eq!(second.messages.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let fanout = NotificationFanout::new();
        let sub: Arc<dyn AsyncSubscriber> = Arc::new(Counting::default());
        assert!(fanout.add(sub.clone()));
        assert!(!fanout.add(sub.clone()));
        assert_eq!(fanout.len(), 1);
        assert!(fanout.remove(&sub));
        assert!(!fanout.remove(&sub));
        assert!(fanout.is_empty());
    }

    #[test]
    fn test_panicking_subscriber_isolated() {
        let fanout = NotificationFanout::new();
        let counting = Arc::new(Counting::default());
        fanout.add(Arc::new(Panicking));
        fanout.add(counting.clone());

        assert_eq!(fanout.deliver_message("A", "r", &report()), 1);
        let event = ExceptionEvent::new(&Error::ReaderLost("gone".into()), "A", "r");
        assert_eq!(fanout.deliver_error(&event), 1);

        assert_eq!(counting.messages.load(Ordering::SeqCst), 1);
        assert_eq!(counting.errors.load(Ordering::SeqCst), 1);
        assert_eq!(event.kind, ErrorKind::ReaderLost);
    }
}
