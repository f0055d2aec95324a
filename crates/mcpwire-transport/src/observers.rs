//! Callback registration shared by all transports.
//!
//! Each transport owns one [`Observers`] and emits through it. Handlers are
//! plain synchronous closures; a handler that needs to await (for example to
//! call `close`) should spawn.

use crate::error::TransportError;
use crate::runtime::{read, write};
use mcpwire_core::{Message, Payload};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Handler for inbound messages.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;
/// Handler for the close event.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;
/// Handler for asynchronous errors.
pub type ErrorHandler = Arc<dyn Fn(TransportError) + Send + Sync>;

/// The on-message, on-close and on-error callbacks of one transport.
#[derive(Default)]
pub struct Observers {
    message: RwLock<Option<MessageHandler>>,
    close: RwLock<Option<CloseHandler>>,
    error: RwLock<Option<ErrorHandler>>,
    closed: AtomicBool,
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("message", &read(&self.message).is_some())
            .field("close", &read(&self.close).is_some())
            .field("error", &read(&self.error).is_some())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Observers {
    /// Create an empty set of observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the message handler.
    pub fn set_message(&self, handler: MessageHandler) {
        *write(&self.message) = Some(handler);
    }

    /// Replace the close handler.
    pub fn set_close(&self, handler: CloseHandler) {
        *write(&self.close) = Some(handler);
    }

    /// Replace the error handler.
    pub fn set_error(&self, handler: ErrorHandler) {
        *write(&self.error) = Some(handler);
    }

    /// Deliver one inbound message.
    pub fn emit_message(&self, message: Message) {
        let handler = read(&self.message).clone();
        match handler {
            Some(handler) => handler(message),
            None => tracing::debug!("dropping inbound message, no handler registered"),
        }
    }

    /// Deliver every message of a payload in document order.
    pub fn emit_payload(&self, payload: Payload) {
        for message in payload {
            self.emit_message(message);
        }
    }

    /// Report an asynchronous error.
    pub fn emit_error(&self, error: TransportError) {
        let handler = read(&self.error).clone();
        match handler {
            Some(handler) => handler(error),
            None => tracing::warn!(error = %error, "transport error with no handler registered"),
        }
    }

    /// Fire the close handler unless it already fired for this connection.
    ///
    /// Returns whether the handler ran.
    pub fn emit_close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let handler = read(&self.close).clone();
        if let Some(handler) = handler {
            handler();
        }
        true
    }

    /// Re-arm the close latch for a new connection.
    pub fn reset_close(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Whether close has fired since the last reset.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpwire_core::{Batch, Notification, Request};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_close_fires_once_until_reset() {
        let observers = Observers::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        observers.set_close(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(observers.emit_close());
        assert!(!observers.emit_close());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        observers.reset_close();
        assert!(!observers.is_closed());
        assert!(observers.emit_close());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_payload_delivered_in_order() {
        let observers = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        observers.set_message(Arc::new(move |m: Message| {
            s.lock().unwrap().push(m.method().unwrap_or_default().to_string());
        }));

        let batch = Batch::new(vec![
            Notification::new("first").into(),
            Request::new("second", 1u64).into(),
            Notification::new("third").into(),
        ])
        .unwrap();
        observers.emit_payload(batch.into());

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_handler_may_replace_itself() {
        let observers = Arc::new(Observers::new());
        let inner = Arc::clone(&observers);
        observers.set_error(Arc::new(move |_| {
            inner.set_error(Arc::new(|_| {}));
        }));
        observers.emit_error(TransportError::ConnectionClosed);
        observers.emit_error(TransportError::ConnectionClosed);
    }
}
