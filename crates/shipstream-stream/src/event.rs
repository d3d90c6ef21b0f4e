//! Session events and state.

use shipstream_core::ShipError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Notifications published by [`StateHistoryConnection`].
///
/// [`StateHistoryConnection`]: crate::StateHistoryConnection
#[derive(Debug, Clone)]
pub enum ShipEvent {
    Info(String),
    Debug(String),
    Warning(String),
    Error(Arc<ShipError>),
}

impl ShipEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for ShipEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info(m) => write!(f, "info: {m}"),
            Self::Debug(m) => write!(f, "debug: {m}"),
            Self::Warning(m) => write!(f, "warning: {m}"),
            Self::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Connection lifecycle. Whether the session was stopped is tracked apart
/// from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Transport open, waiting for the protocol ABI.
    AwaitingSchema,
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::AwaitingSchema => write!(f, "awaiting-schema"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

/// Broadcasts [`ShipEvent`]s and mirrors each one to `tracing`.
#[derive(Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<ShipEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShipEvent> {
        self.tx.subscribe()
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "shipstream::session", "{message}");
        self.publish(ShipEvent::Info(message));
    }

    pub fn debug(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(target: "shipstream::session", "{message}");
        self.publish(ShipEvent::Debug(message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "shipstream::session", "{message}");
        self.publish(ShipEvent::Warning(message));
    }

    pub fn error(&self, err: ShipError) {
        error!(target: "shipstream::session", error = %err, "session error");
        self.publish(ShipEvent::Error(Arc::new(err)));
    }

    fn publish(&self, event: ShipEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.warning("careful");
        bus.error(ShipError::Transport("gone".into()));

        assert!(matches!(rx.recv().await.unwrap(), ShipEvent::Warning(m) if m == "careful"));
        let err = rx.recv().await.unwrap();
        assert!(err.is_error());
        assert_eq!(err.to_string(), "error: transport error: gone");
    }

    #[test]
    fn publishing_without_subscribers() {
        EventBus::new(1).info("nobody listening");
    }
}
