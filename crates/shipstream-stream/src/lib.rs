//! shipstream-stream: state-history WebSocket session.
//!
//! [`StateHistoryConnection`] performs the protocol handshake, requests block
//! ranges, decodes each frame concurrently, completes blocks in arrival order
//! through a [`BlockQueue`], and acknowledges them to the node. Lifecycle
//! notifications are published as [`ShipEvent`]s.

pub mod connection;
pub mod event;
pub mod protocol;
pub mod queue;

pub use connection::StateHistoryConnection;
pub use event::{SessionState, ShipEvent};
pub use queue::BlockQueue;
