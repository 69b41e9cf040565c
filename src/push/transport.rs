//! Transport seam for the push channel.
//!
//! The connection manager only depends on these traits; the STOMP over
//! WebSocket implementation lives in `stomp_transport`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::lifecycle::Identity;

/// Error type for push transport operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Handshake timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Rejected by server: {0}")]
    Rejected(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Connection closed during handshake")]
    Closed,
}

/// Something that arrived on an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw, unvalidated payload.
    Message(String),
    Heartbeat,
}

/// Heartbeat intervals agreed with the server for one session. `None`
/// disables that direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatTerms {
    /// How often the client must send a heartbeat.
    pub outgoing: Option<Duration>,
    /// How often the server promised to send one.
    pub incoming: Option<Duration>,
}

impl HeartbeatTerms {
    /// Both directions at the same interval.
    pub fn symmetric(interval: Duration) -> Self {
        Self {
            outgoing: Some(interval),
            incoming: Some(interval),
        }
    }
}

/// Opens authenticated push sessions.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Connect, authenticate and subscribe to the identity's private
    /// destination. Resolves once the subscription is acknowledged.
    async fn open(&self, identity: &Identity) -> Result<Box<dyn PushSession>, TransportError>;
}

/// One open, subscribed push session.
#[async_trait]
pub trait PushSession: Send {
    /// Next inbound event, in arrival order. `None` once the peer closed
    /// the session.
    async fn next_event(&mut self) -> Option<Result<TransportEvent, TransportError>>;

    /// Heartbeats negotiated when the session was opened.
    fn heartbeat(&self) -> HeartbeatTerms;

    async fn send_heartbeat(&mut self) -> Result<(), TransportError>;

    /// Best-effort graceful close.
    async fn close(&mut self);
}
