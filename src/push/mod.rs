//! Push channel: connection management and the STOMP transport.

mod manager;
mod retry_policy;
mod state;
pub mod stomp;
mod stomp_transport;
mod transport;

pub use manager::{ConnectionManager, PushListener};
pub use retry_policy::ReconnectPolicy;
pub use state::ConnectionState;
pub use stomp_transport::{StompSession, StompTransport, DEFAULT_DESTINATION};
pub use transport::{
    HeartbeatTerms, PushSession, PushTransport, TransportError, TransportEvent,
};
