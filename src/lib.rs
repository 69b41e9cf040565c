//! Planner notification client library.
//!
//! Real-time notification delivery for the planner app: a push channel that
//! survives connection churn, a store reconciling pushed notifications with
//! REST snapshots, delivery filtering and side-effect dispatch.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod metrics;
pub mod notifications;
pub mod push;

// Re-export commonly used types for convenience
pub use api::{HttpNotificationApi, NotificationApi};
pub use config::{AppConfig, CliConfig, ConnectionSettings, FileConfig};
pub use lifecycle::{Identity, LifecycleBinder};
pub use notifications::{NotificationRecord, NotificationStore, NotificationsView};
pub use push::{ConnectionManager, ConnectionState, StompTransport};
