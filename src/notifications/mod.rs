//! Notification core: data model, delivery policy and the per-user store.

mod models;
mod policy;
mod settings;
mod store;

pub use models::{
    DeliveryChannel, NotificationRecord, NotificationStatus, NotificationType, PushPayload,
    TargetType,
};
pub use policy::should_surface;
pub use settings::{
    DeliveryCategory, DeliverySettings, LocalSettingsProvider, ReminderToggles, SettingsProvider,
};
pub use store::{
    DeleteFailurePolicy, IngestOutcome, NotificationError, NotificationStore, NotificationsView,
};
