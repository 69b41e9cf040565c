//! REST collaborator for the notification service.

mod client;

pub use client::{ApiError, HttpNotificationApi, NotificationApi};
