//! User delivery settings.
//!
//! These are read-only to the notification core: the settings screen owns
//! them and hands them over through a [`SettingsProvider`].

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::models::NotificationType;

/// Per-category toggles. Each category maps to one notification type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderToggles {
    pub task_reminder: bool,
    pub activity_reminder: bool,
    pub overdue_alert: bool,
    pub morning_digest: bool,
}

impl Default for ReminderToggles {
    fn default() -> Self {
        Self {
            task_reminder: true,
            activity_reminder: true,
            overdue_alert: true,
            morning_digest: true,
        }
    }
}

/// Settings category a notification type is governed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryCategory {
    TaskReminder,
    ActivityReminder,
    OverdueAlert,
    MorningDigest,
}

impl DeliveryCategory {
    /// Category for a notification type, `None` for types this client
    /// does not recognize.
    pub fn for_type(notification_type: &NotificationType) -> Option<Self> {
        match notification_type {
            NotificationType::TaskReminder => Some(Self::TaskReminder),
            NotificationType::ActivityReminder => Some(Self::ActivityReminder),
            NotificationType::OverdueAlert => Some(Self::OverdueAlert),
            NotificationType::MorningDigest => Some(Self::MorningDigest),
            NotificationType::Other(_) => None,
        }
    }
}

/// Delivery preferences of the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Master switch for surfacing anything at all.
    pub enabled: bool,
    pub reminders: ReminderToggles,
    /// OS-level notifications (still subject to the granted permission).
    pub browser_notification: bool,
    pub sound: bool,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reminders: ReminderToggles::default(),
            browser_notification: true,
            sound: true,
        }
    }
}

impl DeliverySettings {
    pub fn is_category_enabled(&self, category: DeliveryCategory) -> bool {
        match category {
            DeliveryCategory::TaskReminder => self.reminders.task_reminder,
            DeliveryCategory::ActivityReminder => self.reminders.activity_reminder,
            DeliveryCategory::OverdueAlert => self.reminders.overdue_alert,
            DeliveryCategory::MorningDigest => self.reminders.morning_digest,
        }
    }
}

/// Read access to the current delivery settings.
pub trait SettingsProvider: Send + Sync {
    fn delivery_settings(&self) -> DeliverySettings;
}

/// In-process settings holder that the owning application can update.
#[derive(Debug, Default)]
pub struct LocalSettingsProvider {
    settings: RwLock<DeliverySettings>,
}

impl LocalSettingsProvider {
    pub fn new(settings: DeliverySettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    /// Replace the current settings. Takes effect for the next push.
    pub fn update(&self, settings: DeliverySettings) {
        match self.settings.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

impl SettingsProvider for LocalSettingsProvider {
    fn delivery_settings(&self) -> DeliverySettings {
        match self.settings.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
