//! Side effects for notifications approved for surfacing.
//!
//! The store hands every approved record to a [`SideEffectDispatcher`].
//! [`EffectDispatcher`] fans it out to a toast, an OS-level notification and
//! a sound cue. The effects are independent: one failing is logged and does
//! not keep the others from running.

mod sinks;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::notifications::{NotificationRecord, SettingsProvider};

pub use sinks::{LogDesktopNotifier, TerminalBell, TerminalToast};

/// Receiver of "new notification approved for surfacing" events.
pub trait SideEffectDispatcher: Send + Sync {
    fn dispatch(&self, record: &NotificationRecord);
}

#[derive(Debug, Error)]
pub enum EffectError {
    #[error("Notification permission not granted")]
    PermissionDenied,
    #[error("Effect unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// OS notification permission, as tracked by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotificationPermission {
    /// Not decided yet; may be requested.
    #[default]
    Default,
    Granted,
    Denied,
}

/// Ephemeral in-app toast.
pub trait ToastSink: Send + Sync {
    fn show(&self, record: &NotificationRecord) -> Result<(), EffectError>;
}

/// OS-level notifications.
pub trait DesktopNotifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;

    /// Ask the user for permission. Only prompts while the permission is
    /// still [`NotificationPermission::Default`].
    fn request_permission(&self) -> NotificationPermission;

    fn notify(&self, record: &NotificationRecord) -> Result<(), EffectError>;
}

/// Audible cue.
pub trait SoundPlayer: Send + Sync {
    fn play(&self, record: &NotificationRecord) -> Result<(), EffectError>;
}

/// Default dispatcher composing the three effects.
pub struct EffectDispatcher {
    toast: Arc<dyn ToastSink>,
    desktop: Arc<dyn DesktopNotifier>,
    sound: Arc<dyn SoundPlayer>,
    settings: Arc<dyn SettingsProvider>,
}

impl EffectDispatcher {
    pub fn new(
        toast: Arc<dyn ToastSink>,
        desktop: Arc<dyn DesktopNotifier>,
        sound: Arc<dyn SoundPlayer>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            toast,
            desktop,
            sound,
            settings,
        }
    }
}

impl SideEffectDispatcher for EffectDispatcher {
    fn dispatch(&self, record: &NotificationRecord) {
        let settings = self.settings.delivery_settings();

        if let Err(e) = self.toast.show(record) {
            warn!("Toast for notification {} failed: {}", record.id, e);
        }

        if settings.browser_notification {
            match self.desktop.permission() {
                NotificationPermission::Granted => {
                    if let Err(e) = self.desktop.notify(record) {
                        warn!("Desktop notification {} failed: {}", record.id, e);
                    }
                }
                other => debug!(
                    "Skipping desktop notification {} (permission {:?})",
                    record.id, other
                ),
            }
        }

        if settings.sound {
            if let Err(e) = self.sound.play(record) {
                warn!("Sound for notification {} failed: {}", record.id, e);
            }
        }
    }
}
