//! Terminal and log based effect sinks used by the CLI.

use std::io::Write;
use std::sync::Mutex;

use tracing::info;

use super::{DesktopNotifier, EffectError, NotificationPermission, SoundPlayer, ToastSink};
use crate::notifications::NotificationRecord;

/// Prints a one-line toast to stdout.
#[derive(Debug, Default)]
pub struct TerminalToast;

impl ToastSink for TerminalToast {
    fn show(&self, record: &NotificationRecord) -> Result<(), EffectError> {
        let mut out = std::io::stdout().lock();
        writeln!(
            out,
            "[{}] {}: {}",
            record.notification_type, record.title, record.message
        )?;
        Ok(())
    }
}

/// Desktop notifier without a desktop: records the permission decision and
/// logs notifications.
#[derive(Debug)]
pub struct LogDesktopNotifier {
    permission: Mutex<NotificationPermission>,
    /// Outcome of a permission prompt.
    grant_on_request: bool,
}

impl LogDesktopNotifier {
    pub fn new(grant_on_request: bool) -> Self {
        Self {
            permission: Mutex::new(NotificationPermission::Default),
            grant_on_request,
        }
    }
}

impl DesktopNotifier for LogDesktopNotifier {
    fn permission(&self) -> NotificationPermission {
        match self.permission.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn request_permission(&self) -> NotificationPermission {
        let mut guard = match self.permission.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard == NotificationPermission::Default {
            *guard = if self.grant_on_request {
                NotificationPermission::Granted
            } else {
                NotificationPermission::Denied
            };
            info!("Desktop notification permission: {:?}", *guard);
        }
        *guard
    }

    fn notify(&self, record: &NotificationRecord) -> Result<(), EffectError> {
        if self.permission() != NotificationPermission::Granted {
            return Err(EffectError::PermissionDenied);
        }
        info!(
            "Desktop notification: {} ({})",
            record.title, record.notification_type
        );
        Ok(())
    }
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default)]
pub struct TerminalBell;

impl SoundPlayer for TerminalBell {
    fn play(&self, _record: &NotificationRecord) -> Result<(), EffectError> {
        let mut err = std::io::stderr().lock();
        err.write_all(b"\x07")?;
        err.flush()?;
        Ok(())
    }
}
