//! Delivery policy: should a notification be surfaced to the user?

use super::models::NotificationRecord;
use super::settings::{DeliveryCategory, DeliverySettings};

/// Decide whether `record` gets toast/sound/OS side effects.
///
/// Unrecognized notification types are always surfaced (fail-open), even
/// with the master switch off. Known types need both the master switch and
/// their category switch.
pub fn should_surface(record: &NotificationRecord, settings: &DeliverySettings) -> bool {
    let Some(category) = DeliveryCategory::for_type(&record.notification_type) else {
        return true;
    };
    settings.enabled && settings.is_category_enabled(category)
}
