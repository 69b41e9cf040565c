//! In-memory notification store for the current user.
//!
//! Merges REST snapshots with pushed notifications and keeps the unread
//! count derived from the record list. All mutations for one user go
//! through a single async lock; REST calls are made outside of it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::models::{NotificationRecord, PushPayload};
use super::policy::should_surface;
use super::settings::SettingsProvider;
use crate::api::{ApiError, NotificationApi};
use crate::config::DEFAULT_SNAPSHOT_LIMIT;
use crate::dispatch::SideEffectDispatcher;
use crate::metrics;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Malformed push payload: {0}")]
    MalformedPush(#[source] serde_json::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Store was reset while the request was in flight")]
    Stale,
}

/// What to do when the server rejects a delete that was already applied
/// locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DeleteFailurePolicy {
    /// Leave the record removed. Local and server state may diverge until
    /// the next snapshot.
    #[default]
    KeepLocal,
    /// Reload the snapshot so the local list matches the server again.
    Resync,
}

/// Result of ingesting one push payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New record; `surfaced` tells whether side effects were dispatched.
    Inserted { surfaced: bool },
    /// A record with this id is already present.
    Duplicate,
}

/// Observable state of the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationsView {
    /// Sorted by `sent_at`, newest first.
    pub notifications: Vec<NotificationRecord>,
    pub unread_count: usize,
    pub loading: bool,
    /// Last snapshot failure, cleared by the next successful load.
    pub load_error: Option<String>,
    pub connected: bool,
}

/// A local mutation made while at least one snapshot request was in
/// flight. Replayed on top of that snapshot when it lands.
#[derive(Debug, Clone)]
enum LocalChange {
    Read { id: String, at: DateTime<Utc> },
    Deleted(String),
    DeletedAll,
    Pushed(NotificationRecord),
}

#[derive(Debug, Default)]
struct StoreState {
    owner: String,
    records: Vec<NotificationRecord>,
    unread_count: usize,
    loading: bool,
    load_error: Option<String>,
    connected: bool,
    /// Bumped by `reset()`; results of requests started under an older
    /// generation are dropped.
    generation: u64,
    /// Sequence number of the last logged local change.
    change_seq: u64,
    /// `change_seq` at the start of each snapshot request still in flight.
    loads_in_flight: Vec<u64>,
    changes: Vec<(u64, LocalChange)>,
}

impl StoreState {
    fn recompute_unread(&mut self) {
        self.unread_count = self.records.iter().filter(|r| r.is_unread()).count();
    }

    fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    /// Insert keeping newest-first order. Ties go in front of existing
    /// records with the same timestamp.
    fn insert_sorted(&mut self, record: NotificationRecord) {
        let index = self
            .records
            .partition_point(|existing| existing.sent_at > record.sent_at);
        self.records.insert(index, record);
    }

    fn record_change(&mut self, change: LocalChange) {
        if self.loads_in_flight.is_empty() {
            return;
        }
        self.change_seq += 1;
        self.changes.push((self.change_seq, change));
    }

    fn begin_load(&mut self) -> u64 {
        self.loads_in_flight.push(self.change_seq);
        self.change_seq
    }

    /// Forget a finished load and the changes no pending load still needs.
    fn end_load(&mut self, started_at: u64) {
        if let Some(index) = self.loads_in_flight.iter().position(|s| *s == started_at) {
            self.loads_in_flight.swap_remove(index);
        }
        match self.loads_in_flight.iter().min().copied() {
            Some(oldest) => self.changes.retain(|(seq, _)| *seq > oldest),
            None => self.changes.clear(),
        }
        self.loading = !self.loads_in_flight.is_empty();
    }

    /// Re-apply local changes made after `started_at` onto a fresh snapshot.
    fn replay_changes_since(&mut self, started_at: u64) {
        let changes: Vec<LocalChange> = self
            .changes
            .iter()
            .filter(|(seq, _)| *seq > started_at)
            .map(|(_, change)| change.clone())
            .collect();
        for change in changes {
            match change {
                LocalChange::Read { id, at } => {
                    if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
                        record.mark_read(at);
                    }
                }
                LocalChange::Deleted(id) => self.records.retain(|r| r.id != id),
                LocalChange::DeletedAll => self.records.clear(),
                LocalChange::Pushed(record) => {
                    if !self.contains(&record.id) {
                        self.insert_sorted(record);
                    }
                }
            }
        }
    }

    fn view(&self) -> NotificationsView {
        NotificationsView {
            notifications: self.records.clone(),
            unread_count: self.unread_count,
            loading: self.loading,
            load_error: self.load_error.clone(),
            connected: self.connected,
        }
    }
}

/// Single source of truth for the notification list and unread count.
pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    dispatcher: Arc<dyn SideEffectDispatcher>,
    settings: Arc<dyn SettingsProvider>,
    snapshot_limit: usize,
    delete_policy: DeleteFailurePolicy,
    state: Mutex<StoreState>,
    view_tx: watch::Sender<NotificationsView>,
}

impl NotificationStore {
    pub fn new(
        api: Arc<dyn NotificationApi>,
        dispatcher: Arc<dyn SideEffectDispatcher>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        let (view_tx, _) = watch::channel(NotificationsView::default());
        Self {
            api,
            dispatcher,
            settings,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            delete_policy: DeleteFailurePolicy::default(),
            state: Mutex::new(StoreState::default()),
            view_tx,
        }
    }

    pub fn with_snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = limit;
        self
    }

    pub fn with_delete_policy(mut self, policy: DeleteFailurePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Stable handle on the store's observable state.
    pub fn subscribe(&self) -> watch::Receiver<NotificationsView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> NotificationsView {
        self.view_tx.borrow().clone()
    }

    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.view_tx.borrow().notifications.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.view_tx.borrow().unread_count
    }

    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        self.view_tx
            .borrow()
            .notifications
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    fn publish(&self, state: &StoreState) {
        metrics::UNREAD_COUNT.set(state.unread_count as i64);
        self.view_tx.send_replace(state.view());
    }

    /// Bind the store to the user whose notifications it holds. Pushed
    /// records are attributed to this user.
    pub async fn bind_owner(&self, user_id: &str) {
        let mut state = self.state.lock().await;
        state.owner = user_id.to_string();
    }

    pub async fn set_connected(&self, connected: bool) {
        let mut state = self.state.lock().await;
        if state.connected != connected {
            state.connected = connected;
            self.publish(&state);
        }
    }

    /// Fetch the authoritative list and replace the local one with it.
    ///
    /// Reads, deletes and pushes applied while the request was in flight
    /// are replayed on top of the fetched list. On failure the last known
    /// list is kept and the error is exposed through `load_error`. Returns
    /// the number of records loaded.
    pub async fn load_snapshot(&self) -> Result<usize, NotificationError> {
        let (generation, started_at) = {
            let mut state = self.state.lock().await;
            state.loading = true;
            let started_at = state.begin_load();
            self.publish(&state);
            (state.generation, started_at)
        };

        let result = self.api.list_notifications(self.snapshot_limit).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Discarding snapshot fetched before a store reset");
            return Err(NotificationError::Stale);
        }

        match result {
            Ok(records) => {
                state.records = normalize_snapshot(records, &state.owner);
                state.replay_changes_since(started_at);
                state.end_load(started_at);
                state.load_error = None;
                state.recompute_unread();
                self.publish(&state);
                info!(
                    "Loaded {} notifications ({} unread)",
                    state.records.len(),
                    state.unread_count
                );
                Ok(state.records.len())
            }
            Err(e) => {
                metrics::record_api_failure("list");
                warn!("Failed to load notifications: {}", e);
                state.end_load(started_at);
                state.load_error = Some(e.to_string());
                self.publish(&state);
                Err(e.into())
            }
        }
    }

    /// Parse a raw pushed payload and merge it into the list.
    ///
    /// Duplicates (by id) leave the store untouched. A new record is always
    /// stored; side effects are only dispatched if the delivery policy
    /// approves it.
    pub async fn ingest_push(&self, raw: &str) -> Result<IngestOutcome, NotificationError> {
        let payload = match PushPayload::parse(raw) {
            Ok(payload) => payload,
            Err(e) => {
                metrics::record_push("malformed");
                warn!("Dropping malformed push payload: {}", e);
                return Err(NotificationError::MalformedPush(e));
            }
        };

        let settings = self.settings.delivery_settings();
        let (record, surfaced) = {
            let mut state = self.state.lock().await;
            let record = payload.into_record(&state.owner);
            if state.contains(&record.id) {
                metrics::record_push("duplicate");
                debug!("Ignoring duplicate push for notification {}", record.id);
                return Ok(IngestOutcome::Duplicate);
            }

            let surfaced = should_surface(&record, &settings);
            state.insert_sorted(record.clone());
            state.record_change(LocalChange::Pushed(record.clone()));
            state.recompute_unread();
            self.publish(&state);
            (record, surfaced)
        };

        metrics::record_push("inserted");
        debug!(
            "Ingested {} notification {} (surfaced: {})",
            record.notification_type, record.id, surfaced
        );
        if surfaced {
            metrics::record_push("surfaced");
            self.dispatcher.dispatch(&record);
        }

        Ok(IngestOutcome::Inserted { surfaced })
    }

    /// Mark one notification read.
    ///
    /// Applied locally before the server confirms and never rolled back; a
    /// failed confirmation is logged and returned.
    pub async fn mark_as_read(&self, id: &str) -> Result<(), NotificationError> {
        {
            let mut state = self.state.lock().await;
            let now = Utc::now();
            match state.records.iter_mut().find(|r| r.id == id) {
                Some(record) if !record.is_unread() => {
                    debug!("Notification {} already read", id);
                    return Ok(());
                }
                Some(record) => {
                    record.mark_read(now);
                    state.recompute_unread();
                    self.publish(&state);
                }
                None => debug!("Notification {} not in store, confirming with server", id),
            }
            state.record_change(LocalChange::Read {
                id: id.to_string(),
                at: now,
            });
        }

        if let Err(e) = self.api.mark_read(id).await {
            metrics::record_api_failure("mark_read");
            warn!("Failed to mark notification {} as read: {}", id, e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Mark every unread notification read once the server accepted the
    /// bulk call. Returns how many records changed.
    pub async fn mark_all_as_read(&self) -> Result<usize, NotificationError> {
        let (generation, unread): (u64, HashSet<String>) = {
            let state = self.state.lock().await;
            let unread = state
                .records
                .iter()
                .filter(|r| r.is_unread())
                .map(|r| r.id.clone())
                .collect();
            (state.generation, unread)
        };

        if let Err(e) = self.api.mark_all_read().await {
            metrics::record_api_failure("mark_all_read");
            warn!("Failed to mark all notifications as read: {}", e);
            return Err(e.into());
        }

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Store reset during mark-all-read, nothing to apply");
            return Err(NotificationError::Stale);
        }

        // Pushes that arrived during the call are left unread.
        let now = Utc::now();
        let mut changed = 0;
        for record in state.records.iter_mut() {
            if unread.contains(&record.id) && record.mark_read(now) {
                changed += 1;
            }
        }
        for id in unread {
            state.record_change(LocalChange::Read { id, at: now });
        }
        state.recompute_unread();
        self.publish(&state);
        Ok(changed)
    }

    /// Remove one notification locally, then confirm with the server.
    pub async fn delete(&self, id: &str) -> Result<(), NotificationError> {
        {
            let mut state = self.state.lock().await;
            match state.records.iter().position(|r| r.id == id) {
                Some(index) => {
                    state.records.remove(index);
                    state.recompute_unread();
                    self.publish(&state);
                }
                None => debug!("Notification {} not in store, deleting on server only", id),
            }
            state.record_change(LocalChange::Deleted(id.to_string()));
        }

        if let Err(e) = self.api.delete(id).await {
            metrics::record_api_failure("delete");
            warn!("Failed to delete notification {}: {}", id, e);
            self.after_delete_failure().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Clear the list locally, then confirm with the server.
    pub async fn delete_all(&self) -> Result<(), NotificationError> {
        {
            let mut state = self.state.lock().await;
            state.records.clear();
            state.record_change(LocalChange::DeletedAll);
            state.recompute_unread();
            self.publish(&state);
        }

        if let Err(e) = self.api.delete_all().await {
            metrics::record_api_failure("delete_all");
            warn!("Failed to delete all notifications: {}", e);
            self.after_delete_failure().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn after_delete_failure(&self) {
        match self.delete_policy {
            DeleteFailurePolicy::KeepLocal => {
                warn!("Deleted notifications stay removed locally until the next refresh")
            }
            DeleteFailurePolicy::Resync => {
                if let Err(e) = self.load_snapshot().await {
                    warn!("Resync after failed delete did not complete: {}", e);
                }
            }
        }
    }

    /// Drop everything; called when the owning identity goes away.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        let generation = state.generation + 1;
        *state = StoreState {
            generation,
            ..Default::default()
        };
        self.publish(&state);
        debug!("Notification store reset (generation {})", generation);
    }
}

/// Dedupe by id (first occurrence wins) and sort newest first.
fn normalize_snapshot(records: Vec<NotificationRecord>, owner: &str) -> Vec<NotificationRecord> {
    let mut seen = HashSet::new();
    let mut records: Vec<NotificationRecord> = records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .map(|mut r| {
            if r.user_id.is_empty() {
                r.user_id = owner.to_string();
            }
            r
        })
        .collect();
    records.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
    records
}
