//! Client-side harness wiring the real library against the mock server.

use super::constants::*;
use super::fixtures::fast_connection_settings;
use super::server::TestServer;
use planner_notify::config::ConnectionSettings;
use planner_notify::dispatch::SideEffectDispatcher;
use planner_notify::notifications::{
    DeleteFailurePolicy, DeliverySettings, LocalSettingsProvider, NotificationRecord,
    NotificationStore,
};
use planner_notify::{HttpNotificationApi, Identity, LifecycleBinder, StompTransport};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Dispatcher that remembers which notifications were surfaced.
#[derive(Default)]
pub struct RecordingDispatcher {
    surfaced: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    pub fn surfaced(&self) -> Vec<String> {
        self.surfaced.lock().unwrap().clone()
    }
}

impl SideEffectDispatcher for RecordingDispatcher {
    fn dispatch(&self, record: &NotificationRecord) {
        self.surfaced.lock().unwrap().push(record.id.clone());
    }
}

/// A fully wired notification client.
pub struct TestClient {
    pub api: Arc<HttpNotificationApi>,
    pub store: Arc<NotificationStore>,
    pub settings: Arc<LocalSettingsProvider>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub binder: LifecycleBinder,
}

impl TestClient {
    pub fn new(server: &TestServer) -> Self {
        Self::with_options(
            server,
            fast_connection_settings(),
            DeleteFailurePolicy::KeepLocal,
        )
    }

    pub fn with_options(
        server: &TestServer,
        connection: ConnectionSettings,
        delete_policy: DeleteFailurePolicy,
    ) -> Self {
        let api = Arc::new(
            HttpNotificationApi::new(server.base_url.clone(), Duration::from_secs(5))
                .expect("Failed to build API client"),
        );
        let settings = Arc::new(LocalSettingsProvider::new(DeliverySettings::default()));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let store = Arc::new(
            NotificationStore::new(api.clone(), dispatcher.clone(), settings.clone())
                .with_delete_policy(delete_policy),
        );
        let transport = Arc::new(StompTransport::new(server.ws_url.clone(), &connection));
        let binder = LifecycleBinder::new(store.clone(), api.clone(), transport, connection);

        Self {
            api,
            store,
            settings,
            dispatcher,
            binder,
        }
    }

    pub async fn login(&self, user_id: &str, token: &str) {
        self.binder
            .set_identity(Some(Identity::new(user_id, token)))
            .await;
    }

    pub async fn logout(&self) {
        self.binder.set_identity(None).await;
    }

    pub fn ids(&self) -> Vec<String> {
        self.store.notifications().into_iter().map(|r| r.id).collect()
    }

    pub async fn wait_connected(&self, connected: bool) {
        let store = self.store.clone();
        wait_until(move || store.view().connected == connected).await;
    }

    pub async fn wait_for_notification(&self, id: &str) {
        let store = self.store.clone();
        let id = id.to_string();
        wait_until(move || store.get(&id).is_some()).await;
    }
}

/// Poll `condition` until it holds, panicking after `WAIT_TIMEOUT_MS`.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let start = std::time::Instant::now();
    while !condition() {
        if start.elapsed() > Duration::from_millis(WAIT_TIMEOUT_MS) {
            panic!("Condition not met within {}ms", WAIT_TIMEOUT_MS);
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}
