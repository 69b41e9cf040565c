//! Binds the notification subsystem to the authenticated identity.
//!
//! Identity present: request OS notification permission, load the snapshot,
//! then open the push channel. Identity absent: close the push channel, then
//! reset the store. Switching users fully tears down the previous session
//! before the next one starts.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::NotificationApi;
use crate::config::ConnectionSettings;
use crate::dispatch::{DesktopNotifier, NotificationPermission};
use crate::notifications::NotificationStore;
use crate::push::{ConnectionManager, ConnectionState, PushListener, PushTransport};

/// Authenticated user as seen by the notification subsystem.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    /// Bearer credential for REST calls and the push handshake.
    pub token: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Feeds push traffic into the store.
struct StoreListener {
    store: Arc<NotificationStore>,
}

#[async_trait]
impl PushListener for StoreListener {
    async fn on_message(&self, raw: String) {
        // Failures are logged by the store; the stream keeps going.
        if let Err(e) = self.store.ingest_push(&raw).await {
            debug!("Push not ingested: {}", e);
        }
    }

    async fn on_connection_change(&self, connected: bool) {
        self.store.set_connected(connected).await;
    }
}

struct Session {
    identity: Identity,
    manager: ConnectionManager,
}

/// Starts and stops the subsystem as the identity comes and goes.
pub struct LifecycleBinder {
    store: Arc<NotificationStore>,
    api: Arc<dyn NotificationApi>,
    transport: Arc<dyn PushTransport>,
    connection: ConnectionSettings,
    desktop: Option<Arc<dyn DesktopNotifier>>,
    session: Mutex<Option<Session>>,
}

impl LifecycleBinder {
    pub fn new(
        store: Arc<NotificationStore>,
        api: Arc<dyn NotificationApi>,
        transport: Arc<dyn PushTransport>,
        connection: ConnectionSettings,
    ) -> Self {
        Self {
            store,
            api,
            transport,
            connection,
            desktop: None,
            session: Mutex::new(None),
        }
    }

    /// Ask for OS notification permission when a session starts.
    pub fn with_desktop_notifier(mut self, desktop: Arc<dyn DesktopNotifier>) -> Self {
        self.desktop = Some(desktop);
        self
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    /// Push channel state of the current session.
    pub async fn connection_state(&self) -> ConnectionState {
        match self.session.lock().await.as_ref() {
            Some(session) => session.manager.state(),
            None => ConnectionState::Disconnected,
        }
    }

    /// Apply an identity transition. Presenting the identity that is
    /// already active does nothing; a changed token counts as a new
    /// identity.
    pub async fn set_identity(&self, identity: Option<Identity>) {
        let mut session = self.session.lock().await;

        if let (Some(current), Some(next)) = (session.as_ref(), identity.as_ref()) {
            if current.identity == *next {
                debug!("Identity {} unchanged", next.user_id);
                return;
            }
        }

        if let Some(previous) = session.take() {
            self.tear_down(previous).await;
        }

        if let Some(identity) = identity {
            *session = Some(self.bring_up(identity).await);
        }
    }

    /// Equivalent to the identity becoming absent.
    pub async fn shutdown(&self) {
        self.set_identity(None).await;
    }

    /// Follow an identity provider until it goes away, then shut down.
    pub async fn run(&self, mut identities: watch::Receiver<Option<Identity>>) {
        loop {
            let identity = identities.borrow_and_update().clone();
            self.set_identity(identity).await;
            if identities.changed().await.is_err() {
                debug!("Identity provider closed");
                break;
            }
        }
        self.shutdown().await;
    }

    async fn bring_up(&self, identity: Identity) -> Session {
        info!("Starting notifications for user {}", identity.user_id);

        if let Some(desktop) = &self.desktop {
            if desktop.permission() == NotificationPermission::Default {
                let decided = desktop.request_permission();
                debug!("Desktop notification permission: {:?}", decided);
            }
        }

        self.api.set_identity(Some(&identity));
        self.store.bind_owner(&identity.user_id).await;
        if let Err(e) = self.store.load_snapshot().await {
            warn!(
                "Initial snapshot for user {} failed, connecting anyway: {}",
                identity.user_id, e
            );
        }

        let manager = ConnectionManager::new(self.transport.clone(), self.connection.clone());
        manager.connect(
            identity.clone(),
            Arc::new(StoreListener {
                store: self.store.clone(),
            }),
        );

        Session { identity, manager }
    }

    async fn tear_down(&self, session: Session) {
        info!("Stopping notifications for user {}", session.identity.user_id);
        session.manager.disconnect().await;
        self.store.reset().await;
        self.api.set_identity(None);
    }
}
