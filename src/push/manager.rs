//! Push connection manager.
//!
//! Owns at most one connect cycle at a time. A cycle opens a session through
//! the [`PushTransport`], pumps messages to the listener in arrival order,
//! exchanges heartbeats, and reconnects with bounded backoff when the session
//! drops. Every cycle gets an epoch; a cycle whose epoch is no longer current
//! never touches state or delivers messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::retry_policy::ReconnectPolicy;
use super::state::ConnectionState;
use super::transport::{PushSession, PushTransport, TransportEvent};
use crate::config::ConnectionSettings;
use crate::lifecycle::Identity;
use crate::metrics;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Receiver of everything a connect cycle produces.
#[async_trait]
pub trait PushListener: Send + Sync {
    /// A raw payload, exactly as it arrived.
    async fn on_message(&self, raw: String);

    /// Called when the channel becomes connected (`true`) or stops being
    /// connected (`false`). Not called for individual reconnect attempts.
    async fn on_connection_change(&self, connected: bool);
}

struct Shared {
    transport: Arc<dyn PushTransport>,
    settings: ConnectionSettings,
    policy: ReconnectPolicy,
    epoch: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Publish `state` if `epoch` is still the live cycle.
    fn set_state(&self, epoch: u64, state: ConnectionState) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        self.publish(state);
        true
    }

    fn publish(&self, state: ConnectionState) {
        metrics::CONNECTION_UP.set(i64::from(state.is_connected()));
        self.state_tx.send_replace(state);
    }
}

struct ActiveCycle {
    user_id: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Maintains one push subscription for one identity.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveCycle>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn PushTransport>, settings: ConnectionSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let policy = ReconnectPolicy::new(&settings);
        Self {
            shared: Arc::new(Shared {
                transport,
                settings,
                policy,
                epoch: AtomicU64::new(0),
                state_tx,
            }),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Stable handle for observing state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Start a connect cycle for `identity`.
    ///
    /// A no-op if a cycle for the same user is still running. A running
    /// cycle for a different user is cancelled first.
    pub fn connect(&self, identity: Identity, listener: Arc<dyn PushListener>) {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(cycle) = active.as_ref() {
            if cycle.user_id == identity.user_id && !cycle.task.is_finished() {
                debug!(
                    "Push channel already active for user {}, ignoring connect",
                    identity.user_id
                );
                return;
            }
        }

        if let Some(previous) = active.take() {
            debug!(
                "Replacing push cycle of user {} with user {}",
                previous.user_id, identity.user_id
            );
            previous.cancel.cancel();
        }

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        self.shared.publish(ConnectionState::Connecting);

        let user_id = identity.user_id.clone();
        let task = tokio::spawn(run_cycle(
            self.shared.clone(),
            identity,
            listener,
            epoch,
            cancel.clone(),
        ));

        *active = Some(ActiveCycle {
            user_id,
            cancel,
            task,
        });
    }

    /// Tear down the current cycle, if any.
    ///
    /// Cancels pending reconnect and heartbeat timers, closes the session and
    /// drops the listener. Safe to call repeatedly or without a prior
    /// `connect`.
    pub async fn disconnect(&self) {
        let cycle = match self.active.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(cycle) = cycle {
            cycle.cancel.cancel();
            if let Err(e) = cycle.task.await {
                warn!("Push cycle for user {} ended abnormally: {}", cycle.user_id, e);
            }
            info!("Push channel disconnected for user {}", cycle.user_id);
        }

        self.shared.publish(ConnectionState::Disconnected);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let cycle = match self.active.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cycle) = cycle {
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
            cycle.cancel.cancel();
        }
    }
}

enum SessionEnd {
    Cancelled,
    Failed(String),
}

async fn run_cycle(
    shared: Arc<Shared>,
    identity: Identity,
    listener: Arc<dyn PushListener>,
    epoch: u64,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    // Last value handed to `on_connection_change`.
    let mut reported: Option<bool> = None;

    loop {
        if attempt > 0 {
            if !shared.set_state(epoch, ConnectionState::Reconnecting(attempt)) {
                break;
            }
            metrics::RECONNECT_ATTEMPTS_TOTAL.inc();
            let delay = shared.policy.delay(attempt);
            info!(
                "Reconnecting push channel for user {} in {:?} (attempt {}/{})",
                identity.user_id, delay, attempt, shared.policy.max_attempts
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }

        let opened = tokio::select! {
            result = shared.transport.open(&identity) => result,
            _ = cancel.cancelled() => break,
        };

        match opened {
            Ok(mut session) => {
                if !shared.set_state(epoch, ConnectionState::Connected) {
                    debug!("Discarding push session of a superseded cycle");
                    session.close().await;
                    break;
                }
                attempt = 0;
                info!("Push channel connected for user {}", identity.user_id);
                listener.on_connection_change(true).await;
                reported = Some(true);

                let end = pump(&shared, session.as_mut(), listener.as_ref(), epoch, &cancel).await;
                session.close().await;
                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Failed(reason) => {
                        warn!(
                            "Push channel for user {} dropped: {}",
                            identity.user_id, reason
                        );
                    }
                }

                metrics::CONNECTION_UP.set(0);
                listener.on_connection_change(false).await;
                reported = Some(false);
            }
            Err(e) => {
                if !shared.is_current(epoch) {
                    break;
                }
                warn!(
                    "Push connection attempt for user {} failed: {}",
                    identity.user_id, e
                );
            }
        }

        if !shared.policy.should_retry(attempt) {
            if shared.set_state(epoch, ConnectionState::Disconnected) {
                error!(
                    "Giving up on push channel for user {} after {} reconnect attempts",
                    identity.user_id, attempt
                );
                if reported != Some(false) {
                    listener.on_connection_change(false).await;
                }
            }
            return;
        }
        attempt += 1;
    }

    if reported == Some(true) {
        listener.on_connection_change(false).await;
    }
    debug!("Push cycle {} for user {} stopped", epoch, identity.user_id);
}

/// Drive one open session until it fails or the cycle is cancelled.
///
/// Heartbeats are only sent and expected in the directions the session
/// negotiated.
async fn pump(
    shared: &Shared,
    session: &mut dyn PushSession,
    listener: &dyn PushListener,
    epoch: u64,
    cancel: &CancellationToken,
) -> SessionEnd {
    let terms = session.heartbeat();
    let timeout = terms
        .incoming
        .map(|incoming| shared.settings.silence_timeout(incoming));
    debug!(
        "Session heartbeats: sending every {:?}, silence timeout {:?}",
        terms.outgoing, timeout
    );

    let mut ticker = terms.outgoing.map(|period| {
        let mut ticker = tokio::time::interval_at(deadline_after(period), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let silence = tokio::time::sleep(timeout.unwrap_or(shared.settings.heartbeat_interval));
    tokio::pin!(silence);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            _ = next_tick(&mut ticker) => {
                if let Err(e) = session.send_heartbeat().await {
                    return SessionEnd::Failed(format!("heartbeat send failed: {}", e));
                }
            }
            _ = &mut silence, if timeout.is_some() => {
                metrics::HEARTBEAT_TIMEOUTS_TOTAL.inc();
                return SessionEnd::Failed(format!(
                    "no heartbeat within {:?}",
                    timeout.unwrap_or_default()
                ));
            }
            event = session.next_event() => match event {
                None => return SessionEnd::Failed("closed by server".to_string()),
                Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                Some(Ok(event)) => {
                    if let Some(timeout) = timeout {
                        silence.as_mut().reset(deadline_after(timeout));
                    }
                    if let TransportEvent::Message(raw) = event {
                        if !shared.is_current(epoch) {
                            return SessionEnd::Cancelled;
                        }
                        listener.on_message(raw).await;
                    }
                }
            },
        }
    }
}

/// `now + timeout`, capped for intervals too large to represent.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Next tick of an optional ticker; never resolves without one.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
