//! The single coordinating owner of all hub state.
//!
//! One `ConnectionManager` exists per process. It runs the initialization
//! pass (auth probe, then sequential hub opens), supervises hub lifecycle
//! updates, schedules manual reconnects up to a ceiling, and exposes the
//! invocation and health surface the facade wraps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use vc_common::config::RealtimeConfig;
use vc_common::{RealtimeError, RtResult};

use crate::auth::{AuthProvider, UserContext};
use crate::hub::{required_hubs, HubName, HubState};
use crate::notify::{Notification, NotificationKind, NotificationSink, Priority};
use crate::registry::EventRegistry;
use crate::task::{HubCommand, HubRunner, HubUpdate};
use crate::transport::{DialRequest, Transport};

/// Initialization guard phases. Failure resets to `Idle` so a retry can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitPhase {
    Idle,
    InProgress,
    Ready,
}

struct HubEntry {
    state: HubState,
    attempts: u32,
    /// Id of the hub task backing this entry; 0 when no task was spawned.
    /// Supervisor updates carrying a different id are stale and dropped.
    task_id: u64,
    cmd: Option<mpsc::UnboundedSender<HubCommand>>,
}

/// Structured health breakdown for diagnostic UI.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub healthy: bool,
    pub connected: Vec<HubName>,
    pub disconnected: Vec<DisconnectedHub>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisconnectedHub {
    pub hub: HubName,
    pub state: HubState,
    pub attempts: u32,
}

pub struct ConnectionManager {
    cfg: RealtimeConfig,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    registry: Arc<EventRegistry>,
    notifier: NotificationSink,
    hubs: DashMap<HubName, HubEntry>,
    phase: watch::Sender<InitPhase>,
    /// Serializes Idle → InProgress transitions.
    claim: Mutex<()>,
    last_init_error: Mutex<Option<String>>,
    context: Mutex<Option<UserContext>>,
    updates: mpsc::UnboundedSender<(HubName, u64, HubUpdate)>,
    task_seq: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        cfg: RealtimeConfig,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        registry: Arc<EventRegistry>,
        notifier: NotificationSink,
    ) -> Arc<Self> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (phase_tx, _) = watch::channel(InitPhase::Idle);

        let manager = Arc::new(Self {
            cfg,
            transport,
            auth,
            registry,
            notifier,
            hubs: DashMap::new(),
            phase: phase_tx,
            claim: Mutex::new(()),
            last_init_error: Mutex::new(None),
            context: Mutex::new(None),
            updates: updates_tx,
            task_seq: AtomicU64::new(0),
        });

        tokio::spawn(supervise(Arc::downgrade(&manager), updates_rx));
        manager
    }

    // ─── Initialization ──────────────────────────────────────

    /// Open every hub the user's role and permissions require.
    ///
    /// Idempotent: a completed manager returns immediately, and concurrent
    /// callers join the one in-flight pass instead of racing to open
    /// duplicate hub sets. Resolves once every required hub has either
    /// connected or permanently failed this pass; only an auth-probe failure
    /// rejects.
    pub async fn initialize(self: &Arc<Self>, ctx: &UserContext) -> RtResult<()> {
        loop {
            let mut rx = self.phase.subscribe();
            let phase = *rx.borrow_and_update();
            match phase {
                InitPhase::Ready => return Ok(()),
                InitPhase::Idle => {
                    let claimed = {
                        let _guard = self.claim.lock().unwrap();
                        if *self.phase.borrow() == InitPhase::Idle {
                            self.phase.send_replace(InitPhase::InProgress);
                            true
                        } else {
                            false
                        }
                    };
                    if claimed {
                        return self.run_initialization(ctx).await;
                    }
                    // Another caller claimed between the two reads; join it.
                }
                InitPhase::InProgress => {
                    while rx.changed().await.is_ok() {
                        let phase = *rx.borrow_and_update();
                        match phase {
                            InitPhase::Ready => return Ok(()),
                            InitPhase::Idle => {
                                let reason = self
                                    .last_init_error
                                    .lock()
                                    .unwrap()
                                    .clone()
                                    .unwrap_or_else(|| "initialization failed".to_string());
                                return Err(RealtimeError::AuthProbe(reason));
                            }
                            InitPhase::InProgress => {}
                        }
                    }
                    return Err(RealtimeError::Server(
                        "connection manager shut down mid-initialization".to_string(),
                    ));
                }
            }
        }
    }

    async fn run_initialization(self: &Arc<Self>, ctx: &UserContext) -> RtResult<()> {
        *self.context.lock().unwrap() = Some(ctx.clone());

        // Fail the whole pass fast rather than watching every hub open fail
        // with the same expired session.
        if let Err(e) = self.auth.probe().await {
            let reason = e.to_string();
            warn!(error = %reason, "authentication probe failed; aborting initialization");
            *self.last_init_error.lock().unwrap() = Some(reason.clone());
            self.phase.send_replace(InitPhase::Idle);
            self.notifier.push(
                Notification::new(
                    NotificationKind::Error,
                    "Real-time connection failed",
                    "Your session could not be verified. Sign in again to restore live updates.",
                )
                .priority(Priority::High)
                .persistent(),
            );
            return Err(match e {
                RealtimeError::AuthProbe(_) => e,
                other => RealtimeError::AuthProbe(other.to_string()),
            });
        }

        let required = required_hubs(ctx);
        info!(role = %ctx.role, hubs = ?required, "opening required hubs");

        // Sequential on purpose: bounds simultaneous handshake load and lets
        // a later hub see the outcome of earlier ones.
        for hub in required {
            if let Err(e) = self.connect_hub(hub, ctx).await {
                self.log_connect_failure(hub, &e);
                self.hubs.entry(hub).or_insert(HubEntry {
                    state: HubState::Disconnected,
                    attempts: 0,
                    task_id: 0,
                    cmd: None,
                });
            }
        }

        self.phase.send_replace(InitPhase::Ready);
        Ok(())
    }

    // ─── Hub connect ─────────────────────────────────────────

    /// Open one hub: refresh the token, dial, spawn the hub task, join the
    /// hub's server-side group, and subscribe the registry's event list.
    pub async fn connect_hub(self: &Arc<Self>, hub: HubName, ctx: &UserContext) -> RtResult<()> {
        debug!(%hub, role = %ctx.role, "connecting hub");
        self.hubs
            .entry(hub)
            .and_modify(|e| e.state = HubState::Connecting);

        // An expired token is the usual cause of spurious hub failures.
        self.auth.refresh_token().await?;

        let url = format!(
            "{}/hubs/{}?fingerprint={}",
            self.cfg.hub_base_url,
            hub,
            self.auth.device_fingerprint()
        );
        let request = DialRequest {
            hub,
            url: url.clone(),
            cookie: self.auth.session_cookie(),
        };
        let socket = self.transport.open(&request).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task_id = self.task_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let runner = HubRunner::new(
            hub,
            task_id,
            url,
            self.cfg.auto_reconnect_attempts,
            self.transport.clone(),
            self.auth.clone(),
            self.registry.clone(),
            self.updates.clone(),
        );
        tokio::spawn(runner.run(socket, cmd_rx));

        // Attempt counter resets on every successful (re)connect.
        self.hubs.insert(
            hub,
            HubEntry {
                state: HubState::Connected,
                attempts: 0,
                task_id,
                cmd: Some(cmd_tx.clone()),
            },
        );
        info!(%hub, "hub connected");

        self.join_and_subscribe(hub, &cmd_tx).await;
        Ok(())
    }

    async fn join_and_subscribe(&self, hub: HubName, cmd: &mpsc::UnboundedSender<HubCommand>) {
        if let Some(method) = hub.join_method() {
            match self.send_invoke(cmd, method, Vec::new()).await {
                Ok(_) => debug!(%hub, method, "joined hub group"),
                Err(e) => warn!(%hub, method, error = %e, "join call failed"),
            }
        }
        let events = self.registry.supported_events();
        if !events.is_empty() {
            let _ = cmd.send(HubCommand::Subscribe { events });
        }
    }

    fn log_connect_failure(&self, hub: HubName, error: &RealtimeError) {
        match error {
            RealtimeError::Unauthorized(msg) | RealtimeError::AuthProbe(msg) => {
                error!(%hub, %msg, "hub rejected credentials; check the session cookie")
            }
            RealtimeError::Forbidden(msg) => {
                warn!(%hub, %msg, "account lacks the permission for this hub")
            }
            RealtimeError::TransportBlocked(msg) => error!(%hub, %msg, "transport blocked"),
            other => warn!(%hub, error = %other, "hub connect failed"),
        }
    }

    // ─── Invocation ──────────────────────────────────────────

    /// Invoke a named server method on a connected hub.
    ///
    /// Fails fast with `NotConnected` when the hub is absent or not in the
    /// Connected state; no retry happens at this layer.
    pub async fn invoke(&self, hub: HubName, method: &str, args: Vec<Value>) -> RtResult<Value> {
        self.wait_for_initialization().await;

        let cmd = {
            let entry = self
                .hubs
                .get(&hub)
                .ok_or_else(|| RealtimeError::NotConnected(hub.to_string()))?;
            if entry.state != HubState::Connected {
                return Err(RealtimeError::NotConnected(hub.to_string()));
            }
            entry
                .cmd
                .clone()
                .ok_or_else(|| RealtimeError::NotConnected(hub.to_string()))?
        };

        match self.send_invoke(&cmd, method, args).await {
            Ok(value) => Ok(value),
            Err(e) => {
                error!(%hub, method, error = %e, "hub invocation failed");
                self.notifier.push(
                    Notification::new(
                        NotificationKind::Error,
                        "Request failed",
                        format!("'{method}' did not complete: {e}"),
                    )
                    .timeout_ms(8_000),
                );
                Err(e)
            }
        }
    }

    async fn send_invoke(
        &self,
        cmd: &mpsc::UnboundedSender<HubCommand>,
        method: &str,
        args: Vec<Value>,
    ) -> RtResult<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd.send(HubCommand::Invoke {
            method: method.to_string(),
            args,
            reply: reply_tx,
        })
        .map_err(|_| RealtimeError::NotConnected(format!("hub task gone for '{method}'")))?;

        let timeout = Duration::from_secs(self.cfg.invoke_timeout_secs);
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RealtimeError::Invocation {
                method: method.to_string(),
                reason: "hub task dropped the call".to_string(),
            }),
            Err(_) => Err(RealtimeError::InvocationTimeout {
                method: method.to_string(),
                seconds: timeout.as_secs(),
            }),
        }
    }

    /// Block invocations racing app startup until the in-flight pass ends.
    async fn wait_for_initialization(&self) {
        let mut rx = self.phase.subscribe();
        while *rx.borrow_and_update() == InitPhase::InProgress {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    // ─── Teardown ────────────────────────────────────────────

    /// Stop every hub and reset the manager so a later login can
    /// re-initialize cleanly. Unconditional: in-progress connect attempts
    /// are left to fail against the cleared map.
    pub async fn disconnect_all(&self) {
        info!("disconnecting all hubs");

        // Drain the map first so supervisor updates from dying tasks land on
        // unknown hubs and are ignored.
        let entries: Vec<(HubName, HubEntry)> = {
            let keys: Vec<HubName> = self.hubs.iter().map(|e| *e.key()).collect();
            keys.into_iter()
                .filter_map(|k| self.hubs.remove(&k))
                .collect()
        };

        for (hub, entry) in entries {
            if entry.state == HubState::Disconnected {
                continue;
            }
            match entry.cmd {
                // The hub task detaches event routing before closing its
                // socket, so trailing frames are dropped, not dispatched.
                Some(cmd) => {
                    if cmd.send(HubCommand::Stop).is_err() {
                        warn!(%hub, "hub task already gone during shutdown");
                    }
                }
                None => debug!(%hub, "hub had no live task to stop"),
            }
        }

        *self.context.lock().unwrap() = None;
        *self.last_init_error.lock().unwrap() = None;
        self.phase.send_replace(InitPhase::Idle);
    }

    // ─── Health queries ──────────────────────────────────────

    /// Current state of a hub; `Disconnected` if it was never opened.
    pub fn status(&self, hub: HubName) -> HubState {
        self.hubs
            .get(&hub)
            .map(|e| e.state)
            .unwrap_or(HubState::Disconnected)
    }

    /// True only when at least one hub exists and every one is Connected.
    /// An empty hub set is unhealthy, not vacuously healthy.
    pub fn all_healthy(&self) -> bool {
        !self.hubs.is_empty()
            && self
                .hubs
                .iter()
                .all(|e| e.value().state == HubState::Connected)
    }

    pub fn health(&self) -> ConnectionHealth {
        let mut connected = Vec::new();
        let mut disconnected = Vec::new();
        for entry in self.hubs.iter() {
            if entry.value().state == HubState::Connected {
                connected.push(*entry.key());
            } else {
                disconnected.push(DisconnectedHub {
                    hub: *entry.key(),
                    state: entry.value().state,
                    attempts: entry.value().attempts,
                });
            }
        }
        connected.sort();
        disconnected.sort_by_key(|d| d.hub);
        ConnectionHealth {
            healthy: !connected.is_empty() && disconnected.is_empty(),
            connected,
            disconnected,
        }
    }

    // ─── Supervisor ──────────────────────────────────────────

    fn on_update(self: &Arc<Self>, hub: HubName, task_id: u64, update: HubUpdate) {
        // A task outlived by teardown + re-initialization can still report;
        // only the task backing the current entry gets to mutate state.
        let current = self.hubs.get(&hub).map(|e| e.task_id);
        if current != Some(task_id) {
            debug!(%hub, task_id, ?update, "ignoring update from a stale hub task");
            return;
        }
        match update {
            HubUpdate::Reconnecting { attempt } => {
                let Some(mut entry) = self.hubs.get_mut(&hub) else {
                    return;
                };
                entry.state = HubState::Reconnecting;
                drop(entry);
                if attempt == 1 {
                    self.notifier.push(
                        Notification::new(
                            NotificationKind::Warning,
                            "Connection interrupted",
                            format!("Reconnecting to the {hub} channel..."),
                        )
                        .timeout_ms(4_000),
                    );
                }
            }
            HubUpdate::Reconnected => {
                let Some(mut entry) = self.hubs.get_mut(&hub) else {
                    return;
                };
                entry.state = HubState::Connected;
                entry.attempts = 0;
                let cmd = entry.cmd.clone();
                drop(entry);
                self.notifier.push(
                    Notification::new(
                        NotificationKind::Success,
                        "Connection restored",
                        format!("Live updates on the {hub} channel resumed."),
                    )
                    .timeout_ms(4_000),
                );
                // Group membership does not survive a reconnect.
                if let Some(cmd) = cmd {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.join_and_subscribe(hub, &cmd).await;
                    });
                }
            }
            HubUpdate::Closed { reason } => self.on_unexpected_close(hub, &reason),
            HubUpdate::Stopped => {
                if let Some(mut entry) = self.hubs.get_mut(&hub) {
                    entry.state = HubState::Disconnected;
                    entry.cmd = None;
                }
            }
        }
    }

    /// An established hub dropped and its automatic schedule is exhausted.
    /// Retry manually after a fixed delay until the ceiling, then surface
    /// one terminal notice and stop.
    fn on_unexpected_close(self: &Arc<Self>, hub: HubName, reason: &str) {
        let attempts = {
            let Some(mut entry) = self.hubs.get_mut(&hub) else {
                return;
            };
            entry.state = HubState::Disconnected;
            entry.cmd = None;
            entry.attempts += 1;
            entry.attempts
        };

        if attempts <= self.cfg.max_reconnect_attempts {
            warn!(%hub, attempts, reason, "hub closed unexpectedly; scheduling manual reconnect");
            self.notifier.push(
                Notification::new(
                    NotificationKind::Warning,
                    "Connection lost",
                    format!("The {hub} channel dropped; retrying..."),
                )
                .timeout_ms(4_000),
            );

            let weak = Arc::downgrade(self);
            let delay = Duration::from_millis(self.cfg.reconnect_delay_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                let ctx = manager.context.lock().unwrap().clone();
                let Some(ctx) = ctx else {
                    return; // torn down meanwhile
                };
                // Skip if torn down or already reconnected by a fresh pass.
                match manager.hubs.get(&hub).map(|e| e.state) {
                    Some(HubState::Disconnected) => {}
                    _ => return,
                }
                if let Err(e) = manager.connect_hub(hub, &ctx).await {
                    manager.log_connect_failure(hub, &e);
                    manager.on_unexpected_close(hub, &e.to_string());
                }
            });
        } else {
            error!(%hub, attempts, "reconnect ceiling reached; giving up");
            self.notifier.push(
                Notification::new(
                    NotificationKind::Error,
                    "Real-time connection lost",
                    format!(
                        "The {hub} channel could not be restored. Refresh the page to reconnect."
                    ),
                )
                .priority(Priority::Critical)
                .persistent(),
            );
        }
    }
}

async fn supervise(
    manager: Weak<ConnectionManager>,
    mut updates: mpsc::UnboundedReceiver<(HubName, u64, HubUpdate)>,
) {
    while let Some((hub, task_id, update)) = updates.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.on_update(hub, task_id, update);
    }
}
