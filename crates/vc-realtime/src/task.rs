//! Per-hub background task.
//!
//! Owns one hub's socket: services invocation commands, matches completions
//! to pending calls, routes event frames into the registry, and runs the
//! automatic reconnect schedule when the socket drops. Lifecycle changes are
//! reported to the connection manager's supervisor.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use vc_common::{RealtimeError, RtResult};

use crate::auth::AuthProvider;
use crate::hub::{auto_retry_delay, HubName};
use crate::registry::EventRegistry;
use crate::transport::{DialRequest, HubSocket, Transport};
use crate::wire::WireFrame;

/// Commands the manager sends to a hub task.
pub enum HubCommand {
    Invoke {
        method: String,
        args: Vec<Value>,
        reply: oneshot::Sender<RtResult<Value>>,
    },
    Subscribe {
        events: Vec<String>,
    },
    Stop,
}

/// Lifecycle updates a hub task reports to the supervisor.
#[derive(Debug)]
pub enum HubUpdate {
    /// Automatic reconnect attempt starting.
    Reconnecting { attempt: u32 },
    /// Automatic reconnect succeeded.
    Reconnected,
    /// Automatic schedule exhausted; the task has exited.
    Closed { reason: String },
    /// Explicit stop completed.
    Stopped,
}

enum SessionEnd {
    Stopped,
    Lost(String),
}

enum ReconnectOutcome {
    Restored(HubSocket),
    Stopped,
    GaveUp,
}

pub struct HubRunner {
    hub: HubName,
    /// Distinguishes this task's updates from a predecessor's after teardown
    /// and re-initialization; the supervisor drops stale-id updates.
    task_id: u64,
    dial_url: String,
    auto_attempts: u32,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    registry: Arc<EventRegistry>,
    updates: mpsc::UnboundedSender<(HubName, u64, HubUpdate)>,
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<RtResult<Value>>>,
    /// Cleared before teardown so residual frames are never dispatched.
    routing: bool,
}

impl HubRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hub: HubName,
        task_id: u64,
        dial_url: String,
        auto_attempts: u32,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        registry: Arc<EventRegistry>,
        updates: mpsc::UnboundedSender<(HubName, u64, HubUpdate)>,
    ) -> Self {
        Self {
            hub,
            task_id,
            dial_url,
            auto_attempts,
            transport,
            auth,
            registry,
            updates,
            next_id: 0,
            pending: HashMap::new(),
            routing: true,
        }
    }

    pub async fn run(mut self, socket: HubSocket, mut cmd_rx: mpsc::UnboundedReceiver<HubCommand>) {
        let mut socket = socket;
        loop {
            match self.run_session(&mut socket, &mut cmd_rx).await {
                SessionEnd::Stopped => {
                    let _ = self.updates.send((self.hub, self.task_id, HubUpdate::Stopped));
                    return;
                }
                SessionEnd::Lost(reason) => {
                    debug!(hub = %self.hub, reason, "hub session lost");
                    self.fail_pending("connection lost");
                    match self.reconnect(&mut cmd_rx).await {
                        ReconnectOutcome::Restored(restored) => {
                            socket = restored;
                            let _ =
                                self.updates.send((self.hub, self.task_id, HubUpdate::Reconnected));
                        }
                        ReconnectOutcome::Stopped => {
                            let _ = self.updates.send((self.hub, self.task_id, HubUpdate::Stopped));
                            return;
                        }
                        ReconnectOutcome::GaveUp => {
                            let _ = self
                                .updates
                                .send((self.hub, self.task_id, HubUpdate::Closed { reason }));
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn run_session(
        &mut self,
        socket: &mut HubSocket,
        cmd_rx: &mut mpsc::UnboundedReceiver<HubCommand>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(HubCommand::Invoke { method, args, reply }) => {
                        self.send_invocation(socket, method, args, reply).await;
                    }
                    Some(HubCommand::Subscribe { events }) => {
                        if socket
                            .outbound
                            .send(WireFrame::Subscribe { events })
                            .await
                            .is_err()
                        {
                            return SessionEnd::Lost("write failed during subscribe".to_string());
                        }
                    }
                    Some(HubCommand::Stop) | None => {
                        // Detach event routing before the socket goes down;
                        // trailing frames must not reach the handlers.
                        self.routing = false;
                        self.fail_pending("hub stopped");
                        return SessionEnd::Stopped;
                    }
                },

                frame = socket.inbound.recv() => match frame {
                    Some(WireFrame::Completion { id, result, error }) => {
                        self.complete(id, result, error);
                    }
                    Some(WireFrame::Event { name, payload }) => {
                        if self.routing {
                            self.registry.dispatch(&name, &payload, self.hub);
                        }
                    }
                    Some(WireFrame::Ping) => {
                        let _ = socket.outbound.send(WireFrame::Pong).await;
                    }
                    Some(_) => {}
                    None => return SessionEnd::Lost("transport closed".to_string()),
                },
            }
        }
    }

    async fn send_invocation(
        &mut self,
        socket: &mut HubSocket,
        method: String,
        args: Vec<Value>,
        reply: oneshot::Sender<RtResult<Value>>,
    ) {
        self.next_id += 1;
        let id = self.next_id;
        let frame = WireFrame::Invocation {
            id,
            method: method.clone(),
            args,
        };
        if socket.outbound.send(frame).await.is_err() {
            let _ = reply.send(Err(RealtimeError::Invocation {
                method,
                reason: "hub write failed".to_string(),
            }));
            return;
        }
        self.pending.insert(id, reply);
    }

    fn complete(&mut self, id: u64, result: Option<Value>, error: Option<String>) {
        let Some(reply) = self.pending.remove(&id) else {
            debug!(hub = %self.hub, id, "completion for unknown invocation");
            return;
        };
        let outcome = match error {
            Some(reason) => Err(RealtimeError::Server(reason)),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = reply.send(outcome);
    }

    fn fail_pending(&mut self, reason: &str) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(RealtimeError::NotConnected(format!(
                "{} ({reason})",
                self.hub
            ))));
        }
    }

    /// Automatic reconnect schedule: immediate, 2 s, 10 s, then 30 s, for up
    /// to `auto_attempts` tries. Commands arriving mid-schedule are answered
    /// (invocations fail fast, stop wins immediately).
    async fn reconnect(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<HubCommand>) -> ReconnectOutcome {
        for attempt in 0..self.auto_attempts {
            let _ = self.updates.send((
                self.hub,
                self.task_id,
                HubUpdate::Reconnecting {
                    attempt: attempt + 1,
                },
            ));

            if self.wait_interruptible(cmd_rx, attempt).await {
                return ReconnectOutcome::Stopped;
            }

            if let Err(e) = self.auth.refresh_token().await {
                warn!(hub = %self.hub, error = %e, "token refresh failed before reconnect");
            }
            let request = DialRequest {
                hub: self.hub,
                url: self.dial_url.clone(),
                cookie: self.auth.session_cookie(),
            };
            match self.transport.open(&request).await {
                Ok(socket) => {
                    debug!(hub = %self.hub, attempt = attempt + 1, "hub reconnected");
                    return ReconnectOutcome::Restored(socket);
                }
                Err(e) => {
                    warn!(hub = %self.hub, attempt = attempt + 1, error = %e, "reconnect attempt failed");
                }
            }
        }
        ReconnectOutcome::GaveUp
    }

    /// Sleep out the backoff delay while still answering commands.
    /// Returns true when a stop arrived.
    async fn wait_interruptible(
        &mut self,
        cmd_rx: &mut mpsc::UnboundedReceiver<HubCommand>,
        attempt: u32,
    ) -> bool {
        let delay = auto_retry_delay(attempt);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                cmd = cmd_rx.recv() => match cmd {
                    Some(HubCommand::Invoke { method, reply, .. }) => {
                        let _ = reply.send(Err(RealtimeError::NotConnected(format!(
                            "{} (reconnecting, cannot invoke '{method}')",
                            self.hub
                        ))));
                    }
                    Some(HubCommand::Subscribe { .. }) => {}
                    Some(HubCommand::Stop) | None => {
                        self.routing = false;
                        return true;
                    }
                },
            }
        }
    }
}
