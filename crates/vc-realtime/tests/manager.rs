//! End-to-end tests for the connection manager against an in-memory
//! transport: initialization semantics, partial failure, health reporting,
//! reconnect ceiling, and event routing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use vc_common::config::RealtimeConfig;
use vc_common::{RealtimeError, RtResult};
use vc_realtime::transport::{DialRequest, HubSocket, Transport};
use vc_realtime::wire::WireFrame;
use vc_realtime::{
    AuthProvider, DashboardUpdate, HubName, HubState, Notification, NotificationKind, Priority,
    RealtimeClient, UserContext,
};

// ─── Test doubles ────────────────────────────────────────────

struct Session {
    event_tx: mpsc::Sender<WireFrame>,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// In-memory transport. Each open spawns a tiny server that completes every
/// invocation with `"ok:<method>"`; tests can push events or kill a session.
#[derive(Default)]
struct MockTransport {
    dials: Mutex<Vec<HubName>>,
    reject: Mutex<HashSet<HubName>>,
    sessions: Mutex<HashMap<HubName, Session>>,
}

impl MockTransport {
    fn dials(&self) -> Vec<HubName> {
        self.dials.lock().unwrap().clone()
    }

    fn reject(&self, hub: HubName) {
        self.reject.lock().unwrap().insert(hub);
    }

    async fn push_event(&self, hub: HubName, name: &str, payload: serde_json::Value) {
        let tx = self
            .sessions
            .lock()
            .unwrap()
            .get(&hub)
            .map(|s| s.event_tx.clone())
            .expect("no live session for hub");
        tx.send(WireFrame::Event {
            name: name.to_string(),
            payload,
        })
        .await
        .expect("session gone");
    }

    /// Drop the server side of a hub so the client observes connection loss.
    fn kill(&self, hub: HubName) {
        if let Some(mut session) = self.sessions.lock().unwrap().remove(&hub) {
            if let Some(kill) = session.kill_tx.take() {
                let _ = kill.send(());
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, request: &DialRequest) -> RtResult<HubSocket> {
        self.dials.lock().unwrap().push(request.hub);
        if self.reject.lock().unwrap().contains(&request.hub) {
            return Err(RealtimeError::Forbidden(format!(
                "hub '{}' rejected",
                request.hub
            )));
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WireFrame>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<WireFrame>(64);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        let server_tx = inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut kill_rx => break,
                    frame = outbound_rx.recv() => match frame {
                        Some(WireFrame::Invocation { id, method, .. }) => {
                            let _ = server_tx
                                .send(WireFrame::Completion {
                                    id,
                                    result: Some(json!(format!("ok:{method}"))),
                                    error: None,
                                })
                                .await;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });

        self.sessions.lock().unwrap().insert(
            request.hub,
            Session {
                event_tx: inbound_tx,
                kill_tx: Some(kill_tx),
            },
        );

        Ok(HubSocket {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

struct MockAuth {
    probe_ok: AtomicBool,
    probe_delay: Duration,
}

impl MockAuth {
    fn new() -> Self {
        Self {
            probe_ok: AtomicBool::new(true),
            probe_delay: Duration::ZERO,
        }
    }

    fn with_probe_delay(delay: Duration) -> Self {
        Self {
            probe_ok: AtomicBool::new(true),
            probe_delay: delay,
        }
    }

    fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthProvider for MockAuth {
    async fn probe(&self) -> RtResult<()> {
        tokio::time::sleep(self.probe_delay).await;
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RealtimeError::AuthProbe("session expired".to_string()))
        }
    }

    async fn refresh_token(&self) -> RtResult<()> {
        Ok(())
    }

    fn session_cookie(&self) -> String {
        "vc_session=test".to_string()
    }

    fn device_fingerprint(&self) -> String {
        "test-fingerprint".to_string()
    }
}

fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        hub_base_url: "ws://mock".to_string(),
        handshake_timeout_secs: 1,
        invoke_timeout_secs: 2,
        // Skip the slow automatic schedule; losses surface immediately.
        auto_reconnect_attempts: 0,
        max_reconnect_attempts: 5,
        reconnect_delay_ms: 20,
    }
}

struct Harness {
    client: RealtimeClient,
    notifications: mpsc::UnboundedReceiver<Notification>,
    transport: Arc<MockTransport>,
    auth: Arc<MockAuth>,
}

fn harness(cfg: RealtimeConfig, auth: MockAuth) -> Harness {
    let transport = Arc::new(MockTransport::default());
    let auth = Arc::new(auth);
    let (client, notifications) = RealtimeClient::new(cfg, transport.clone(), auth.clone());
    Harness {
        client,
        notifications,
        transport,
        auth,
    }
}

fn operator_ctx() -> UserContext {
    UserContext::new("operator", vec![])
}

// ─── Tests ───────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_initialize_runs_exactly_one_pass() {
    let h = harness(
        test_config(),
        MockAuth::with_probe_delay(Duration::from_millis(50)),
    );
    let ctx = UserContext::new("receptionist", vec!["Invitation.Read".to_string()]);

    let (a, b) = tokio::join!(h.client.initialize(&ctx), h.client.initialize(&ctx));
    a.unwrap();
    b.unwrap();

    assert_eq!(h.transport.dials(), vec![HubName::Host, HubName::Operator]);
}

#[tokio::test]
async fn partial_hub_failure_still_resolves_initialization() {
    let h = harness(test_config(), MockAuth::new());
    h.transport.reject(HubName::Admin);
    let ctx = UserContext::new("administrator", vec!["Invitation.Read".to_string()]);

    h.client.initialize(&ctx).await.unwrap();

    assert_eq!(h.transport.dials(), vec![HubName::Host, HubName::Admin]);
    assert_eq!(h.client.status(HubName::Host), HubState::Connected);
    assert_eq!(h.client.status(HubName::Admin), HubState::Disconnected);
    assert!(!h.client.all_healthy());
}

#[tokio::test]
async fn invoke_round_trips_through_the_hub() {
    let h = harness(test_config(), MockAuth::new());
    h.client.initialize(&operator_ctx()).await.unwrap();

    let result = h.client.visitor_queue().await.unwrap();
    assert_eq!(result, json!("ok:GetVisitorQueue"));
}

#[tokio::test]
async fn invoke_on_disconnected_hub_fails_without_dialing() {
    let h = harness(test_config(), MockAuth::new());
    h.client.initialize(&operator_ctx()).await.unwrap();
    let dials_before = h.transport.dials();

    let err = h
        .client
        .invoke(HubName::Security, "GetAlerts", vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, RealtimeError::NotConnected(_)));
    assert_eq!(h.transport.dials(), dials_before);
}

#[tokio::test]
async fn disconnect_all_resets_state_and_allows_reinitialization() {
    let h = harness(test_config(), MockAuth::new());
    h.client.initialize(&operator_ctx()).await.unwrap();
    assert!(h.client.all_healthy());

    h.client.teardown().await;

    assert_eq!(h.client.status(HubName::Operator), HubState::Disconnected);
    assert!(!h.client.all_healthy());

    h.client.initialize(&operator_ctx()).await.unwrap();
    assert!(h.client.all_healthy());
    assert_eq!(h.transport.dials(), vec![HubName::Operator, HubName::Operator]);
}

#[tokio::test]
async fn health_reflects_a_lost_hub() {
    let mut cfg = test_config();
    // Keep the manual retry far away so the lost state is observable.
    cfg.reconnect_delay_ms = 60_000;
    let h = harness(cfg, MockAuth::new());
    h.client.initialize(&operator_ctx()).await.unwrap();
    assert!(h.client.all_healthy());

    h.transport.kill(HubName::Operator);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.client.status(HubName::Operator), HubState::Disconnected);
    assert!(!h.client.all_healthy());

    let health = h.client.health();
    assert!(!health.healthy);
    assert!(health.connected.is_empty());
    assert_eq!(health.disconnected.len(), 1);
    assert_eq!(health.disconnected[0].hub, HubName::Operator);
    assert_eq!(health.disconnected[0].attempts, 1);
}

#[tokio::test]
async fn empty_hub_set_is_unhealthy_not_vacuously_healthy() {
    let h = harness(test_config(), MockAuth::new());
    assert!(!h.client.all_healthy());
}

#[tokio::test]
async fn reconnect_ceiling_stops_retries_and_notifies_once() {
    let mut cfg = test_config();
    cfg.max_reconnect_attempts = 3;
    cfg.reconnect_delay_ms = 10;
    let mut h = harness(cfg, MockAuth::new());
    h.client.initialize(&operator_ctx()).await.unwrap();

    h.transport.reject(HubName::Operator);
    h.transport.kill(HubName::Operator);
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Initial open plus exactly three manual retries.
    let dials = h.transport.dials();
    assert_eq!(dials.len(), 4);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.transport.dials().len(), 4, "retries continued past ceiling");

    let mut terminal = 0;
    while let Ok(n) = h.notifications.try_recv() {
        if n.persistent && n.kind == NotificationKind::Error && n.message.contains("Refresh") {
            terminal += 1;
        }
    }
    assert_eq!(terminal, 1);
    assert_eq!(h.client.status(HubName::Operator), HubState::Disconnected);
}

#[tokio::test]
async fn auth_probe_failure_is_fatal_but_retryable() {
    let h = harness(test_config(), MockAuth::new());
    h.auth.set_probe_ok(false);

    let err = h.client.initialize(&operator_ctx()).await.unwrap_err();
    assert!(err.is_auth());
    assert!(h.transport.dials().is_empty(), "no hub may open after a failed probe");

    h.auth.set_probe_ok(true);
    h.client.initialize(&operator_ctx()).await.unwrap();
    assert!(h.client.all_healthy());
}

#[tokio::test]
async fn capacity_event_reaches_notification_and_dashboard_handlers() {
    let mut h = harness(test_config(), MockAuth::new());
    h.client.initialize(&operator_ctx()).await.unwrap();
    let mut dashboard = h.client.subscribe_dashboard();

    h.transport
        .push_event(
            HubName::Operator,
            "CapacityAlert",
            json!({"PercentageFull": 97.0, "CurrentOccupancy": 194, "MaxCapacity": 200}),
        )
        .await;

    let notice = tokio::time::timeout(Duration::from_secs(1), h.notifications.recv())
        .await
        .expect("no notification arrived")
        .unwrap();
    assert_eq!(notice.priority, Priority::High);
    assert_eq!(notice.kind, NotificationKind::Warning);

    let update = tokio::time::timeout(Duration::from_secs(1), dashboard.rx.recv())
        .await
        .expect("no dashboard update arrived")
        .unwrap();
    match update {
        DashboardUpdate::Occupancy(o) => {
            assert_eq!(o.current_occupancy, 194);
            assert_eq!(o.max_capacity, 200);
        }
        other => panic!("unexpected update: {other:?}"),
    }
}

#[tokio::test]
async fn unknown_event_does_not_disturb_the_pipeline() {
    let mut h = harness(test_config(), MockAuth::new());
    h.client.initialize(&operator_ctx()).await.unwrap();
    let mut dashboard = h.client.subscribe_dashboard();

    h.transport
        .push_event(HubName::Operator, "BrandNewServerEvent", json!({"x": 1}))
        .await;
    h.transport
        .push_event(
            HubName::Operator,
            "QueueUpdated",
            json!({"WaitingCount": 2, "LongestWaitSecs": 45}),
        )
        .await;

    // The unrecognized event is skipped; the next one still flows.
    let update = tokio::time::timeout(Duration::from_secs(1), dashboard.rx.recv())
        .await
        .expect("queue update never arrived")
        .unwrap();
    assert!(matches!(update, DashboardUpdate::Queue(_)));
    assert!(h.notifications.try_recv().is_err());
}
