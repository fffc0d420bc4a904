//! Consumer-facing facade.
//!
//! UI code holds a cheap-clone [`RealtimeClient`] and touches nothing else:
//! initialization, health queries, typed invocation helpers, dashboard
//! subscriptions, and the notification stream.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use vc_common::config::AppConfig;
use vc_common::RtResult;

use crate::auth::{AuthProvider, HttpAuthProvider, UserContext};
use crate::handlers::dashboard::{DashboardHandler, DashboardSubscription};
use crate::handlers::notification::NotificationHandler;
use crate::handlers::EventHandler;
use crate::hub::{HubName, HubState};
use crate::manager::{ConnectionHealth, ConnectionManager};
use crate::notify::{Notification, NotificationSink};
use crate::registry::EventRegistry;
use crate::transport::{Transport, WsTransport};

#[derive(Clone)]
pub struct RealtimeClient {
    manager: Arc<ConnectionManager>,
    dashboard: Arc<DashboardHandler>,
}

impl RealtimeClient {
    /// Wire the full stack: notification + dashboard handlers behind one
    /// registry, one connection manager over the given transport and auth
    /// provider. Returns the client plus the notification stream the UI
    /// layer drains.
    pub fn new(
        cfg: vc_common::config::RealtimeConfig,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sink, notifications) = NotificationSink::channel();
        let dashboard = Arc::new(DashboardHandler::new());

        let handlers: Vec<Arc<dyn EventHandler>> = vec![
            Arc::new(NotificationHandler::new(sink.clone())),
            dashboard.clone(),
        ];
        let registry = Arc::new(EventRegistry::new(handlers));

        let manager = ConnectionManager::new(cfg, transport, auth, registry, sink);
        (Self { manager, dashboard }, notifications)
    }

    /// Production wiring: WebSocket transport plus the HTTP auth provider.
    pub fn connect_with(cfg: &AppConfig) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let transport = Arc::new(WsTransport::new(&cfg.realtime));
        let auth = Arc::new(HttpAuthProvider::new(cfg.api.base_url.clone()));
        Self::new(cfg.realtime.clone(), transport, auth)
    }

    pub async fn initialize(&self, ctx: &UserContext) -> RtResult<()> {
        self.manager.initialize(ctx).await
    }

    pub async fn teardown(&self) {
        self.manager.disconnect_all().await;
    }

    pub fn status(&self, hub: HubName) -> HubState {
        self.manager.status(hub)
    }

    pub fn is_connected(&self, hub: HubName) -> bool {
        self.manager.status(hub) == HubState::Connected
    }

    pub fn all_healthy(&self) -> bool {
        self.manager.all_healthy()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.manager.health()
    }

    pub async fn invoke(&self, hub: HubName, method: &str, args: Vec<Value>) -> RtResult<Value> {
        self.manager.invoke(hub, method, args).await
    }

    /// Current visitor queue, served by the operator hub.
    pub async fn visitor_queue(&self) -> RtResult<Value> {
        self.invoke(HubName::Operator, "GetVisitorQueue", Vec::new())
            .await
    }

    /// Ask the admin hub to push a fresh dashboard metrics snapshot.
    pub async fn request_metrics_refresh(&self) -> RtResult<Value> {
        self.invoke(HubName::Admin, "RefreshDashboardMetrics", Vec::new())
            .await
    }

    pub fn subscribe_dashboard(&self) -> DashboardSubscription {
        self.dashboard.subscribe()
    }
}
