//! Normalizes metric pushes and fans them out to live dashboard consumers.
//!
//! Raw server payloads arrive PascalCase; normalization to typed structs
//! happens here, once, so subscribers never touch the wire shape.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{events, EventHandler};
use crate::hub::HubName;

const SUPPORTED: &[&str] = &[
    events::DASHBOARD_METRICS_UPDATED,
    events::QUEUE_UPDATED,
    events::SYSTEM_METRICS_SNAPSHOT,
    events::CAPACITY_ALERT,
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DashboardMetrics {
    #[serde(default)]
    pub visitors_today: u64,
    #[serde(default)]
    pub active_visits: u64,
    #[serde(default)]
    pub pending_invitations: u64,
    #[serde(default)]
    pub average_wait_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueSnapshot {
    #[serde(default)]
    pub waiting_count: u64,
    #[serde(default)]
    pub longest_wait_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemMetrics {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_used: u64,
    #[serde(default)]
    pub memory_total: u64,
    #[serde(default)]
    pub active_connections: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OccupancySnapshot {
    pub percentage_full: f64,
    #[serde(default)]
    pub current_occupancy: u64,
    #[serde(default)]
    pub max_capacity: u64,
}

/// Normalized update delivered to dashboard subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardUpdate {
    Metrics(DashboardMetrics),
    Queue(QueueSnapshot),
    System(SystemMetrics),
    Occupancy(OccupancySnapshot),
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<DashboardUpdate>,
}

#[derive(Default)]
pub struct DashboardHandler {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Live subscription to dashboard updates. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) removes the subscriber.
pub struct DashboardSubscription {
    id: u64,
    handler: Weak<DashboardHandler>,
    pub rx: mpsc::UnboundedReceiver<DashboardUpdate>,
}

impl DashboardSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for DashboardSubscription {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.upgrade() {
            handler.remove(self.id);
        }
    }
}

impl DashboardHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(self: &Arc<Self>) -> DashboardSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(Subscriber { id, tx });
        DashboardSubscription {
            id,
            handler: Arc::downgrade(self),
            rx,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    fn remove(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Deliver an update to every subscriber in subscription order. A
    /// subscriber whose receiver is gone is pruned and logged; it cannot
    /// block delivery to the others.
    fn broadcast(&self, update: DashboardUpdate) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| {
            if s.tx.send(update.clone()).is_ok() {
                true
            } else {
                debug!(subscriber = s.id, "dashboard subscriber gone; pruning");
                false
            }
        });
    }
}

impl EventHandler for DashboardHandler {
    fn name(&self) -> &'static str {
        "dashboard"
    }

    fn supported_events(&self) -> &'static [&'static str] {
        SUPPORTED
    }

    fn handle(&self, event: &str, payload: &Value, _hub: HubName) -> anyhow::Result<()> {
        let update = match event {
            events::DASHBOARD_METRICS_UPDATED => DashboardUpdate::Metrics(
                serde_json::from_value(payload.clone()).context("malformed dashboard metrics")?,
            ),
            events::QUEUE_UPDATED => DashboardUpdate::Queue(
                serde_json::from_value(payload.clone()).context("malformed queue snapshot")?,
            ),
            events::SYSTEM_METRICS_SNAPSHOT => DashboardUpdate::System(
                serde_json::from_value(payload.clone()).context("malformed system metrics")?,
            ),
            events::CAPACITY_ALERT => DashboardUpdate::Occupancy(
                serde_json::from_value(payload.clone()).context("malformed occupancy payload")?,
            ),
            other => anyhow::bail!("unexpected event '{other}' routed to dashboard handler"),
        };
        self.broadcast(update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pascal_case_wire_fields_are_normalized() {
        let handler = Arc::new(DashboardHandler::new());
        let mut sub = handler.subscribe();

        handler
            .handle(
                events::QUEUE_UPDATED,
                &json!({"WaitingCount": 4, "LongestWaitSecs": 310}),
                HubName::Operator,
            )
            .unwrap();

        assert_eq!(
            sub.rx.try_recv().unwrap(),
            DashboardUpdate::Queue(QueueSnapshot {
                waiting_count: 4,
                longest_wait_secs: 310,
            })
        );
    }

    #[test]
    fn dropped_subscription_is_removed_and_siblings_still_receive() {
        let handler = Arc::new(DashboardHandler::new());
        let dead = handler.subscribe();
        let mut live = handler.subscribe();
        drop(dead);

        handler
            .handle(
                events::CAPACITY_ALERT,
                &json!({"PercentageFull": 55.0, "CurrentOccupancy": 110, "MaxCapacity": 200}),
                HubName::Operator,
            )
            .unwrap();

        assert!(matches!(
            live.rx.try_recv().unwrap(),
            DashboardUpdate::Occupancy(_)
        ));
        assert_eq!(handler.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_removes_the_subscriber() {
        let handler = Arc::new(DashboardHandler::new());
        let sub = handler.subscribe();
        assert_eq!(handler.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(handler.subscriber_count(), 0);
    }

    #[test]
    fn delivery_follows_subscription_order() {
        let handler = Arc::new(DashboardHandler::new());
        let mut first = handler.subscribe();
        let mut second = handler.subscribe();

        handler
            .handle(
                events::SYSTEM_METRICS_SNAPSHOT,
                &json!({"CpuUsage": 12.5, "ActiveConnections": 3}),
                HubName::Admin,
            )
            .unwrap();

        // Both receive the same normalized update.
        let a = first.rx.try_recv().unwrap();
        let b = second.rx.try_recv().unwrap();
        assert_eq!(a, b);
    }
}
