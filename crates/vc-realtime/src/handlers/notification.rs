//! Maps visitor, security, and system events onto user-facing notifications.

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use super::{events, EventHandler};
use crate::hub::HubName;
use crate::notify::{Notification, NotificationKind, NotificationSink, Priority};

const SUPPORTED: &[&str] = &[
    events::VISITOR_ARRIVED,
    events::VISITOR_CHECKED_IN,
    events::VISITOR_CHECKED_OUT,
    events::VIP_ARRIVAL,
    events::UNKNOWN_FACE_DETECTED,
    events::CAPACITY_ALERT,
    events::SECURITY_ALERT,
    events::EMERGENCY_ALERT,
    events::SYSTEM_HEALTH_ALERT,
    events::BULK_OPERATION_COMPLETED,
    events::AUDIT_LOG_CREATED,
];

pub struct NotificationHandler {
    sink: NotificationSink,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VisitorPayload {
    #[serde(default)]
    visitor_name: String,
    #[serde(default)]
    host_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CapacityPayload {
    percentage_full: f64,
    #[serde(default)]
    current_occupancy: u64,
    #[serde(default)]
    max_capacity: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AlertPayload {
    #[serde(default)]
    alert_type: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BulkOperationPayload {
    #[serde(default)]
    operation: String,
    #[serde(default)]
    succeeded: u64,
    #[serde(default)]
    failed: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuditPayload {
    #[serde(default)]
    action: String,
    #[serde(default)]
    actor: String,
}

impl NotificationHandler {
    pub fn new(sink: NotificationSink) -> Self {
        Self { sink }
    }

    fn visitor_notice(
        &self,
        payload: &Value,
        kind: NotificationKind,
        title: &str,
        verb: &str,
    ) -> anyhow::Result<()> {
        let p: VisitorPayload =
            serde_json::from_value(payload.clone()).context("malformed visitor payload")?;
        let message = if p.host_name.is_empty() {
            format!("{} {verb}", p.visitor_name)
        } else {
            format!("{} {verb} (host: {})", p.visitor_name, p.host_name)
        };
        self.sink
            .push(Notification::new(kind, title, message).priority(Priority::Low));
        Ok(())
    }

    fn capacity_notice(&self, payload: &Value) -> anyhow::Result<()> {
        let p: CapacityPayload =
            serde_json::from_value(payload.clone()).context("malformed capacity payload")?;
        let mut notice = Notification::new(
            NotificationKind::Warning,
            "Capacity alert",
            format!(
                "Building at {:.0}% capacity ({}/{})",
                p.percentage_full, p.current_occupancy, p.max_capacity
            ),
        )
        .priority(capacity_priority(p.percentage_full));
        if p.percentage_full >= 100.0 {
            notice = notice.persistent();
        }
        self.sink.push(notice);
        Ok(())
    }

    fn alert_notice(
        &self,
        payload: &Value,
        title: &str,
        priority: Priority,
        persistent: bool,
    ) -> anyhow::Result<()> {
        let p: AlertPayload =
            serde_json::from_value(payload.clone()).context("malformed alert payload")?;
        let message = match (p.location.is_empty(), p.description.is_empty()) {
            (false, false) => format!("{} at {}: {}", p.alert_type, p.location, p.description),
            (false, true) => format!("{} at {}", p.alert_type, p.location),
            _ => p.alert_type.clone(),
        };
        let mut notice =
            Notification::new(NotificationKind::Error, title, message).priority(priority);
        if persistent {
            notice = notice.persistent();
        }
        self.sink.push(notice);
        Ok(())
    }
}

/// Priority of a capacity alert as a function of how full the building is.
fn capacity_priority(percentage_full: f64) -> Priority {
    if percentage_full >= 90.0 {
        Priority::High
    } else {
        Priority::Medium
    }
}

impl EventHandler for NotificationHandler {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn supported_events(&self) -> &'static [&'static str] {
        SUPPORTED
    }

    fn handle(&self, event: &str, payload: &Value, _hub: HubName) -> anyhow::Result<()> {
        match event {
            events::VISITOR_ARRIVED => self.visitor_notice(
                payload,
                NotificationKind::Info,
                "Visitor arrived",
                "has arrived",
            ),
            events::VISITOR_CHECKED_IN => self.visitor_notice(
                payload,
                NotificationKind::Success,
                "Visitor checked in",
                "checked in",
            ),
            events::VISITOR_CHECKED_OUT => self.visitor_notice(
                payload,
                NotificationKind::Info,
                "Visitor checked out",
                "checked out",
            ),
            events::VIP_ARRIVAL => {
                let p: VisitorPayload =
                    serde_json::from_value(payload.clone()).context("malformed VIP payload")?;
                self.sink.push(
                    Notification::new(
                        NotificationKind::Success,
                        "VIP arrival",
                        format!("{} has arrived at reception", p.visitor_name),
                    )
                    .priority(Priority::High),
                );
                Ok(())
            }
            events::UNKNOWN_FACE_DETECTED => {
                self.alert_notice(payload, "Unrecognized person detected", Priority::High, false)
            }
            events::CAPACITY_ALERT => self.capacity_notice(payload),
            events::SECURITY_ALERT => {
                self.alert_notice(payload, "Security alert", Priority::High, false)
            }
            events::EMERGENCY_ALERT => {
                self.alert_notice(payload, "Emergency alert", Priority::Critical, true)
            }
            events::SYSTEM_HEALTH_ALERT => {
                let p: AlertPayload = serde_json::from_value(payload.clone())
                    .context("malformed system health payload")?;
                self.sink.push(
                    Notification::new(
                        NotificationKind::Warning,
                        "System health",
                        if p.description.is_empty() {
                            p.alert_type
                        } else {
                            p.description
                        },
                    )
                    .priority(Priority::Medium),
                );
                Ok(())
            }
            events::BULK_OPERATION_COMPLETED => {
                let p: BulkOperationPayload = serde_json::from_value(payload.clone())
                    .context("malformed bulk-operation payload")?;
                let kind = if p.failed == 0 {
                    NotificationKind::Success
                } else {
                    NotificationKind::Warning
                };
                self.sink.push(Notification::new(
                    kind,
                    "Bulk operation finished",
                    format!("{}: {} succeeded, {} failed", p.operation, p.succeeded, p.failed),
                ));
                Ok(())
            }
            events::AUDIT_LOG_CREATED => {
                let p: AuditPayload =
                    serde_json::from_value(payload.clone()).context("malformed audit payload")?;
                self.sink.push(
                    Notification::new(
                        NotificationKind::Info,
                        "Audit entry",
                        format!("{} by {}", p.action, p.actor),
                    )
                    .priority(Priority::Low)
                    .timeout_ms(3_000),
                );
                Ok(())
            }
            other => anyhow::bail!("unexpected event '{other}' routed to notification handler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> (NotificationHandler, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (sink, rx) = NotificationSink::channel();
        (NotificationHandler::new(sink), rx)
    }

    #[test]
    fn capacity_at_97_is_high_priority() {
        let (h, mut rx) = handler();
        h.handle(
            events::CAPACITY_ALERT,
            &json!({"PercentageFull": 97.0, "CurrentOccupancy": 194, "MaxCapacity": 200}),
            HubName::Operator,
        )
        .unwrap();
        let n = rx.try_recv().unwrap();
        assert_eq!(n.priority, Priority::High);
        assert!(!n.persistent);
    }

    #[test]
    fn capacity_at_60_is_medium_priority() {
        let (h, mut rx) = handler();
        h.handle(
            events::CAPACITY_ALERT,
            &json!({"PercentageFull": 60.0}),
            HubName::Operator,
        )
        .unwrap();
        assert_eq!(rx.try_recv().unwrap().priority, Priority::Medium);
    }

    #[test]
    fn full_building_notice_is_persistent() {
        let (h, mut rx) = handler();
        h.handle(
            events::CAPACITY_ALERT,
            &json!({"PercentageFull": 100.0}),
            HubName::Security,
        )
        .unwrap();
        assert!(rx.try_recv().unwrap().persistent);
    }

    #[test]
    fn emergency_alert_is_critical_and_persistent() {
        let (h, mut rx) = handler();
        h.handle(
            events::EMERGENCY_ALERT,
            &json!({"AlertType": "Fire", "Location": "Lobby"}),
            HubName::Security,
        )
        .unwrap();
        let n = rx.try_recv().unwrap();
        assert_eq!(n.priority, Priority::Critical);
        assert!(n.persistent);
        assert!(n.message.contains("Lobby"));
    }

    #[test]
    fn malformed_capacity_payload_is_an_error_not_a_panic() {
        let (h, mut rx) = handler();
        let result = h.handle(events::CAPACITY_ALERT, &json!("not an object"), HubName::Admin);
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }
}
