//! Domain event handlers.
//!
//! Each handler owns the event-name → processing map for one functional
//! area. Processing does at most two things: push a structured notification
//! to the global store, and/or hand a normalized payload to local
//! subscribers.

pub mod dashboard;
pub mod notification;

use serde_json::Value;

use crate::hub::HubName;

/// Event names the server pushes. PascalCase matches the backend vocabulary.
pub mod events {
    pub const VISITOR_ARRIVED: &str = "VisitorArrived";
    pub const VISITOR_CHECKED_IN: &str = "VisitorCheckedIn";
    pub const VISITOR_CHECKED_OUT: &str = "VisitorCheckedOut";
    pub const VIP_ARRIVAL: &str = "VipArrival";
    pub const UNKNOWN_FACE_DETECTED: &str = "UnknownFaceDetected";
    pub const CAPACITY_ALERT: &str = "CapacityAlert";
    pub const SECURITY_ALERT: &str = "SecurityAlert";
    pub const EMERGENCY_ALERT: &str = "EmergencyAlert";
    pub const SYSTEM_HEALTH_ALERT: &str = "SystemHealthAlert";
    pub const BULK_OPERATION_COMPLETED: &str = "BulkOperationCompleted";
    pub const AUDIT_LOG_CREATED: &str = "AuditLogCreated";
    pub const DASHBOARD_METRICS_UPDATED: &str = "DashboardMetricsUpdated";
    pub const QUEUE_UPDATED: &str = "QueueUpdated";
    pub const SYSTEM_METRICS_SNAPSHOT: &str = "SystemMetricsSnapshot";
}

pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported_events(&self) -> &'static [&'static str];

    fn supports_event(&self, event: &str) -> bool {
        self.supported_events().contains(&event)
    }

    /// Process one event. Errors are caught and logged at the registry
    /// dispatch boundary; they never reach sibling handlers.
    fn handle(&self, event: &str, payload: &Value, hub: HubName) -> anyhow::Result<()>;
}
