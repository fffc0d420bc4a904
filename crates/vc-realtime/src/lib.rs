//! # vc-realtime
//!
//! Real-time client subsystem for VisitorControl: opens one authenticated
//! WebSocket hub per role area ("operator", "host", "security", "admin"),
//! keeps each hub alive through reconnects, routes inbound events to domain
//! handlers, and exposes an RPC-style invocation surface.
//!
//! The public surface consumers touch is [`RealtimeClient`]; everything else
//! is plumbing behind it.

pub mod auth;
pub mod client;
pub mod handlers;
pub mod hub;
pub mod manager;
pub mod notify;
pub mod registry;
pub mod task;
pub mod transport;
pub mod wire;

pub use auth::{AuthProvider, HttpAuthProvider, UserContext};
pub use client::RealtimeClient;
pub use handlers::dashboard::{DashboardHandler, DashboardSubscription, DashboardUpdate};
pub use handlers::notification::NotificationHandler;
pub use handlers::EventHandler;
pub use hub::{required_hubs, HubName, HubState};
pub use manager::{ConnectionHealth, ConnectionManager};
pub use notify::{Notification, NotificationKind, NotificationSink, Priority};
pub use registry::EventRegistry;
pub use transport::{Transport, WsTransport};
