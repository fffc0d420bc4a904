//! # vc-common
//!
//! Shared configuration and error types for VisitorControl clients.

pub mod config;
pub mod error;

pub use config::AppConfig;
pub use error::{RealtimeError, RtResult};
