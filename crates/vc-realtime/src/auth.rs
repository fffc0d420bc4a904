//! Authentication boundary.
//!
//! The real-time layer never owns credentials. It receives a [`UserContext`]
//! at initialization and leans on an [`AuthProvider`] for the pre-flight
//! probe, token refresh before each connect, and the session cookie that
//! rides on the WebSocket upgrade (no bearer token in the URL).

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;
use vc_common::{RealtimeError, RtResult};

/// Role and permission set supplied by the authentication module.
/// Read-only input, used purely to compute the required hub set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub role: String,
    pub permissions: Vec<String>,
}

impl UserContext {
    pub fn new(role: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            role: role.into(),
            permissions,
        }
    }
}

/// Credential operations the connection manager depends on.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Lightweight session check, run once before any hub is opened.
    async fn probe(&self) -> RtResult<()>;

    /// Refresh the session token. Called immediately before every connect
    /// attempt; an expired token is the usual cause of spurious hub failures.
    async fn refresh_token(&self) -> RtResult<()>;

    /// Cookie header value carrying the session credential.
    fn session_cookie(&self) -> String;

    /// Opaque client-identifying token sent with connection and refresh
    /// requests.
    fn device_fingerprint(&self) -> String;
}

/// [`AuthProvider`] backed by the VisitorControl HTTP API.
pub struct HttpAuthProvider {
    http: reqwest::Client,
    base_url: String,
    fingerprint: String,
    session_cookie: Mutex<String>,
}

impl HttpAuthProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            fingerprint: Uuid::new_v4().to_string(),
            session_cookie: Mutex::new(String::new()),
        }
    }

    /// Seed the session cookie from an existing login.
    pub fn with_session_cookie(self, cookie: impl Into<String>) -> Self {
        *self.session_cookie.lock().unwrap() = cookie.into();
        self
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn probe(&self) -> RtResult<()> {
        let resp = self
            .http
            .get(format!("{}/api/auth/session", self.base_url))
            .header(reqwest::header::COOKIE, self.session_cookie())
            .send()
            .await
            .map_err(|e| RealtimeError::AuthProbe(e.to_string()))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(RealtimeError::AuthProbe(
                "session cookie missing or expired".to_string(),
            )),
            s => Err(RealtimeError::AuthProbe(format!(
                "unexpected status {s} from session probe"
            ))),
        }
    }

    async fn refresh_token(&self) -> RtResult<()> {
        let resp = self
            .http
            .post(format!("{}/api/auth/refresh", self.base_url))
            .header(reqwest::header::COOKIE, self.session_cookie())
            .json(&json!({ "fingerprint": self.fingerprint }))
            .send()
            .await
            .map_err(|e| RealtimeError::Unauthorized(format!("token refresh failed: {e}")))?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(RealtimeError::Unauthorized(
                "token refresh rejected; session expired".to_string(),
            ));
        }
        if !resp.status().is_success() {
            return Err(RealtimeError::Server(format!(
                "token refresh returned {}",
                resp.status()
            )));
        }

        // The refreshed credential arrives as a Set-Cookie pair.
        match resp
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
        {
            Some(pair) => {
                *self.session_cookie.lock().unwrap() = pair.to_string();
                debug!("session token refreshed");
            }
            None => warn!("token refresh response carried no Set-Cookie header"),
        }

        Ok(())
    }

    fn session_cookie(&self) -> String {
        self.session_cookie.lock().unwrap().clone()
    }

    fn device_fingerprint(&self) -> String {
        self.fingerprint.clone()
    }
}
