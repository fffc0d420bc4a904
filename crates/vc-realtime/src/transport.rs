//! WebSocket transport to the hub endpoints.
//!
//! Dials `{base}/hubs/{name}?fingerprint={fp}` with the session cookie on the
//! upgrade request, then pumps JSON [`WireFrame`]s between the socket and a
//! pair of channels. Connection loss surfaces as the inbound channel closing.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use vc_common::config::RealtimeConfig;
use vc_common::{RealtimeError, RtResult};

use crate::hub::HubName;
use crate::wire::WireFrame;

/// Everything needed to dial one hub.
#[derive(Debug, Clone)]
pub struct DialRequest {
    pub hub: HubName,
    pub url: String,
    pub cookie: String,
}

/// Channel ends of one live hub connection. Dropping `outbound` closes the
/// socket; `inbound` yielding `None` means the connection is gone.
pub struct HubSocket {
    pub outbound: mpsc::Sender<WireFrame>,
    pub inbound: mpsc::Receiver<WireFrame>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: &DialRequest) -> RtResult<HubSocket>;
}

/// Production transport over tokio-tungstenite.
pub struct WsTransport {
    handshake_timeout: Duration,
}

impl WsTransport {
    pub fn new(cfg: &RealtimeConfig) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(cfg.handshake_timeout_secs),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, request: &DialRequest) -> RtResult<HubSocket> {
        let upgrade = build_ws_request(&request.url, &request.cookie)?;

        let (ws_stream, _response) =
            tokio::time::timeout(self.handshake_timeout, connect_async(upgrade))
                .await
                .map_err(|_| {
                    RealtimeError::Handshake(format!(
                        "hub '{}' handshake timed out after {}s",
                        request.hub,
                        self.handshake_timeout.as_secs()
                    ))
                })?
                .map_err(|e| classify_ws_error(request.hub, &e))?;

        debug!(hub = %request.hub, url = %request.url, "hub socket opened");

        let (outbound_tx, outbound_rx) = mpsc::channel::<WireFrame>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<WireFrame>(64);

        tokio::spawn(pump(request.hub, ws_stream, outbound_rx, inbound_tx));

        Ok(HubSocket {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Build the WebSocket upgrade request, carrying credentials in the Cookie
/// header rather than the URL.
fn build_ws_request(ws_url: &str, cookie: &str) -> RtResult<tungstenite::http::Request<()>> {
    let url = url::Url::parse(ws_url)
        .map_err(|e| RealtimeError::Handshake(format!("invalid hub URL '{ws_url}': {e}")))?;

    tungstenite::http::Request::builder()
        .uri(ws_url)
        .header("Cookie", cookie)
        .header("Host", url.host_str().unwrap_or("localhost"))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .body(())
        .map_err(|e| RealtimeError::Handshake(format!("failed to build upgrade request: {e}")))
}

/// Map a tungstenite connect error onto the failure taxonomy so callers can
/// log the right remediation hint.
fn classify_ws_error(hub: HubName, err: &tungstenite::Error) -> RealtimeError {
    if let tungstenite::Error::Http(response) = err {
        return match response.status().as_u16() {
            401 => RealtimeError::Unauthorized(format!(
                "hub '{hub}' rejected the session cookie; sign in again"
            )),
            403 => RealtimeError::Forbidden(format!(
                "hub '{hub}' requires a permission this account does not hold"
            )),
            status => RealtimeError::Handshake(format!("hub '{hub}' returned HTTP {status}")),
        };
    }

    let message = err.to_string();
    if is_blocked_signature(&message) {
        return RealtimeError::TransportBlocked(format!(
            "hub '{hub}' upgrade failed ({message}); a proxy or firewall is likely \
             stripping WebSocket upgrades — allow wss traffic to /hubs/*"
        ));
    }

    RealtimeError::Handshake(format!("hub '{hub}' connect failed: {message}"))
}

/// Failure signatures typical of middleboxes that block WebSocket upgrades.
fn is_blocked_signature(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["connection reset", "broken pipe", "proxy", "upgrade header"]
        .iter()
        .any(|sig| lower.contains(sig))
}

/// Bridge one socket to its channel pair until either side goes away.
async fn pump(
    hub: HubName,
    ws_stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    mut outbound_rx: mpsc::Receiver<WireFrame>,
    inbound_tx: mpsc::Sender<WireFrame>,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(%hub, error = %e, "failed to encode wire frame");
                        continue;
                    }
                };
                if let Err(e) = ws_write.send(tungstenite::Message::Text(text.into())).await {
                    warn!(%hub, error = %e, "hub write failed");
                    break;
                }
            }

            msg = ws_read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!(%hub, error = %e, "hub read failed");
                        break;
                    }
                    None => break,
                };
                match msg {
                    tungstenite::Message::Text(text) => {
                        match serde_json::from_str::<WireFrame>(text.as_ref()) {
                            Ok(frame) => {
                                if inbound_tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(%hub, error = %e, "undecodable hub frame"),
                        }
                    }
                    tungstenite::Message::Ping(data) => {
                        let _ = ws_write.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Close(_) => {
                        debug!(%hub, "hub socket closed by server");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_signatures_are_detected() {
        assert!(is_blocked_signature("Connection reset by peer"));
        assert!(is_blocked_signature("missing Upgrade header in response"));
        assert!(!is_blocked_signature("dns error: no such host"));
    }

    #[test]
    fn http_statuses_classify_by_cause() {
        let resp = tungstenite::http::Response::builder()
            .status(403)
            .body(None)
            .unwrap();
        let err = classify_ws_error(HubName::Security, &tungstenite::Error::Http(resp));
        assert!(matches!(err, RealtimeError::Forbidden(_)));

        let resp = tungstenite::http::Response::builder()
            .status(401)
            .body(None)
            .unwrap();
        let err = classify_ws_error(HubName::Admin, &tungstenite::Error::Http(resp));
        assert!(matches!(err, RealtimeError::Unauthorized(_)));
    }
}
