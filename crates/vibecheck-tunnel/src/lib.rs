//! WebSocket tunnel multiplexer used by robust-mode agents to reach a target
//! that only the end user's machine can see. A lightweight client process on
//! the user's side opens a single WebSocket to the server and relays HTTP
//! traffic for one local port over it; [`TunnelManager`] multiplexes requests
//! from many concurrent agent probes across that one connection.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, warn};
use vibecheck_core::coordinator::TunnelLiveness;
use vibecheck_core::{generate_id, Result, VibeCheckError};

/// Messages exchanged over the tunnel WebSocket, tagged by `type` to match
/// the wire format the client process speaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelMessage {
    /// Sent by the client immediately after connecting.
    Connect {
        /// Local port the client is forwarding.
        target_port: u16,
    },
    /// Sent by the server: proxy this HTTP request to the local target.
    HttpRequest {
        /// Correlates the eventual `http_response`.
        request_id: String,
        /// HTTP method, e.g. `"GET"`.
        method: String,
        /// Request path including query string.
        path: String,
        /// Request headers.
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Request body, if any.
        #[serde(default)]
        body: Option<String>,
    },
    /// Sent by the client: the local target's response to an `http_request`.
    HttpResponse {
        /// Matches the `request_id` of the originating `http_request`.
        request_id: String,
        /// HTTP status code returned by the local target.
        status: u16,
        /// Response headers.
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Response body, if any.
        #[serde(default)]
        body: Option<String>,
    },
    /// Server-initiated keepalive.
    Ping,
    /// Client's reply to a `ping`.
    Pong,
}

/// Outcome of handling an inbound [`TunnelMessage`], telling the caller what
/// durable state (if any) needs updating.
#[derive(Debug)]
pub enum HandleOutcome {
    /// An `http_response` was matched to a pending request and delivered.
    ResponseDelivered,
    /// A `pong` arrived; the caller should bump the session's heartbeat.
    Heartbeat {
        /// Session that sent the heartbeat.
        session_id: String,
    },
    /// Message required no action (e.g. a stray `connect`/`http_request` from
    /// the client, which never originates those types).
    Ignored,
}

const PROXY_TIMEOUT: Duration = Duration::from_secs(15);

/// Multiplexes HTTP probes from concurrently running agents across the
/// single WebSocket connection each tunnel session holds open.
#[derive(Default, Clone)]
pub struct TunnelManager {
    active_connections: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<TunnelMessage>>>>,
    pending_requests: Arc<Mutex<HashMap<String, oneshot::Sender<TunnelMessage>>>>,
}

impl TunnelManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly connected session under `session_id`. The caller
    /// owns persisting the [`vibecheck_core::TunnelSession`] row and is
    /// expected to have already minted `session_id` via [`generate_id`].
    pub async fn register(&self, session_id: String, outbound: mpsc::UnboundedSender<TunnelMessage>) {
        debug!(session_id = %session_id, "tunnel session registered");
        self.active_connections.write().await.insert(session_id, outbound);
    }

    /// Drop a session's connection. Idempotent.
    pub async fn unregister(&self, session_id: &str) {
        self.active_connections.write().await.remove(session_id);
        debug!(session_id, "tunnel session unregistered");
    }

    /// True if a live WebSocket is currently registered for `session_id`.
    pub async fn is_connected(&self, session_id: &str) -> bool {
        self.active_connections.read().await.contains_key(session_id)
    }

    /// Forward an HTTP request to the target behind `session_id` and await
    /// its response, failing after [`PROXY_TIMEOUT`] if the client never
    /// answers.
    pub async fn proxy_request(
        &self,
        session_id: &str,
        method: &str,
        path: &str,
        headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Result<TunnelMessage> {
        let outbound = {
            let connections = self.active_connections.read().await;
            connections.get(session_id).cloned()
        };
        let Some(outbound) = outbound else {
            return Err(VibeCheckError::Tunnel {
                code: "TUNNEL_NOT_CONNECTED",
                message: format!("tunnel session '{session_id}' is not connected"),
            });
        };

        let request_id = generate_id("req");
        let (tx, rx) = oneshot::channel();
        self.pending_requests.lock().await.insert(request_id.clone(), tx);

        let sent = outbound.send(TunnelMessage::HttpRequest {
            request_id: request_id.clone(),
            method: method.to_string(),
            path: path.to_string(),
            headers,
            body,
        });
        if sent.is_err() {
            self.pending_requests.lock().await.remove(&request_id);
            return Err(VibeCheckError::Tunnel {
                code: "TUNNEL_NOT_CONNECTED",
                message: format!("tunnel session '{session_id}' dropped before send"),
            });
        }

        let result = tokio::time::timeout(PROXY_TIMEOUT, rx).await;
        self.pending_requests.lock().await.remove(&request_id);

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => {
                warn!(session_id, request_id, "tunnel proxy request timed out");
                Err(VibeCheckError::Tunnel {
                    code: "TARGET_UNREACHABLE",
                    message: format!("target behind tunnel '{session_id}' did not respond in time"),
                })
            }
        }
    }

    /// Route an inbound message read off a session's WebSocket.
    pub async fn handle_message(&self, session_id: &str, message: TunnelMessage) -> HandleOutcome {
        match message {
            TunnelMessage::HttpResponse { ref request_id, .. } => {
                let sender = self.pending_requests.lock().await.remove(request_id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(message);
                        HandleOutcome::ResponseDelivered
                    }
                    None => {
                        debug!(request_id, "http_response for unknown/expired request");
                        HandleOutcome::Ignored
                    }
                }
            }
            TunnelMessage::Pong => HandleOutcome::Heartbeat {
                session_id: session_id.to_string(),
            },
            TunnelMessage::Connect { .. } | TunnelMessage::HttpRequest { .. } | TunnelMessage::Ping => {
                HandleOutcome::Ignored
            }
        }
    }
}

impl TunnelLiveness for TunnelManager {
    fn is_connected(&self, tunnel_session_id: &str) -> bool {
        // The coordinator calls this from synchronous code paths, so we can't
        // await the RwLock here. A brief false negative under contention just
        // means the caller sees a momentarily-stale "not connected", which it
        // already handles by returning TUNNEL_NOT_CONNECTED.
        self.active_connections
            .try_read()
            .map(|connections| connections.contains_key(tunnel_session_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_is_connected() {
        let manager = TunnelManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        manager.register("sess_1".to_string(), tx).await;
        assert!(manager.is_connected("sess_1").await);
    }

    #[tokio::test]
    async fn unregister_drops_connection() {
        let manager = TunnelManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        manager.register("sess_1".to_string(), tx).await;
        manager.unregister("sess_1").await;
        assert!(!manager.is_connected("sess_1").await);
    }

    #[tokio::test]
    async fn proxy_request_without_connection_errors() {
        let manager = TunnelManager::new();
        let result = manager
            .proxy_request("missing", "GET", "/", HashMap::new(), None)
            .await;
        assert!(matches!(
            result,
            Err(VibeCheckError::Tunnel { code: "TUNNEL_NOT_CONNECTED", .. })
        ));
    }

    #[tokio::test]
    async fn proxy_request_resolves_on_matching_response() {
        let manager = TunnelManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.register("sess_1".to_string(), tx).await;

        let manager_clone = manager.clone();
        let responder = tokio::spawn(async move {
            let Some(TunnelMessage::HttpRequest { request_id, .. }) = rx.recv().await else {
                panic!("expected http_request");
            };
            manager_clone
                .handle_message(
                    "sess_1",
                    TunnelMessage::HttpResponse {
                        request_id,
                        status: 200,
                        headers: HashMap::new(),
                        body: Some("ok".to_string()),
                    },
                )
                .await;
        });

        let response = manager
            .proxy_request("sess_1", "GET", "/health", HashMap::new(), None)
            .await
            .expect("response expected");
        responder.await.expect("responder task panicked");

        match response {
            TunnelMessage::HttpResponse { status, body, .. } => {
                assert_eq!(status, 200);
                assert_eq!(body.as_deref(), Some("ok"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pong_reports_heartbeat_outcome() {
        let manager = TunnelManager::new();
        let outcome = manager.handle_message("sess_1", TunnelMessage::Pong).await;
        assert!(matches!(outcome, HandleOutcome::Heartbeat { session_id } if session_id == "sess_1"));
    }

    #[tokio::test]
    async fn tunnel_liveness_impl_matches_registration_state() {
        let manager = TunnelManager::new();
        assert!(!TunnelLiveness::is_connected(&manager, "sess_1"));

        let (tx, _rx) = mpsc::unbounded_channel();
        manager.register("sess_1".to_string(), tx).await;
        assert!(TunnelLiveness::is_connected(&manager, "sess_1"));

        manager.unregister("sess_1").await;
        assert!(!TunnelLiveness::is_connected(&manager, "sess_1"));
    }
}
