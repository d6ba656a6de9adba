//! The `http_request`/`check_headers` tool primitives shared by every agent.
//!
//! Requests never raise: connection/timeout/other failures are folded into
//! an `{error, url, message}` JSON object so the agent loop can hand the
//! result straight back to the model as a tool response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Value};
use vibecheck_tunnel::{TunnelManager, TunnelMessage};

const BODY_PREVIEW_LIMIT: usize = 2000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const EXPECTED_SECURITY_HEADERS: &[&str] = &[
    "x-content-type-options",
    "x-frame-options",
    "strict-transport-security",
    "content-security-policy",
    "referrer-policy",
    "permissions-policy",
];

const DISCLOSING_SOFTWARE: &[&str] =
    &["apache", "nginx", "express", "flask", "werkzeug", "gunicorn", "php"];

/// Issue a single probe against `{target_url}{path}`. Always returns a JSON
/// object: success as `{status_code, headers, body_preview, url}`, failure as
/// `{error, url, message}`.
pub async fn http_request(
    target_url: &str,
    method: &str,
    path: &str,
    headers: Option<&HashMap<String, String>>,
    body: Option<&str>,
) -> Value {
    let url = format!("{}{}", target_url.trim_end_matches('/'), path);

    let client = match reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(DEFAULT_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            return json!({"error": "request_failed", "url": url, "message": err.to_string()});
        }
    };

    let parsed_method = Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET);
    let mut request = client.request(parsed_method, &url);
    if let Some(headers) = headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    if let Some(body) = body {
        request = request.body(body.to_string());
    }

    match request.send().await {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();
            let text = response.text().await.unwrap_or_default();
            let body_preview: String = text.chars().take(BODY_PREVIEW_LIMIT).collect();

            json!({
                "status_code": status_code,
                "headers": headers,
                "body_preview": body_preview,
                "url": url,
            })
        }
        Err(err) if err.is_timeout() => {
            json!({"error": "timeout", "url": url, "message": format!("Timed out after {:?}", DEFAULT_TIMEOUT)})
        }
        Err(err) if err.is_connect() => {
            json!({"error": "connection_failed", "url": url, "message": format!("Could not connect to {url}: {err}")})
        }
        Err(err) => {
            json!({"error": "request_failed", "url": url, "message": err.to_string()})
        }
    }
}

/// Where an agent's HTTP probes actually go: straight to `target_url`, or
/// relayed through a connected tunnel session when the target is only
/// reachable from the end user's machine.
#[derive(Clone)]
pub enum Prober {
    /// Probe `target_url` directly over the network.
    Direct,
    /// Proxy the request through `manager` for `session_id`.
    Tunnel {
        /// Multiplexer holding the live tunnel connections.
        manager: Arc<TunnelManager>,
        /// Session to route this probe through.
        session_id: String,
    },
}

impl Prober {
    /// Issue one probe, dispatching to direct or tunneled transport.
    pub async fn request(
        &self,
        target_url: &str,
        method: &str,
        path: &str,
        headers: Option<&HashMap<String, String>>,
        body: Option<&str>,
    ) -> Value {
        match self {
            Prober::Direct => http_request(target_url, method, path, headers, body).await,
            Prober::Tunnel { manager, session_id } => {
                tunnel_request(manager, session_id, method, path, headers, body).await
            }
        }
    }

    /// HEAD-probe `path` and classify its security headers, via whichever
    /// transport this prober is configured for.
    pub async fn check_headers(&self, target_url: &str, path: &str) -> Value {
        check_security_headers(self, target_url, path).await
    }
}

/// Relay a probe through an open tunnel session, folding connection/timeout
/// failures into the same `{error, url, message}` shape [`http_request`]
/// uses so the agent loop never has to distinguish the two transports.
async fn tunnel_request(
    manager: &TunnelManager,
    session_id: &str,
    method: &str,
    path: &str,
    headers: Option<&HashMap<String, String>>,
    body: Option<&str>,
) -> Value {
    let url = format!("tunnel://{session_id}{path}");
    let headers = headers.cloned().unwrap_or_default();
    let body = body.map(|s| s.to_string());

    match manager.proxy_request(session_id, method, path, headers, body).await {
        Ok(TunnelMessage::HttpResponse { status, headers, body, .. }) => {
            let body_text = body.unwrap_or_default();
            let body_preview: String = body_text.chars().take(BODY_PREVIEW_LIMIT).collect();
            json!({
                "status_code": status,
                "headers": headers,
                "body_preview": body_preview,
                "url": url,
            })
        }
        Ok(_) => json!({"error": "request_failed", "url": url, "message": "unexpected tunnel reply"}),
        Err(err) => json!({"error": "connection_failed", "url": url, "message": err.to_string()}),
    }
}

/// HEAD-probe `path` and classify the security-relevant response headers:
/// which of the expected hardening headers are missing, and any issues
/// (CORS wildcard, `X-Powered-By` disclosure, `Server` software disclosure).
pub async fn check_security_headers(prober: &Prober, target_url: &str, path: &str) -> Value {
    let result = prober.request(target_url, "HEAD", path, None, None).await;
    if result.get("error").is_some() {
        return result;
    }

    let headers = result
        .get("headers")
        .and_then(|h| h.as_object())
        .cloned()
        .unwrap_or_default();
    let headers_lower: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str().unwrap_or_default().to_string()))
        .collect();

    let missing: Vec<&str> = EXPECTED_SECURITY_HEADERS
        .iter()
        .filter(|h| !headers_lower.contains_key(**h))
        .copied()
        .collect();

    let mut issues = Vec::new();

    if headers_lower.get("access-control-allow-origin").map(String::as_str) == Some("*") {
        issues.push("CORS allows all origins (wildcard *)".to_string());
    }

    if let Some(powered_by) = headers_lower.get("x-powered-by") {
        if !powered_by.is_empty() {
            issues.push(format!("X-Powered-By exposes technology: {powered_by}"));
        }
    }

    if let Some(server) = headers_lower.get("server") {
        let server_lower = server.to_ascii_lowercase();
        if DISCLOSING_SOFTWARE.iter().any(|v| server_lower.contains(v)) {
            issues.push(format!("Server header discloses software: {server}"));
        }
    }

    if !missing.is_empty() {
        issues.push(format!("Missing security headers: {}", missing.join(", ")));
    }

    json!({
        "headers": headers,
        "missing_security_headers": missing,
        "issues": issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn http_request_returns_status_and_body_preview() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/hello")
            .with_status(200)
            .with_body("world")
            .create_async()
            .await;

        let result = http_request(&server.url(), "GET", "/hello", None, None).await;
        assert_eq!(result["status_code"], 200);
        assert_eq!(result["body_preview"], "world");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_request_reports_connection_failure() {
        let result = http_request("http://127.0.0.1:1", "GET", "/", None, None).await;
        assert_eq!(result["error"], "connection_failed");
    }

    #[tokio::test]
    async fn check_security_headers_flags_wildcard_cors_and_missing_headers() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("HEAD", "/")
            .with_status(200)
            .with_header("access-control-allow-origin", "*")
            .with_header("server", "nginx/1.18.0")
            .create_async()
            .await;

        let result = check_security_headers(&Prober::Direct, &server.url(), "/").await;
        let issues = result["issues"].as_array().expect("issues array");
        assert!(issues.iter().any(|i| i.as_str().unwrap().contains("CORS allows all origins")));
        assert!(issues.iter().any(|i| i.as_str().unwrap().contains("discloses software")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn tunnel_prober_reports_connection_failure_for_unregistered_session() {
        let manager = Arc::new(TunnelManager::new());
        let prober = Prober::Tunnel { manager, session_id: "tun_missing".to_string() };

        let result = prober.request("http://ignored", "GET", "/", None, None).await;
        assert_eq!(result["error"], "connection_failed");
        assert_eq!(result["url"], "tunnel://tun_missing/");
    }
}
