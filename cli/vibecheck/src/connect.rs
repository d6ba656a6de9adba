//! `vibecheck connect <port>`: the tunnel client. Opens a WebSocket to a
//! running tunnel server, announces the local port it forwards, and relays
//! every inbound `http_request` to `http://localhost:<port>`, returning the
//! local response as an `http_response`. Exits when the server closes the
//! channel.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use vibecheck_tunnel::TunnelMessage;

/// Forwarded response bodies are capped to this many characters before being
/// sent back over the tunnel.
const FORWARDED_BODY_LIMIT: usize = 5000;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub async fn run(port: u16, server: &str) -> Result<()> {
    info!(%server, port, "connecting tunnel");
    let (ws_stream, _) = tokio_tungstenite::connect_async(server)
        .await
        .with_context(|| format!("failed to connect to tunnel server at {server}"))?;
    println!(
        "{} tunnel connected, forwarding to {}",
        style("\u{2713}").green(),
        style(format!("http://localhost:{port}")).bold()
    );

    let (mut write, mut read) = ws_stream.split();

    let connect_msg = TunnelMessage::Connect { target_port: port };
    send(&mut write, &connect_msg).await.context("failed to send connect message")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build local HTTP client")?;

    while let Some(message) = read.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "tunnel read error, closing");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let parsed: TunnelMessage = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!(error = %err, "ignoring malformed tunnel message");
                        continue;
                    }
                };
                handle_message(parsed, port, &http, &mut write).await?;
            }
            Message::Ping(payload) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => {
                info!("tunnel server closed the channel");
                break;
            }
            _ => {}
        }
    }

    println!("{} tunnel closed", style("\u{b7}").dim());
    Ok(())
}

async fn handle_message(
    message: TunnelMessage,
    port: u16,
    http: &reqwest::Client,
    write: &mut WsWriter,
) -> Result<()> {
    match message {
        TunnelMessage::HttpRequest { request_id, method, path, headers, body } => {
            debug!(request_id = %request_id, method = %method, path = %path, "forwarding to local target");
            let reply = match forward_request(http, port, &method, &path, &headers, body.as_deref()).await {
                Ok((status, headers, body)) => {
                    TunnelMessage::HttpResponse { request_id, status, headers, body: Some(body) }
                }
                Err(err) => {
                    warn!(request_id = %request_id, error = %err, "local forward failed");
                    TunnelMessage::HttpResponse {
                        request_id,
                        status: 502,
                        headers: HashMap::new(),
                        body: Some(format!("{{\"error\":\"local_forward_failed\",\"message\":\"{err}\"}}")),
                    }
                }
            };
            send(write, &reply).await?;
        }
        TunnelMessage::Ping => {
            send(write, &TunnelMessage::Pong).await?;
        }
        other => {
            debug!(?other, "ignoring message the client never needs to answer");
        }
    }
    Ok(())
}

async fn send(write: &mut WsWriter, message: &TunnelMessage) -> Result<()> {
    let payload = serde_json::to_string(message).context("failed to encode tunnel message")?;
    write.send(Message::Text(payload.into())).await.context("failed to write to tunnel socket")
}

async fn forward_request(
    http: &reqwest::Client,
    port: u16,
    method: &str,
    path: &str,
    headers: &HashMap<String, String>,
    body: Option<&str>,
) -> Result<(u16, HashMap<String, String>, String)> {
    let url = format!("http://localhost:{port}{path}");
    let method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut request = http.request(method, &url);
    for (name, value) in headers {
        request = request.header(name, value);
    }
    if let Some(body) = body {
        request = request.body(body.to_string());
    }

    let response = request.send().await.with_context(|| format!("request to {url} failed"))?;
    let status = response.status().as_u16();
    let response_headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect();
    let text = response.text().await.unwrap_or_default();
    let truncated: String = text.chars().take(FORWARDED_BODY_LIMIT).collect();
    Ok((status, response_headers, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_body_is_truncated_to_the_cap() {
        let oversized = "x".repeat(FORWARDED_BODY_LIMIT + 500);
        let truncated: String = oversized.chars().take(FORWARDED_BODY_LIMIT).collect();
        assert_eq!(truncated.len(), FORWARDED_BODY_LIMIT);
    }
}
