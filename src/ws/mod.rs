//! WebSocket Relay (spec.md §4.5).
//!
//! Bridges a browser-side `axum` WebSocket connection to a target WS server
//! reached through `tokio-tungstenite`, relaying frames both ways under a
//! small JSON envelope protocol. One `HistoryRecord` with `method = "WS"` is
//! written when the session ends, mirroring the one-record-per-exchange
//! discipline `RequestExecutor` uses for plain HTTP calls.

use crate::domain::model::HistoryRecord;
use crate::domain::PersistencePort;
use crate::variables::{resolve, ScopeChain};
use axum::extract::ws::{Message as BrowserMessage, WebSocket};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as TargetMessage;
use tokio_tungstenite::{client_async_tls, MaybeTlsStream, WebSocketStream};

/// Frames queued for the browser leg beyond this count start dropping the
/// oldest entry rather than blocking the target-read loop (spec.md §4.5).
pub const RELAY_QUEUE_CAPACITY: usize = 256;

/// Hard budget for the whole target dial — direct connect, or proxy TCP
/// connect + `CONNECT` handshake + TLS/WS upgrade (spec.md §5: "per-WS-dial
/// 10s").
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientEnvelope {
    Connect {
        url: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
        #[serde(default)]
        proxy_id: Option<i64>,
        #[serde(default)]
        subprotocols: Vec<String>,
    },
    Send {
        payload: String,
        format: Format,
    },
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum Format {
    Text,
    Binary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerEnvelope {
    Connected { url: String, subprotocol: Option<String> },
    Received { payload: String, format: Format, timestamp: i64 },
    Error { message: String, timestamp: i64 },
    Closed { code: u16, reason: String, timestamp: i64 },
}

/// A small MPSC-like queue that drops the oldest item instead of blocking
/// the producer once full: a `VecDeque`-as-queue idiom combined with an
/// `AtomicBool` + `Notify` wakeup pattern for cooperative signalling.
/// Pushing past capacity drops the oldest queued frame and returns `true`
/// so the caller can surface an `error` envelope (spec.md §4.5 backpressure).
struct DropOldestQueue {
    items: Mutex<VecDeque<ServerEnvelope>>,
    notify: Notify,
    closed: AtomicBool,
}

impl DropOldestQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn push(&self, item: ServerEnvelope) -> bool {
        let mut items = self.items.lock().unwrap();
        let dropped = if items.len() >= RELAY_QUEUE_CAPACITY {
            items.pop_front();
            true
        } else {
            false
        };
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
        dropped
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<ServerEnvelope> {
        loop {
            if let Some(item) = self.items.lock().unwrap().pop_front() {
                return Some(item);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }
}

/// Resolves `{{name}}` templates in the connect envelope's URL and header
/// values before dialing the target (spec.md §4.5).
fn resolve_connect_fields(url: &str, headers: &[(String, String)], scope: &ScopeChain) -> (String, Vec<(String, String)>) {
    let resolved_url = resolve(url, scope).text;
    let resolved_headers = headers
        .iter()
        .map(|(k, v)| (k.clone(), resolve(v, scope).text))
        .collect();
    (resolved_url, resolved_headers)
}

async fn resolve_proxy_url(
    persistence: &dyn PersistencePort,
    workspace_id: i64,
    override_id: Option<i64>,
) -> Option<String> {
    if let Some(id) = override_id {
        if let Ok(proxy) = persistence.get_proxy(workspace_id, id).await {
            return Some(proxy.url);
        }
    }
    persistence.get_active_proxy(workspace_id).await.ok().flatten().map(|p| p.url)
}

/// Dials the target WS endpoint directly, or tunnels through an HTTP
/// `CONNECT` proxy when one is selected (spec.md §4.5: "proxy selection
/// uses the same precedence as HTTP"). `tokio-tungstenite` has no built-in
/// proxy support, so the tunnel is a plain `CONNECT host:port` handshake
/// over a raw `TcpStream` before handing the stream to the same
/// `client_async_tls` upgrade `connect_async` performs internally.
async fn dial_target(
    request: http::Request<()>,
    proxy_url: Option<&str>,
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, http::Response<Option<Vec<u8>>>), String> {
    let Some(proxy_url) = proxy_url else {
        return tokio_tungstenite::connect_async(request).await.map_err(|e| e.to_string());
    };

    let target_host = request.uri().host().ok_or("target url has no host")?.to_string();
    let is_tls = request.uri().scheme_str() == Some("wss");
    let target_port = request.uri().port_u16().unwrap_or(if is_tls { 443 } else { 80 });

    let proxy = reqwest::Url::parse(proxy_url).map_err(|e| e.to_string())?;
    let proxy_host = proxy.host_str().ok_or("proxy url has no host")?.to_string();
    let proxy_port = proxy.port_or_known_default().unwrap_or(8080);

    let mut stream = TcpStream::connect((proxy_host.as_str(), proxy_port)).await.map_err(|e| e.to_string())?;
    let connect_request =
        format!("CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n\r\n");
    stream.write_all(connect_request.as_bytes()).await.map_err(|e| e.to_string())?;

    let mut response_bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.map_err(|e| e.to_string())?;
        response_bytes.push(byte[0]);
        if response_bytes.ends_with(b"\r\n\r\n") {
            break;
        }
        if response_bytes.len() > 8192 {
            return Err("proxy CONNECT response too large".to_string());
        }
    }
    let status_line = String::from_utf8_lossy(&response_bytes);
    let ok = status_line.starts_with("HTTP/1.1 200") || status_line.starts_with("HTTP/1.0 200");
    if !ok {
        let first_line = status_line.lines().next().unwrap_or_default().to_string();
        return Err(format!("proxy CONNECT failed: {first_line}"));
    }

    client_async_tls(request, stream).await.map_err(|e| e.to_string())
}

/// Drives one browser↔target relay session end to end. Intended to be
/// spawned from an `axum` `WebSocketUpgrade::on_upgrade` callback.
pub async fn run_relay_session(
    mut socket: WebSocket,
    persistence: &dyn PersistencePort,
    workspace_id: i64,
    scope: &ScopeChain,
) {
    let started = Instant::now();
    let mut frames_sent = 0u64;
    let mut frames_received = 0u64;

    let (raw_url, raw_headers, proxy_id) = match await_connect_envelope(&mut socket).await {
        Ok(triple) => triple,
        Err(message) => {
            send_to_browser(&mut socket, &ServerEnvelope::Error { message: message.clone(), timestamp: now_millis() }).await;
            record_history(persistence, workspace_id, "", started, 0, 0, Some(message)).await;
            return;
        }
    };
    let (url, headers) = resolve_connect_fields(&raw_url, &raw_headers, scope);
    let proxy_url = resolve_proxy_url(persistence, workspace_id, proxy_id).await;

    let mut request = match url.clone().into_client_request() {
        Ok(r) => r,
        Err(e) => {
            let message = format!("invalid target url: {e}");
            send_to_browser(&mut socket, &ServerEnvelope::Error { message: message.clone(), timestamp: now_millis() }).await;
            record_history(persistence, workspace_id, &url, started, 0, 0, Some(message)).await;
            return;
        }
    };
    for (name, value) in &headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            request.headers_mut().insert(name, value);
        }
    }

    let dial_result = match tokio::time::timeout(DIAL_TIMEOUT, dial_target(request, proxy_url.as_deref())).await {
        Ok(result) => result,
        Err(_) => Err(format!("target dial timed out after {}s", DIAL_TIMEOUT.as_secs())),
    };
    let (target_stream, response) = match dial_result {
        Ok(pair) => pair,
        Err(e) => {
            let message = format!("target connect failed: {e}");
            send_to_browser(&mut socket, &ServerEnvelope::Error { message: message.clone(), timestamp: now_millis() }).await;
            record_history(persistence, workspace_id, &url, started, 0, 0, Some(message)).await;
            return;
        }
    };
    let subprotocol = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    send_to_browser(&mut socket, &ServerEnvelope::Connected { url: url.clone(), subprotocol }).await;

    let (mut target_write, mut target_read) = target_stream.split();
    let (mut browser_write, mut browser_read) = socket.split();
    let queue = DropOldestQueue::new();

    let drain_queue = queue.clone();
    let to_browser = tokio::spawn(async move {
        let mut sent = 0u64;
        while let Some(envelope) = drain_queue.pop().await {
            let text = serde_json::to_string(&envelope).unwrap_or_default();
            if browser_write.send(BrowserMessage::Text(text.into())).await.is_err() {
                break;
            }
            sent += 1;
        }
        sent
    });

    let enqueue = queue.clone();
    let from_target = tokio::spawn(async move {
        let mut received = 0u64;
        while let Some(msg) = target_read.next().await {
            let envelope = match msg {
                Ok(TargetMessage::Text(text)) => ServerEnvelope::Received {
                    payload: text.to_string(),
                    format: Format::Text,
                    timestamp: now_millis(),
                },
                Ok(TargetMessage::Binary(bytes)) => ServerEnvelope::Received {
                    payload: base64::engine::general_purpose::STANDARD.encode(&bytes),
                    format: Format::Binary,
                    timestamp: now_millis(),
                },
                Ok(TargetMessage::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1000, String::new()));
                    enqueue.push(ServerEnvelope::Closed { code, reason, timestamp: now_millis() });
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    enqueue.push(ServerEnvelope::Error { message: e.to_string(), timestamp: now_millis() });
                    break;
                }
            };
            received += 1;
            if enqueue.push(envelope) {
                enqueue.push(ServerEnvelope::Error {
                    message: "client-bound queue overflowed; oldest frame dropped".to_string(),
                    timestamp: now_millis(),
                });
            }
        }
        enqueue.close();
        received
    });

    while let Some(Ok(msg)) = browser_read.next().await {
        match msg {
            BrowserMessage::Text(text) => match serde_json::from_str::<ClientEnvelope>(&text) {
                Ok(ClientEnvelope::Send { payload, format }) => {
                    let out = match format {
                        Format::Binary => match base64::engine::general_purpose::STANDARD.decode(&payload) {
                            Ok(bytes) => TargetMessage::Binary(bytes.into()),
                            Err(_) => continue,
                        },
                        Format::Text => TargetMessage::Text(payload.into()),
                    };
                    if target_write.send(out).await.is_err() {
                        break;
                    }
                    frames_sent += 1;
                }
                Ok(ClientEnvelope::Close) => break,
                Ok(ClientEnvelope::Connect { .. }) | Err(_) => continue,
            },
            BrowserMessage::Close(_) => break,
            _ => continue,
        }
    }

    let _ = target_write.close().await;
    let _ = to_browser.await;
    if let Ok(received) = from_target.await {
        frames_received = received;
    }

    record_history(persistence, workspace_id, &url, started, frames_sent, frames_received, None).await;
}

async fn await_connect_envelope(
    socket: &mut WebSocket,
) -> Result<(String, Vec<(String, String)>, Option<i64>), String> {
    loop {
        match socket.recv().await {
            Some(Ok(BrowserMessage::Text(text))) => match serde_json::from_str::<ClientEnvelope>(&text) {
                Ok(ClientEnvelope::Connect { url, headers, proxy_id, .. }) => return Ok((url, headers, proxy_id)),
                Ok(_) => continue,
                Err(e) => return Err(format!("expected a connect envelope: {e}")),
            },
            Some(Ok(BrowserMessage::Close(_))) | None => {
                return Err("connection closed before connect envelope".to_string())
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.to_string()),
        }
    }
}

async fn send_to_browser(socket: &mut WebSocket, envelope: &ServerEnvelope) {
    let text = serde_json::to_string(envelope).unwrap_or_default();
    let _ = socket.send(BrowserMessage::Text(text.into())).await;
}

async fn record_history(
    persistence: &dyn PersistencePort,
    workspace_id: i64,
    url: &str,
    started: Instant,
    frames_sent: u64,
    frames_received: u64,
    error: Option<String>,
) {
    let record = HistoryRecord {
        id: 0,
        workspace_id,
        request_id: None,
        flow_id: None,
        method: "WS".to_string(),
        url: url.to_string(),
        request_headers: serde_json::Value::Null,
        request_body: String::new(),
        status_code: None,
        response_headers: serde_json::json!({
            "framesSent": frames_sent,
            "framesReceived": frames_received,
        }),
        response_body: String::new(),
        duration_ms: started.elapsed().as_millis() as i64,
        error,
        body_size: 0,
        is_binary: false,
        created_at: chrono::Utc::now(),
    };
    if let Err(e) = persistence.record_history(record).await {
        tracing::warn!(error = %e, "failed to record websocket session history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drop_oldest_queue_evicts_the_oldest_entry_when_full() {
        let queue = DropOldestQueue::new();
        for i in 0..RELAY_QUEUE_CAPACITY + 1 {
            queue.push(ServerEnvelope::Received {
                payload: i.to_string(),
                format: Format::Text,
                timestamp: 0,
            });
        }
        let first = queue.pop().await.unwrap();
        match first {
            ServerEnvelope::Received { payload, .. } => assert_eq!(payload, "1"),
            _ => panic!("expected a Received envelope"),
        }
    }

    #[tokio::test]
    async fn drop_oldest_queue_reports_when_it_evicted() {
        let queue = DropOldestQueue::new();
        for i in 0..RELAY_QUEUE_CAPACITY {
            assert!(!queue.push(ServerEnvelope::Received {
                payload: i.to_string(),
                format: Format::Text,
                timestamp: 0,
            }));
        }
        assert!(queue.push(ServerEnvelope::Received { payload: "overflow".into(), format: Format::Text, timestamp: 0 }));
    }

    #[tokio::test]
    async fn drop_oldest_queue_returns_none_once_closed_and_drained() {
        let queue = DropOldestQueue::new();
        queue.push(ServerEnvelope::Connected { url: "wss://x".into(), subprotocol: None });
        queue.close();
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[test]
    fn connect_envelope_parses_with_default_headers() {
        let json = r#"{"type":"connect","url":"wss://example.invalid/socket"}"#;
        let envelope: ClientEnvelope = serde_json::from_str(json).unwrap();
        match envelope {
            ClientEnvelope::Connect { url, headers, proxy_id, subprotocols } => {
                assert_eq!(url, "wss://example.invalid/socket");
                assert!(headers.is_empty());
                assert!(proxy_id.is_none());
                assert!(subprotocols.is_empty());
            }
            _ => panic!("expected a connect envelope"),
        }
    }

    #[test]
    fn send_envelope_requires_a_format() {
        let json = r#"{"type":"send","payload":"hi","format":"text"}"#;
        let envelope: ClientEnvelope = serde_json::from_str(json).unwrap();
        assert!(matches!(envelope, ClientEnvelope::Send { format: Format::Text, .. }));
    }

    #[test]
    fn resolve_connect_fields_substitutes_url_and_headers() {
        let mut scope = ScopeChain::default();
        scope.runtime.insert("host".to_string(), "echo.example.invalid".to_string());
        let (url, headers) = resolve_connect_fields(
            "wss://{{host}}/socket",
            &[("X-Token".to_string(), "{{host}}-token".to_string())],
            &scope,
        );
        assert_eq!(url, "wss://echo.example.invalid/socket");
        assert_eq!(headers[0].1, "echo.example.invalid-token");
    }
}
