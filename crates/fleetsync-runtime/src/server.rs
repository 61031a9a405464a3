//! TCP JSON-RPC server: newline-delimited JSON, several requests per
//! connection, one response line per request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use fleetsync_core::FleetError;
use fleetsync_core::error::codes;
use fleetsync_core::protocol::{AdminAuth, EndSessionRequest, methods};
use fleetsync_sync::SyncHandler;

/// Default maximum number of concurrent client connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Default time a connection may wait for its next request line.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest accepted request line, newline included.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// JSON-RPC envelopes
// ---------------------------------------------------------------------------

fn default_jsonrpc() -> String {
    "2.0".to_owned()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn success(id: Option<u64>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<u64>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

impl From<FleetError> for JsonRpcError {
    fn from(e: FleetError) -> Self {
        Self {
            code: e.rpc_code(),
            message: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// RpcServer
// ---------------------------------------------------------------------------

pub struct RpcServer {
    addr: SocketAddr,
    handler: SyncHandler,
    cancel: CancellationToken,
    max_connections: usize,
    idle_timeout: Duration,
}

impl RpcServer {
    pub fn new(addr: SocketAddr, handler: SyncHandler, cancel: CancellationToken) -> Self {
        Self {
            addr,
            handler,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Close connections that send nothing for this long.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Bind to the configured address and return the actual local address.
    /// Binding to port 0 yields an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "rpc server listening");
        Ok((listener, local_addr))
    }

    /// Accept loop on a pre-bound listener, until the cancellation token fires.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                                tracing::warn!(
                                    peer = %peer,
                                    max = self.max_connections,
                                    "connection limit reached, rejecting"
                                );
                                drop(stream);
                                continue;
                            };
                            let handler = self.handler.clone();
                            let cancel = self.cancel.clone();
                            let idle_timeout = self.idle_timeout;
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, peer, handler, cancel, idle_timeout).await {
                                    tracing::debug!(peer = %peer, error = %e, "connection finished with error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("rpc server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: SyncHandler,
    cancel: CancellationToken,
    idle_timeout: Duration,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_REQUEST_BYTES as u64);
        let next_line = limited.read_line(&mut line);
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = tokio::time::timeout(idle_timeout, next_line) => match read {
                Ok(read) => read?,
                Err(_) => {
                    tracing::debug!(peer = %peer, "idle connection closed");
                    return Ok(());
                }
            },
        };
        if read == 0 {
            return Ok(());
        }
        if read >= MAX_REQUEST_BYTES && !line.ends_with('\n') {
            tracing::warn!(peer = %peer, limit = MAX_REQUEST_BYTES, "request line too large, closing");
            let response = JsonRpcResponse::failure(
                None,
                codes::PARSE_ERROR,
                format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
            );
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(line.trim()) {
            Ok(req) => dispatch(&handler, req, Some(peer)).await,
            Err(e) => JsonRpcResponse::failure(None, codes::PARSE_ERROR, format!("parse error: {e}")),
        };

        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
    }
}

/// Route one request to the handler. Never fails: every error becomes a
/// JSON-RPC error object.
pub async fn dispatch(
    handler: &SyncHandler,
    req: JsonRpcRequest,
    peer: Option<SocketAddr>,
) -> JsonRpcResponse {
    let id = req.id;
    match route(handler, &req.method, req.params, peer).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(e) => {
            tracing::debug!(method = %req.method, code = e.code, error = %e.message, "request failed");
            JsonRpcResponse::failure(id, e.code, e.message)
        }
    }
}

async fn route(
    handler: &SyncHandler,
    method: &str,
    params: serde_json::Value,
    peer: Option<SocketAddr>,
) -> Result<serde_json::Value, JsonRpcError> {
    match method {
        methods::HEARTBEAT => {
            let req = parse_params(params)?;
            let source = peer.map(|p| p.ip().to_string());
            to_result(handler.heartbeat(req, source).await?)
        }
        methods::SESSION_END => {
            let req: EndSessionRequest = parse_params(params)?;
            to_result(handler.end_session(&req.client_id).await)
        }
        methods::CONFIG_PUBLIC => to_result(handler.public_config().await),
        methods::ADMIN_MODULE_TOGGLE => to_result(handler.toggle_module(parse_params(params)?).await?),
        methods::ADMIN_MODULES_BULK => {
            to_result(handler.bulk_update_modules(parse_params(params)?).await?)
        }
        methods::ADMIN_MAINTENANCE => {
            to_result(handler.toggle_maintenance(parse_params(params)?).await?)
        }
        methods::ADMIN_CONFIG => {
            let auth: AdminAuth = parse_params(params)?;
            to_result(handler.current_config(&auth).await?)
        }
        methods::SESSIONS_STATS => {
            let auth: AdminAuth = parse_params(params)?;
            to_result(handler.stats(&auth).await?)
        }
        methods::SESSIONS_ACTIVE => {
            let auth: AdminAuth = parse_params(params)?;
            to_result(handler.active_sessions(&auth).await?)
        }
        _ => Err(JsonRpcError {
            code: codes::METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
        }),
    }
}

/// Absent params deserialize like an empty object.
fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, JsonRpcError> {
    let params = if params.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| JsonRpcError {
        code: codes::INVALID_PARAMS,
        message: format!("invalid params: {e}"),
    })
}

fn to_result<T: Serialize>(value: T) -> Result<serde_json::Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError {
        code: codes::INTERNAL_ERROR,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsync_config::ConfigStore;
    use fleetsync_registry::SessionRegistry;
    use serde_json::json;

    const TOKEN: &str = "s3cret";

    fn handler() -> SyncHandler {
        SyncHandler::new(SessionRegistry::new(), ConfigStore::default(), TOKEN)
    }

    async fn call(h: &SyncHandler, method: &str, params: serde_json::Value) -> JsonRpcResponse {
        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(1),
            method: method.into(),
            params,
        };
        dispatch(h, req, Some(SocketAddr::from(([10, 0, 0, 7], 50000)))).await
    }

    fn error_code(resp: &JsonRpcResponse) -> Option<i32> {
        resp.error.as_ref().map(|e| e.code)
    }

    // ── dispatch ────────────────────────────────────────────────────

    #[tokio::test]
    async fn heartbeat_records_peer_address() {
        let h = handler();
        let resp = call(
            &h,
            methods::HEARTBEAT,
            json!({"clientId": "kiosk-1", "clientType": "kiosk", "lastConfigVersion": 0}),
        )
        .await;
        let result = resp.result.expect("result");
        assert_eq!(result["configUpdate"]["required"], json!(true));
        assert_eq!(result["configUpdate"]["newVersion"], json!(1));
        assert_eq!(result["activeSessions"]["total"], json!(1));

        let registry = h.registry();
        let reg = registry.lock().await;
        let session = reg.get("kiosk-1").expect("registered");
        assert_eq!(session.source_address.as_deref(), Some("10.0.0.7"));
    }

    #[tokio::test]
    async fn heartbeat_without_client_id_is_invalid_params() {
        let resp = call(&handler(), methods::HEARTBEAT, json!({"clientType": "kiosk"})).await;
        assert_eq!(error_code(&resp), Some(codes::INVALID_PARAMS));
        assert!(resp.result.is_none());
    }

    #[tokio::test]
    async fn end_session_is_ok_for_unknown_client() {
        let resp = call(&handler(), methods::SESSION_END, json!({"clientId": "ghost"})).await;
        assert_eq!(resp.result.expect("result"), json!({"ok": true, "removed": false}));
    }

    #[tokio::test]
    async fn public_config_needs_no_params() {
        let resp = call(&handler(), methods::CONFIG_PUBLIC, serde_json::Value::Null).await;
        assert_eq!(
            resp.result.expect("result")["maintenanceMode"]["enabled"],
            json!(false)
        );
    }

    #[tokio::test]
    async fn admin_methods_map_errors_to_codes() {
        let h = handler();
        let bad_token = call(
            &h,
            methods::ADMIN_MODULE_TOGGLE,
            json!({"token": "nope", "moduleKey": "news", "enabled": false}),
        )
        .await;
        assert_eq!(error_code(&bad_token), Some(codes::UNAUTHORIZED));

        let unknown = call(
            &h,
            methods::ADMIN_MODULE_TOGGLE,
            json!({"token": TOKEN, "moduleKey": "weather", "enabled": true}),
        )
        .await;
        assert_eq!(error_code(&unknown), Some(codes::UNKNOWN_MODULE));

        let stats = call(&h, methods::SESSIONS_STATS, json!({})).await;
        assert_eq!(error_code(&stats), Some(codes::UNAUTHORIZED));

        assert_eq!(h.config_version().await, 1);
    }

    #[tokio::test]
    async fn module_toggle_returns_version_and_message() {
        let h = handler();
        let resp = call(
            &h,
            methods::ADMIN_MODULE_TOGGLE,
            json!({"token": TOKEN, "actor": "alice", "moduleKey": "news", "enabled": false}),
        )
        .await;
        let result = resp.result.expect("result");
        assert_eq!(result["version"], json!(2));
        assert_eq!(result["message"], json!("Module 'news' disabled"));
        assert_eq!(result["notifiedSessions"], json!(0));

        let cfg = call(&h, methods::ADMIN_CONFIG, json!({"token": TOKEN})).await;
        let cfg = cfg.result.expect("result");
        assert_eq!(cfg["updatedBy"], json!("alice"));
        assert_eq!(cfg["snapshot"]["modules"]["news"]["enabled"], json!(false));
    }

    #[tokio::test]
    async fn unknown_method_and_bad_params() {
        let h = handler();
        let resp = call(&h, "admin.reboot", json!({})).await;
        assert_eq!(error_code(&resp), Some(codes::METHOD_NOT_FOUND));
        assert_eq!(resp.id, Some(1));

        let resp = call(&h, methods::ADMIN_MAINTENANCE, json!({"token": TOKEN, "enabled": "yes"})).await;
        assert_eq!(error_code(&resp), Some(codes::INVALID_PARAMS));
    }

    // ── socket ──────────────────────────────────────────────────────

    async fn start() -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let server = RpcServer::new(SocketAddr::from(([127, 0, 0, 1], 0)), handler(), cancel.clone());
        let (listener, addr) = server.bind().await.expect("bind");
        let task = tokio::spawn(async move {
            server.serve(listener).await.expect("serve");
        });
        (addr, cancel, task)
    }

    #[tokio::test]
    async fn connection_carries_several_requests() {
        let (addr, cancel, task) = start().await;
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"config.public\"}\n\nnot json\n")
            .await
            .expect("write");
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"session.end\",\"params\":{\"clientId\":\"k\"}}\n")
            .await
            .expect("write");

        let first: JsonRpcResponse =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(first.id, Some(1));
        assert!(first.result.is_some());

        let second: JsonRpcResponse =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(second.error.expect("error").code, codes::PARSE_ERROR);

        let third: JsonRpcResponse =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(third.id, Some(2));

        cancel.cancel();
        task.await.expect("join");
    }

    #[tokio::test]
    async fn idle_connection_is_closed_and_frees_its_slot() {
        let cancel = CancellationToken::new();
        let server = RpcServer::new(SocketAddr::from(([127, 0, 0, 1], 0)), handler(), cancel.clone())
            .with_max_connections(1)
            .with_idle_timeout(Duration::from_millis(200));
        let (listener, addr) = server.bind().await.expect("bind");
        let task = tokio::spawn(async move { server.serve(listener).await });

        // silent client holds the only slot until the idle timeout
        let mut silent = TcpStream::connect(addr).await.expect("connect");
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), silent.read(&mut buf))
            .await
            .expect("closed by server")
            .expect("read");
        assert_eq!(n, 0);

        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"config.public\"}\n")
            .await
            .expect("write");
        let mut lines = BufReader::new(reader).lines();
        let resp: JsonRpcResponse =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(resp.id, Some(7));
        assert!(resp.result.is_some());

        cancel.cancel();
        task.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn oversized_line_is_rejected_and_closed() {
        let (addr, cancel, task) = start().await;
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, mut writer) = stream.into_split();

        writer
            .write_all(&vec![b'x'; MAX_REQUEST_BYTES])
            .await
            .expect("write");
        let mut lines = BufReader::new(reader).lines();
        let resp: JsonRpcResponse =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line")).expect("json");
        assert_eq!(resp.error.expect("error").code, codes::PARSE_ERROR);
        assert!(lines.next_line().await.expect("read").is_none(), "connection closed");

        cancel.cancel();
        task.await.expect("join");
    }

    #[tokio::test]
    async fn server_stops_on_cancel() {
        let (_, cancel, task) = start().await;
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("stopped in time")
            .expect("join");
    }
}
