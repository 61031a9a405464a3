//! TCP JSON-RPC client: used by the kiosk agent transport and admin commands.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use fleetsync_agent::SyncTransport;
use fleetsync_core::FleetError;
use fleetsync_core::protocol::{
    EndSessionRequest, EndSessionResponse, HeartbeatRequest, HeartbeatResponse, PublicConfig,
    methods,
};

use crate::server::{JsonRpcRequest, JsonRpcResponse};

/// One request per connection: write a line, half-close, read a line.
pub(crate) async fn rpc_call(
    addr: &str,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, FleetError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| FleetError::Transport(format!("cannot connect to {addr}: {e}")))?;

    let (reader, mut writer) = stream.into_split();

    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_owned(),
        id: Some(1),
        method: method.to_owned(),
        params,
    };
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(FleetError::Transport("connection closed without a response".to_owned()));
    }

    let response: JsonRpcResponse = serde_json::from_str(line.trim())?;
    if let Some(error) = response.error {
        return Err(FleetError::from_rpc(error.code, error.message));
    }
    Ok(response.result.unwrap_or(serde_json::Value::Null))
}

/// Typed wrapper over [`rpc_call`].
pub(crate) async fn call<P: Serialize, R: DeserializeOwned>(
    addr: &str,
    method: &str,
    params: &P,
) -> Result<R, FleetError> {
    let params = serde_json::to_value(params)?;
    let result = rpc_call(addr, method, params).await?;
    Ok(serde_json::from_value(result)?)
}

/// [`SyncTransport`] over the daemon's TCP endpoint.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl SyncTransport for TcpTransport {
    async fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatResponse, FleetError> {
        call(&self.addr, methods::HEARTBEAT, &req).await
    }

    async fn end_session(&self, client_id: &str) -> Result<(), FleetError> {
        let req = EndSessionRequest {
            client_id: client_id.to_owned(),
        };
        let _: EndSessionResponse = call(&self.addr, methods::SESSION_END, &req).await?;
        Ok(())
    }

    async fn public_config(&self) -> Result<PublicConfig, FleetError> {
        call(&self.addr, methods::CONFIG_PUBLIC, &serde_json::json!({})).await
    }
}
