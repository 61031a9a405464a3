//! Error taxonomy shared by server, agent and CLI.

use thiserror::Error;

/// JSON-RPC error codes used on the wire.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const UNAUTHORIZED: i32 = -32001;
    pub const UNKNOWN_MODULE: i32 = -32004;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FleetError {
    /// Request failed in transit. The next cycle proceeds unaffected.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    /// Admin-only operation attempted without a valid token.
    #[error("unauthorized")]
    Unauthorized,

    #[error("malformed heartbeat: {0}")]
    MalformedHeartbeat(String),

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("client id storage error: {0}")]
    Storage(String),

    /// The store sits at the highest representable version.
    #[error("configuration version space exhausted")]
    VersionExhausted,
}

impl FleetError {
    /// Wire code for this error when returned by the server.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::Unauthorized => codes::UNAUTHORIZED,
            Self::MalformedHeartbeat(_) => codes::INVALID_PARAMS,
            Self::UnknownModule(_) => codes::UNKNOWN_MODULE,
            Self::Rpc { code, .. } => *code,
            Self::Transport(_) | Self::Timeout | Self::Storage(_) | Self::VersionExhausted => {
                codes::INTERNAL_ERROR
            }
        }
    }

    /// Rebuild a typed error from a wire error object.
    pub fn from_rpc(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            codes::UNAUTHORIZED => Self::Unauthorized,
            codes::INVALID_PARAMS => Self::MalformedHeartbeat(message),
            codes::UNKNOWN_MODULE => Self::UnknownModule(message),
            _ => Self::Rpc { code, message },
        }
    }

    /// True for failures a polling loop should simply retry next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

impl From<std::io::Error> for FleetError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        Self::Transport(format!("invalid payload: {e}"))
    }
}
