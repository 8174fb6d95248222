//! Wire frames for the RPC connection: `hello`/`hello_ok` handshake plus
//! the steady-state `req`/`res`/`event`/`error` frames.
//!
//! One frame per WebSocket text message, discriminated by `type`.

use serde::{Deserialize, Serialize};

use super::scopes::Scope;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Hello(HelloParams),
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelloParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(default)]
    pub caps: Vec<String>,
    #[serde(default)]
    pub auth: HelloAuth,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HelloAuth {
    #[serde(default)]
    pub token: Option<String>,
}

/// Protocol version this implementation speaks. Negotiation picks the
/// highest version in `[min_protocol, max_protocol]` that's `<= CURRENT`.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    HelloOk {
        protocol: u32,
        server: ServerInfo,
        features: Features,
        snapshot: serde_json::Value,
        auth: AuthResult,
        policy: Policy,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RpcError>,
    },
    Event {
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Error(RpcError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub conn_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Features {
    pub methods: Vec<&'static str>,
    pub events: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    pub role: &'static str,
    pub scopes: Vec<Scope>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    pub max_payload: usize,
    pub max_buffered: usize,
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    /// One of the closed wire codes from `Error::rpc_code` (`invalid_request`,
    /// `unauthorized`, ..., `internal_error`).
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RpcError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            field: None,
            retryable: None,
            retry_after_ms: None,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Build an `RpcError` from the same domain error taxonomy the HTTP
    /// surface translates via `rpc_code()`, so both boundaries agree.
    pub fn from_domain_error(err: &sa_domain::error::Error) -> Self {
        Self {
            code: err.rpc_code(),
            message: err.to_string(),
            details: None,
            field: None,
            retryable: Some(err.is_retryable()),
            retry_after_ms: None,
            request_id: None,
        }
    }
}
