/// RPC
///
/// JSON-RPC 2.0 payloads and the typed `wc_*` methods carried in them.
///
use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::constants::{DAYS, JSONRPC_VERSION, MINUTES};
use crate::error::{Error, Result};
use crate::types::{
    DeleteParams, EmptyParams, SessionEventParams, SessionExtendParams,
    SessionProposeParams, SessionRequestParams, SessionSettleParams,
    SessionUpdateParams,
};
use crate::utils::unix_timestamp_millis;

pub type RpcId = u64;

/// Hands out request ids that grow strictly within a client and stay
/// below 2^53 so javascript peers can represent them.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: RpcId,
}

impl IdGenerator {
    pub fn next_id(&mut self) -> RpcId {
        let candidate = unix_timestamp_millis() * 1000;
        self.last = candidate.max(self.last + 1);
        self.last
    }
}

// Some dapps send ids as decimal strings
fn deserialize_id<'de, D>(deserializer: D) -> Result<RpcId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        String(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n),
        RawId::String(s) => s.parse().map_err(D::Error::custom),
    }
}

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RpcId,
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: RpcId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResult {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RpcId,
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub result: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RpcId,
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub error: ErrorObject,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponse {
    Result(JsonRpcResult),
    Error(JsonRpcError),
}

impl JsonRpcResponse {
    pub fn result(id: RpcId, result: impl Into<Value>) -> Self {
        Self::Result(JsonRpcResult {
            id,
            jsonrpc: jsonrpc_version(),
            result: result.into(),
        })
    }

    pub fn error(id: RpcId, error: ErrorObject) -> Self {
        Self::Error(JsonRpcError {
            id,
            jsonrpc: jsonrpc_version(),
            error,
        })
    }

    pub fn id(&self) -> RpcId {
        match self {
            Self::Result(r) => r.id,
            Self::Error(e) => e.id,
        }
    }

    pub fn into_outcome(self) -> Result<Value, ErrorObject> {
        match self {
            Self::Result(r) => Ok(r.result),
            Self::Error(e) => Err(e.error),
        }
    }
}

/// A decrypted payload, either side of the exchange.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcPayload {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl RpcPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        if value.get("method").is_some() {
            Ok(Self::Request(serde_json::from_value(value)?))
        } else {
            Ok(Self::Response(serde_json::from_value(value)?))
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            Self::Request(r) => serde_json::to_vec(r)?,
            Self::Response(r) => serde_json::to_vec(r)?,
        })
    }
}

/// Relay publish parameters attached to a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IrnParams {
    pub tag: u32,
    pub ttl: Duration,
}

impl IrnParams {
    const fn new(tag: u32, ttl_secs: u64) -> Self {
        Self {
            tag,
            ttl: Duration::from_secs(ttl_secs),
        }
    }
}

/// Tag used when answering a method this client does not know.
pub const UNSUPPORTED_METHOD_IRN: IrnParams = IrnParams::new(0, 5 * MINUTES);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WcMethod {
    #[serde(rename = "wc_pairingDelete")]
    PairingDelete,

    #[serde(rename = "wc_pairingPing")]
    PairingPing,

    #[serde(rename = "wc_sessionPropose")]
    SessionPropose,

    #[serde(rename = "wc_sessionSettle")]
    SessionSettle,

    #[serde(rename = "wc_sessionUpdate")]
    SessionUpdate,

    #[serde(rename = "wc_sessionExtend")]
    SessionExtend,

    #[serde(rename = "wc_sessionRequest")]
    SessionRequest,

    #[serde(rename = "wc_sessionEvent")]
    SessionEvent,

    #[serde(rename = "wc_sessionDelete")]
    SessionDelete,

    #[serde(rename = "wc_sessionPing")]
    SessionPing,
}

impl WcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PairingDelete => "wc_pairingDelete",
            Self::PairingPing => "wc_pairingPing",
            Self::SessionPropose => "wc_sessionPropose",
            Self::SessionSettle => "wc_sessionSettle",
            Self::SessionUpdate => "wc_sessionUpdate",
            Self::SessionExtend => "wc_sessionExtend",
            Self::SessionRequest => "wc_sessionRequest",
            Self::SessionEvent => "wc_sessionEvent",
            Self::SessionDelete => "wc_sessionDelete",
            Self::SessionPing => "wc_sessionPing",
        }
    }

    // https://specs.walletconnect.com/2.0/specs/clients/sign/rpc-methods
    pub fn request_irn(&self) -> IrnParams {
        match self {
            Self::PairingDelete => IrnParams::new(1000, DAYS),
            Self::PairingPing => IrnParams::new(1002, 30),
            Self::SessionPropose => IrnParams::new(1100, 5 * MINUTES),
            Self::SessionSettle => IrnParams::new(1102, 5 * MINUTES),
            Self::SessionUpdate => IrnParams::new(1104, DAYS),
            Self::SessionExtend => IrnParams::new(1106, DAYS),
            Self::SessionRequest => IrnParams::new(1108, 5 * MINUTES),
            Self::SessionEvent => IrnParams::new(1110, 5 * MINUTES),
            Self::SessionDelete => IrnParams::new(1112, DAYS),
            Self::SessionPing => IrnParams::new(1114, 30),
        }
    }

    pub fn response_irn(&self) -> IrnParams {
        let request = self.request_irn();
        IrnParams {
            tag: request.tag + 1,
            ..request
        }
    }

    /// Proposals are rejected under their own tag.
    pub fn reject_irn(&self) -> IrnParams {
        match self {
            Self::SessionPropose => IrnParams::new(1120, 5 * MINUTES),
            _ => self.response_irn(),
        }
    }
}

impl Display for WcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WcMethod {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_plain::from_str(s).map_err(|_| Error::UnknownMethod(s.to_string()))
    }
}

/// Every request this engine sends or understands, keyed by method name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum WcRequest {
    #[serde(rename = "wc_pairingDelete")]
    PairingDelete(DeleteParams),

    #[serde(rename = "wc_pairingPing")]
    PairingPing(EmptyParams),

    #[serde(rename = "wc_sessionPropose")]
    SessionPropose(SessionProposeParams),

    #[serde(rename = "wc_sessionSettle")]
    SessionSettle(SessionSettleParams),

    #[serde(rename = "wc_sessionUpdate")]
    SessionUpdate(SessionUpdateParams),

    #[serde(rename = "wc_sessionExtend")]
    SessionExtend(SessionExtendParams),

    #[serde(rename = "wc_sessionRequest")]
    SessionRequest(SessionRequestParams),

    #[serde(rename = "wc_sessionEvent")]
    SessionEvent(SessionEventParams),

    #[serde(rename = "wc_sessionDelete")]
    SessionDelete(DeleteParams),

    #[serde(rename = "wc_sessionPing")]
    SessionPing(EmptyParams),
}

impl WcRequest {
    pub fn method(&self) -> WcMethod {
        match self {
            Self::PairingDelete(_) => WcMethod::PairingDelete,
            Self::PairingPing(_) => WcMethod::PairingPing,
            Self::SessionPropose(_) => WcMethod::SessionPropose,
            Self::SessionSettle(_) => WcMethod::SessionSettle,
            Self::SessionUpdate(_) => WcMethod::SessionUpdate,
            Self::SessionExtend(_) => WcMethod::SessionExtend,
            Self::SessionRequest(_) => WcMethod::SessionRequest,
            Self::SessionEvent(_) => WcMethod::SessionEvent,
            Self::SessionDelete(_) => WcMethod::SessionDelete,
            Self::SessionPing(_) => WcMethod::SessionPing,
        }
    }

    pub fn to_rpc(&self, id: RpcId) -> Result<JsonRpcRequest> {
        let mut value = serde_json::to_value(self)?;
        let params = value
            .get_mut("params")
            .map(Value::take)
            .unwrap_or_else(|| json!({}));
        Ok(JsonRpcRequest::new(id, self.method().as_str(), params))
    }

    pub fn from_rpc(request: &JsonRpcRequest) -> Result<Self> {
        let method = WcMethod::from_str(&request.method)?;
        let params = match &request.params {
            Value::Null => json!({}),
            params => params.clone(),
        };
        serde_json::from_value(json!({
            "method": method.as_str(),
            "params": params,
        }))
        .map_err(|e| Error::InvalidParams {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }
}
