/// Types
///
/// Wire types carried inside `wc_*` JSON-RPC params, plus the identifiers
/// shared by every layer.
///
use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::RELAY_PROTOCOL;
use crate::crypto::PublicKey;

/// Relay routing key, one per pairing or session.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "publicKey")]
    pub public_key: PublicKey,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            protocol: RELAY_PROTOCOL.to_string(),
            data: None,
        }
    }
}

/// Chain-scoped permissions. The map key is either a CAIP-2 namespace
/// (`eip155`) listing its chains, or a full chain id (`eip155:1`).
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<String>,
}

impl Namespace {
    pub fn new<C, M, E>(chains: C, methods: M, events: E) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            chains: chains.into_iter().map(Into::into).collect(),
            methods: methods.into_iter().map(Into::into).collect(),
            events: events.into_iter().map(Into::into).collect(),
            accounts: vec![],
        }
    }

    pub fn with_accounts<A>(mut self, accounts: A) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
    {
        self.accounts = accounts.into_iter().map(Into::into).collect();
        self
    }
}

pub type Namespaces = BTreeMap<String, Namespace>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionProposeParams {
    #[serde(rename = "requiredNamespaces", default)]
    pub required_namespaces: Namespaces,
    #[serde(rename = "optionalNamespaces", default)]
    pub optional_namespaces: Namespaces,
    pub relays: Vec<Relay>,
    pub proposer: Participant,
    #[serde(
        rename = "pairingTopic",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pairing_topic: Option<Topic>,
    #[serde(
        rename = "expiryTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry_timestamp: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionProposeResponse {
    pub relay: Relay,
    #[serde(rename = "responderPublicKey")]
    pub responder_public_key: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSettleParams {
    pub relay: Relay,
    pub controller: Participant,
    pub namespaces: Namespaces,
    pub expiry: u64,
    #[serde(
        rename = "sessionProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_properties: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    pub namespaces: Namespaces,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionExtendParams {
    pub expiry: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub method: String,
    pub params: Value,
    #[serde(
        rename = "expiryTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry_timestamp: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRequestParams {
    pub request: RequestPayload,
    #[serde(rename = "chainId")]
    pub chain_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub name: String,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEventParams {
    pub event: EventPayload,
    #[serde(rename = "chainId")]
    pub chain_id: String,
}

/// Params of `wc_sessionDelete` and `wc_pairingDelete`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteParams {
    pub code: i64,
    pub message: String,
}

/// Params of the ping methods, always `{}` on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmptyParams {}
