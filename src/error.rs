use crate::rpc::{ErrorObject, RpcId};
use crate::types::Topic;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Coarse grouping of [`Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Key agreement or AEAD failure.
    Crypto,
    /// Malformed envelope, JSON, URI or params.
    Codec,
    /// Operation on a missing or inconsistent sequence.
    State,
    /// A request or ping ran out of time.
    Expired,
    /// Rejected locally before anything was sent.
    Policy,
    /// The peer answered with a JSON-RPC error.
    Peer,
    /// Relay, store or engine plumbing failed.
    Transport,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key agreement failed: peer public key is not usable")]
    KeyAgreement,
    #[error("decryption failed")]
    Decryption,
    #[error("encryption failed")]
    Encryption,

    #[error("malformed envelope: {0}")]
    EnvelopeDecode(&'static str),
    #[error("invalid pairing uri: {0}")]
    InvalidUri(&'static str),
    #[error("pairing uri does not mention relay-protocol")]
    RelayProtocolNotMentioned,
    #[error("pairing uri does not mention symKey")]
    SymKeyNotMentioned,
    #[error("method {0} is not supported")]
    UnknownMethod(String),
    #[error("invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },
    #[error("json: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("hex: {0}")]
    FromHex(#[from] alloy::hex::FromHexError),
    #[error("integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("cannot find sequence for topic {0}")]
    CannotFindSequenceForTopic(Topic),
    #[error("sequence {0} has expired")]
    SequenceExpired(Topic),
    #[error("no pending proposal with id {0}")]
    ProposalNotFound(RpcId),
    #[error("session {0} has not been acknowledged by the peer")]
    SessionNotAcknowledged(Topic),
    #[error("pairing {0} is already active")]
    PairingAlreadyActive(Topic),
    #[error("topic {0} already holds a different kind of sequence")]
    TopicConflict(Topic),

    #[error("request {0} expired")]
    RequestExpired(RpcId),
    #[error("ping on {0} timed out")]
    PingTimeout(Topic),

    #[error("approved namespaces do not satisfy the proposal: {0}")]
    NamespaceMismatch(String),
    #[error("method {method} is not authorized on {chain_id}")]
    UnauthorizedMethod { chain_id: String, method: String },
    #[error("event {event} is not authorized on {chain_id}")]
    UnauthorizedEvent { chain_id: String, event: String },
    #[error("only the session controller can {0}")]
    NotController(&'static str),
    #[error("invalid expiry {0}")]
    InvalidExpiry(u64),
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("peer returned error {}: {}", .0.code, .0.message)]
    JsonRpc(ErrorObject),

    #[error("relay transport: {0}")]
    Transport(anyhow::Error),
    #[error("persistent store: {0}")]
    Store(anyhow::Error),
    #[error("http: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("request {0} was cancelled")]
    RequestCancelled(RpcId),
    #[error("engine is no longer running")]
    EngineClosed,

    #[error("{0}")]
    InternalError(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyAgreement | Self::Decryption | Self::Encryption => {
                ErrorKind::Crypto
            }
            Self::EnvelopeDecode(_)
            | Self::InvalidUri(_)
            | Self::RelayProtocolNotMentioned
            | Self::SymKeyNotMentioned
            | Self::UnknownMethod(_)
            | Self::InvalidParams { .. }
            | Self::SerdeJson(_)
            | Self::FromHex(_)
            | Self::ParseInt(_) => ErrorKind::Codec,
            Self::CannotFindSequenceForTopic(_)
            | Self::SequenceExpired(_)
            | Self::ProposalNotFound(_)
            | Self::SessionNotAcknowledged(_)
            | Self::PairingAlreadyActive(_)
            | Self::TopicConflict(_) => ErrorKind::State,
            Self::RequestExpired(_) | Self::PingTimeout(_) => {
                ErrorKind::Expired
            }
            Self::NamespaceMismatch(_)
            | Self::UnauthorizedMethod { .. }
            | Self::UnauthorizedEvent { .. }
            | Self::NotController(_)
            | Self::InvalidExpiry(_)
            | Self::InvalidNamespace(_) => ErrorKind::Policy,
            Self::JsonRpc(_) => ErrorKind::Peer,
            Self::Transport(_)
            | Self::Store(_)
            | Self::Reqwest(_)
            | Self::RequestCancelled(_)
            | Self::EngineClosed => ErrorKind::Transport,
            Self::InternalError(_) => ErrorKind::Internal,
        }
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::InternalError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::InternalError(e)
    }
}

impl From<ErrorObject> for Error {
    fn from(e: ErrorObject) -> Self {
        Error::JsonRpc(e)
    }
}
