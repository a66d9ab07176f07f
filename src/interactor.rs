/// JSON-RPC interactor
///
/// Seals outbound requests and responses onto topics, opens inbound
/// envelopes, and keeps the registry of requests still waiting for an
/// answer.
///
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::crypto::{self, KeyPair, SymKey};
use crate::envelope::{EncodingType, Envelope, EnvelopeType};
use crate::error::{Error, Result};
use crate::relay::{RelayMessage, RelayTransport};
use crate::rpc::{
    ErrorObject, IdGenerator, IrnParams, JsonRpcResponse, RpcId, RpcPayload,
    WcRequest,
};
use crate::store::{FollowUp, PendingRequestRecord, SequenceStore};
use crate::types::{Namespaces, SessionProposeParams, Topic};
use crate::utils::unix_timestamp;

pub type Responder = oneshot::Sender<Result<Value>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Sent,
    Acked,
    Expired,
    Failed,
}

/// What the engine has to do once a request is answered or times out.
#[derive(Debug)]
pub enum PendingKind {
    Plain,
    Propose {
        key_pair: KeyPair,
        params: SessionProposeParams,
    },
    Settle {
        topic: Topic,
    },
    Update {
        topic: Topic,
        previous: Namespaces,
        applied: Namespaces,
    },
    Extend {
        topic: Topic,
        previous: u64,
        applied: u64,
    },
    Ping {
        topic: Topic,
    },
}

impl PendingKind {
    /// The part that survives a restart. The proposer's key pair is never
    /// written out, so a restored proposal is only tracked until it expires.
    fn follow_up(&self) -> FollowUp {
        match self {
            Self::Plain | Self::Propose { .. } => FollowUp::None,
            Self::Settle { topic } => FollowUp::Settle {
                topic: topic.clone(),
            },
            Self::Update {
                topic,
                previous,
                applied,
            } => FollowUp::Update {
                topic: topic.clone(),
                previous: previous.clone(),
                applied: applied.clone(),
            },
            Self::Extend {
                topic,
                previous,
                applied,
            } => FollowUp::Extend {
                topic: topic.clone(),
                previous: *previous,
                applied: *applied,
            },
            Self::Ping { topic } => FollowUp::Ping {
                topic: topic.clone(),
            },
        }
    }
}

impl From<FollowUp> for PendingKind {
    fn from(follow_up: FollowUp) -> Self {
        match follow_up {
            FollowUp::None => Self::Plain,
            FollowUp::Settle { topic } => Self::Settle { topic },
            FollowUp::Update {
                topic,
                previous,
                applied,
            } => Self::Update {
                topic,
                previous,
                applied,
            },
            FollowUp::Extend {
                topic,
                previous,
                applied,
            } => Self::Extend {
                topic,
                previous,
                applied,
            },
            FollowUp::Ping { topic } => Self::Ping { topic },
        }
    }
}

#[derive(Debug)]
pub struct PendingRequest {
    pub record: PendingRequestRecord,
    pub state: RequestState,
    pub kind: PendingKind,
    deadline: Instant,
    responder: Option<Responder>,
}

impl PendingRequest {
    pub fn id(&self) -> RpcId {
        self.record.id
    }

    /// Hands the outcome to whoever is waiting. Consumes the request so
    /// it can only ever fire once.
    pub fn complete(self, outcome: Result<Value>) {
        if let Some(responder) = self.responder {
            // the caller may have stopped listening
            let _ = responder.send(outcome);
        }
    }
}

/// Outbound request as handed to [`JsonRpcInteractor::publish_request`].
pub struct Outbound<'a> {
    pub topic: &'a Topic,
    pub sym_key: &'a SymKey,
    pub request: WcRequest,
    pub ttl: Option<Duration>,
    pub kind: PendingKind,
    pub responder: Option<Responder>,
}

pub struct JsonRpcInteractor {
    relay: Arc<dyn RelayTransport>,
    pending: HashMap<RpcId, PendingRequest>,
    ids: IdGenerator,
    encoding: EncodingType,
}

impl JsonRpcInteractor {
    pub fn new(relay: Arc<dyn RelayTransport>, encoding: EncodingType) -> Self {
        Self {
            relay,
            pending: HashMap::new(),
            ids: IdGenerator::default(),
            encoding,
        }
    }

    pub async fn subscribe(&self, topic: &Topic) -> Result<()> {
        debug!("subscribing to {topic}");
        self.relay.subscribe(topic).await.map_err(Error::Transport)
    }

    pub async fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        debug!("unsubscribing from {topic}");
        self.relay.unsubscribe(topic).await.map_err(Error::Transport)
    }

    async fn publish(
        &self,
        topic: &Topic,
        sym_key: &SymKey,
        payload: &RpcPayload,
        irn: IrnParams,
        ttl: Duration,
    ) -> Result<()> {
        let plaintext = payload.encode()?;
        let envelope = crypto::encrypt(sym_key, &plaintext, EnvelopeType::Type0)?;
        self.relay
            .publish(RelayMessage {
                topic: topic.clone(),
                message: envelope.serialize(self.encoding),
                tag: irn.tag,
                ttl: ttl.max(irn.ttl).as_secs(),
                published_at: None,
            })
            .await
            .map_err(Error::Transport)
    }

    /// Publishes a request and registers it as pending. Returns as soon as
    /// the relay accepted the message.
    pub async fn publish_request(
        &mut self,
        store: &mut SequenceStore,
        outbound: Outbound<'_>,
    ) -> Result<RpcId> {
        let id = self.ids.next_id();
        let method = outbound.request.method();
        let irn = method.request_irn();
        let ttl = outbound.ttl.unwrap_or(irn.ttl);

        let rpc = outbound.request.to_rpc(id)?;
        let params = rpc.params.clone();
        self.publish(
            outbound.topic,
            outbound.sym_key,
            &RpcPayload::Request(rpc),
            irn,
            ttl,
        )
        .await?;
        debug!("sent {method} {id} on {}", outbound.topic);

        let record = PendingRequestRecord {
            id,
            topic: outbound.topic.clone(),
            method,
            params,
            expiry: unix_timestamp() + ttl.as_secs(),
            follow_up: outbound.kind.follow_up(),
        };
        store.insert_request(&record)?;
        self.pending.insert(
            id,
            PendingRequest {
                record,
                state: RequestState::Sent,
                kind: outbound.kind,
                deadline: Instant::now() + ttl,
                responder: outbound.responder,
            },
        );
        Ok(id)
    }

    pub async fn publish_response(
        &self,
        topic: &Topic,
        sym_key: &SymKey,
        response: JsonRpcResponse,
        irn: IrnParams,
    ) -> Result<()> {
        trace!("responding to {} on {topic}", response.id());
        self.publish(
            topic,
            sym_key,
            &RpcPayload::Response(response),
            irn,
            irn.ttl,
        )
        .await
    }

    pub async fn respond_with_error(
        &self,
        topic: &Topic,
        sym_key: &SymKey,
        id: RpcId,
        error: ErrorObject,
        irn: IrnParams,
    ) -> Result<()> {
        debug!(
            "rejecting {id} on {topic} with {}: {}",
            error.code, error.message
        );
        self.publish_response(
            topic,
            sym_key,
            JsonRpcResponse::error(id, error),
            irn,
        )
        .await
    }

    /// Opens an inbound relay message.
    pub fn decode(&self, message: &str, sym_key: &SymKey) -> Result<RpcPayload> {
        let envelope = Envelope::deserialize(message, self.encoding)?;
        let plaintext = crypto::decrypt(sym_key, &envelope)?;
        RpcPayload::decode(&plaintext)
    }

    /// Matches a response to its request. Unknown ids, and ids answered on
    /// a topic other than the one they were sent on, are dropped.
    pub fn correlate(
        &mut self,
        store: &mut SequenceStore,
        topic: &Topic,
        response: &JsonRpcResponse,
    ) -> Result<Option<PendingRequest>> {
        let id = response.id();
        match self.pending.get(&id) {
            None => {
                debug!("dropping response {id} on {topic}: no pending request");
                return Ok(None);
            }
            Some(pending) if &pending.record.topic != topic => {
                warn!(
                    "dropping response {id}: sent on {}, answered on {topic}",
                    pending.record.topic
                );
                return Ok(None);
            }
            Some(_) => {}
        }

        store.remove_request(id)?;
        Ok(self.pending.remove(&id).map(|mut pending| {
            pending.state = RequestState::Acked;
            pending
        }))
    }

    /// Removes every request whose deadline has passed.
    pub fn expire(
        &mut self,
        store: &mut SequenceStore,
        now: Instant,
    ) -> Result<Vec<PendingRequest>> {
        let ids: Vec<RpcId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            store.remove_request(id)?;
            if let Some(mut pending) = self.pending.remove(&id) {
                debug!("{} {id} expired", pending.record.method);
                pending.state = RequestState::Expired;
                expired.push(pending);
            }
        }
        Ok(expired)
    }

    pub fn cancel(
        &mut self,
        store: &mut SequenceStore,
        id: RpcId,
    ) -> Result<Option<PendingRequest>> {
        let Some(mut pending) = self.pending.remove(&id) else {
            return Ok(None);
        };
        store.remove_request(id)?;
        debug!("cancelled {} {id}", pending.record.method);
        pending.state = RequestState::Failed;
        Ok(Some(pending))
    }

    /// Drops requests whose records were removed together with their
    /// sequence.
    pub fn forget(&mut self, ids: &[RpcId]) {
        for id in ids {
            if let Some(mut pending) = self.pending.remove(id) {
                pending.state = RequestState::Failed;
                let topic = pending.record.topic.clone();
                pending.complete(Err(Error::CannotFindSequenceForTopic(topic)));
            }
        }
    }

    /// Re-registers requests persisted by an earlier run. Nobody is waiting
    /// on them anymore, but their follow-up still runs on answer or expiry.
    pub fn restore(&mut self, records: Vec<PendingRequestRecord>) {
        let now = unix_timestamp();
        for record in records {
            let remaining = Duration::from_secs(record.expiry.saturating_sub(now));
            self.pending.insert(
                record.id,
                PendingRequest {
                    deadline: Instant::now() + remaining,
                    kind: record.follow_up.clone().into(),
                    record,
                    state: RequestState::Sent,
                    responder: None,
                },
            );
        }
    }

    pub fn is_pending(&self, id: RpcId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
