/// Engine
///
/// A single task owns the sequence store, the pending request registry and
/// every in-flight proposal. Commands from [`SignClient`](crate::SignClient)
/// handles, relay traffic and the expiry sweep are handled one at a time.
///
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::ClientConfig;
use crate::constants::{INVALID_PARAMS, METHOD_NOT_FOUND, NO_MATCHING_KEY};
use crate::crypto::SymKey;
use crate::error::{Error, Result};
use crate::interactor::{JsonRpcInteractor, PendingKind, PendingRequest, Responder};
use crate::pairing::Pairing;
use crate::relay::{RelayEvent, RelayMessage, RelayTransport};
use crate::rpc::{
    ErrorObject, JsonRpcRequest, JsonRpcResponse, RpcId, RpcPayload,
    UNSUPPORTED_METHOD_IRN, WcMethod, WcRequest,
};
use crate::session::{
    InboundRequest, PendingSettlement, Proposal, Session, SessionRequest,
};
use crate::store::{PersistentStore, Sequence, SequenceStore, StoreEntry};
use crate::types::{
    DeleteParams, EventPayload, Namespaces, SessionEventParams,
    SessionRequestParams, Topic,
};
use crate::uri::PairingUri;
use crate::utils::unix_timestamp;

#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    SessionProposed(Proposal),
    SessionSettled(Session),
    SessionRejected {
        proposal_id: RpcId,
        pairing_topic: Topic,
        reason: ErrorObject,
    },
    SessionDeleted {
        topic: Topic,
        reason: DeleteParams,
    },
    SessionExpired(Topic),
    SessionRequest {
        topic: Topic,
        id: RpcId,
        request: SessionRequestParams,
    },
    SessionEvent {
        topic: Topic,
        event: SessionEventParams,
    },
    SessionUpdated {
        topic: Topic,
        namespaces: Namespaces,
    },
    SessionExtended {
        topic: Topic,
        expiry: u64,
    },
    PairingActivated(Topic),
    PairingDeleted(Topic),
    PairingExpired(Topic),
    ConnectionChanged {
        connected: bool,
    },
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Command {
    CreatePairing {
        reply: Reply<(Pairing, PairingUri)>,
    },
    Pair {
        uri: PairingUri,
        reply: Reply<Pairing>,
    },
    DeletePairing {
        topic: Topic,
        reply: Reply<()>,
    },
    Propose {
        pairing_topic: Topic,
        required: Namespaces,
        optional: Namespaces,
        responder: Responder,
        reply: Reply<RpcId>,
    },
    Approve {
        proposal_id: RpcId,
        namespaces: Namespaces,
        reply: Reply<Session>,
    },
    Reject {
        proposal_id: RpcId,
        reason: String,
        reply: Reply<()>,
    },
    UpdateNamespaces {
        topic: Topic,
        namespaces: Namespaces,
        responder: Responder,
        reply: Reply<RpcId>,
    },
    Extend {
        topic: Topic,
        expiry: u64,
        responder: Responder,
        reply: Reply<RpcId>,
    },
    Request {
        topic: Topic,
        request: SessionRequest,
        responder: Responder,
        reply: Reply<RpcId>,
    },
    Respond {
        topic: Topic,
        response: JsonRpcResponse,
        reply: Reply<()>,
    },
    EmitEvent {
        topic: Topic,
        chain_id: String,
        event: EventPayload,
        reply: Reply<()>,
    },
    Disconnect {
        topic: Topic,
        reply: Reply<()>,
    },
    Ping {
        topic: Topic,
        responder: Responder,
        reply: Reply<RpcId>,
    },
    Cancel {
        id: RpcId,
    },
    Sessions {
        reply: Reply<Vec<Session>>,
    },
    Pairings {
        reply: Reply<Vec<Pairing>>,
    },
    Proposals {
        reply: Reply<Vec<Proposal>>,
    },
    AllEntries {
        reply: Reply<Vec<StoreEntry>>,
    },
}

/// Where an inbound request came from and what it asked for.
pub(crate) struct Inbound {
    pub topic: Topic,
    pub sym_key: SymKey,
    pub id: RpcId,
    pub method: WcMethod,
}

pub(crate) struct Engine {
    pub(crate) config: ClientConfig,
    pub(crate) store: SequenceStore,
    pub(crate) interactor: JsonRpcInteractor,
    pub(crate) proposals: HashMap<RpcId, Proposal>,
    pub(crate) pending_settlements: HashMap<Topic, PendingSettlement>,
    pub(crate) inbound_requests: HashMap<RpcId, InboundRequest>,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub(crate) fn new(
        config: ClientConfig,
        relay: Arc<dyn RelayTransport>,
        store: Box<dyn PersistentStore>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Result<Self> {
        let store = SequenceStore::new(store);
        let mut interactor = JsonRpcInteractor::new(relay, config.encoding);
        interactor.restore(store.requests()?);

        let now = unix_timestamp();
        let inbound_requests = store
            .inbound_requests()?
            .into_iter()
            .map(|record| (record.id, InboundRequest::from_record(&record, now)))
            .collect();

        Ok(Self {
            config,
            store,
            interactor,
            proposals: HashMap::new(),
            pending_settlements: HashMap::new(),
            inbound_requests,
            events,
        })
    }

    pub(crate) fn now(&self) -> u64 {
        unix_timestamp()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    ) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut relay_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = relay_events.recv(), if relay_open => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_relay_event(event).await {
                            error!("relay event failed: {e}");
                        }
                    }
                    None => {
                        warn!("relay event stream closed");
                        relay_open = false;
                    }
                },
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("sweep failed: {e}");
                    }
                }
            }
        }
        info!("engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        // a dropped reply receiver only means the caller gave up
        match command {
            Command::CreatePairing { reply } => {
                let _ = reply.send(self.create_pairing().await);
            }
            Command::Pair { uri, reply } => {
                let _ = reply.send(self.pair(uri).await);
            }
            Command::DeletePairing { topic, reply } => {
                let _ = reply.send(self.delete_pairing(&topic).await);
            }
            Command::Propose {
                pairing_topic,
                required,
                optional,
                responder,
                reply,
            } => {
                let result = self
                    .propose(&pairing_topic, required, optional, responder)
                    .await;
                let _ = reply.send(result);
            }
            Command::Approve {
                proposal_id,
                namespaces,
                reply,
            } => {
                let _ = reply.send(self.approve(proposal_id, namespaces).await);
            }
            Command::Reject {
                proposal_id,
                reason,
                reply,
            } => {
                let _ = reply.send(self.reject(proposal_id, reason).await);
            }
            Command::UpdateNamespaces {
                topic,
                namespaces,
                responder,
                reply,
            } => {
                let result =
                    self.update_namespaces(&topic, namespaces, responder).await;
                let _ = reply.send(result);
            }
            Command::Extend {
                topic,
                expiry,
                responder,
                reply,
            } => {
                let _ = reply.send(self.extend(&topic, expiry, responder).await);
            }
            Command::Request {
                topic,
                request,
                responder,
                reply,
            } => {
                let _ = reply.send(self.request(&topic, request, responder).await);
            }
            Command::Respond {
                topic,
                response,
                reply,
            } => {
                let _ = reply.send(self.respond(&topic, response).await);
            }
            Command::EmitEvent {
                topic,
                chain_id,
                event,
                reply,
            } => {
                let _ = reply.send(self.emit_event(&topic, chain_id, event).await);
            }
            Command::Disconnect { topic, reply } => {
                let _ = reply.send(self.disconnect(&topic).await);
            }
            Command::Ping {
                topic,
                responder,
                reply,
            } => {
                let _ = reply.send(self.ping(&topic, responder).await);
            }
            Command::Cancel { id } => {
                if let Err(e) = self.interactor.cancel(&mut self.store, id) {
                    warn!("cancelling {id} failed: {e}");
                }
            }
            Command::Sessions { reply } => {
                let _ = reply.send(self.store.sessions());
            }
            Command::Pairings { reply } => {
                let _ = reply.send(self.store.pairings());
            }
            Command::Proposals { reply } => {
                let _ = reply.send(Ok(self.proposals.values().cloned().collect()));
            }
            Command::AllEntries { reply } => {
                let _ = reply.send(self.store.all_entries());
            }
        }
    }

    async fn handle_relay_event(&mut self, event: RelayEvent) -> Result<()> {
        match event {
            RelayEvent::Message(message) => self.handle_message(message).await,
            RelayEvent::Connected => {
                info!("relay connected");
                self.resubscribe().await?;
                self.emit(EngineEvent::ConnectionChanged { connected: true });
                Ok(())
            }
            RelayEvent::Disconnected => {
                warn!("relay disconnected");
                self.emit(EngineEvent::ConnectionChanged { connected: false });
                Ok(())
            }
        }
    }

    async fn resubscribe(&mut self) -> Result<()> {
        let mut topics: Vec<Topic> = self
            .store
            .sequences()?
            .iter()
            .map(|s| s.topic().clone())
            .collect();
        topics.extend(self.pending_settlements.keys().cloned());

        for topic in &topics {
            if let Err(e) = self.interactor.subscribe(topic).await {
                warn!("resubscribing to {topic} failed: {e}");
            }
        }
        debug!("resubscribed to {} topics", topics.len());
        Ok(())
    }

    async fn handle_message(&mut self, message: RelayMessage) -> Result<()> {
        let topic = message.topic;
        let (sym_key, sequence) = match self.store.get(&topic)? {
            Some(sequence) => {
                if sequence.expiry() <= self.now() {
                    debug!("dropping message on expired {topic}");
                    return Ok(());
                }
                (*sequence.sym_key(), Some(sequence))
            }
            None => match self.pending_settlements.get(&topic) {
                Some(pending) => (pending.sym_key, None),
                None => {
                    debug!("dropping message on unknown topic {topic}");
                    return Ok(());
                }
            },
        };

        let payload = match self.interactor.decode(&message.message, &sym_key) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping message on {topic}: {e}");
                return Ok(());
            }
        };

        if let Some(Sequence::Pairing(pairing)) = &sequence {
            if !pairing.active {
                self.activate_pairing(&topic)?;
            }
        }

        match payload {
            RpcPayload::Request(request) => {
                self.handle_request(&topic, sym_key, request).await
            }
            RpcPayload::Response(response) => {
                self.handle_response(&topic, response).await
            }
        }
    }

    async fn handle_request(
        &mut self,
        topic: &Topic,
        sym_key: SymKey,
        request: JsonRpcRequest,
    ) -> Result<()> {
        let id = request.id;
        let parsed = WcRequest::from_rpc(&request);
        let wc_request = match parsed {
            Ok(wc_request) => wc_request,
            Err(Error::UnknownMethod(method)) => {
                return self
                    .interactor
                    .respond_with_error(
                        topic,
                        &sym_key,
                        id,
                        ErrorObject::new(
                            METHOD_NOT_FOUND,
                            format!("Unsupported method {method}"),
                        ),
                        UNSUPPORTED_METHOD_IRN,
                    )
                    .await;
            }
            Err(e) => {
                let irn = WcMethod::from_str(&request.method)
                    .map(|m| m.response_irn())
                    .unwrap_or(UNSUPPORTED_METHOD_IRN);
                return self
                    .interactor
                    .respond_with_error(
                        topic,
                        &sym_key,
                        id,
                        ErrorObject::new(INVALID_PARAMS, e.to_string()),
                        irn,
                    )
                    .await;
            }
        };

        let inbound = Inbound {
            topic: topic.clone(),
            sym_key,
            id,
            method: wc_request.method(),
        };
        debug!("received {} {id} on {topic}", inbound.method);

        match wc_request {
            WcRequest::PairingDelete(params) => {
                self.on_pairing_delete(&inbound, params).await
            }
            WcRequest::PairingPing(_) => self.on_pairing_ping(&inbound).await,
            WcRequest::SessionPropose(params) => {
                self.on_session_propose(&inbound, params).await
            }
            WcRequest::SessionSettle(params) => {
                self.on_session_settle(&inbound, params).await
            }
            WcRequest::SessionUpdate(params) => {
                self.on_session_update(&inbound, params).await
            }
            WcRequest::SessionExtend(params) => {
                self.on_session_extend(&inbound, params).await
            }
            WcRequest::SessionRequest(params) => {
                self.on_session_request(&inbound, params).await
            }
            WcRequest::SessionEvent(params) => {
                self.on_session_event(&inbound, params).await
            }
            WcRequest::SessionDelete(params) => {
                self.on_session_delete(&inbound, params).await
            }
            WcRequest::SessionPing(_) => self.on_session_ping(&inbound).await,
        }
    }

    async fn handle_response(
        &mut self,
        topic: &Topic,
        response: JsonRpcResponse,
    ) -> Result<()> {
        let Some(pending) =
            self.interactor.correlate(&mut self.store, topic, &response)?
        else {
            return Ok(());
        };
        self.finish_request(pending, response.into_outcome()).await
    }

    async fn finish_request(
        &mut self,
        mut pending: PendingRequest,
        outcome: Result<Value, ErrorObject>,
    ) -> Result<()> {
        let id = pending.id();
        let kind = std::mem::replace(&mut pending.kind, PendingKind::Plain);

        let (result, follow_up) = match (kind, outcome) {
            (PendingKind::Propose { key_pair, params }, Ok(value)) => {
                let topic = pending.record.topic.clone();
                match self
                    .on_proposal_approved(&topic, &key_pair, params, &value)
                    .await
                {
                    Ok(()) => (Ok(value), Ok(())),
                    Err(e) => {
                        warn!("could not open session from proposal {id}: {e}");
                        (Err(e), Ok(()))
                    }
                }
            }
            (PendingKind::Propose { .. }, Err(reason)) => {
                info!("proposal {id} rejected: {}", reason.message);
                self.emit(EngineEvent::SessionRejected {
                    proposal_id: id,
                    pairing_topic: pending.record.topic.clone(),
                    reason: reason.clone(),
                });
                (Err(reason.into()), Ok(()))
            }
            (PendingKind::Settle { topic }, Ok(value)) => {
                (Ok(value), self.on_settle_acknowledged(&topic))
            }
            (PendingKind::Settle { topic }, Err(reason)) => {
                warn!("peer refused settlement of {topic}: {}", reason.message);
                let removed = self.remove_sequence(&topic).await;
                self.emit(EngineEvent::SessionDeleted {
                    topic,
                    reason: DeleteParams {
                        code: reason.code,
                        message: reason.message.clone(),
                    },
                });
                (Err(reason.into()), removed)
            }
            (
                PendingKind::Update {
                    topic,
                    previous,
                    applied,
                },
                Err(reason),
            ) => (
                Err(reason.into()),
                self.revert_namespaces(&topic, previous, &applied),
            ),
            (
                PendingKind::Extend {
                    topic,
                    previous,
                    applied,
                },
                Err(reason),
            ) => (
                Err(reason.into()),
                self.revert_expiry(&topic, previous, applied),
            ),
            (_, outcome) => (outcome.map_err(Error::from), Ok(())),
        };

        pending.complete(result);
        follow_up
    }

    async fn expire_request(&mut self, mut pending: PendingRequest) -> Result<()> {
        let id = pending.id();
        let kind = std::mem::replace(&mut pending.kind, PendingKind::Plain);

        let (error, follow_up) = match kind {
            PendingKind::Ping { topic } => (Error::PingTimeout(topic), Ok(())),
            PendingKind::Settle { topic } => {
                warn!("settlement of {topic} was never acknowledged");
                let removed = self.remove_sequence(&topic).await;
                self.emit(EngineEvent::SessionExpired(topic));
                (Error::RequestExpired(id), removed)
            }
            PendingKind::Update {
                topic,
                previous,
                applied,
            } => (
                Error::RequestExpired(id),
                self.revert_namespaces(&topic, previous, &applied),
            ),
            PendingKind::Extend {
                topic,
                previous,
                applied,
            } => (
                Error::RequestExpired(id),
                self.revert_expiry(&topic, previous, applied),
            ),
            PendingKind::Plain | PendingKind::Propose { .. } => {
                (Error::RequestExpired(id), Ok(()))
            }
        };

        pending.complete(Err(error));
        follow_up
    }

    async fn sweep(&mut self) -> Result<()> {
        let now = self.now();
        for sequence in self.store.sequences()? {
            if sequence.expiry() > now {
                continue;
            }
            match sequence {
                Sequence::Pairing(pairing) => {
                    self.expire_pairing(&pairing.topic).await?
                }
                Sequence::Session(session) => {
                    self.expire_session(&session.topic).await?
                }
            }
        }

        let instant = Instant::now();
        for pending in self.interactor.expire(&mut self.store, instant)? {
            self.expire_request(pending).await?;
        }

        self.proposals.retain(|id, proposal| {
            let live = proposal.expiry_timestamp > now;
            if !live {
                debug!("proposal {id} expired");
            }
            live
        });
        let unanswered: Vec<RpcId> = self
            .inbound_requests
            .iter()
            .filter(|(_, request)| request.deadline <= instant)
            .map(|(id, _)| *id)
            .collect();
        for id in unanswered {
            debug!("session request {id} was never answered");
            self.forget_inbound(id)?;
        }

        let stale: Vec<Topic> = self
            .pending_settlements
            .iter()
            .filter(|(_, settlement)| settlement.deadline <= instant)
            .map(|(topic, _)| topic.clone())
            .collect();
        for topic in stale {
            warn!("gave up waiting for settlement on {topic}");
            self.pending_settlements.remove(&topic);
            if let Err(e) = self.interactor.unsubscribe(&topic).await {
                warn!("unsubscribing from {topic} failed: {e}");
            }
            self.emit(EngineEvent::SessionExpired(topic));
        }
        Ok(())
    }

    /// Deletes a sequence here only: stored state, its pending requests and
    /// the relay subscription.
    pub(crate) async fn remove_sequence(&mut self, topic: &Topic) -> Result<()> {
        let ids = self.store.delete(topic)?;
        self.interactor.forget(&ids);
        self.inbound_requests.retain(|_, r| &r.topic != topic);
        if let Err(e) = self.interactor.unsubscribe(topic).await {
            warn!("unsubscribing from {topic} failed: {e}");
        }
        Ok(())
    }

    pub(crate) async fn ack(&self, inbound: &Inbound) -> Result<()> {
        self.interactor
            .publish_response(
                &inbound.topic,
                &inbound.sym_key,
                JsonRpcResponse::result(inbound.id, true),
                inbound.method.response_irn(),
            )
            .await
    }

    pub(crate) async fn nack(
        &self,
        inbound: &Inbound,
        code: i64,
        message: impl Into<String>,
    ) -> Result<()> {
        self.interactor
            .respond_with_error(
                &inbound.topic,
                &inbound.sym_key,
                inbound.id,
                ErrorObject::new(code, message),
                inbound.method.response_irn(),
            )
            .await
    }

    /// The method arrived on a topic that does not hold the sequence it
    /// needs.
    pub(crate) async fn reject_unknown_sequence(&self, inbound: &Inbound) -> Result<()> {
        self.nack(
            inbound,
            NO_MATCHING_KEY,
            format!("No matching key. {} on {}", inbound.method, inbound.topic),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{PublicKey, SymKey};
    use crate::relay::MemoryRelayHub;
    use crate::store::{InboundRequestRecord, MemoryStore};
    use crate::types::{
        Metadata, Namespace, Participant, Relay, SessionProposeParams,
    };

    fn engine(store: MemoryStore) -> (Engine, broadcast::Receiver<EngineEvent>) {
        let hub = MemoryRelayHub::new();
        let (relay, _relay_events) = hub.connect();
        let (events, rx) = broadcast::channel(16);
        let engine = Engine::new(
            ClientConfig::new(Metadata::default()),
            relay,
            Box::new(store),
            events,
        )
        .unwrap();
        (engine, rx)
    }

    fn participant() -> Participant {
        Participant {
            public_key: PublicKey::from_bytes([7u8; 32]),
            metadata: Metadata::default(),
        }
    }

    fn namespaces(chain: &str) -> Namespaces {
        Namespaces::from([(
            "eip155".to_string(),
            Namespace::new([chain], ["personal_sign"], ["chainChanged"]),
        )])
    }

    fn session(key: SymKey, namespaces: Namespaces) -> Session {
        Session {
            topic: key.topic(),
            pairing_topic: Topic::from("pairing"),
            sym_key: key,
            relay: Relay::default(),
            expiry: unix_timestamp() + 3600,
            namespaces,
            required_namespaces: Namespaces::new(),
            optional_namespaces: Namespaces::new(),
            self_participant: participant(),
            peer_participant: participant(),
            controller: true,
            acknowledged: true,
        }
    }

    #[tokio::test]
    async fn unanswered_session_requests_survive_restart() {
        let store = MemoryStore::new();
        let topic = Topic::from("session");
        let mut seeded = SequenceStore::new(Box::new(store.clone()));
        seeded
            .insert_inbound(&InboundRequestRecord {
                id: 42,
                topic: topic.clone(),
                expiry: unix_timestamp() + 60,
            })
            .unwrap();

        let (engine, _events) = engine(store);
        let restored = engine.inbound_requests.get(&42).unwrap();
        assert_eq!(restored.topic, topic);
        assert!(restored.deadline > Instant::now());
    }

    #[tokio::test]
    async fn rollback_leaves_newer_namespaces_alone() {
        let (mut engine, _events) = engine(MemoryStore::new());
        let key = SymKey::generate();
        let topic = key.topic();
        engine.store.upsert(session(key, namespaces("eip155:10"))).unwrap();

        // an older update fails after a newer one landed
        engine
            .revert_namespaces(&topic, namespaces("eip155:1"), &namespaces("eip155:137"))
            .unwrap();
        assert_eq!(
            engine.store.session(&topic).unwrap().namespaces,
            namespaces("eip155:10")
        );

        engine
            .revert_namespaces(&topic, namespaces("eip155:1"), &namespaces("eip155:10"))
            .unwrap();
        assert_eq!(
            engine.store.session(&topic).unwrap().namespaces,
            namespaces("eip155:1")
        );
    }

    #[tokio::test]
    async fn rollback_leaves_newer_expiry_alone() {
        let (mut engine, _events) = engine(MemoryStore::new());
        let key = SymKey::generate();
        let topic = key.topic();
        let current = session(key, namespaces("eip155:1"));
        let expiry = current.expiry;
        engine.store.upsert(current).unwrap();

        engine.revert_expiry(&topic, expiry - 100, expiry - 50).unwrap();
        assert_eq!(engine.store.session(&topic).unwrap().expiry, expiry);

        engine.revert_expiry(&topic, expiry - 100, expiry).unwrap();
        assert_eq!(engine.store.session(&topic).unwrap().expiry, expiry - 100);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_settlement_is_reported() {
        let (mut engine, mut events) = engine(MemoryStore::new());
        let key = SymKey::generate();
        let topic = key.topic();
        engine.pending_settlements.insert(
            topic.clone(),
            PendingSettlement {
                sym_key: key,
                pairing_topic: Topic::from("pairing"),
                proposal: SessionProposeParams {
                    required_namespaces: Namespaces::new(),
                    optional_namespaces: Namespaces::new(),
                    relays: vec![Relay::default()],
                    proposer: participant(),
                    pairing_topic: None,
                    expiry_timestamp: None,
                },
                responder_public_key: PublicKey::from_bytes([9u8; 32]),
                deadline: Instant::now() + std::time::Duration::from_secs(300),
            },
        );

        engine.sweep().await.unwrap();
        assert!(engine.pending_settlements.contains_key(&topic));
        assert!(events.try_recv().is_err());

        tokio::time::advance(std::time::Duration::from_secs(300)).await;
        engine.sweep().await.unwrap();
        assert!(engine.pending_settlements.is_empty());
        assert_eq!(events.try_recv().unwrap(), EngineEvent::SessionExpired(topic));
    }
}
