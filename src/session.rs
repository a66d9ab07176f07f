/// Sessions
///
/// Proposal, settlement and the lifetime of a session: requests, events,
/// namespace updates, extension and deletion. The approver of a proposal
/// becomes the session controller.
///
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::constants::{
    INVALID_PARAMS, PROPOSAL_TTL, SESSION_TTL, UNAUTHORIZED_EVENT,
    UNAUTHORIZED_EXTEND_REQUEST, UNAUTHORIZED_METHOD,
    UNAUTHORIZED_UPDATE_REQUEST, UNSUPPORTED_NAMESPACE_KEY, USER_DISCONNECTED,
    USER_REJECTED, SESSION_REQUEST_EXPIRED,
};
use crate::crypto::{self, KeyPair, PublicKey, SymKey};
use crate::engine::{Engine, EngineEvent, Inbound};
use crate::error::{Error, Result};
use crate::interactor::{Outbound, PendingKind, Responder};
use crate::namespace;
use crate::rpc::{ErrorObject, JsonRpcResponse, RpcId, WcMethod, WcRequest};
use crate::store::InboundRequestRecord;
use crate::types::{
    DeleteParams, EventPayload, Namespaces, Participant, Relay,
    RequestPayload, SessionEventParams, SessionExtendParams,
    SessionProposeParams, SessionProposeResponse, SessionRequestParams,
    SessionSettleParams, SessionUpdateParams, Topic,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub topic: Topic,
    pub pairing_topic: Topic,
    pub sym_key: SymKey,
    pub relay: Relay,
    pub expiry: u64,
    pub namespaces: Namespaces,
    pub required_namespaces: Namespaces,
    pub optional_namespaces: Namespaces,
    pub self_participant: Participant,
    pub peer_participant: Participant,
    /// This client approved the proposal and controls the session.
    pub controller: bool,
    pub acknowledged: bool,
}

/// A received `wc_sessionPropose` waiting for approve or reject.
#[derive(Clone, Debug, PartialEq)]
pub struct Proposal {
    pub id: RpcId,
    pub pairing_topic: Topic,
    pub proposer: Participant,
    pub required_namespaces: Namespaces,
    pub optional_namespaces: Namespaces,
    pub relays: Vec<Relay>,
    pub expiry_timestamp: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionRequest {
    pub chain_id: String,
    pub method: String,
    pub params: Value,
    /// Falls back to the client's default request ttl.
    pub ttl: Option<Duration>,
}

impl SessionRequest {
    pub fn new(
        chain_id: impl Into<String>,
        method: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            method: method.into(),
            params,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

// Proposer side, between the approval response and wc_sessionSettle.
#[derive(Debug)]
pub(crate) struct PendingSettlement {
    pub sym_key: SymKey,
    pub pairing_topic: Topic,
    pub proposal: SessionProposeParams,
    pub responder_public_key: PublicKey,
    pub deadline: Instant,
}

// Wallet side, a session request the application still has to answer.
#[derive(Debug)]
pub(crate) struct InboundRequest {
    pub topic: Topic,
    pub deadline: Instant,
}

impl InboundRequest {
    pub(crate) fn from_record(record: &InboundRequestRecord, now: u64) -> Self {
        let remaining = record.expiry.saturating_sub(now);
        Self {
            topic: record.topic.clone(),
            deadline: Instant::now() + Duration::from_secs(remaining),
        }
    }
}

impl Engine {
    /// Session the caller is allowed to drive as controller.
    fn controlled_session(
        &self,
        topic: &Topic,
        action: &'static str,
    ) -> Result<Session> {
        let session = self.acknowledged_session(topic)?;
        if !session.controller {
            return Err(Error::NotController(action));
        }
        Ok(session)
    }

    fn acknowledged_session(&self, topic: &Topic) -> Result<Session> {
        let session = self.store.live_session(topic, self.now())?;
        if !session.acknowledged {
            return Err(Error::SessionNotAcknowledged(topic.clone()));
        }
        Ok(session)
    }

    pub(crate) async fn propose(
        &mut self,
        pairing_topic: &Topic,
        required_namespaces: Namespaces,
        optional_namespaces: Namespaces,
        responder: Responder,
    ) -> Result<RpcId> {
        let now = self.now();
        let pairing = self.store.live_pairing(pairing_topic, now)?;
        namespace::validate(&required_namespaces)?;
        namespace::validate(&optional_namespaces)?;

        let key_pair = crypto::generate_key_pair();
        let params = SessionProposeParams {
            required_namespaces,
            optional_namespaces,
            relays: vec![pairing.relay.clone()],
            proposer: Participant {
                public_key: key_pair.public_key(),
                metadata: self.config.metadata.clone(),
            },
            pairing_topic: Some(pairing.topic.clone()),
            expiry_timestamp: Some(now + PROPOSAL_TTL),
        };

        let id = self
            .interactor
            .publish_request(
                &mut self.store,
                Outbound {
                    topic: &pairing.topic,
                    sym_key: &pairing.sym_key,
                    request: WcRequest::SessionPropose(params.clone()),
                    ttl: Some(Duration::from_secs(PROPOSAL_TTL)),
                    kind: PendingKind::Propose { key_pair, params },
                    responder: Some(responder),
                },
            )
            .await?;
        info!("proposed session {id} on {pairing_topic}");
        Ok(id)
    }

    /// Proposer: the wallet answered our proposal with its public key.
    pub(crate) async fn on_proposal_approved(
        &mut self,
        pairing_topic: &Topic,
        key_pair: &KeyPair,
        proposal: SessionProposeParams,
        result: &Value,
    ) -> Result<()> {
        let response: SessionProposeResponse =
            serde_json::from_value(result.clone())?;
        let shared = crypto::derive_shared_secret(
            key_pair,
            &response.responder_public_key,
        )?;
        let sym_key = crypto::derive_sym_key(&shared)?;
        let topic = sym_key.topic();

        self.interactor.subscribe(&topic).await?;
        debug!("waiting for settlement on {topic}");
        self.pending_settlements.insert(
            topic,
            PendingSettlement {
                sym_key,
                pairing_topic: pairing_topic.clone(),
                proposal,
                responder_public_key: response.responder_public_key,
                deadline: Instant::now() + Duration::from_secs(PROPOSAL_TTL),
            },
        );
        Ok(())
    }

    pub(crate) async fn approve(
        &mut self,
        proposal_id: RpcId,
        namespaces: Namespaces,
    ) -> Result<Session> {
        let now = self.now();
        let proposal = self
            .proposals
            .get(&proposal_id)
            .cloned()
            .ok_or(Error::ProposalNotFound(proposal_id))?;
        if proposal.expiry_timestamp <= now {
            self.proposals.remove(&proposal_id);
            return Err(Error::RequestExpired(proposal_id));
        }

        // nothing is stored or sent unless the approval is acceptable
        namespace::validate(&namespaces)?;
        namespace::ensure_satisfies(&proposal.required_namespaces, &namespaces)?;

        let pairing = self.store.live_pairing(&proposal.pairing_topic, now)?;
        let key_pair = crypto::generate_key_pair();
        let shared = crypto::derive_shared_secret(
            &key_pair,
            &proposal.proposer.public_key,
        )?;
        let sym_key = crypto::derive_sym_key(&shared)?;

        let session = Session {
            topic: sym_key.topic(),
            pairing_topic: pairing.topic.clone(),
            sym_key,
            relay: proposal.relays.first().cloned().unwrap_or_default(),
            expiry: now + SESSION_TTL,
            namespaces,
            required_namespaces: proposal.required_namespaces.clone(),
            optional_namespaces: proposal.optional_namespaces.clone(),
            self_participant: Participant {
                public_key: key_pair.public_key(),
                metadata: self.config.metadata.clone(),
            },
            peer_participant: proposal.proposer.clone(),
            controller: true,
            acknowledged: false,
        };
        self.store.upsert(session.clone())?;

        if let Err(e) = self.settle(&proposal, &session).await {
            warn!("approving {proposal_id} failed, rolling back: {e}");
            self.remove_sequence(&session.topic).await?;
            return Err(e);
        }

        self.proposals.remove(&proposal_id);
        info!("approved {proposal_id}, session {}", session.topic);
        Ok(session)
    }

    async fn settle(&mut self, proposal: &Proposal, session: &Session) -> Result<()> {
        let pairing = self.store.pairing(&proposal.pairing_topic)?;
        self.interactor.subscribe(&session.topic).await?;

        let response = SessionProposeResponse {
            relay: session.relay.clone(),
            responder_public_key: session.self_participant.public_key,
        };
        self.interactor
            .publish_response(
                &pairing.topic,
                &pairing.sym_key,
                JsonRpcResponse::result(proposal.id, serde_json::to_value(response)?),
                WcMethod::SessionPropose.response_irn(),
            )
            .await?;

        let settle = SessionSettleParams {
            relay: session.relay.clone(),
            controller: session.self_participant.clone(),
            namespaces: session.namespaces.clone(),
            expiry: session.expiry,
            session_properties: None,
        };
        self.interactor
            .publish_request(
                &mut self.store,
                Outbound {
                    topic: &session.topic,
                    sym_key: &session.sym_key,
                    request: WcRequest::SessionSettle(settle),
                    ttl: None,
                    kind: PendingKind::Settle {
                        topic: session.topic.clone(),
                    },
                    responder: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Controller: the peer acknowledged `wc_sessionSettle`.
    pub(crate) fn on_settle_acknowledged(&mut self, topic: &Topic) -> Result<()> {
        let mut session = self.store.session(topic)?;
        session.acknowledged = true;
        self.store.upsert(session.clone())?;
        info!("session {topic} settled");
        self.emit(EngineEvent::SessionSettled(session));
        Ok(())
    }

    pub(crate) async fn reject(
        &mut self,
        proposal_id: RpcId,
        reason: String,
    ) -> Result<()> {
        let proposal = self
            .proposals
            .get(&proposal_id)
            .ok_or(Error::ProposalNotFound(proposal_id))?;
        let pairing = self.store.pairing(&proposal.pairing_topic)?;

        self.interactor
            .respond_with_error(
                &pairing.topic,
                &pairing.sym_key,
                proposal_id,
                ErrorObject::new(USER_REJECTED, reason),
                WcMethod::SessionPropose.reject_irn(),
            )
            .await?;
        self.proposals.remove(&proposal_id);
        info!("rejected proposal {proposal_id}");
        Ok(())
    }

    pub(crate) async fn update_namespaces(
        &mut self,
        topic: &Topic,
        namespaces: Namespaces,
        responder: Responder,
    ) -> Result<RpcId> {
        let mut session = self.controlled_session(topic, "update namespaces")?;
        namespace::validate(&namespaces)?;
        namespace::ensure_satisfies(&session.required_namespaces, &namespaces)?;

        let previous =
            std::mem::replace(&mut session.namespaces, namespaces.clone());
        self.store.upsert(session.clone())?;

        let sent = self
            .interactor
            .publish_request(
                &mut self.store,
                Outbound {
                    topic,
                    sym_key: &session.sym_key,
                    request: WcRequest::SessionUpdate(SessionUpdateParams {
                        namespaces,
                    }),
                    ttl: None,
                    kind: PendingKind::Update {
                        topic: topic.clone(),
                        previous: previous.clone(),
                        applied: session.namespaces.clone(),
                    },
                    responder: Some(responder),
                },
            )
            .await;
        if sent.is_err() {
            session.namespaces = previous;
            self.store.upsert(session)?;
        }
        sent
    }

    /// Undoes a namespace update the peer never took, unless a later
    /// update has replaced it since.
    pub(crate) fn revert_namespaces(
        &mut self,
        topic: &Topic,
        previous: Namespaces,
        applied: &Namespaces,
    ) -> Result<()> {
        let Ok(mut session) = self.store.session(topic) else {
            return Ok(());
        };
        if &session.namespaces != applied {
            debug!("namespaces of {topic} changed again, not reverting");
            return Ok(());
        }
        warn!("peer did not take the namespace update on {topic}, reverting");
        session.namespaces = previous;
        self.store.upsert(session)
    }

    fn check_extension(&self, session: &Session, expiry: u64) -> Result<()> {
        if expiry <= session.expiry || expiry > self.now() + SESSION_TTL {
            return Err(Error::InvalidExpiry(expiry));
        }
        Ok(())
    }

    pub(crate) async fn extend(
        &mut self,
        topic: &Topic,
        expiry: u64,
        responder: Responder,
    ) -> Result<RpcId> {
        let mut session = self.controlled_session(topic, "extend the session")?;
        self.check_extension(&session, expiry)?;

        let previous = std::mem::replace(&mut session.expiry, expiry);
        self.store.upsert(session.clone())?;

        let sent = self
            .interactor
            .publish_request(
                &mut self.store,
                Outbound {
                    topic,
                    sym_key: &session.sym_key,
                    request: WcRequest::SessionExtend(SessionExtendParams {
                        expiry,
                    }),
                    ttl: None,
                    kind: PendingKind::Extend {
                        topic: topic.clone(),
                        previous,
                        applied: expiry,
                    },
                    responder: Some(responder),
                },
            )
            .await;
        if sent.is_err() {
            session.expiry = previous;
            self.store.upsert(session)?;
        }
        sent
    }

    pub(crate) fn revert_expiry(
        &mut self,
        topic: &Topic,
        previous: u64,
        applied: u64,
    ) -> Result<()> {
        let Ok(mut session) = self.store.session(topic) else {
            return Ok(());
        };
        if session.expiry != applied {
            debug!("expiry of {topic} changed again, not reverting");
            return Ok(());
        }
        warn!("peer did not take the extension of {topic}, reverting");
        session.expiry = previous;
        self.store.upsert(session)
    }

    pub(crate) async fn request(
        &mut self,
        topic: &Topic,
        request: SessionRequest,
        responder: Responder,
    ) -> Result<RpcId> {
        let session = self.acknowledged_session(topic)?;
        namespace::authorize_method(
            &session.namespaces,
            &request.chain_id,
            &request.method,
        )?;

        let ttl = request.ttl.unwrap_or(self.config.default_request_ttl);
        let params = SessionRequestParams {
            request: RequestPayload {
                method: request.method,
                params: request.params,
                expiry_timestamp: Some(self.now() + ttl.as_secs()),
            },
            chain_id: request.chain_id,
        };
        self.interactor
            .publish_request(
                &mut self.store,
                Outbound {
                    topic,
                    sym_key: &session.sym_key,
                    request: WcRequest::SessionRequest(params),
                    ttl: Some(ttl),
                    kind: PendingKind::Plain,
                    responder: Some(responder),
                },
            )
            .await
    }

    /// Answers a session request received earlier. A request that is
    /// unknown or past its expiry gets an expiry error sent to the peer
    /// instead. The request stays answerable until a publish succeeds.
    pub(crate) async fn respond(
        &mut self,
        topic: &Topic,
        response: JsonRpcResponse,
    ) -> Result<()> {
        let session = self.store.live_session(topic, self.now())?;
        let id = response.id();
        let irn = WcMethod::SessionRequest.response_irn();

        let known = match self.inbound_requests.get(&id) {
            Some(inbound) if &inbound.topic == topic => {
                Some(inbound.deadline > Instant::now())
            }
            _ => None,
        };

        if known == Some(true) {
            self.interactor
                .publish_response(topic, &session.sym_key, response, irn)
                .await?;
            return self.forget_inbound(id);
        }

        self.interactor
            .respond_with_error(
                topic,
                &session.sym_key,
                id,
                ErrorObject::new(SESSION_REQUEST_EXPIRED, "Session request expired"),
                irn,
            )
            .await?;
        if known.is_some() {
            self.forget_inbound(id)?;
        }
        Err(Error::RequestExpired(id))
    }

    pub(crate) fn forget_inbound(&mut self, id: RpcId) -> Result<()> {
        self.inbound_requests.remove(&id);
        self.store.remove_inbound(id)
    }

    pub(crate) async fn emit_event(
        &mut self,
        topic: &Topic,
        chain_id: String,
        event: EventPayload,
    ) -> Result<()> {
        let session = self.acknowledged_session(topic)?;
        namespace::authorize_event(&session.namespaces, &chain_id, &event.name)?;

        self.interactor
            .publish_request(
                &mut self.store,
                Outbound {
                    topic,
                    sym_key: &session.sym_key,
                    request: WcRequest::SessionEvent(SessionEventParams {
                        event,
                        chain_id,
                    }),
                    ttl: None,
                    kind: PendingKind::Plain,
                    responder: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Best effort `wc_sessionDelete`, then local deletion no matter what.
    pub(crate) async fn disconnect(&mut self, topic: &Topic) -> Result<()> {
        let session = self.store.session(topic)?;
        let reason = DeleteParams {
            code: USER_DISCONNECTED,
            message: "User disconnected.".to_string(),
        };

        let outbound = Outbound {
            topic,
            sym_key: &session.sym_key,
            request: WcRequest::SessionDelete(reason.clone()),
            ttl: None,
            kind: PendingKind::Plain,
            responder: None,
        };
        if let Err(e) =
            self.interactor.publish_request(&mut self.store, outbound).await
        {
            warn!("could not notify peer about deleting {topic}: {e}");
        }

        self.remove_sequence(topic).await?;
        info!("disconnected session {topic}");
        self.emit(EngineEvent::SessionDeleted {
            topic: topic.clone(),
            reason,
        });
        Ok(())
    }

    pub(crate) async fn expire_session(&mut self, topic: &Topic) -> Result<()> {
        if self.store.get(topic)?.is_none() {
            return Ok(());
        }
        info!("session {topic} expired");
        self.remove_sequence(topic).await?;
        self.emit(EngineEvent::SessionExpired(topic.clone()));
        Ok(())
    }

    pub(crate) async fn on_session_propose(
        &mut self,
        inbound: &Inbound,
        params: SessionProposeParams,
    ) -> Result<()> {
        if self.store.pairing(&inbound.topic).is_err() {
            return self.reject_unknown_sequence(inbound).await;
        }

        let now = self.now();
        let expiry = params.expiry_timestamp.unwrap_or(now + PROPOSAL_TTL);
        if expiry <= now {
            debug!("ignoring expired proposal {}", inbound.id);
            return Ok(());
        }
        if let Err(e) = namespace::validate(&params.required_namespaces)
            .and_then(|()| namespace::validate(&params.optional_namespaces))
        {
            return self
                .nack(inbound, UNSUPPORTED_NAMESPACE_KEY, e.to_string())
                .await;
        }

        self.set_peer_metadata(&inbound.topic, params.proposer.metadata.clone())?;
        let proposal = Proposal {
            id: inbound.id,
            pairing_topic: inbound.topic.clone(),
            proposer: params.proposer,
            required_namespaces: params.required_namespaces,
            optional_namespaces: params.optional_namespaces,
            relays: params.relays,
            expiry_timestamp: expiry,
        };
        info!("received proposal {} on {}", proposal.id, proposal.pairing_topic);
        self.proposals.insert(proposal.id, proposal.clone());
        self.emit(EngineEvent::SessionProposed(proposal));
        Ok(())
    }

    pub(crate) async fn on_session_settle(
        &mut self,
        inbound: &Inbound,
        params: SessionSettleParams,
    ) -> Result<()> {
        let Some(pending) = self.pending_settlements.remove(&inbound.topic) else {
            return self.reject_unknown_sequence(inbound).await;
        };

        if params.controller.public_key != pending.responder_public_key {
            warn!("settlement on {} from an unexpected key", inbound.topic);
            return self
                .nack(inbound, INVALID_PARAMS, "controller key mismatch")
                .await;
        }
        let checked = namespace::validate(&params.namespaces).and_then(|()| {
            namespace::ensure_satisfies(
                &pending.proposal.required_namespaces,
                &params.namespaces,
            )
        });
        if let Err(e) = checked {
            return self
                .nack(inbound, UNSUPPORTED_NAMESPACE_KEY, e.to_string())
                .await;
        }
        if params.expiry <= self.now() {
            return self.nack(inbound, INVALID_PARAMS, "expiry in the past").await;
        }

        let session = Session {
            topic: inbound.topic.clone(),
            pairing_topic: pending.pairing_topic.clone(),
            sym_key: pending.sym_key,
            relay: params.relay,
            expiry: params.expiry,
            namespaces: params.namespaces,
            required_namespaces: pending.proposal.required_namespaces,
            optional_namespaces: pending.proposal.optional_namespaces,
            self_participant: pending.proposal.proposer,
            peer_participant: params.controller,
            controller: false,
            acknowledged: true,
        };
        self.store.upsert(session.clone())?;
        if let Err(e) = self.set_peer_metadata(
            &session.pairing_topic,
            session.peer_participant.metadata.clone(),
        ) {
            debug!("pairing of {} is gone: {e}", session.topic);
        }

        self.ack(inbound).await?;
        info!("session {} settled", session.topic);
        self.emit(EngineEvent::SessionSettled(session));
        Ok(())
    }

    pub(crate) async fn on_session_update(
        &mut self,
        inbound: &Inbound,
        params: SessionUpdateParams,
    ) -> Result<()> {
        let Ok(mut session) = self.store.session(&inbound.topic) else {
            return self.reject_unknown_sequence(inbound).await;
        };
        if session.controller {
            return self
                .nack(inbound, UNAUTHORIZED_UPDATE_REQUEST, "Unauthorized update request")
                .await;
        }
        if let Err(e) = namespace::validate(&params.namespaces) {
            return self.nack(inbound, INVALID_PARAMS, e.to_string()).await;
        }

        session.namespaces = params.namespaces;
        self.store.upsert(session.clone())?;
        self.ack(inbound).await?;
        self.emit(EngineEvent::SessionUpdated {
            topic: session.topic,
            namespaces: session.namespaces,
        });
        Ok(())
    }

    pub(crate) async fn on_session_extend(
        &mut self,
        inbound: &Inbound,
        params: SessionExtendParams,
    ) -> Result<()> {
        let Ok(mut session) = self.store.session(&inbound.topic) else {
            return self.reject_unknown_sequence(inbound).await;
        };
        if session.controller {
            return self
                .nack(inbound, UNAUTHORIZED_EXTEND_REQUEST, "Unauthorized extend request")
                .await;
        }
        if let Err(e) = self.check_extension(&session, params.expiry) {
            return self.nack(inbound, INVALID_PARAMS, e.to_string()).await;
        }

        session.expiry = params.expiry;
        self.store.upsert(session.clone())?;
        self.ack(inbound).await?;
        self.emit(EngineEvent::SessionExtended {
            topic: session.topic,
            expiry: session.expiry,
        });
        Ok(())
    }

    pub(crate) async fn on_session_request(
        &mut self,
        inbound: &Inbound,
        params: SessionRequestParams,
    ) -> Result<()> {
        let Ok(session) = self.store.session(&inbound.topic) else {
            return self.reject_unknown_sequence(inbound).await;
        };
        if let Err(e) = namespace::authorize_method(
            &session.namespaces,
            &params.chain_id,
            &params.request.method,
        ) {
            return self.nack(inbound, UNAUTHORIZED_METHOD, e.to_string()).await;
        }

        let now = self.now();
        let record = InboundRequestRecord {
            id: inbound.id,
            topic: inbound.topic.clone(),
            expiry: params
                .request
                .expiry_timestamp
                .unwrap_or(now + self.config.default_request_ttl.as_secs()),
        };
        self.store.insert_inbound(&record)?;
        self.inbound_requests
            .insert(inbound.id, InboundRequest::from_record(&record, now));
        self.emit(EngineEvent::SessionRequest {
            topic: inbound.topic.clone(),
            id: inbound.id,
            request: params,
        });
        Ok(())
    }

    pub(crate) async fn on_session_event(
        &mut self,
        inbound: &Inbound,
        params: SessionEventParams,
    ) -> Result<()> {
        let Ok(session) = self.store.session(&inbound.topic) else {
            return self.reject_unknown_sequence(inbound).await;
        };
        if let Err(e) = namespace::authorize_event(
            &session.namespaces,
            &params.chain_id,
            &params.event.name,
        ) {
            return self.nack(inbound, UNAUTHORIZED_EVENT, e.to_string()).await;
        }

        self.ack(inbound).await?;
        self.emit(EngineEvent::SessionEvent {
            topic: inbound.topic.clone(),
            event: params,
        });
        Ok(())
    }

    pub(crate) async fn on_session_delete(
        &mut self,
        inbound: &Inbound,
        params: DeleteParams,
    ) -> Result<()> {
        if self.store.session(&inbound.topic).is_err() {
            return self.reject_unknown_sequence(inbound).await;
        }
        info!(
            "peer deleted session {} ({}: {})",
            inbound.topic, params.code, params.message
        );
        if let Err(e) = self.ack(inbound).await {
            warn!("could not acknowledge session delete: {e}");
        }
        self.remove_sequence(&inbound.topic).await?;
        self.emit(EngineEvent::SessionDeleted {
            topic: inbound.topic.clone(),
            reason: params,
        });
        Ok(())
    }

    pub(crate) async fn on_session_ping(&mut self, inbound: &Inbound) -> Result<()> {
        if self.store.session(&inbound.topic).is_err() {
            return self.reject_unknown_sequence(inbound).await;
        }
        self.ack(inbound).await
    }
}

/// Wallet helper: a result for a pending session request.
pub fn approve_request(id: RpcId, result: impl Into<Value>) -> JsonRpcResponse {
    JsonRpcResponse::result(id, result)
}

/// Wallet helper: the user declined a pending session request.
pub fn reject_request(id: RpcId) -> JsonRpcResponse {
    JsonRpcResponse::error(id, ErrorObject::new(USER_REJECTED, "User rejected."))
}
