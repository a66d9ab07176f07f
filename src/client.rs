/// Client
///
/// Cloneable handle over the engine task. Every call is a message to the
/// engine; results come back on a oneshot channel.
///
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use log::error;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;

use crate::config::ClientConfig;
use crate::engine::{Command, Engine, EngineEvent, Reply};
use crate::error::{Error, Result};
use crate::interactor::Responder;
use crate::pairing::Pairing;
use crate::relay::{RelayEvent, RelayTransport};
use crate::rpc::{JsonRpcResponse, RpcId};
use crate::session::{Proposal, Session, SessionRequest};
use crate::store::{PersistentStore, StoreEntry};
use crate::types::{EventPayload, Namespaces, Topic};
use crate::uri::PairingUri;

/// Answer to a request sent to the peer.
#[derive(Debug)]
pub struct PendingResponse {
    pub id: RpcId,
    rx: oneshot::Receiver<Result<Value>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PendingResponse {
    /// Waits for the peer's result. Peer errors come back as
    /// [`Error::JsonRpc`], a missing answer as [`Error::RequestExpired`].
    pub async fn response(self) -> Result<Value> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::RequestCancelled(self.id)),
        }
    }

    /// Stops tracking the request. The message already sent stays sent and
    /// a late answer is dropped.
    pub fn cancel(self) {
        let _ = self.commands.send(Command::Cancel { id: self.id });
    }
}

#[derive(Clone)]
pub struct SignClient {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<EngineEvent>,
}

impl std::fmt::Debug for SignClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignClient").finish_non_exhaustive()
    }
}

impl SignClient {
    /// Starts the engine on the current tokio runtime. It runs until the
    /// last handle is dropped.
    pub fn new(
        config: ClientConfig,
        relay: Arc<dyn RelayTransport>,
        relay_events: mpsc::UnboundedReceiver<RelayEvent>,
        store: Box<dyn PersistentStore>,
    ) -> Result<Self> {
        let (events, _) = broadcast::channel(config.event_capacity());
        let engine = Engine::new(config, relay, store, events.clone())?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(engine.run(command_rx, relay_events));

        Ok(Self { commands, events })
    }

    /// Events emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| Error::EngineClosed)?;
        rx.await.map_err(|_| Error::EngineClosed)?
    }

    async fn call_pending(
        &self,
        command: impl FnOnce(Responder, Reply<RpcId>) -> Command,
    ) -> Result<PendingResponse> {
        let (responder, rx) = oneshot::channel();
        let id = self.call(|reply| command(responder, reply)).await?;
        Ok(PendingResponse {
            id,
            rx,
            commands: self.commands.clone(),
        })
    }

    pub async fn create_pairing(&self) -> Result<(Pairing, PairingUri)> {
        self.call(|reply| Command::CreatePairing { reply }).await
    }

    pub async fn pair(&self, uri: &str) -> Result<Pairing> {
        let uri = PairingUri::parse(uri)?;
        self.call(|reply| Command::Pair { uri, reply }).await
    }

    pub async fn delete_pairing(&self, topic: &Topic) -> Result<()> {
        let topic = topic.clone();
        self.call(|reply| Command::DeletePairing { topic, reply })
            .await
    }

    /// Sends `wc_sessionPropose` over a pairing. The response resolves once
    /// the wallet approves or rejects; the session itself arrives as
    /// [`EngineEvent::SessionSettled`].
    pub async fn propose(
        &self,
        pairing_topic: &Topic,
        required: Namespaces,
        optional: Namespaces,
    ) -> Result<PendingResponse> {
        let pairing_topic = pairing_topic.clone();
        self.call_pending(|responder, reply| Command::Propose {
            pairing_topic,
            required,
            optional,
            responder,
            reply,
        })
        .await
    }

    pub async fn approve(
        &self,
        proposal_id: RpcId,
        namespaces: Namespaces,
    ) -> Result<Session> {
        self.call(|reply| Command::Approve {
            proposal_id,
            namespaces,
            reply,
        })
        .await
    }

    pub async fn reject(
        &self,
        proposal_id: RpcId,
        reason: impl Into<String>,
    ) -> Result<()> {
        let reason = reason.into();
        self.call(|reply| Command::Reject {
            proposal_id,
            reason,
            reply,
        })
        .await
    }

    pub async fn update_namespaces(
        &self,
        topic: &Topic,
        namespaces: Namespaces,
    ) -> Result<PendingResponse> {
        let topic = topic.clone();
        self.call_pending(|responder, reply| Command::UpdateNamespaces {
            topic,
            namespaces,
            responder,
            reply,
        })
        .await
    }

    /// Moves the session expiry to `expiry` (unix seconds).
    pub async fn extend(
        &self,
        topic: &Topic,
        expiry: u64,
    ) -> Result<PendingResponse> {
        let topic = topic.clone();
        self.call_pending(|responder, reply| Command::Extend {
            topic,
            expiry,
            responder,
            reply,
        })
        .await
    }

    pub async fn request(
        &self,
        topic: &Topic,
        request: SessionRequest,
    ) -> Result<PendingResponse> {
        let topic = topic.clone();
        self.call_pending(|responder, reply| Command::Request {
            topic,
            request,
            responder,
            reply,
        })
        .await
    }

    pub async fn respond(
        &self,
        topic: &Topic,
        response: JsonRpcResponse,
    ) -> Result<()> {
        let topic = topic.clone();
        self.call(|reply| Command::Respond {
            topic,
            response,
            reply,
        })
        .await
    }

    pub async fn emit_event(
        &self,
        topic: &Topic,
        chain_id: impl Into<String>,
        name: impl Into<String>,
        data: Value,
    ) -> Result<()> {
        let topic = topic.clone();
        let chain_id = chain_id.into();
        let event = EventPayload {
            name: name.into(),
            data,
        };
        self.call(|reply| Command::EmitEvent {
            topic,
            chain_id,
            event,
            reply,
        })
        .await
    }

    pub async fn disconnect(&self, topic: &Topic) -> Result<()> {
        let topic = topic.clone();
        self.call(|reply| Command::Disconnect { topic, reply }).await
    }

    /// Round trip to the peer of a session or pairing.
    pub async fn ping(&self, topic: &Topic) -> Result<()> {
        let topic = topic.clone();
        self.call_pending(|responder, reply| Command::Ping {
            topic,
            responder,
            reply,
        })
        .await?
        .response()
        .await
        .map(|_| ())
    }

    /// Pings every topic concurrently. Topics without an answer when
    /// `timeout` runs out report [`Error::PingTimeout`].
    pub async fn ping_all(
        &self,
        topics: impl IntoIterator<Item = Topic>,
        timeout: Duration,
    ) -> Vec<(Topic, Result<()>)> {
        let mut outstanding = BTreeSet::new();
        let mut pings = JoinSet::new();
        for topic in topics {
            if !outstanding.insert(topic.clone()) {
                continue;
            }
            let client = self.clone();
            pings.spawn(async move {
                let result = client.ping(&topic).await;
                (topic, result)
            });
        }

        let mut results = Vec::with_capacity(outstanding.len());
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = pings.join_next() => match joined {
                    Some(Ok((topic, result))) => {
                        outstanding.remove(&topic);
                        results.push((topic, result));
                    }
                    Some(Err(e)) => error!("ping task failed: {e}"),
                    None => break,
                },
                _ = &mut deadline => break,
            }
        }
        pings.abort_all();

        results.extend(outstanding.into_iter().map(|topic| {
            let error = Error::PingTimeout(topic.clone());
            (topic, Err(error))
        }));
        results
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        self.call(|reply| Command::Sessions { reply }).await
    }

    pub async fn pairings(&self) -> Result<Vec<Pairing>> {
        self.call(|reply| Command::Pairings { reply }).await
    }

    /// Proposals received and not yet approved or rejected.
    pub async fn proposals(&self) -> Result<Vec<Proposal>> {
        self.call(|reply| Command::Proposals { reply }).await
    }

    /// Snapshot of everything persisted: pairings, sessions and requests
    /// still waiting for an answer.
    pub async fn all_entries(&self) -> Result<Vec<StoreEntry>> {
        self.call(|reply| Command::AllEntries { reply }).await
    }
}
