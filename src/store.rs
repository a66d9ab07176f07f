/// Sequence store
///
/// Typed view over a [`PersistentStore`]. Pairings and sessions live under
/// `sequence:<topic>`, outstanding outbound requests under `request:<id>`
/// and unanswered session requests from the peer under `inbound:<id>`.
///
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::SymKey;
use crate::error::{Error, Result};
use crate::pairing::Pairing;
use crate::rpc::{RpcId, WcMethod};
use crate::session::Session;
use crate::types::{Namespaces, Topic};

const SEQUENCE_PREFIX: &str = "sequence:";
const REQUEST_PREFIX: &str = "request:";
const INBOUND_PREFIX: &str = "inbound:";

/// Key-value persistence supplied by the embedding application.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    fn upsert(&mut self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;

    fn delete(&mut self, key: &str) -> anyhow::Result<()>;

    fn scan(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>>;
}

/// Map backed store. Clones share the same map, so a clone outlives the
/// client that used it and can seed the next one.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> anyhow::Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>>
    {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn upsert(&mut self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.entries()?.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> anyhow::Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .entries()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Sequence {
    Pairing(Pairing),
    Session(Session),
}

impl Sequence {
    pub fn topic(&self) -> &Topic {
        match self {
            Self::Pairing(p) => &p.topic,
            Self::Session(s) => &s.topic,
        }
    }

    pub fn sym_key(&self) -> &SymKey {
        match self {
            Self::Pairing(p) => &p.sym_key,
            Self::Session(s) => &s.sym_key,
        }
    }

    pub fn expiry(&self) -> u64 {
        match self {
            Self::Pairing(p) => p.expiry,
            Self::Session(s) => s.expiry,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Pairing(_) => "pairing",
            Self::Session(_) => "session",
        }
    }
}

impl From<Pairing> for Sequence {
    fn from(pairing: Pairing) -> Self {
        Self::Pairing(pairing)
    }
}

impl From<Session> for Sequence {
    fn from(session: Session) -> Self {
        Self::Session(session)
    }
}

/// Local state a request touched before it was sent, undone or confirmed
/// once the peer answers or the request expires.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FollowUp {
    #[default]
    None,
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

/// Persisted half of an outstanding outbound request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequestRecord {
    pub id: RpcId,
    pub topic: Topic,
    pub method: WcMethod,
    pub params: Value,
    /// Unix seconds.
    pub expiry: u64,
    #[serde(default)]
    pub follow_up: FollowUp,
}

/// `wc_sessionRequest` received from the peer and not answered yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundRequestRecord {
    pub id: RpcId,
    pub topic: Topic,
    /// Unix seconds.
    pub expiry: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StoreEntry {
    Pairing(Pairing),
    Session(Session),
    PendingRequest(PendingRequestRecord),
    InboundRequest(InboundRequestRecord),
}

pub struct SequenceStore {
    backend: Box<dyn PersistentStore>,
}

fn sequence_key(topic: &Topic) -> String {
    format!("{SEQUENCE_PREFIX}{topic}")
}

fn request_key(id: RpcId) -> String {
    format!("{REQUEST_PREFIX}{id}")
}

fn inbound_key(id: RpcId) -> String {
    format!("{INBOUND_PREFIX}{id}")
}

impl SequenceStore {
    pub fn new(backend: Box<dyn PersistentStore>) -> Self {
        Self { backend }
    }

    pub fn get(&self, topic: &Topic) -> Result<Option<Sequence>> {
        let raw = self
            .backend
            .get(&sequence_key(topic))
            .map_err(Error::Store)?;
        Ok(raw.map(|raw| serde_json::from_slice(&raw)).transpose()?)
    }

    pub fn pairing(&self, topic: &Topic) -> Result<Pairing> {
        match self.get(topic)? {
            Some(Sequence::Pairing(pairing)) => Ok(pairing),
            _ => Err(Error::CannotFindSequenceForTopic(topic.clone())),
        }
    }

    pub fn session(&self, topic: &Topic) -> Result<Session> {
        match self.get(topic)? {
            Some(Sequence::Session(session)) => Ok(session),
            _ => Err(Error::CannotFindSequenceForTopic(topic.clone())),
        }
    }

    /// Pairing that has not reached its expiry yet.
    pub fn live_pairing(&self, topic: &Topic, now: u64) -> Result<Pairing> {
        let pairing = self.pairing(topic)?;
        if pairing.expiry <= now {
            return Err(Error::SequenceExpired(topic.clone()));
        }
        Ok(pairing)
    }

    pub fn live_session(&self, topic: &Topic, now: u64) -> Result<Session> {
        let session = self.session(topic)?;
        if session.expiry <= now {
            return Err(Error::SequenceExpired(topic.clone()));
        }
        Ok(session)
    }

    /// Inserts or overwrites the sequence stored under its topic. A topic
    /// never changes from pairing to session or back.
    pub fn upsert(&mut self, sequence: impl Into<Sequence>) -> Result<()> {
        let sequence = sequence.into();
        if let Some(existing) = self.get(sequence.topic())? {
            if existing.kind() != sequence.kind() {
                return Err(Error::TopicConflict(sequence.topic().clone()));
            }
        }
        let raw = serde_json::to_vec(&sequence)?;
        self.backend
            .upsert(&sequence_key(sequence.topic()), raw)
            .map_err(Error::Store)
    }

    /// Removes the sequence and every request record on its topic. Returns
    /// the ids of the removed outbound requests.
    pub fn delete(&mut self, topic: &Topic) -> Result<Vec<RpcId>> {
        self.backend
            .delete(&sequence_key(topic))
            .map_err(Error::Store)?;

        let mut removed = vec![];
        for record in self.requests()? {
            if &record.topic == topic {
                self.backend
                    .delete(&request_key(record.id))
                    .map_err(Error::Store)?;
                removed.push(record.id);
            }
        }
        if !removed.is_empty() {
            debug!("dropped {} pending requests with {topic}", removed.len());
        }

        for record in self.inbound_requests()? {
            if &record.topic == topic {
                self.remove_inbound(record.id)?;
            }
        }
        Ok(removed)
    }

    pub fn sequences(&self) -> Result<Vec<Sequence>> {
        self.backend
            .scan(SEQUENCE_PREFIX)
            .map_err(Error::Store)?
            .into_iter()
            .map(|(_, raw)| Ok(serde_json::from_slice(&raw)?))
            .collect()
    }

    pub fn pairings(&self) -> Result<Vec<Pairing>> {
        Ok(self
            .sequences()?
            .into_iter()
            .filter_map(|s| match s {
                Sequence::Pairing(p) => Some(p),
                Sequence::Session(_) => None,
            })
            .collect())
    }

    pub fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .sequences()?
            .into_iter()
            .filter_map(|s| match s {
                Sequence::Session(s) => Some(s),
                Sequence::Pairing(_) => None,
            })
            .collect())
    }

    pub fn insert_request(&mut self, record: &PendingRequestRecord) -> Result<()> {
        let raw = serde_json::to_vec(record)?;
        self.backend
            .upsert(&request_key(record.id), raw)
            .map_err(Error::Store)
    }

    pub fn remove_request(&mut self, id: RpcId) -> Result<()> {
        self.backend
            .delete(&request_key(id))
            .map_err(Error::Store)
    }

    pub fn requests(&self) -> Result<Vec<PendingRequestRecord>> {
        self.backend
            .scan(REQUEST_PREFIX)
            .map_err(Error::Store)?
            .into_iter()
            .map(|(_, raw)| Ok(serde_json::from_slice(&raw)?))
            .collect()
    }

    pub fn insert_inbound(&mut self, record: &InboundRequestRecord) -> Result<()> {
        let raw = serde_json::to_vec(record)?;
        self.backend
            .upsert(&inbound_key(record.id), raw)
            .map_err(Error::Store)
    }

    pub fn remove_inbound(&mut self, id: RpcId) -> Result<()> {
        self.backend
            .delete(&inbound_key(id))
            .map_err(Error::Store)
    }

    pub fn inbound_requests(&self) -> Result<Vec<InboundRequestRecord>> {
        self.backend
            .scan(INBOUND_PREFIX)
            .map_err(Error::Store)?
            .into_iter()
            .map(|(_, raw)| Ok(serde_json::from_slice(&raw)?))
            .collect()
    }

    pub fn all_entries(&self) -> Result<Vec<StoreEntry>> {
        let mut entries: Vec<StoreEntry> = self
            .sequences()?
            .into_iter()
            .map(|s| match s {
                Sequence::Pairing(p) => StoreEntry::Pairing(p),
                Sequence::Session(s) => StoreEntry::Session(s),
            })
            .collect();
        entries.extend(
            self.requests()?
                .into_iter()
                .map(StoreEntry::PendingRequest),
        );
        entries.extend(
            self.inbound_requests()?
                .into_iter()
                .map(StoreEntry::InboundRequest),
        );
        Ok(entries)
    }
}
