/// Relay transport
///
/// The engine talks to the relay only through [`RelayTransport`] and the
/// [`RelayEvent`] receiver handed to the client. [`MemoryRelayHub`] is an
/// in-process relay for tests and demos.
///
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::Topic;
use crate::utils::unix_timestamp;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub topic: Topic,
    pub message: String,
    #[serde(default)]
    pub tag: u32,
    #[serde(default)]
    pub ttl: u64,
    #[serde(
        rename = "publishedAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub published_at: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    Message(RelayMessage),
    Connected,
    Disconnected,
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn subscribe(&self, topic: &Topic) -> anyhow::Result<()>;

    async fn unsubscribe(&self, topic: &Topic) -> anyhow::Result<()>;

    async fn publish(&self, message: RelayMessage) -> anyhow::Result<()>;
}

struct Mailboxed {
    seq: usize,
    from: usize,
    message: RelayMessage,
}

struct Slot {
    events: mpsc::UnboundedSender<RelayEvent>,
    subscriptions: HashSet<Topic>,
    delivered: HashSet<usize>,
    offline: bool,
}

#[derive(Default)]
struct HubState {
    slots: Vec<Slot>,
    mailboxes: HashMap<Topic, Vec<Mailboxed>>,
    published: usize,
}

impl HubState {
    fn deliver(&mut self, client: usize, seq: usize, message: &RelayMessage) {
        let slot = &mut self.slots[client];
        if slot.delivered.insert(seq) {
            // receiver gone means the client shut down
            let _ = slot.events.send(RelayEvent::Message(message.clone()));
        }
    }
}

/// Relay living in this process. Messages are kept per topic for the
/// lifetime of the hub and handed once to every subscriber other than the
/// publisher, including subscribers that arrive later.
#[derive(Clone, Default)]
pub struct MemoryRelayHub {
    state: Arc<Mutex<HubState>>,
}

fn lock(state: &Mutex<HubState>) -> anyhow::Result<MutexGuard<'_, HubState>> {
    state.lock().map_err(|_| anyhow!("relay hub lock poisoned"))
}

impl MemoryRelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new client. The receiver starts with a `Connected` event.
    pub fn connect(
        &self,
    ) -> (Arc<MemoryRelay>, mpsc::UnboundedReceiver<RelayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RelayEvent::Connected);

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.slots.len();
        state.slots.push(Slot {
            events: tx,
            subscriptions: HashSet::new(),
            delivered: HashSet::new(),
            offline: false,
        });

        let relay = MemoryRelay {
            id,
            state: self.state.clone(),
        };
        (Arc::new(relay), rx)
    }

    /// Number of messages accepted by the hub so far.
    pub fn published_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.published)
            .unwrap_or_default()
    }
}

pub struct MemoryRelay {
    id: usize,
    state: Arc<Mutex<HubState>>,
}

impl MemoryRelay {
    pub fn subscriptions(&self) -> HashSet<Topic> {
        self.state
            .lock()
            .map(|state| state.slots[self.id].subscriptions.clone())
            .unwrap_or_default()
    }

    /// Drops every subscription and reports a fresh connection, the way a
    /// websocket relay behaves after a reconnect.
    pub fn simulate_reconnect(&self) -> anyhow::Result<()> {
        let mut state = lock(&self.state)?;
        let slot = &mut state.slots[self.id];
        slot.subscriptions.clear();
        let _ = slot.events.send(RelayEvent::Disconnected);
        let _ = slot.events.send(RelayEvent::Connected);
        Ok(())
    }

    /// While offline every publish fails.
    pub fn set_offline(&self, offline: bool) -> anyhow::Result<()> {
        lock(&self.state)?.slots[self.id].offline = offline;
        Ok(())
    }
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    async fn subscribe(&self, topic: &Topic) -> anyhow::Result<()> {
        let mut state = lock(&self.state)?;
        state.slots[self.id].subscriptions.insert(topic.clone());

        let backlog: Vec<(usize, RelayMessage)> = state
            .mailboxes
            .get(topic)
            .into_iter()
            .flatten()
            .filter(|m| m.from != self.id)
            .map(|m| (m.seq, m.message.clone()))
            .collect();
        for (seq, message) in backlog {
            state.deliver(self.id, seq, &message);
        }
        trace!("client {} subscribed to {topic}", self.id);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> anyhow::Result<()> {
        lock(&self.state)?.slots[self.id].subscriptions.remove(topic);
        Ok(())
    }

    async fn publish(&self, mut message: RelayMessage) -> anyhow::Result<()> {
        let mut state = lock(&self.state)?;
        if state.slots[self.id].offline {
            return Err(anyhow!("relay is unreachable"));
        }

        message.published_at = Some(unix_timestamp());
        let seq = state.published;
        state.published += 1;
        debug!(
            "client {} published tag {} on {}",
            self.id, message.tag, message.topic
        );

        let receivers: Vec<usize> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(id, slot)| {
                *id != self.id && slot.subscriptions.contains(&message.topic)
            })
            .map(|(id, _)| id)
            .collect();
        for id in receivers {
            state.deliver(id, seq, &message);
        }

        state
            .mailboxes
            .entry(message.topic.clone())
            .or_default()
            .push(Mailboxed {
                seq,
                from: self.id,
                message,
            });
        Ok(())
    }
}
