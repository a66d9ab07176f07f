/// Connection
///
/// Relay transport over the relay's HTTP JSON-RPC endpoint. Inbound traffic
/// is pulled with `irn_fetchMessages` on a fixed interval.
///
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::relay::{RelayEvent, RelayMessage, RelayTransport};
use crate::relay_auth::RelayAuth;
use crate::rpc::{IdGenerator, JsonRpcRequest, JsonRpcResponse};
use crate::types::Topic;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RelayConfig {
    pub rpc_url: String,
    /// Audience of the relay JWT.
    pub auth_url: String,
    pub project_id: String,
    /// Seed of the ed25519 key identifying this client to the relay. Reuse
    /// the same seed across runs.
    pub client_seed: [u8; 32],
    pub poll_interval: Duration,
}

impl RelayConfig {
    pub fn new(project_id: impl Into<String>, client_seed: [u8; 32]) -> Self {
        Self {
            rpc_url: "https://relay.walletconnect.org/rpc".to_string(),
            auth_url: "https://relay.walletconnect.org".to_string(),
            project_id: project_id.into(),
            client_seed,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = rpc_url.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchMessagesResult {
    #[serde(default)]
    messages: Vec<RelayMessage>,
    #[serde(default)]
    has_more: bool,
}

pub struct HttpRelay {
    config: RelayConfig,
    http: Client,
    jwt: String,
    ids: Mutex<IdGenerator>,
    // topic -> relay subscription id
    subscriptions: Mutex<HashMap<Topic, String>>,
}

impl HttpRelay {
    /// Signs the relay JWT and starts polling. Polling stops once the
    /// returned transport or the event receiver is dropped.
    pub fn connect(
        config: RelayConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<RelayEvent>)> {
        let jwt = RelayAuth::new(config.client_seed).sign_jwt(&config.auth_url)?;
        let relay = Arc::new(Self {
            config,
            http: Client::new(),
            jwt,
            ids: Mutex::new(IdGenerator::default()),
            subscriptions: Mutex::new(HashMap::new()),
        });

        let (events, rx) = mpsc::unbounded_channel();
        tokio::spawn(poll_loop(Arc::downgrade(&relay), events));
        Ok((relay, rx))
    }

    fn next_id(&self) -> u64 {
        self.ids
            .lock()
            .map(|mut ids| ids.next_id())
            .unwrap_or_else(|poisoned| poisoned.into_inner().next_id())
    }

    fn subscribed_topics(&self) -> Vec<Topic> {
        match self.subscriptions.lock() {
            Ok(subs) => subs.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }

    async fn request(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        let response = self
            .http
            .post(&self.config.rpc_url)
            .query(&[("projectId", &self.config.project_id)])
            .bearer_auth(&self.jwt)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<JsonRpcResponse>()
            .await?;

        response.into_outcome().map_err(|e| {
            anyhow!("{method} failed with {}: {}", e.code, e.message)
        })
    }

    async fn fetch_messages(&self, topic: &Topic) -> anyhow::Result<Vec<RelayMessage>> {
        let mut messages = Vec::new();
        loop {
            let result = self
                .request("irn_fetchMessages", json!({ "topic": topic }))
                .await?;
            let page = parse_fetch_result(result)?;
            messages.extend(page.messages);
            if !page.has_more {
                return Ok(messages);
            }
        }
    }

    async fn fetch_all(&self) -> anyhow::Result<Vec<RelayMessage>> {
        let mut messages = Vec::new();
        for topic in self.subscribed_topics() {
            messages.extend(self.fetch_messages(&topic).await?);
        }
        Ok(messages)
    }
}

fn parse_fetch_result(result: Value) -> anyhow::Result<FetchMessagesResult> {
    serde_json::from_value(result).context("malformed irn_fetchMessages result")
}

fn backoff(interval: Duration, failures: u32) -> Duration {
    if failures == 0 {
        interval
    } else {
        interval.saturating_mul(failures).min(MAX_BACKOFF)
    }
}

async fn poll_loop(relay: Weak<HttpRelay>, events: mpsc::UnboundedSender<RelayEvent>) {
    let mut connected = false;
    let mut failures = 0;
    loop {
        let Some(relay) = relay.upgrade() else {
            debug!("relay dropped, stop polling");
            return;
        };
        let interval = relay.config.poll_interval;

        match relay.fetch_all().await {
            Ok(messages) => {
                failures = 0;
                if !connected {
                    info!("relay reachable");
                    connected = true;
                    if events.send(RelayEvent::Connected).is_err() {
                        return;
                    }
                }
                for message in messages {
                    if events.send(RelayEvent::Message(message)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("polling relay failed: {e:#}");
                failures += 1;
                if connected {
                    connected = false;
                    if events.send(RelayEvent::Disconnected).is_err() {
                        return;
                    }
                }
            }
        }

        drop(relay);
        tokio::time::sleep(backoff(interval, failures)).await;
    }
}

#[async_trait]
impl RelayTransport for HttpRelay {
    async fn subscribe(&self, topic: &Topic) -> anyhow::Result<()> {
        let id = self
            .request("irn_subscribe", json!({ "topic": topic }))
            .await?;
        let id = id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string());
        debug!("subscribed to {topic} as {id}");
        self.subscriptions
            .lock()
            .map_err(|_| anyhow!("subscriptions lock poisoned"))?
            .insert(topic.clone(), id);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> anyhow::Result<()> {
        let id = self
            .subscriptions
            .lock()
            .map_err(|_| anyhow!("subscriptions lock poisoned"))?
            .remove(topic);
        let Some(id) = id else {
            return Ok(());
        };
        self.request("irn_unsubscribe", json!({ "topic": topic, "id": id }))
            .await?;
        Ok(())
    }

    async fn publish(&self, message: RelayMessage) -> anyhow::Result<()> {
        self.request(
            "irn_publish",
            json!({
                "topic": message.topic,
                "message": message.message,
                "ttl": message.ttl,
                "tag": message.tag,
                "prompt": false,
            }),
        )
        .await?;
        Ok(())
    }
}
