/// Pairing
///
/// The control channel between two peers. A pairing starts inactive with a
/// short expiry and becomes active once the first message on its topic
/// decrypts.
///
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ACTIVE_PAIRING_TTL, INACTIVE_PAIRING_TTL, USER_DISCONNECTED,
};
use crate::crypto::SymKey;
use crate::engine::{Engine, EngineEvent, Inbound};
use crate::error::{Error, Result};
use crate::interactor::{Outbound, PendingKind, Responder};
use crate::rpc::{RpcId, WcRequest};
use crate::store::Sequence;
use crate::types::{DeleteParams, EmptyParams, Metadata, Relay, Topic};
use crate::uri::PairingUri;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pairing {
    pub topic: Topic,
    #[serde(rename = "symKey")]
    pub sym_key: SymKey,
    pub relay: Relay,
    pub expiry: u64,
    pub active: bool,
    #[serde(
        rename = "peerMetadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub peer_metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
}

impl Pairing {
    pub fn new(sym_key: SymKey, relay: Relay, expiry: u64) -> Self {
        Self {
            topic: sym_key.topic(),
            sym_key,
            relay,
            expiry,
            active: false,
            peer_metadata: None,
            methods: None,
        }
    }

    pub fn uri(&self) -> PairingUri {
        PairingUri {
            methods: self.methods.clone(),
            ..PairingUri::new(self.sym_key, self.relay.clone(), self.expiry)
        }
    }
}

impl Engine {
    pub(crate) async fn create_pairing(&mut self) -> Result<(Pairing, PairingUri)> {
        let relay = Relay {
            protocol: self.config.relay_protocol.clone(),
            data: None,
        };
        let pairing = Pairing::new(
            SymKey::generate(),
            relay,
            self.now() + INACTIVE_PAIRING_TTL,
        );

        self.store.upsert(pairing.clone())?;
        if let Err(e) = self.interactor.subscribe(&pairing.topic).await {
            self.store.delete(&pairing.topic)?;
            return Err(e);
        }

        info!("created pairing {}", pairing.topic);
        let uri = pairing.uri();
        Ok((pairing, uri))
    }

    pub(crate) async fn pair(&mut self, uri: PairingUri) -> Result<Pairing> {
        let now = self.now();
        if uri.expiry_timestamp.is_some_and(|expiry| expiry <= now) {
            return Err(Error::SequenceExpired(uri.topic));
        }
        if uri.sym_key.topic() != uri.topic {
            return Err(Error::InvalidUri("topic does not match symKey"));
        }

        match self.store.get(&uri.topic)? {
            Some(Sequence::Pairing(existing)) if existing.active => {
                return Err(Error::PairingAlreadyActive(uri.topic));
            }
            Some(Sequence::Session(_)) => {
                return Err(Error::TopicConflict(uri.topic));
            }
            _ => {}
        }

        let pairing = Pairing {
            topic: uri.topic,
            sym_key: uri.sym_key,
            relay: uri.relay,
            expiry: uri
                .expiry_timestamp
                .unwrap_or(now + INACTIVE_PAIRING_TTL),
            active: false,
            peer_metadata: None,
            methods: uri.methods,
        };

        self.store.upsert(pairing.clone())?;
        if let Err(e) = self.interactor.subscribe(&pairing.topic).await {
            self.store.delete(&pairing.topic)?;
            return Err(e);
        }

        info!("paired with {}", pairing.topic);
        Ok(pairing)
    }

    pub(crate) fn activate_pairing(&mut self, topic: &Topic) -> Result<()> {
        let mut pairing = self.store.pairing(topic)?;
        if pairing.active {
            return Ok(());
        }
        pairing.active = true;
        pairing.expiry = self.now() + ACTIVE_PAIRING_TTL;
        self.store.upsert(pairing)?;

        info!("pairing {topic} is active");
        self.emit(EngineEvent::PairingActivated(topic.clone()));
        Ok(())
    }

    pub(crate) fn set_peer_metadata(
        &mut self,
        topic: &Topic,
        metadata: Metadata,
    ) -> Result<()> {
        let mut pairing = self.store.pairing(topic)?;
        if pairing.peer_metadata.as_ref() != Some(&metadata) {
            pairing.peer_metadata = Some(metadata);
            self.store.upsert(pairing)?;
        }
        Ok(())
    }

    /// Tells the peer and removes the pairing here whether or not the
    /// message made it out.
    pub(crate) async fn delete_pairing(&mut self, topic: &Topic) -> Result<()> {
        let pairing = self.store.pairing(topic)?;

        let outbound = Outbound {
            topic: &pairing.topic,
            sym_key: &pairing.sym_key,
            request: WcRequest::PairingDelete(DeleteParams {
                code: USER_DISCONNECTED,
                message: "User disconnected.".to_string(),
            }),
            ttl: None,
            kind: PendingKind::Plain,
            responder: None,
        };
        if let Err(e) =
            self.interactor.publish_request(&mut self.store, outbound).await
        {
            warn!("could not notify peer about deleting {topic}: {e}");
        }

        self.remove_pairing(topic).await?;
        self.emit(EngineEvent::PairingDeleted(topic.clone()));
        Ok(())
    }

    /// Local removal. Sessions still waiting for their settlement ack go
    /// with the pairing.
    pub(crate) async fn remove_pairing(&mut self, topic: &Topic) -> Result<()> {
        self.remove_sequence(topic).await?;

        for session in self.store.sessions()? {
            if &session.pairing_topic == topic && !session.acknowledged {
                info!("dropping unsettled session {}", session.topic);
                self.remove_sequence(&session.topic).await?;
            }
        }
        self.proposals.retain(|_, p| &p.pairing_topic != topic);
        self.pending_settlements
            .retain(|_, s| &s.pairing_topic != topic);
        Ok(())
    }

    pub(crate) async fn expire_pairing(&mut self, topic: &Topic) -> Result<()> {
        info!("pairing {topic} expired");
        self.remove_pairing(topic).await?;
        self.emit(EngineEvent::PairingExpired(topic.clone()));
        Ok(())
    }

    /// Pings a pairing or a session, whichever lives on `topic`.
    pub(crate) async fn ping(
        &mut self,
        topic: &Topic,
        responder: Responder,
    ) -> Result<RpcId> {
        let sequence = self
            .store
            .get(topic)?
            .ok_or_else(|| Error::CannotFindSequenceForTopic(topic.clone()))?;
        if sequence.expiry() <= self.now() {
            return Err(Error::SequenceExpired(topic.clone()));
        }

        let request = match &sequence {
            Sequence::Pairing(_) => WcRequest::PairingPing(EmptyParams {}),
            Sequence::Session(_) => WcRequest::SessionPing(EmptyParams {}),
        };
        let sym_key = *sequence.sym_key();
        self.interactor
            .publish_request(
                &mut self.store,
                Outbound {
                    topic,
                    sym_key: &sym_key,
                    request,
                    ttl: None,
                    kind: PendingKind::Ping {
                        topic: topic.clone(),
                    },
                    responder: Some(responder),
                },
            )
            .await
    }

    pub(crate) async fn on_pairing_ping(&mut self, inbound: &Inbound) -> Result<()> {
        if self.store.pairing(&inbound.topic).is_err() {
            return self.reject_unknown_sequence(inbound).await;
        }
        self.ack(inbound).await
    }

    pub(crate) async fn on_pairing_delete(
        &mut self,
        inbound: &Inbound,
        params: DeleteParams,
    ) -> Result<()> {
        if self.store.pairing(&inbound.topic).is_err() {
            return self.reject_unknown_sequence(inbound).await;
        }
        info!(
            "peer deleted pairing {} ({}: {})",
            inbound.topic, params.code, params.message
        );
        if let Err(e) = self.ack(inbound).await {
            warn!("could not acknowledge pairing delete: {e}");
        }
        self.remove_pairing(&inbound.topic).await?;
        self.emit(EngineEvent::PairingDeleted(inbound.topic.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::unix_timestamp;

    #[test]
    fn new_pairing_is_inactive_and_keyed_by_topic() {
        let key = SymKey::generate();
        let pairing = Pairing::new(key, Relay::default(), 42);
        assert_eq!(pairing.topic, key.topic());
        assert!(!pairing.active);
        assert!(pairing.peer_metadata.is_none());
    }

    #[test]
    fn uri_carries_key_and_expiry() {
        let expiry = unix_timestamp() + INACTIVE_PAIRING_TTL;
        let pairing = Pairing::new(SymKey::generate(), Relay::default(), expiry);
        let uri: PairingUri = pairing.uri().to_string().parse().unwrap();
        assert_eq!(uri.topic, pairing.topic);
        assert_eq!(uri.sym_key, pairing.sym_key);
        assert_eq!(uri.expiry_timestamp, Some(expiry));
    }

    #[test]
    fn stored_form_is_camel_case() {
        let pairing = Pairing::new(SymKey::from_bytes([3u8; 32]), Relay::default(), 7);
        let value = serde_json::to_value(&pairing).unwrap();
        assert_eq!(value["symKey"], "03".repeat(32));
        assert!(value.get("peerMetadata").is_none());
        let back: Pairing = serde_json::from_value(value).unwrap();
        assert_eq!(back, pairing);
    }
}
