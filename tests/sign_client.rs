use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use walletconnect_sign::crypto::SymKey;
use walletconnect_sign::store::SequenceStore;
use walletconnect_sign::types::Relay;
use walletconnect_sign::{
    ClientConfig, EngineEvent, Error, ErrorKind, MemoryRelay, MemoryRelayHub,
    MemoryStore, Metadata, Namespace, Namespaces, Pairing, PendingResponse,
    PersistentStore, Proposal, Session, SessionRequest, SignClient, StoreEntry, Topic,
    approve_request, reject_request,
};

const ACCOUNT: &str = "eip155:1:0x0000000000000000000000000000000000000123";

struct Peer {
    client: SignClient,
    relay: Arc<MemoryRelay>,
    store: MemoryStore,
    events: broadcast::Receiver<EngineEvent>,
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn metadata(name: &str) -> Metadata {
    Metadata {
        name: name.to_string(),
        description: format!("{name} used in tests"),
        url: format!("https://{name}.example"),
        icons: vec![],
    }
}

fn peer_with_store(hub: &MemoryRelayHub, name: &str, store: MemoryStore) -> Peer {
    let (relay, relay_events) = hub.connect();
    let client = SignClient::new(
        ClientConfig::new(metadata(name)),
        relay.clone(),
        relay_events,
        Box::new(store.clone()),
    )
    .unwrap();
    let events = client.events();
    Peer {
        client,
        relay,
        store,
        events,
    }
}

fn peer(hub: &MemoryRelayHub, name: &str) -> Peer {
    peer_with_store(hub, name, MemoryStore::new())
}

fn required() -> Namespaces {
    Namespaces::from([(
        "eip155".to_string(),
        Namespace::new(
            ["eip155:1"],
            ["personal_sign", "eth_sendTransaction"],
            ["accountsChanged"],
        ),
    )])
}

fn approved() -> Namespaces {
    Namespaces::from([(
        "eip155".to_string(),
        Namespace::new(
            ["eip155:1"],
            ["personal_sign", "eth_sendTransaction"],
            ["accountsChanged", "chainChanged"],
        )
        .with_accounts([ACCOUNT]),
    )])
}

async fn next_event<T>(
    events: &mut broadcast::Receiver<EngineEvent>,
    mut pick: impl FnMut(EngineEvent) -> Option<T>,
) -> T {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for event")
}

async fn next_proposal(peer: &mut Peer) -> Proposal {
    next_event(&mut peer.events, |event| match event {
        EngineEvent::SessionProposed(proposal) => Some(proposal),
        _ => None,
    })
    .await
}

async fn next_settled(peer: &mut Peer) -> Session {
    next_event(&mut peer.events, |event| match event {
        EngineEvent::SessionSettled(session) => Some(session),
        _ => None,
    })
    .await
}

/// dApp pairs with the wallet and proposes; the wallet has the proposal.
async fn propose(dapp: &mut Peer, wallet: &mut Peer) -> (PendingResponse, Proposal) {
    let (pairing, uri) = dapp.client.create_pairing().await.unwrap();
    wallet.client.pair(&uri.to_string()).await.unwrap();

    let pending = dapp
        .client
        .propose(&pairing.topic, required(), Namespaces::new())
        .await
        .unwrap();
    let proposal = next_proposal(wallet).await;
    assert_eq!(proposal.id, pending.id);
    assert_eq!(proposal.pairing_topic, pairing.topic);
    (pending, proposal)
}

/// Full handshake, returns (dApp session, wallet session).
async fn settle(dapp: &mut Peer, wallet: &mut Peer) -> (Session, Session) {
    let (pending, proposal) = propose(dapp, wallet).await;
    wallet.client.approve(proposal.id, approved()).await.unwrap();

    let dapp_session = next_settled(dapp).await;
    let wallet_session = next_settled(wallet).await;
    pending.response().await.unwrap();
    (dapp_session, wallet_session)
}

/// `approved()` plus one more chain.
fn approved_with(chain: &str) -> Namespaces {
    let mut namespaces = approved();
    namespaces.insert(
        chain.to_string(),
        Namespace::new(Vec::<String>::new(), ["personal_sign"], ["chainChanged"])
            .with_accounts([format!("{chain}:0x0000000000000000000000000000000000000123")]),
    );
    namespaces
}

fn snapshot(store: &MemoryStore) -> MemoryStore {
    let mut copy = MemoryStore::new();
    for (key, value) in store.scan("").unwrap() {
        copy.upsert(&key, value).unwrap();
    }
    copy
}

/// Rewrites the stored session in place, the engine reads it on next use.
fn edit_session(store: &MemoryStore, topic: &Topic, edit: impl FnOnce(&mut Session)) {
    let mut sequences = SequenceStore::new(Box::new(store.clone()));
    let mut session = sequences.session(topic).unwrap();
    edit(&mut session);
    sequences.upsert(session).unwrap();
}

async fn next_request_id(peer: &mut Peer) -> u64 {
    next_event(&mut peer.events, |event| match event {
        EngineEvent::SessionRequest { id, .. } => Some(id),
        _ => None,
    })
    .await
}

fn personal_sign() -> SessionRequest {
    SessionRequest::new(
        "eip155:1",
        "personal_sign",
        json!(["0xdeadbeef", "0x0000000000000000000000000000000000000123"]),
    )
}

#[tokio::test]
async fn settle_gives_both_sides_the_same_session() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");

    let (dapp_session, wallet_session) = settle(&mut dapp, &mut wallet).await;

    assert_eq!(dapp_session.topic, wallet_session.topic);
    assert_eq!(dapp_session.sym_key, wallet_session.sym_key);
    assert_eq!(dapp_session.namespaces, approved());
    assert!(wallet_session.controller);
    assert!(!dapp_session.controller);
    assert!(wallet_session.acknowledged);
    assert_eq!(dapp_session.peer_participant.metadata.name, "wallet");
    assert_eq!(wallet_session.peer_participant.metadata.name, "dapp");

    assert_eq!(dapp.client.sessions().await.unwrap().len(), 1);
    assert_eq!(wallet.client.sessions().await.unwrap().len(), 1);
    assert!(wallet.client.proposals().await.unwrap().is_empty());

    let pairings = wallet.client.pairings().await.unwrap();
    assert_eq!(pairings.len(), 1);
    assert!(pairings[0].active);
    assert_eq!(pairings[0].peer_metadata.as_ref().unwrap().name, "dapp");
    assert!(dapp.client.pairings().await.unwrap()[0].active);
}

#[tokio::test]
async fn session_request_is_answered_once() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let pending = dapp
        .client
        .request(&session.topic, personal_sign())
        .await
        .unwrap();
    let (topic, id, request) = next_event(&mut wallet.events, |event| match event {
        EngineEvent::SessionRequest { topic, id, request } => {
            Some((topic, id, request))
        }
        _ => None,
    })
    .await;
    assert_eq!(topic, session.topic);
    assert_eq!(id, pending.id);
    assert_eq!(request.chain_id, "eip155:1");
    assert_eq!(request.request.method, "personal_sign");

    wallet
        .client
        .respond(&topic, approve_request(id, "0xsig"))
        .await
        .unwrap();
    assert_eq!(pending.response().await.unwrap(), json!("0xsig"));

    let err = wallet
        .client
        .respond(&topic, approve_request(id, "0xsig"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RequestExpired(expired) if expired == id));
}

#[tokio::test]
async fn rejected_request_surfaces_peer_error() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let pending = dapp
        .client
        .request(&session.topic, personal_sign())
        .await
        .unwrap();
    let id = next_event(&mut wallet.events, |event| match event {
        EngineEvent::SessionRequest { id, .. } => Some(id),
        _ => None,
    })
    .await;
    wallet
        .client
        .respond(&session.topic, reject_request(id))
        .await
        .unwrap();

    match pending.response().await {
        Err(Error::JsonRpc(error)) => assert_eq!(error.code, 5000),
        other => panic!("expected a peer error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_expires() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let pending = dapp
        .client
        .request(
            &session.topic,
            personal_sign().with_ttl(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    let id = pending.id;

    let err = pending.response().await.unwrap_err();
    assert!(matches!(err, Error::RequestExpired(expired) if expired == id));
    assert_eq!(err.kind(), ErrorKind::Expired);

    let entries = dapp.client.all_entries().await.unwrap();
    assert!(
        !entries
            .iter()
            .any(|entry| matches!(entry, StoreEntry::PendingRequest(_)))
    );
    assert!(
        entries
            .iter()
            .any(|entry| matches!(entry, StoreEntry::Session(_)))
    );
}

#[tokio::test]
async fn mismatched_approval_sends_nothing() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (_, proposal) = propose(&mut dapp, &mut wallet).await;

    let published = hub.published_count();
    let narrow = Namespaces::from([(
        "eip155".to_string(),
        Namespace::new(["eip155:1"], ["personal_sign"], ["accountsChanged"])
            .with_accounts([ACCOUNT]),
    )]);
    let err = wallet.client.approve(proposal.id, narrow).await.unwrap_err();

    assert!(matches!(err, Error::NamespaceMismatch(_)));
    assert_eq!(hub.published_count(), published);
    assert!(wallet.client.sessions().await.unwrap().is_empty());
    assert_eq!(wallet.client.proposals().await.unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_proposal_reaches_proposer() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (pending, proposal) = propose(&mut dapp, &mut wallet).await;

    wallet.client.reject(proposal.id, "not today").await.unwrap();

    match pending.response().await {
        Err(Error::JsonRpc(error)) => {
            assert_eq!(error.code, 5000);
            assert_eq!(error.message, "not today");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    let proposal_id = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionRejected { proposal_id, .. } => Some(proposal_id),
        _ => None,
    })
    .await;
    assert_eq!(proposal_id, proposal.id);
    assert!(wallet.client.proposals().await.unwrap().is_empty());
    assert!(dapp.client.sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn approve_rolls_back_when_relay_fails() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (pending, proposal) = propose(&mut dapp, &mut wallet).await;

    wallet.relay.set_offline(true).unwrap();
    let err = wallet
        .client
        .approve(proposal.id, approved())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(wallet.client.sessions().await.unwrap().is_empty());

    // the proposal survives, a second attempt goes through
    wallet.relay.set_offline(false).unwrap();
    wallet.client.approve(proposal.id, approved()).await.unwrap();
    next_settled(&mut dapp).await;
    next_settled(&mut wallet).await;
    pending.response().await.unwrap();
}

#[tokio::test]
async fn disconnect_removes_session_on_both_sides() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    wallet.client.disconnect(&session.topic).await.unwrap();

    let (topic, reason) = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionDeleted { topic, reason } => Some((topic, reason)),
        _ => None,
    })
    .await;
    assert_eq!(topic, session.topic);
    assert_eq!(reason.code, 6000);
    assert!(dapp.client.sessions().await.unwrap().is_empty());
    assert!(wallet.client.sessions().await.unwrap().is_empty());
    assert!(!wallet.relay.subscriptions().contains(&session.topic));

    let err = dapp
        .client
        .request(&session.topic, personal_sign())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CannotFindSequenceForTopic(_)));
}

#[tokio::test]
async fn ping_sessions_and_pairings() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    dapp.client.ping(&session.topic).await.unwrap();
    wallet.client.ping(&session.pairing_topic).await.unwrap();

    let unknown = Topic::from("unknown");
    let results = dapp
        .client
        .ping_all(
            [session.topic.clone(), unknown.clone()],
            Duration::from_secs(5),
        )
        .await;
    assert_eq!(results.len(), 2);
    for (topic, result) in results {
        if topic == unknown {
            assert!(matches!(result, Err(Error::CannotFindSequenceForTopic(_))));
        } else {
            result.unwrap();
        }
    }
}

#[tokio::test(start_paused = true)]
async fn ping_without_answer_times_out() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    // wallet can receive but not answer
    wallet.relay.set_offline(true).unwrap();
    let results = dapp
        .client
        .ping_all([session.topic.clone()], Duration::from_secs(2))
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, session.topic);
    assert!(matches!(&results[0].1, Err(Error::PingTimeout(topic)) if *topic == session.topic));
}

#[tokio::test]
async fn controller_updates_namespaces() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let mut wider = approved();
    wider.insert(
        "eip155:137".to_string(),
        Namespace::new(Vec::<String>::new(), ["personal_sign"], ["chainChanged"])
            .with_accounts(["eip155:137:0x0000000000000000000000000000000000000123"]),
    );
    let pending = wallet
        .client
        .update_namespaces(&session.topic, wider.clone())
        .await
        .unwrap();
    pending.response().await.unwrap();

    let namespaces = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionUpdated { namespaces, .. } => Some(namespaces),
        _ => None,
    })
    .await;
    assert_eq!(namespaces, wider);
    assert_eq!(dapp.client.sessions().await.unwrap()[0].namespaces, wider);

    // the new chain is usable right away
    let polygon = SessionRequest::new("eip155:137", "personal_sign", json!([]));
    dapp.client.request(&session.topic, polygon).await.unwrap();
}

#[tokio::test]
async fn only_controller_changes_the_session() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let err = dapp
        .client
        .update_namespaces(&session.topic, approved())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotController(_)));

    let err = dapp
        .client
        .extend(&session.topic, session.expiry + 60)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotController(_)));

    // already at the maximum lifetime
    let err = wallet
        .client
        .extend(&session.topic, session.expiry + 3600)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidExpiry(_)));
    let err = wallet
        .client
        .extend(&session.topic, session.expiry)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidExpiry(_)));
}

#[tokio::test]
async fn unauthorized_method_is_refused_locally() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let published = hub.published_count();
    let request =
        SessionRequest::new("eip155:1", "eth_signTypedData_v4", json!([]));
    let err = dapp
        .client
        .request(&session.topic, request)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnauthorizedMethod { .. }));

    let request = SessionRequest::new("eip155:10", "personal_sign", json!([]));
    let err = dapp
        .client
        .request(&session.topic, request)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnauthorizedMethod { .. }));
    assert_eq!(hub.published_count(), published);
}

#[tokio::test]
async fn wallet_events_reach_dapp() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    wallet
        .client
        .emit_event(&session.topic, "eip155:1", "chainChanged", json!(1))
        .await
        .unwrap();
    let event = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionEvent { event, .. } => Some(event),
        _ => None,
    })
    .await;
    assert_eq!(event.event.name, "chainChanged");
    assert_eq!(event.chain_id, "eip155:1");

    let err = wallet
        .client
        .emit_event(&session.topic, "eip155:1", "somethingElse", json!(null))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnauthorizedEvent { .. }));
}

#[tokio::test]
async fn reconnect_restores_subscriptions() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    dapp.relay.simulate_reconnect().unwrap();
    next_event(&mut dapp.events, |event| match event {
        EngineEvent::ConnectionChanged { connected: false } => Some(()),
        _ => None,
    })
    .await;
    next_event(&mut dapp.events, |event| match event {
        EngineEvent::ConnectionChanged { connected: true } => Some(()),
        _ => None,
    })
    .await;

    let subscriptions = dapp.relay.subscriptions();
    assert!(subscriptions.contains(&session.topic));
    assert!(subscriptions.contains(&session.pairing_topic));
    dapp.client.ping(&session.topic).await.unwrap();
}

#[tokio::test]
async fn restarted_client_keeps_sessions() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let store = dapp.store.clone();
    drop(dapp);
    let mut restarted = peer_with_store(&hub, "dapp", store);
    next_event(&mut restarted.events, |event| match event {
        EngineEvent::ConnectionChanged { connected: true } => Some(()),
        _ => None,
    })
    .await;

    let sessions = restarted.client.sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].topic, session.topic);
    assert!(restarted.relay.subscriptions().contains(&session.topic));

    restarted.client.ping(&session.topic).await.unwrap();
}

#[tokio::test]
async fn deleting_pairing_notifies_peer() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    dapp.client.delete_pairing(&session.pairing_topic).await.unwrap();
    let topic = next_event(&mut wallet.events, |event| match event {
        EngineEvent::PairingDeleted(topic) => Some(topic),
        _ => None,
    })
    .await;
    assert_eq!(topic, session.pairing_topic);
    assert!(wallet.client.pairings().await.unwrap().is_empty());

    // settled sessions outlive their pairing
    assert_eq!(wallet.client.sessions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_uri_is_rejected() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let wallet = peer(&hub, "wallet");

    let err = wallet.client.pair("wc:abc@2?symKey=00").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Codec);
    assert!(wallet.client.pairings().await.unwrap().is_empty());
}

#[tokio::test]
async fn respond_can_be_retried_after_relay_failure() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let pending = dapp
        .client
        .request(&session.topic, personal_sign())
        .await
        .unwrap();
    let id = next_request_id(&mut wallet).await;

    wallet.relay.set_offline(true).unwrap();
    let err = wallet
        .client
        .respond(&session.topic, approve_request(id, "0xsig"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);

    wallet.relay.set_offline(false).unwrap();
    wallet
        .client
        .respond(&session.topic, approve_request(id, "0xsig"))
        .await
        .unwrap();
    assert_eq!(pending.response().await.unwrap(), json!("0xsig"));
}

#[tokio::test]
async fn restarted_wallet_answers_earlier_request() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let pending = dapp
        .client
        .request(&session.topic, personal_sign())
        .await
        .unwrap();
    let id = next_request_id(&mut wallet).await;
    let entries = wallet.client.all_entries().await.unwrap();
    assert!(
        entries
            .iter()
            .any(|entry| matches!(entry, StoreEntry::InboundRequest(r) if r.id == id))
    );

    let store = wallet.store.clone();
    drop(wallet);
    let restarted = peer_with_store(&hub, "wallet", store);
    restarted
        .client
        .respond(&session.topic, approve_request(id, "0xsig"))
        .await
        .unwrap();
    assert_eq!(pending.response().await.unwrap(), json!("0xsig"));
}

#[tokio::test]
async fn expired_sequences_are_swept() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    // a copy, so the stopped engine cannot sweep it first
    let store = snapshot(&dapp.store);
    drop(dapp);
    edit_session(&store, &session.topic, |session| session.expiry = 1);
    let stale = Pairing::new(SymKey::generate(), Relay::default(), 1);
    SequenceStore::new(Box::new(store.clone()))
        .upsert(stale.clone())
        .unwrap();

    let mut restarted = peer_with_store(&hub, "dapp", store);
    let mut expired_session = None;
    let mut expired_pairing = None;
    while expired_session.is_none() || expired_pairing.is_none() {
        next_event(&mut restarted.events, |event| match event {
            EngineEvent::SessionExpired(topic) => {
                expired_session = Some(topic);
                Some(())
            }
            EngineEvent::PairingExpired(topic) => {
                expired_pairing = Some(topic);
                Some(())
            }
            _ => None,
        })
        .await;
    }
    assert_eq!(expired_session, Some(session.topic.clone()));
    assert_eq!(expired_pairing, Some(stale.topic));

    assert!(restarted.client.sessions().await.unwrap().is_empty());
    // the live pairing stays
    let pairings = restarted.client.pairings().await.unwrap();
    assert_eq!(pairings.len(), 1);
    assert_eq!(pairings[0].topic, session.pairing_topic);
}

#[tokio::test]
async fn extend_moves_expiry_on_both_sides() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    // make room below the maximum lifetime
    let shorter = session.expiry - 100;
    edit_session(&dapp.store, &session.topic, |s| s.expiry = shorter);
    edit_session(&wallet.store, &session.topic, |s| s.expiry = shorter);

    let extended = session.expiry - 50;
    wallet
        .client
        .extend(&session.topic, extended)
        .await
        .unwrap()
        .response()
        .await
        .unwrap();

    let (topic, expiry) = next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionExtended { topic, expiry } => Some((topic, expiry)),
        _ => None,
    })
    .await;
    assert_eq!(topic, session.topic);
    assert_eq!(expiry, extended);
    assert_eq!(dapp.client.sessions().await.unwrap()[0].expiry, extended);
    assert_eq!(wallet.client.sessions().await.unwrap()[0].expiry, extended);
}

#[tokio::test]
async fn refused_extend_is_rolled_back() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    // the dapp still holds the later expiry and refuses to go below it
    let shorter = session.expiry - 100;
    edit_session(&wallet.store, &session.topic, |s| s.expiry = shorter);

    let err = wallet
        .client
        .extend(&session.topic, session.expiry - 50)
        .await
        .unwrap()
        .response()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::JsonRpc(ref e) if e.code == -32602));
    assert_eq!(wallet.client.sessions().await.unwrap()[0].expiry, shorter);
    assert_eq!(dapp.client.sessions().await.unwrap()[0].expiry, session.expiry);
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_update_is_rolled_back() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    // the dapp hears the update but cannot answer
    dapp.relay.set_offline(true).unwrap();
    let pending = wallet
        .client
        .update_namespaces(&session.topic, approved_with("eip155:137"))
        .await
        .unwrap();
    let id = pending.id;
    assert_eq!(
        wallet.client.sessions().await.unwrap()[0].namespaces,
        approved_with("eip155:137")
    );

    let err = pending.response().await.unwrap_err();
    assert!(matches!(err, Error::RequestExpired(expired) if expired == id));
    assert_eq!(wallet.client.sessions().await.unwrap()[0].namespaces, approved());
}

#[tokio::test(start_paused = true)]
async fn late_update_failure_keeps_newer_namespaces() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    dapp.relay.set_offline(true).unwrap();
    let first = wallet
        .client
        .update_namespaces(&session.topic, approved_with("eip155:137"))
        .await
        .unwrap();
    next_event(&mut dapp.events, |event| match event {
        EngineEvent::SessionUpdated { .. } => Some(()),
        _ => None,
    })
    .await;

    dapp.relay.set_offline(false).unwrap();
    wallet
        .client
        .update_namespaces(&session.topic, approved_with("eip155:10"))
        .await
        .unwrap()
        .response()
        .await
        .unwrap();

    first.response().await.unwrap_err();
    assert_eq!(
        wallet.client.sessions().await.unwrap()[0].namespaces,
        approved_with("eip155:10")
    );
    assert_eq!(
        dapp.client.sessions().await.unwrap()[0].namespaces,
        approved_with("eip155:10")
    );
}

#[tokio::test]
async fn cancelled_request_ignores_late_answer() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    let pending = dapp
        .client
        .request(&session.topic, personal_sign())
        .await
        .unwrap();
    pending.cancel();
    let entries = dapp.client.all_entries().await.unwrap();
    assert!(
        !entries
            .iter()
            .any(|entry| matches!(entry, StoreEntry::PendingRequest(_)))
    );

    let id = next_request_id(&mut wallet).await;
    wallet
        .client
        .respond(&session.topic, approve_request(id, "0xsig"))
        .await
        .unwrap();

    // the answer arrived before the pong and changed nothing
    dapp.client.ping(&session.topic).await.unwrap();
    assert_eq!(dapp.client.sessions().await.unwrap().len(), 1);
    assert!(
        !dapp
            .client
            .all_entries()
            .await
            .unwrap()
            .iter()
            .any(|entry| matches!(entry, StoreEntry::PendingRequest(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_ping_fails_after_its_ttl() {
    init_logger();
    let hub = MemoryRelayHub::new();
    let mut dapp = peer(&hub, "dapp");
    let mut wallet = peer(&hub, "wallet");
    let (session, _) = settle(&mut dapp, &mut wallet).await;

    wallet.relay.set_offline(true).unwrap();
    let started = tokio::time::Instant::now();
    let err = dapp.client.ping(&session.topic).await.unwrap_err();

    assert!(matches!(err, Error::PingTimeout(ref topic) if *topic == session.topic));
    assert!(started.elapsed() >= Duration::from_secs(30));
    // a missed pong leaves the session alone
    assert_eq!(dapp.client.sessions().await.unwrap().len(), 1);
}
