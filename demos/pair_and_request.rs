use serde_json::json;
use walletconnect_sign::{
    ClientConfig, EngineEvent, MemoryRelayHub, MemoryStore, Metadata,
    Namespace, Namespaces, SessionRequest, SignClient, approve_request,
};

fn metadata(name: &str) -> Metadata {
    Metadata {
        name: name.to_string(),
        description: "WalletConnect Rust SDK demo".to_string(),
        url: "https://github.com/zemse/walletconnect-sdk".to_string(),
        icons: vec![],
    }
}

/// This example runs a dApp and a wallet against an in-process relay: the
/// dApp pairs, proposes a session and asks for a personal_sign, the wallet
/// approves and answers. Swap `MemoryRelayHub` for `HttpRelay` to talk to
/// the real relay.
#[tokio::main]
async fn main() -> walletconnect_sign::Result<()> {
    env_logger::init();

    let hub = MemoryRelayHub::new();

    let (relay, relay_events) = hub.connect();
    let dapp = SignClient::new(
        ClientConfig::new(metadata("Demo dApp")),
        relay,
        relay_events,
        Box::new(MemoryStore::new()),
    )?;
    let (relay, relay_events) = hub.connect();
    let wallet = SignClient::new(
        ClientConfig::new(metadata("Demo Wallet")),
        relay,
        relay_events,
        Box::new(MemoryStore::new()),
    )?;

    // The wallet answers proposals and requests as they come in
    let mut wallet_events = wallet.events();
    let wallet_task = wallet.clone();
    tokio::spawn(async move {
        while let Ok(event) = wallet_events.recv().await {
            let result = match event {
                EngineEvent::SessionProposed(proposal) => {
                    println!("wallet: proposal from {}", proposal.proposer.metadata.name);
                    let namespaces = Namespaces::from([(
                        "eip155".to_string(),
                        Namespace::new(["eip155:1"], ["personal_sign"], ["chainChanged"])
                            .with_accounts([
                                "eip155:1:0x0000000000000000000000000000000000000123",
                            ]),
                    )]);
                    wallet_task.approve(proposal.id, namespaces).await.map(|_| ())
                }
                EngineEvent::SessionRequest { topic, id, request } => {
                    println!("wallet: {} on {}", request.request.method, request.chain_id);
                    wallet_task.respond(&topic, approve_request(id, "0x1234")).await
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                eprintln!("wallet: {e}");
            }
        }
    });

    let mut dapp_events = dapp.events();
    let (pairing, uri) = dapp.create_pairing().await?;
    println!("dapp: share {uri}");
    wallet.pair(&uri.to_string()).await?;

    let required = Namespaces::from([(
        "eip155".to_string(),
        Namespace::new(["eip155:1"], ["personal_sign"], Vec::<String>::new()),
    )]);
    let proposal = dapp.propose(&pairing.topic, required, Namespaces::new()).await?;
    proposal.response().await?;

    let session = loop {
        match dapp_events.recv().await {
            Ok(EngineEvent::SessionSettled(session)) => break session,
            Ok(_) => continue,
            Err(e) => return Err(e.to_string().into()),
        }
    };
    println!("dapp: session {} settled", session.topic);

    let signature = dapp
        .request(
            &session.topic,
            SessionRequest::new(
                "eip155:1",
                "personal_sign",
                json!(["0x48656c6c6f", "0x0000000000000000000000000000000000000123"]),
            ),
        )
        .await?
        .response()
        .await?;
    println!("dapp: signature {signature}");

    dapp.disconnect(&session.topic).await?;
    Ok(())
}
