//! # walletconnect-sign
//!
//! A Rust implementation of the [WalletConnect v2 Sign protocol](https://specs.walletconnect.com/2.0/specs/clients/sign).
//!
//! ## Features
//! - Pairing over `wc:` URIs
//! - Session proposal, approval, rejection and settlement
//! - Session requests, events, namespace updates, extension and deletion
//! - Pings with timeouts, expiry sweeping and persisted sequences
//! - HTTP relay transport and an in-process relay for tests
//!
//! ## Example
//! A wallet pairing with a dApp and answering its requests
//!
//! ```no_run
//! use walletconnect_sign::{
//!     ClientConfig, EngineEvent, HttpRelay, MemoryStore, Metadata,
//!     Namespace, Namespaces, RelayConfig, SignClient, approve_request,
//! };
//!
//! # async fn run() -> walletconnect_sign::Result<()> {
//! // Get project_id from https://cloud.reown.com
//! let project_id = "xxxx";
//!
//! // Generate random once, store it in client and reuse it for all connections
//! let client_seed = [123u8; 32];
//!
//! let (relay, relay_events) =
//!     HttpRelay::connect(RelayConfig::new(project_id, client_seed))?;
//! let client = SignClient::new(
//!     ClientConfig::new(Metadata {
//!         name: "My Wallet Name".to_string(),
//!         description: "My wallet interacts with dapp".to_string(),
//!         url: "https://my-wallet-site.com".to_string(),
//!         icons: vec![],
//!     }),
//!     relay,
//!     relay_events,
//!     Box::new(MemoryStore::new()),
//! )?;
//! let mut events = client.events();
//!
//! let uri_from_dapp = "wc:e4b9eb7a1372bf88abc46c37acac3687301afdfd0d2a4c2355945d66a1164464@2?relay-protocol=irn&symKey=d7430284e1b70853829a010518a088cde0e163bcad5f24425e3b17578b2b402d&expiryTimestamp=1749783095";
//! client.pair(uri_from_dapp).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         EngineEvent::SessionProposed(proposal) => {
//!             let mut namespaces = Namespaces::new();
//!             namespaces.insert(
//!                 "eip155".to_string(),
//!                 Namespace::new(["eip155:1"], ["personal_sign"], ["chainChanged"])
//!                     .with_accounts([
//!                         "eip155:1:0x0000000000000000000000000000000000000123",
//!                     ]),
//!             );
//!             client.approve(proposal.id, namespaces).await?;
//!         }
//!         EngineEvent::SessionRequest { topic, id, .. } => {
//!             client.respond(&topic, approve_request(id, "0x")).await?;
//!         }
//!         other => println!("event: {other:?}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//! MIT OR Apache-2.0

pub mod client;
pub mod config;
pub mod connection;
pub mod constants;
pub mod crypto;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod interactor;
pub mod namespace;
pub mod pairing;
pub mod relay;
pub mod relay_auth;
pub mod rpc;
pub mod session;
pub mod store;
pub mod types;
pub mod uri;
pub mod utils;

/// Exposed for easy access
pub use client::{PendingResponse, SignClient};
pub use config::ClientConfig;
pub use connection::{HttpRelay, RelayConfig};
pub use engine::EngineEvent;
pub use error::{Error, ErrorKind, Result};
pub use pairing::Pairing;
pub use relay::{MemoryRelay, MemoryRelayHub, RelayEvent, RelayMessage, RelayTransport};
pub use rpc::{ErrorObject, JsonRpcResponse, RpcId};
pub use session::{Proposal, Session, SessionRequest, approve_request, reject_request};
pub use store::{MemoryStore, PersistentStore, StoreEntry};
pub use types::{Metadata, Namespace, Namespaces, Topic};
pub use uri::PairingUri;
