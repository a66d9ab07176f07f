/// Relay Auth
///
/// Client identity for the relay: an ed25519 key derived from a seed, its
/// `did:key` form, and the EdDSA JWT the relay expects as bearer token.
///
use alloy::hex;
use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use crate::constants::{
    CRYPTO_JWT_TTL, DID_DELIMITER, DID_METHOD, DID_PREFIX, JWT_DELIMITER,
    JWT_IRIDIUM_ALG, JWT_IRIDIUM_TYP, MULTICODEC_ED25519_BASE,
    MULTICODEC_ED25519_HEADER,
};
use crate::error::Result;
use crate::utils::{random_bytes32, unix_timestamp};

pub struct RelayAuth {
    keypair: Keypair,
}

impl RelayAuth {
    pub fn new(client_seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(client_seed),
        }
    }

    // https://github.com/WalletConnect/walletconnect-monorepo/blob/1e618504de2c1802359ffec486120784c04bd240/packages/core/src/controllers/crypto.ts#L59
    pub fn client_id(&self) -> String {
        encode_iss(&self.keypair.public_key)
    }

    // https://github.com/WalletConnect/walletconnect-monorepo/blob/b39a5d4e62f5517ef47a70b5b93f27585b7132e8/packages/core/src/controllers/crypto.ts#L73
    pub fn sign_jwt(&self, aud: &str) -> Result<String> {
        let sub = hex::encode(random_bytes32());
        sign_jwt(&sub, aud, CRYPTO_JWT_TTL, &self.keypair, None)
    }
}

// Only used for JWT signing, never for encryption
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    pub public_key: [u8; 32],
}

impl Keypair {
    // https://github.com/WalletConnect/walletconnect-utils/blob/4d8eb66bcea89857c630017774845e872a66922a/relay/relay-auth/src/api.ts#L14
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public_key = signing_key.verifying_key().to_bytes();
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.signing_key.sign(data).to_bytes()
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct IridiumJWTHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct IridiumJWTPayload {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

fn encode_json<T: Serialize>(val: &T) -> Result<String> {
    Ok(Base64UrlUnpadded::encode_string(&serde_json::to_vec(val)?))
}

/// `did:key:z<base58btc(0xed01 ++ public key)>`
pub fn encode_iss(public_key: &[u8; 32]) -> String {
    let mut multicodec = MULTICODEC_ED25519_HEADER.to_vec();
    multicodec.extend_from_slice(public_key);
    let encoded = format!(
        "{MULTICODEC_ED25519_BASE}{}",
        bs58::encode(multicodec).into_string()
    );
    [DID_PREFIX, DID_METHOD, &encoded].join(DID_DELIMITER)
}

pub fn sign_jwt(
    sub: &str,
    aud: &str,
    ttl: u64,
    keypair: &Keypair,
    iat: Option<u64>,
) -> Result<String> {
    let iat = iat.unwrap_or_else(unix_timestamp);
    let header = IridiumJWTHeader {
        alg: JWT_IRIDIUM_ALG.to_string(),
        typ: JWT_IRIDIUM_TYP.to_string(),
    };
    let payload = IridiumJWTPayload {
        iss: encode_iss(&keypair.public_key),
        sub: sub.to_string(),
        aud: aud.to_string(),
        iat,
        exp: iat + ttl,
    };

    let signed_part = [encode_json(&header)?, encode_json(&payload)?]
        .join(JWT_DELIMITER);
    let signature = keypair.sign(signed_part.as_bytes());
    Ok([
        signed_part,
        Base64UrlUnpadded::encode_string(&signature),
    ]
    .join(JWT_DELIMITER))
}
