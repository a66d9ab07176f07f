/// Crypto
///
/// X25519 key agreement, HKDF-SHA256 key derivation, topic derivation and
/// ChaCha20-Poly1305 sealing of envelopes.
///
use std::fmt;

use alloy::hex;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::StaticSecret;

use crate::envelope::{Envelope, EnvelopeType, IV_LENGTH};
use crate::error::{Error, Result};
use crate::types::Topic;
use crate::utils::{hex32, random_bytes32, sha256};

pub const KEY_LENGTH: usize = 32;

/// Symmetric key bound to exactly one topic.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymKey(#[serde(with = "hex32")] [u8; KEY_LENGTH]);

impl SymKey {
    pub fn generate() -> Self {
        Self(random_bytes32())
    }

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Self(hex::decode_to_array::<_, KEY_LENGTH>(s)?))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn topic(&self) -> Topic {
        derive_topic(self)
    }
}

impl fmt::Debug for SymKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymKey(..)")
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(#[serde(with = "hex32")] [u8; KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Self(hex::decode_to_array::<_, KEY_LENGTH>(s)?))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Raw X25519 output. Only useful as input to [`derive_sym_key`].
pub struct SharedSecret([u8; KEY_LENGTH]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public_key: PublicKey,
}

impl KeyPair {
    pub fn from_private_key(private_key: [u8; KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(private_key);
        let public_key =
            PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes());
        Self { secret, public_key }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

pub fn generate_key_pair() -> KeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public_key =
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes());
    KeyPair { secret, public_key }
}

pub fn derive_shared_secret(
    own: &KeyPair,
    peer: &PublicKey,
) -> Result<SharedSecret> {
    let shared = own
        .secret
        .diffie_hellman(&x25519_dalek::PublicKey::from(peer.0));
    // low order points give an all-zero output
    if !shared.was_contributory() {
        return Err(Error::KeyAgreement);
    }
    Ok(SharedSecret(*shared.as_bytes()))
}

pub fn derive_sym_key(shared_secret: &SharedSecret) -> Result<SymKey> {
    let hk = Hkdf::<Sha256>::new(None, &shared_secret.0);
    let mut okm = [0u8; KEY_LENGTH];
    hk.expand(&[], &mut okm).map_err(|_| Error::KeyAgreement)?;
    Ok(SymKey(okm))
}

pub fn derive_topic(sym_key: &SymKey) -> Topic {
    Topic::new(hex::encode(sha256(sym_key.0)))
}

pub fn encrypt(
    sym_key: &SymKey,
    plaintext: &[u8],
    envelope_type: EnvelopeType,
) -> Result<Envelope> {
    let mut iv = [0u8; IV_LENGTH];
    OsRng.fill_bytes(&mut iv);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&sym_key.0));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| Error::Encryption)?;

    Ok(Envelope {
        envelope_type,
        iv,
        sealed,
    })
}

pub fn decrypt(sym_key: &SymKey, envelope: &Envelope) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&sym_key.0));
    cipher
        .decrypt(Nonce::from_slice(&envelope.iv), envelope.sealed.as_slice())
        .map_err(|_| Error::Decryption)
}
