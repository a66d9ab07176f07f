/// Envelope
///
/// Binary framing of sealed payloads:
///
/// ```text
/// byte 0       : type (0 = symmetric, 1 = symmetric + sender public key)
/// bytes 1..13  : nonce
/// [type 1 only]: 32 byte sender public key
/// remaining    : ciphertext + 16 byte tag
/// ```
///
use base64ct::{Base64, Base64UrlUnpadded, Encoding};

use crate::crypto::{KEY_LENGTH, PublicKey};
use crate::error::{Error, Result};

pub const IV_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;
pub const TYPE_LENGTH: usize = 1;
pub const TYPE_0: u8 = 0;
pub const TYPE_1: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeType {
    Type0,
    // only for type 1 message - lets the receiver derive the diffie key
    Type1 { sender_public_key: PublicKey },
}

impl EnvelopeType {
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Type0 => TYPE_0,
            Self::Type1 { .. } => TYPE_1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub envelope_type: EnvelopeType,
    pub iv: [u8; IV_LENGTH],
    pub sealed: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncodingType {
    #[default]
    Base64,
    Base64Url,
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            TYPE_LENGTH + IV_LENGTH + KEY_LENGTH + self.sealed.len(),
        );
        bytes.push(self.envelope_type.type_byte());
        bytes.extend_from_slice(&self.iv);
        if let EnvelopeType::Type1 { sender_public_key } = &self.envelope_type {
            bytes.extend_from_slice(sender_public_key.as_bytes());
        }
        bytes.extend_from_slice(&self.sealed);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&type_byte, rest) = bytes
            .split_first()
            .ok_or(Error::EnvelopeDecode("empty envelope"))?;

        if rest.len() < IV_LENGTH {
            return Err(Error::EnvelopeDecode("truncated nonce"));
        }
        let (iv, rest) = rest.split_at(IV_LENGTH);
        let mut nonce = [0u8; IV_LENGTH];
        nonce.copy_from_slice(iv);

        let (envelope_type, sealed) = match type_byte {
            TYPE_0 => (EnvelopeType::Type0, rest),
            TYPE_1 => {
                if rest.len() < KEY_LENGTH {
                    return Err(Error::EnvelopeDecode(
                        "truncated sender public key",
                    ));
                }
                let (key, sealed) = rest.split_at(KEY_LENGTH);
                let mut sender = [0u8; KEY_LENGTH];
                sender.copy_from_slice(key);
                (
                    EnvelopeType::Type1 {
                        sender_public_key: PublicKey::from_bytes(sender),
                    },
                    sealed,
                )
            }
            _ => return Err(Error::EnvelopeDecode("unknown envelope type")),
        };

        if sealed.len() < TAG_LENGTH {
            return Err(Error::EnvelopeDecode("truncated ciphertext"));
        }

        Ok(Envelope {
            envelope_type,
            iv: nonce,
            sealed: sealed.to_vec(),
        })
    }

    pub fn serialize(&self, encoding: EncodingType) -> String {
        let bytes = self.to_bytes();
        match encoding {
            EncodingType::Base64 => Base64::encode_string(&bytes),
            EncodingType::Base64Url => Base64UrlUnpadded::encode_string(&bytes),
        }
    }

    pub fn deserialize(encoded: &str, encoding: EncodingType) -> Result<Self> {
        let bytes = match encoding {
            EncodingType::Base64 => Base64::decode_vec(encoded),
            EncodingType::Base64Url => Base64UrlUnpadded::decode_vec(encoded),
        }
        .map_err(|_| Error::EnvelopeDecode("invalid base64"))?;
        Self::from_bytes(&bytes)
    }
}
