/// Pairing URI
///
/// `wc:<topic>@2?relay-protocol=irn&symKey=<hex>&expiryTimestamp=<unix>`
///
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use base64ct::{Base64, Encoding};
use url::form_urlencoded;

use crate::constants::{PROTOCOL_VERSION, URI_SCHEME};
use crate::crypto::SymKey;
use crate::error::{Error, Result};
use crate::types::{Relay, Topic};

#[derive(Clone, Debug, PartialEq)]
pub struct PairingUri {
    pub topic: Topic,
    pub version: u32,
    pub sym_key: SymKey,
    pub relay: Relay,
    pub expiry_timestamp: Option<u64>,
    pub methods: Option<Vec<String>>,
}

impl PairingUri {
    pub fn new(sym_key: SymKey, relay: Relay, expiry_timestamp: u64) -> Self {
        Self {
            topic: sym_key.topic(),
            version: PROTOCOL_VERSION,
            sym_key,
            relay,
            expiry_timestamp: Some(expiry_timestamp),
            methods: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let mut input = input.trim().to_string();

        // some wallets hand the uri around base64 wrapped
        if !input.contains("wc:") {
            if let Ok(decoded) = Base64::decode_vec(&input) {
                if let Ok(decoded) = String::from_utf8(decoded) {
                    if decoded.contains("wc:") {
                        input = decoded;
                    }
                }
            }
        }

        let rest = input
            .strip_prefix("wc://")
            .or_else(|| input.strip_prefix("wc:"))
            .ok_or(Error::InvalidUri("missing wc: scheme"))?;

        let (path, query) = rest
            .split_once('?')
            .ok_or(Error::InvalidUri("missing query string"))?;

        let (topic, version) = path
            .split_once('@')
            .ok_or(Error::InvalidUri("missing @version"))?;
        let topic = topic.trim_start_matches("//");
        if topic.is_empty() {
            return Err(Error::InvalidUri("empty topic"));
        }
        let version: u32 = version.parse()?;
        if version != PROTOCOL_VERSION {
            return Err(Error::InvalidUri("unsupported version"));
        }

        let params: HashMap<String, String> =
            form_urlencoded::parse(query.as_bytes()).into_owned().collect();

        let protocol = params
            .get("relay-protocol")
            .ok_or(Error::RelayProtocolNotMentioned)?
            .clone();
        let sym_key = SymKey::from_hex(
            params.get("symKey").ok_or(Error::SymKeyNotMentioned)?,
        )?;

        let expiry_timestamp = params
            .get("expiryTimestamp")
            .map(|v| v.parse())
            .transpose()?;

        let methods = params.get("methods").map(|m| {
            m.split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        });

        Ok(Self {
            topic: Topic::from(topic),
            version,
            sym_key,
            relay: Relay {
                protocol,
                data: params.get("relay-data").cloned(),
            },
            expiry_timestamp,
            methods,
        })
    }
}

impl Display for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("relay-protocol", &self.relay.protocol);
        if let Some(data) = &self.relay.data {
            query.append_pair("relay-data", data);
        }
        query.append_pair("symKey", &self.sym_key.to_hex());
        if let Some(expiry) = self.expiry_timestamp {
            query.append_pair("expiryTimestamp", &expiry.to_string());
        }
        if let Some(methods) = &self.methods {
            query.append_pair("methods", &methods.join(","));
        }
        write!(
            f,
            "{URI_SCHEME}:{}@{}?{}",
            self.topic,
            self.version,
            query.finish()
        )
    }
}

impl FromStr for PairingUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
