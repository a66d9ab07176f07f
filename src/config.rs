use std::time::Duration;

use crate::constants::{DEFAULT_REQUEST_TTL, RELAY_PROTOCOL};
use crate::envelope::EncodingType;
use crate::types::Metadata;

/// Client settings. Everything but the metadata has a usable default.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Shown to the peer in proposals and settlements.
    pub metadata: Metadata,
    pub relay_protocol: String,
    /// How often expired sequences and requests are swept.
    pub sweep_interval: Duration,
    /// Used for session requests that do not set their own ttl.
    pub default_request_ttl: Duration,
    pub encoding: EncodingType,
    // broadcast::channel panics on zero, only set through with_event_capacity
    event_capacity: usize,
}

impl ClientConfig {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            relay_protocol: RELAY_PROTOCOL.to_string(),
            sweep_interval: Duration::from_secs(1),
            default_request_ttl: Duration::from_secs(DEFAULT_REQUEST_TTL),
            encoding: EncodingType::default(),
            event_capacity: 64,
        }
    }

    pub fn with_relay_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.relay_protocol = protocol.into();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_default_request_ttl(mut self, ttl: Duration) -> Self {
        self.default_request_ttl = ttl;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingType) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Events buffered per subscriber before slow ones start lagging.
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }
}
