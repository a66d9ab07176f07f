pub const JWT_IRIDIUM_ALG: &str = "EdDSA";
pub const JWT_IRIDIUM_TYP: &str = "JWT";
pub const JWT_DELIMITER: &str = ".";

pub const DID_DELIMITER: &str = ":";
pub const DID_PREFIX: &str = "did";
pub const DID_METHOD: &str = "key";

pub const MULTICODEC_ED25519_BASE: &str = "z";
pub const MULTICODEC_ED25519_HEADER: [u8; 2] = [0xed, 0x01];

// https://github.com/WalletConnect/walletconnect-monorepo/blob/b39a5d4e62f5517ef47a70b5b93f27585b7132e8/packages/core/src/controllers/crypto.ts
pub const CRYPTO_JWT_TTL: u64 = 86400; // ONE_DAY

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: u32 = 2;
pub const RELAY_PROTOCOL: &str = "irn";
pub const URI_SCHEME: &str = "wc";

pub const MINUTES: u64 = 60;
pub const DAYS: u64 = 24 * 60 * MINUTES;

/// Lifetime of a pairing that has not seen any traffic yet.
pub const INACTIVE_PAIRING_TTL: u64 = 5 * MINUTES;
pub const ACTIVE_PAIRING_TTL: u64 = 30 * DAYS;
pub const SESSION_TTL: u64 = 7 * DAYS;
pub const PROPOSAL_TTL: u64 = 5 * MINUTES;
pub const DEFAULT_REQUEST_TTL: u64 = 5 * MINUTES;

// https://specs.walletconnect.com/2.0/specs/clients/sign/error-codes
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const UNAUTHORIZED_METHOD: i64 = 3001;
pub const UNAUTHORIZED_EVENT: i64 = 3002;
pub const UNAUTHORIZED_UPDATE_REQUEST: i64 = 3003;
pub const UNAUTHORIZED_EXTEND_REQUEST: i64 = 3004;
pub const USER_REJECTED: i64 = 5000;
pub const UNSUPPORTED_NAMESPACE_KEY: i64 = 5104;
pub const USER_DISCONNECTED: i64 = 6000;
pub const NO_MATCHING_KEY: i64 = 7001;
pub const SESSION_REQUEST_EXPIRED: i64 = 8000;
