//! ============================================================================
//! Error Types — Typed failures across the node
//! ============================================================================
//! Library layers return `NodeError`; the daemon and the work loop wrap it in
//! `anyhow` where context matters more than the variant.
//! ============================================================================

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::rpc::RpcError;

#[derive(Debug, Error)]
pub enum NodeError {
    /// JSON-RPC transport, HTTP status, or server-side error.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Transaction was submitted but never showed up within the polling budget.
    #[error("transaction {signature} not finalized after {tries} attempts")]
    Timeout { signature: String, tries: u32 },

    /// Transaction landed on-chain but its meta reported an error.
    #[error("transaction {signature} failed on-chain: {err}")]
    TransactionFailed { signature: String, err: String },

    /// Transaction could not be signed or serialized for the wire.
    #[error("transaction encoding: {0}")]
    TxEncode(String),

    /// The program has no (or an empty) IDL account on this network.
    #[error("no IDL available for program {0}")]
    IdlUnavailable(Pubkey),

    /// An instruction references an account name absent from the lookup table.
    #[error("account `{0}` required by the instruction is not resolvable")]
    MissingAccount(String),

    /// The IDL declares a type this codec does not understand.
    #[error("unsupported IDL type: {0}")]
    UnknownIdlType(String),

    /// PDA bump search exhausted all 256 candidates.
    #[error("no valid bump seed found for program {0}")]
    NoValidBump(Pubkey),

    /// Account data too short, discriminator mismatch, or value/type mismatch.
    #[error("invalid account data: {0}")]
    InvalidAccountData(String),

    /// Keypair literal or seed-derived address could not be constructed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// The secrets service has no value under this key.
    #[error("secret `{0}` is not available")]
    SecretMissing(String),

    /// Secrets service transport or protocol failure.
    #[error("secrets service: {0}")]
    Secrets(String),

    /// A flow ended in a state the controller cannot finalize.
    #[error("flow {flow_id} failed: {reason}")]
    FlowFailed { flow_id: String, reason: String },

    /// Startup health requirements not met; the loop stays disabled.
    #[error("health gate: {0}")]
    HealthGate(String),

    /// IPFS gateway or pinning service failure.
    #[error("ipfs: {0}")]
    Ipfs(String),

    /// Persisted flow store failure (redb or record encoding).
    #[error("flow store: {0}")]
    Store(String),

    /// Operator-supplied configuration is missing or malformed.
    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;
