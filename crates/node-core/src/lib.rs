//! ============================================================================
//! NODE-CORE: Nosana worker internals
//! ============================================================================
//! Everything the worker daemon needs to earn on the compute market:
//! - Thin JSON-RPC client over HTTPS
//! - Key material, PDAs, ATAs, and the Anchor IDL account location
//! - IDL fetch/decode/encode codec driving every instruction
//! - Transaction building, signing and bounded confirmation polling
//! - Market/job/run models and the poll/claim/execute/finalize loop
//! - IPFS gateway + pinning client, persisted flow store, secrets client
//! ============================================================================

pub mod config;
pub mod error;
pub mod flow;
pub mod health;
pub mod idl;
pub mod ipfs;
pub mod jobs;
pub mod keys;
pub mod network;
pub mod rpc;
pub mod secrets;
pub mod tx;
pub mod worker;

// Re-export the types a daemon wires together.
pub use config::{NodeConfig, Vault};
pub use error::{NodeError, Result};
pub use flow::{Flow, FlowEngine, FlowResults, FlowStore, HttpFlowEngine, StepOutcome};
pub use health::Health;
pub use idl::{Idl, IdlRegistry, Value};
pub use ipfs::IpfsClient;
pub use jobs::{Job, JobsProgram, Market, Run};
pub use network::{Network, Programs};
pub use rpc::{RpcClient, RpcError};
pub use secrets::SecretsClient;
pub use worker::Worker;
