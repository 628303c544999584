//! ============================================================================
//! Transaction Builder & Submitter
//! ============================================================================
//! Assembles one IDL-built instruction into a transaction, signs with every
//! required keypair, submits over JSON-RPC, and awaits finalization by
//! bounded polling.
//! ============================================================================

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value as Json;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::transaction::Transaction;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, trace};

use crate::error::{NodeError, Result};
use crate::idl::{self, IdlRegistry, Value};
use crate::rpc::RpcClient;

/// Confirmation polling interval.
pub const DEFAULT_POLL_MS: u64 = 1000;
/// Confirmation polling budget; total wait is bounded by `poll_ms * tries`.
pub const DEFAULT_MAX_TRIES: u32 = 30;

/// Build an unsigned single-instruction transaction from a program's IDL.
///
/// `accounts` maps the instruction's declared account names to pubkeys; an
/// unresolved name fails before any transaction is created.
pub async fn build_idl_tx(
    registry: &IdlRegistry,
    rpc: &RpcClient,
    program: &Pubkey,
    instruction: &str,
    args: &[Value],
    accounts: &HashMap<String, Pubkey>,
    payer: &Pubkey,
) -> Result<Transaction> {
    let idl = registry.fetch(rpc, program).await?;
    let spec = idl
        .instruction(instruction)
        .ok_or_else(|| NodeError::UnknownIdlType(format!("no instruction `{instruction}`")))?;

    let data = idl::encode_instruction_data(spec, args)?;
    let metas = idl::resolve_accounts(spec, accounts)?;
    debug!(instruction, accounts = metas.len(), bytes = data.len(), "built instruction");

    let ix = Instruction {
        program_id: *program,
        accounts: metas,
        data,
    };
    Ok(Transaction::new_with_payer(&[ix], Some(payer)))
}

/// Sign with all provided keypairs against a fresh blockhash and submit.
/// Returns the transaction signature.
pub async fn send_tx(
    rpc: &RpcClient,
    tx: &mut Transaction,
    signers: &[&Keypair],
) -> Result<String> {
    let blockhash = rpc.get_latest_blockhash().await?;
    let blockhash = Hash::from_str(&blockhash)
        .map_err(|e| NodeError::TxEncode(format!("blockhash: {e}")))?;

    tx.try_sign(signers, blockhash)
        .map_err(|e| NodeError::TxEncode(format!("signing: {e}")))?;

    let wire = bincode::serialize(tx).map_err(|e| NodeError::TxEncode(e.to_string()))?;
    let signature = rpc.send_transaction(&BASE64.encode(wire)).await?;
    info!(%signature, "transaction sent");
    Ok(signature)
}

/// Poll `getTransaction` until the cluster returns a record or the budget is
/// exhausted. A record whose `meta.err` is non-null is a failed transaction.
pub async fn await_tx(
    rpc: &RpcClient,
    signature: &str,
    poll_ms: u64,
    max_tries: u32,
) -> Result<Json> {
    for attempt in 0..max_tries {
        if let Some(record) = rpc.get_transaction(signature).await? {
            let err = record.pointer("/meta/err").cloned().unwrap_or(Json::Null);
            if !err.is_null() {
                return Err(NodeError::TransactionFailed {
                    signature: signature.to_string(),
                    err: err.to_string(),
                });
            }
            info!(%signature, attempt, "transaction finalized");
            return Ok(record);
        }
        trace!(%signature, attempt, "transaction not yet visible");
        sleep(Duration::from_millis(poll_ms)).await;
    }

    Err(NodeError::Timeout {
        signature: signature.to_string(),
        tries: max_tries,
    })
}

/// Submit and wait with the default polling budget.
pub async fn send_and_confirm(
    rpc: &RpcClient,
    tx: &mut Transaction,
    signers: &[&Keypair],
) -> Result<String> {
    let signature = send_tx(rpc, tx, signers).await?;
    await_tx(rpc, &signature, DEFAULT_POLL_MS, DEFAULT_MAX_TRIES).await?;
    Ok(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_tries_times_out_without_polling() {
        // An unroutable endpoint: any actual RPC call would error, so a
        // clean Timeout proves no request was issued.
        let rpc = RpcClient::new("http://127.0.0.1:1");
        let err = await_tx(&rpc, "sig", 1, 0).await.unwrap_err();
        match err {
            NodeError::Timeout { signature, tries } => {
                assert_eq!(signature, "sig");
                assert_eq!(tries, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
