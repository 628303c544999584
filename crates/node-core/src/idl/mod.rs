//! ============================================================================
//! IDL Registry — Fetch, decompress, cache
//! ============================================================================
//! An Anchor program publishes its interface descriptor at a deterministic
//! account. The registry pulls it once per program, inflates the zlib
//! payload, and keeps the parsed document for the process lifetime.
//! ============================================================================

pub mod codec;
pub mod types;

pub use codec::{
    account_discriminator, account_filters, decode_account, encode_account,
    encode_instruction_data, field_offset, fixed_size, method_discriminator, resolve_accounts,
    Value,
};
pub use types::{Idl, IdlAccount, IdlField, IdlInstruction, IdlInstructionAccount, IdlType};

use flate2::read::ZlibDecoder;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{NodeError, Result};
use crate::keys;
use crate::rpc::RpcClient;

/// On-chain IDL account header: 8 discriminator + 32 authority + 4 length.
const IDL_HEADER_LEN: usize = 44;

/// Process-wide IDL cache. Append-only, read-through; safe to share.
#[derive(Default)]
pub struct IdlRegistry {
    cache: RwLock<HashMap<Pubkey, Arc<Idl>>>,
}

impl IdlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The IDL for `program`: cached if seen before, otherwise fetched from
    /// its IDL account and memoized.
    pub async fn fetch(&self, rpc: &RpcClient, program: &Pubkey) -> Result<Arc<Idl>> {
        if let Some(idl) = self.cached(program).await {
            return Ok(idl);
        }

        let address = keys::idl_address(program)?;
        debug!(%program, idl_account = %address, "fetching IDL");

        let data = rpc
            .get_account_info(&address)
            .await?
            .ok_or(NodeError::IdlUnavailable(*program))?;
        let idl = parse_idl_account(&data, program)?;
        Ok(self.insert_if_absent(*program, idl).await)
    }

    /// The cached IDL, without any network traffic.
    pub async fn cached(&self, program: &Pubkey) -> Option<Arc<Idl>> {
        self.cache.read().await.get(program).cloned()
    }

    /// Insert unless another task won the race; either way, return the
    /// entry that ended up in the cache.
    pub async fn insert_if_absent(&self, program: Pubkey, idl: Idl) -> Arc<Idl> {
        let mut cache = self.cache.write().await;
        cache.entry(program).or_insert_with(|| Arc::new(idl)).clone()
    }
}

/// Parse a raw IDL account blob: skip the 44-byte header, inflate the zlib
/// payload (bounded by the header's length field), parse JSON.
pub fn parse_idl_account(data: &[u8], program: &Pubkey) -> Result<Idl> {
    if data.len() <= IDL_HEADER_LEN {
        return Err(NodeError::IdlUnavailable(*program));
    }

    let declared = u32::from_le_bytes(data[40..44].try_into().unwrap()) as usize;
    let end = IDL_HEADER_LEN
        .saturating_add(declared)
        .min(data.len());

    let mut json = String::new();
    ZlibDecoder::new(&data[IDL_HEADER_LEN..end])
        .read_to_string(&mut json)
        .map_err(|e| NodeError::InvalidAccountData(format!("IDL for {program}: inflate: {e}")))?;

    serde_json::from_str(&json)
        .map_err(|e| NodeError::UnknownIdlType(format!("IDL for {program}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn idl_json() -> &'static str {
        r#"{
            "version": "0.1.0",
            "name": "jobs",
            "instructions": [{"name": "work", "accounts": [], "args": []}],
            "accounts": []
        }"#
    }

    fn idl_account_blob(json: &str) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut blob = vec![0u8; 40]; // discriminator + authority
        blob.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        blob.extend_from_slice(&compressed);
        blob
    }

    #[test]
    fn parses_compressed_idl_account() {
        let program = Pubkey::new_unique();
        let blob = idl_account_blob(idl_json());
        let idl = parse_idl_account(&blob, &program).unwrap();
        assert_eq!(idl.name.as_deref(), Some("jobs"));
        assert!(idl.instruction("work").is_some());
    }

    #[test]
    fn tolerates_trailing_padding_after_declared_length() {
        let program = Pubkey::new_unique();
        let mut blob = idl_account_blob(idl_json());
        blob.extend_from_slice(&[0u8; 128]);
        assert!(parse_idl_account(&blob, &program).is_ok());
    }

    #[test]
    fn empty_account_is_unavailable() {
        let program = Pubkey::new_unique();
        assert!(matches!(
            parse_idl_account(&[], &program),
            Err(NodeError::IdlUnavailable(_))
        ));
        assert!(matches!(
            parse_idl_account(&[0u8; 44], &program),
            Err(NodeError::IdlUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn registry_memoizes_per_program() {
        let registry = IdlRegistry::new();
        let program = Pubkey::new_unique();
        assert!(registry.cached(&program).await.is_none());

        let idl: Idl = serde_json::from_str(idl_json()).unwrap();
        let first = registry.insert_if_absent(program, idl.clone()).await;
        // A racing insert keeps the original entry.
        let second = registry.insert_if_absent(program, idl).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.cached(&program).await.is_some());
    }
}
