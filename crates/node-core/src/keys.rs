//! ============================================================================
//! Key & Address Utilities
//! ============================================================================
//! Keypair loading, message signing, and every address derivation the node
//! needs: PDAs, associated token accounts, Metaplex metadata accounts, and
//! the deterministic Anchor IDL account location.
//! ============================================================================

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;

use crate::error::{NodeError, Result};

// Well-known program IDs (identical on every network)
pub const SYSTEM_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("11111111111111111111111111111111");
pub const TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const ATA_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");
pub const RENT_SYSVAR_ID: Pubkey =
    solana_sdk::pubkey!("SysvarRent111111111111111111111111111111111");

/// Metaplex token-metadata program, owner of every NFT metadata PDA.
pub const METAPLEX_METADATA_PROGRAM: &str = "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s";

static METAPLEX_PUBKEY: Lazy<Pubkey> = Lazy::new(|| {
    Pubkey::from_str(METAPLEX_METADATA_PROGRAM)
        .expect("Invalid Metaplex program ID — this is a compile-time constant")
});

pub fn metaplex_program() -> Pubkey {
    *METAPLEX_PUBKEY
}

/// Find the program-derived address for `seeds` under `program`.
///
/// Walks the bump seed down from 255 and returns the first candidate that
/// falls off the ed25519 curve, together with the bump that produced it.
pub fn find_pda(seeds: &[&[u8]], program: &Pubkey) -> Result<(Pubkey, u8)> {
    Pubkey::try_find_program_address(seeds, program).ok_or(NodeError::NoValidBump(*program))
}

/// Canonical associated token account for `(owner, mint)`.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address(owner, mint)
}

/// Metadata PDA of an NFT mint: `["metadata", metaplex, mint]` under Metaplex.
pub fn metadata_address(mint: &Pubkey) -> Result<Pubkey> {
    let metaplex = metaplex_program();
    let (address, _) = find_pda(&[b"metadata", metaplex.as_ref(), mint.as_ref()], &metaplex)?;
    Ok(address)
}

/// Deterministic address of a program's Anchor IDL account.
///
/// `base = pda([], program)`, then `SHA-256(base ‖ "anchor:idl" ‖ program)`.
pub fn idl_address(program: &Pubkey) -> Result<Pubkey> {
    let (base, _) = find_pda(&[], program)?;
    Pubkey::create_with_seed(&base, "anchor:idl", program)
        .map_err(|e| NodeError::InvalidKey(format!("idl address for {program}: {e}")))
}

/// Parse a keypair from the operator's byte-array literal (`[174,47,…]`).
pub fn keypair_from_literal(literal: &str) -> Result<Keypair> {
    let bytes: Vec<u8> = serde_json::from_str(literal)
        .map_err(|e| NodeError::InvalidKey(format!("private key literal: {e}")))?;
    Keypair::from_bytes(&bytes).map_err(|e| NodeError::InvalidKey(format!("private key: {e}")))
}

/// ed25519 signature over `message`, base58-encoded (64 bytes raw).
pub fn sign_message(signer: &Keypair, message: &[u8]) -> String {
    let signature = signer.sign_message(message);
    bs58::encode(signature.as_ref()).into_string()
}

/// `SHA-256(from ‖ seed ‖ program)` as raw bytes. The primitive behind
/// seed-derived addresses, exposed for layouts that hash manually.
pub fn hash_with_seed(from: &Pubkey, seed: &[u8], program: &Pubkey) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(from.as_ref());
    hasher.update(seed);
    hasher.update(program.as_ref());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Pubkey {
        Pubkey::from_str(METAPLEX_METADATA_PROGRAM).unwrap()
    }

    #[test]
    fn pda_is_deterministic_and_off_curve() {
        let (a, bump_a) = find_pda(&[b"stake"], &program()).unwrap();
        let (b, bump_b) = find_pda(&[b"stake"], &program()).unwrap();
        assert_eq!(a, b);
        assert_eq!(bump_a, bump_b);
        assert!(!a.is_on_curve());
    }

    #[test]
    fn distinct_seeds_give_distinct_pdas() {
        let (a, _) = find_pda(&[b"stake"], &program()).unwrap();
        let (b, _) = find_pda(&[b"vault"], &program()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn idl_address_is_stable() {
        let a = idl_address(&program()).unwrap();
        let b = idl_address(&program()).unwrap();
        assert_eq!(a, b);
        // The IDL address is seed-derived, not a PDA: it stays on the curve
        // domain and differs from the base PDA itself.
        let (base, _) = find_pda(&[], &program()).unwrap();
        assert_ne!(a, base);
    }

    #[test]
    fn seed_hash_matches_sdk_derivation() {
        let program = program();
        let (base, _) = find_pda(&[], &program).unwrap();
        let derived = Pubkey::create_with_seed(&base, "anchor:idl", &program).unwrap();
        let hashed = Pubkey::from(hash_with_seed(&base, b"anchor:idl", &program));
        assert_eq!(derived, hashed);
    }

    #[test]
    fn ata_matches_spl_derivation() {
        let owner = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ata = associated_token_address(&owner, &mint);
        let (expected, _) = find_pda(
            &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
            &ATA_PROGRAM_ID,
        )
        .unwrap();
        assert_eq!(ata, expected);
    }

    #[test]
    fn keypair_literal_roundtrip() {
        let kp = Keypair::new();
        let literal = serde_json::to_string(&kp.to_bytes().to_vec()).unwrap();
        let parsed = keypair_from_literal(&literal).unwrap();
        assert_eq!(parsed.pubkey(), kp.pubkey());
    }

    #[test]
    fn keypair_literal_rejects_garbage() {
        assert!(keypair_from_literal("not a key").is_err());
        assert!(keypair_from_literal("[1,2,3]").is_err());
    }

    #[test]
    fn signature_is_64_bytes_base58() {
        let kp = Keypair::new();
        let sig = sign_message(&kp, b"nosana_secret_1700000000");
        let raw = bs58::decode(&sig).into_vec().unwrap();
        assert_eq!(raw.len(), 64);
    }
}
