//! ============================================================================
//! Node Configuration — Operator inputs and derived addresses
//! ============================================================================
//! `Vault` holds the raw operator inputs (environment), `NodeConfig` is the
//! pure derivation: signer address, ATAs, every PDA the node needs, and the
//! account name-table consumed by each IDL-built instruction.
//! ============================================================================

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{NodeError, Result};
use crate::keys;
use crate::network::{Network, Programs};

/// Default IPFS HTTP gateway.
pub const DEFAULT_IPFS_URL: &str = "https://nosana.mypinata.cloud/ipfs/";
/// Default delay between work-loop iterations.
pub const DEFAULT_POLL_DELAY_MS: u64 = 10_000;

/// Raw operator inputs, straight from the environment.
#[derive(Debug, Clone)]
pub struct Vault {
    pub network: Network,
    pub rpc_url: Option<String>,
    /// Signer private key as a byte-array literal (`[174,47,…]`).
    pub private_key: String,
    pub dummy_private_key: Option<String>,
    pub market: String,
    pub nft: String,
    pub nft_collection: Option<String>,
    pub ipfs_url: String,
    pub pinata_jwt: Option<String>,
    pub poll_delay_ms: u64,
    pub start_job_loop: bool,
    pub secrets_endpoint: Option<String>,
    pub flow_db_path: Option<PathBuf>,
    pub flow_engine_url: Option<String>,
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Vault {
    /// Read the vault from the process environment (after dotenv loading).
    pub fn from_env() -> Result<Self> {
        let require = |name: &str| {
            env(name).ok_or_else(|| NodeError::Config(format!("{name} is not set")))
        };

        Ok(Self {
            network: env("SOLANA_NETWORK")
                .unwrap_or_else(|| "mainnet".into())
                .parse()?,
            rpc_url: env("SOLANA_RPC_URL"),
            private_key: require("SOLANA_PRIVATE_KEY")?,
            dummy_private_key: env("DUMMY_PRIVATE_KEY"),
            market: require("NOSANA_MARKET")?,
            nft: require("NFT")?,
            nft_collection: env("NFT_COLLECTION"),
            ipfs_url: env("IPFS_URL").unwrap_or_else(|| DEFAULT_IPFS_URL.into()),
            pinata_jwt: env("PINATA_JWT"),
            poll_delay_ms: env("POLL_DELAY_MS")
                .map(|v| {
                    v.parse()
                        .map_err(|_| NodeError::Config(format!("POLL_DELAY_MS: bad value `{v}`")))
                })
                .transpose()?
                .unwrap_or(DEFAULT_POLL_DELAY_MS),
            start_job_loop: env("START_JOB_LOOP")
                .map(|v| !matches!(v.to_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(true),
            secrets_endpoint: env("SECRETS_ENDPOINT"),
            flow_db_path: env("FLOW_DB_PATH").map(PathBuf::from),
            flow_engine_url: env("FLOW_ENGINE_URL"),
        })
    }
}

/// Everything derived once at startup; immutable afterwards.
pub struct NodeConfig {
    pub signer: Keypair,
    pub address: Pubkey,
    pub network: Network,
    pub programs: Programs,
    pub market: Pubkey,
    pub nft_mint: Pubkey,
    /// Signer's NOS associated token account.
    pub nos_ata: Pubkey,
    /// Signer's access-NFT associated token account.
    pub nft_ata: Pubkey,
    /// Stake PDA: `["stake", mint, signer]` under the stake program.
    pub stake: Pubkey,
    /// Market vault PDA: `[market, mint]` under the jobs program.
    pub market_vault: Pubkey,
    pub rewards_vault: Pubkey,
    pub rewards_reflection: Pubkey,
    /// Fixed name→pubkey table every IDL call resolves against.
    pub accounts: HashMap<String, Pubkey>,
    pub rpc_url: String,
    pub ipfs_url: String,
    pub pinata_jwt: Option<String>,
    pub poll_delay_ms: u64,
    pub start_job_loop: bool,
    pub secrets_endpoint: Option<String>,
    pub flow_db_path: Option<PathBuf>,
    pub flow_engine_url: Option<String>,
}

fn parse_pubkey(name: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).map_err(|e| NodeError::Config(format!("{name}: {e}")))
}

impl NodeConfig {
    /// Pure derivation of the node configuration from the vault.
    pub fn derive(vault: Vault) -> Result<Self> {
        let signer = keys::keypair_from_literal(&vault.private_key)?;
        let address = signer.pubkey();

        let mut programs = vault.network.programs().clone();
        if let Some(collection) = &vault.nft_collection {
            programs.nft_collection = parse_pubkey("NFT_COLLECTION", collection)?;
        }
        if let Some(literal) = &vault.dummy_private_key {
            programs.dummy = keys::keypair_from_literal(literal)?.pubkey();
        }

        let market = parse_pubkey("NOSANA_MARKET", &vault.market)?;
        let nft_mint = parse_pubkey("NFT", &vault.nft)?;

        let nos_ata = keys::associated_token_address(&address, &programs.token_mint);
        let nft_ata = keys::associated_token_address(&address, &nft_mint);
        let metadata = keys::metadata_address(&nft_mint)?;

        let (stake, _) = keys::find_pda(
            &[b"stake", programs.token_mint.as_ref(), address.as_ref()],
            &programs.stake,
        )?;
        let (market_vault, _) = keys::find_pda(
            &[market.as_ref(), programs.token_mint.as_ref()],
            &programs.jobs,
        )?;
        let (rewards_vault, _) =
            keys::find_pda(&[programs.token_mint.as_ref()], &programs.rewards)?;
        let (rewards_reflection, _) = keys::find_pda(&[b"reflection"], &programs.rewards)?;

        let mut accounts = HashMap::new();
        accounts.insert("authority".into(), address);
        accounts.insert("payer".into(), address);
        accounts.insert("market".into(), market);
        accounts.insert("vault".into(), market_vault);
        accounts.insert("mint".into(), programs.token_mint);
        accounts.insert("nft".into(), nft_ata);
        accounts.insert("metadata".into(), metadata);
        accounts.insert("stake".into(), stake);
        accounts.insert("user".into(), nos_ata);
        accounts.insert("accessKey".into(), programs.nft_collection);
        accounts.insert("rewardsVault".into(), rewards_vault);
        accounts.insert("rewardsReflection".into(), rewards_reflection);
        accounts.insert("rewardsProgram".into(), programs.rewards);
        accounts.insert("pool".into(), programs.rewards_pool);
        accounts.insert("tokenProgram".into(), keys::TOKEN_PROGRAM_ID);
        accounts.insert("associatedTokenProgram".into(), keys::ATA_PROGRAM_ID);
        accounts.insert("systemProgram".into(), keys::SYSTEM_PROGRAM_ID);
        accounts.insert("rent".into(), keys::RENT_SYSVAR_ID);
        // Placeholders; the work loop overrides these per call.
        accounts.insert("job".into(), programs.dummy);
        accounts.insert("run".into(), programs.dummy);

        let rpc_url = vault
            .rpc_url
            .clone()
            .unwrap_or_else(|| vault.network.default_rpc_url().to_string());

        Ok(Self {
            signer,
            address,
            network: vault.network,
            programs,
            market,
            nft_mint,
            nos_ata,
            nft_ata,
            stake,
            market_vault,
            rewards_vault,
            rewards_reflection,
            accounts,
            rpc_url,
            ipfs_url: vault.ipfs_url,
            pinata_jwt: vault.pinata_jwt,
            poll_delay_ms: vault.poll_delay_ms,
            start_job_loop: vault.start_job_loop,
            secrets_endpoint: vault.secrets_endpoint,
            flow_db_path: vault.flow_db_path,
            flow_engine_url: vault.flow_engine_url,
        })
    }

    /// The fixed account table with per-call overrides applied.
    pub fn accounts_with(&self, overrides: &[(&str, Pubkey)]) -> HashMap<String, Pubkey> {
        let mut table = self.accounts.clone();
        for (name, pubkey) in overrides {
            table.insert((*name).to_string(), *pubkey);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> Vault {
        let signer = Keypair::new();
        Vault {
            network: Network::Devnet,
            rpc_url: None,
            private_key: serde_json::to_string(&signer.to_bytes().to_vec()).unwrap(),
            dummy_private_key: None,
            market: Pubkey::new_unique().to_string(),
            nft: Pubkey::new_unique().to_string(),
            nft_collection: None,
            ipfs_url: DEFAULT_IPFS_URL.into(),
            pinata_jwt: None,
            poll_delay_ms: DEFAULT_POLL_DELAY_MS,
            start_job_loop: true,
            secrets_endpoint: None,
            flow_db_path: None,
            flow_engine_url: None,
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let vault = test_vault();
        let a = NodeConfig::derive(vault.clone()).unwrap();
        let b = NodeConfig::derive(vault).unwrap();
        assert_eq!(a.address, b.address);
        assert_eq!(a.stake, b.stake);
        assert_eq!(a.market_vault, b.market_vault);
        assert_eq!(a.rewards_vault, b.rewards_vault);
        assert_eq!(a.rewards_reflection, b.rewards_reflection);
    }

    #[test]
    fn derived_pdas_are_off_curve() {
        let cfg = NodeConfig::derive(test_vault()).unwrap();
        assert!(!cfg.stake.is_on_curve());
        assert!(!cfg.market_vault.is_on_curve());
        assert!(!cfg.rewards_reflection.is_on_curve());
    }

    #[test]
    fn atas_match_spl_derivation() {
        let cfg = NodeConfig::derive(test_vault()).unwrap();
        assert_eq!(
            cfg.nos_ata,
            keys::associated_token_address(&cfg.address, &cfg.programs.token_mint)
        );
        assert_eq!(
            cfg.nft_ata,
            keys::associated_token_address(&cfg.address, &cfg.nft_mint)
        );
    }

    #[test]
    fn account_table_has_every_instruction_name() {
        let cfg = NodeConfig::derive(test_vault()).unwrap();
        for name in [
            "authority",
            "payer",
            "market",
            "vault",
            "mint",
            "nft",
            "metadata",
            "stake",
            "user",
            "accessKey",
            "tokenProgram",
            "systemProgram",
            "rent",
            "job",
            "run",
        ] {
            assert!(cfg.accounts.contains_key(name), "missing `{name}`");
        }
    }

    #[test]
    fn overrides_replace_placeholders() {
        let cfg = NodeConfig::derive(test_vault()).unwrap();
        let run = Pubkey::new_unique();
        let table = cfg.accounts_with(&[("run", run)]);
        assert_eq!(table["run"], run);
        // And only the named entries change.
        assert_eq!(table["market"], cfg.market);
    }

    #[test]
    fn bad_market_key_is_a_config_error() {
        let mut vault = test_vault();
        vault.market = "not-base58!".into();
        assert!(matches!(
            NodeConfig::derive(vault),
            Err(NodeError::Config(_))
        ));
    }
}
