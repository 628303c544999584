//! ============================================================================
//! Network Profiles — Program IDs per cluster
//! ============================================================================
//! Maps a named network to the set of on-chain programs the worker talks to.
//! All keys are parsed lazily once and shared for the process lifetime.
//! ============================================================================

use once_cell::sync::Lazy;
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

use crate::error::NodeError;

/// Program IDs and well-known accounts for one cluster.
#[derive(Debug, Clone)]
pub struct Programs {
    /// NOS token mint (staking and payment token).
    pub token_mint: Pubkey,
    /// Jobs program: markets, jobs, runs.
    pub jobs: Pubkey,
    /// Staking program.
    pub stake: Pubkey,
    /// Rewards program.
    pub rewards: Pubkey,
    /// Rewards pool account.
    pub rewards_pool: Pubkey,
    /// Collection the access NFT must belong to.
    pub nft_collection: Pubkey,
    /// Null-placeholder key used where an account slot must be filled.
    pub dummy: Pubkey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Devnet,
}

impl FromStr for Network {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "mainnet-beta" => Ok(Network::Mainnet),
            "devnet" => Ok(Network::Devnet),
            other => Err(NodeError::Config(format!("unknown network `{other}`"))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Devnet => write!(f, "devnet"),
        }
    }
}

fn parse(name: &str, value: &str) -> Pubkey {
    Pubkey::from_str(value)
        .unwrap_or_else(|_| panic!("Invalid {name} pubkey — this is a compile-time constant"))
}

static MAINNET: Lazy<Programs> = Lazy::new(|| Programs {
    token_mint: parse("token mint", "nosXBVoaCTtYdLvKY6Csb4AC8JCdQKKAaWYtx2ZMoo7"),
    jobs: parse("jobs program", "nosJhNRqr2bc9g1nfGDcXXTXvYUmxD4cVwy2pMWhrYM"),
    stake: parse("stake program", "nosScmHY2uR24Zh751PmGj9ww9QRNHewh9H59AfrTJE"),
    rewards: parse("rewards program", "nosRB8DUV67oLNrL45bo2pFLrmsWPiewe2Lk2DRNYCp"),
    rewards_pool: parse("rewards pool", "miF9saGY5WS747oia48WR3CMFZMAGG8xt1hrTQdJDVQ"),
    nft_collection: parse(
        "nft collection",
        "BvQdEcdz3LmBHWrER71c1JxSnH1zcsqFRhmbXJPitgFo",
    ),
    dummy: parse("dummy", "dumxV3VCB8CBaBYVXBVB3eqcvZvCWewfsFKTqB9fSFx"),
});

static DEVNET: Lazy<Programs> = Lazy::new(|| Programs {
    token_mint: parse("token mint", "devr1BGQndEW5k5zfvG5FsLyZv1Ap73vNgAHcQ9sUVP"),
    jobs: parse("jobs program", "nosJhNRqr2bc9g1nfGDcXXTXvYUmxD4cVwy2pMWhrYM"),
    stake: parse("stake program", "nosScmHY2uR24Zh751PmGj9ww9QRNHewh9H59AfrTJE"),
    rewards: parse("rewards program", "nosRB8DUV67oLNrL45bo2pFLrmsWPiewe2Lk2DRNYCp"),
    rewards_pool: parse("rewards pool", "A2rnDpNwweYiD8fUDrjHQ7arZNjxo92xxeQQDBkwPyZo"),
    nft_collection: parse(
        "nft collection",
        "39cHPds1TiraRfSL7iJu7iCMayrs6ac6GexbDpR2KKDa",
    ),
    dummy: parse("dummy", "dumxV3VCB8CBaBYVXBVB3eqcvZvCWewfsFKTqB9fSFx"),
});

impl Network {
    pub fn programs(&self) -> &'static Programs {
        match self {
            Network::Mainnet => &MAINNET,
            Network::Devnet => &DEVNET,
        }
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.mainnet-beta.solana.com",
            Network::Devnet => "https://api.devnet.solana.com",
        }
    }
}
