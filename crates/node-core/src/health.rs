//! ============================================================================
//! Health Check — SOL, staked NOS, access NFT
//! ============================================================================
//! Advisory gate for the work loop: a failing check disables job polling but
//! never crashes the process.
//! ============================================================================

use tracing::warn;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::rpc::RpcClient;

/// Minimum SOL balance to cover transaction fees (0.1 SOL).
pub const MIN_SOL_BALANCE: u64 = 100_000_000;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;
const NOS_DECIMALS: u32 = 6;

#[derive(Debug, Clone)]
pub struct Health {
    /// Lamport balance of the signer.
    pub sol: u64,
    /// Raw NOS amount in the signer's token account.
    pub nos: u64,
    /// Access-NFT count in the signer's NFT token account.
    pub nft: u64,
    pub secrets_ok: bool,
    pub failures: Vec<String>,
}

impl Health {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Pure gate evaluation over the observed balances.
pub fn evaluate(sol: u64, nos: u64, nft: u64, secrets_ok: bool) -> Health {
    let mut failures = Vec::new();
    if sol < MIN_SOL_BALANCE {
        failures.push(format!(
            "SOL balance {:.4} below minimum {:.4}",
            sol as f64 / LAMPORTS_PER_SOL,
            MIN_SOL_BALANCE as f64 / LAMPORTS_PER_SOL
        ));
    }
    if nft < 1 {
        failures.push("access NFT not found in wallet".to_string());
    }
    if !secrets_ok {
        failures.push("secrets credential not available".to_string());
    }

    Health {
        sol,
        nos,
        nft,
        secrets_ok,
        failures,
    }
}

/// Read balances from chain and evaluate the gate. A missing token account
/// reads as a zero balance.
pub async fn check(rpc: &RpcClient, cfg: &NodeConfig, secrets_ok: bool) -> Result<Health> {
    let sol = rpc.get_balance(&cfg.address).await?;

    let nos = match rpc.get_token_account_balance(&cfg.nos_ata).await {
        Ok(amount) => amount,
        Err(e) => {
            warn!("NOS token account unreadable ({e}) - assuming 0");
            0
        }
    };
    let nft = match rpc.get_token_account_balance(&cfg.nft_ata).await {
        Ok(amount) => amount,
        Err(e) => {
            warn!("NFT token account unreadable ({e}) - assuming 0");
            0
        }
    };

    Ok(evaluate(sol, nos, nft, secrets_ok))
}

/// Startup banner summarizing the node's standing.
pub fn banner(health: &Health, cfg: &NodeConfig) -> String {
    let status = if health.is_ok() {
        "READY".to_string()
    } else {
        format!("DEGRADED ({})", health.failures.join("; "))
    };

    format!(
        "=== Nosana Node ===\n\
         Address: {}\n\
         Network: {}\n\
         Market:  {}\n\
         SOL:     {:.4}\n\
         NOS:     {:.2}\n\
         NFT:     {}\n\
         Status:  {status}",
        cfg.address,
        cfg.network,
        cfg.market,
        health.sol as f64 / LAMPORTS_PER_SOL,
        health.nos as f64 / 10u64.pow(NOS_DECIMALS) as f64,
        health.nft,
    )
}
