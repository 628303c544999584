//! ============================================================================
//! Jobs Program — Markets, jobs, runs
//! ============================================================================
//! Typed read models over IDL-decoded accounts plus the four submissions the
//! worker makes: `list`, `work`, `finish`, `quit`. All instruction payloads
//! and account lists are driven by the program's on-chain IDL.
//! ============================================================================

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::idl::{self, IdlAccount, IdlRegistry, Value};
use crate::rpc::{MemcmpFilter, RpcClient};
use crate::tx;

/// On-chain account type names in the jobs program IDL.
const MARKET_ACCOUNT: &str = "MarketAccount";
const JOB_ACCOUNT: &str = "JobAccount";
const RUN_ACCOUNT: &str = "RunAccount";

/// A market with its ordered queue of waiting workers or jobs.
#[derive(Debug, Clone)]
pub struct Market {
    pub address: Pubkey,
    pub authority: Option<Pubkey>,
    pub queue: Vec<Pubkey>,
}

impl Market {
    /// The worker counts as queued when its address sits in the queue.
    pub fn contains(&self, node: &Pubkey) -> bool {
        self.queue.contains(node)
    }
}

/// A posted job: who listed it and where its pipeline lives.
#[derive(Debug, Clone)]
pub struct Job {
    pub address: Pubkey,
    /// Bare 32-byte digest of the job's CIDv0 IPFS hash.
    pub ipfs_job: [u8; 32],
    pub project: Option<Pubkey>,
    pub time_start: Option<i64>,
    pub time_end: Option<i64>,
}

/// A short-lived claim linking this worker to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub address: Pubkey,
    pub job: Pubkey,
    pub node: Pubkey,
    /// Refunded when the run is finalized.
    pub payer: Pubkey,
    pub time: i64,
}

fn required_pubkey(fields: &HashMap<String, Value>, name: &str, kind: &str) -> Result<Pubkey> {
    fields
        .get(name)
        .and_then(Value::as_pubkey)
        .ok_or_else(|| NodeError::InvalidAccountData(format!("{kind}: missing `{name}`")))
}

impl Run {
    pub fn from_fields(address: Pubkey, fields: &HashMap<String, Value>) -> Result<Self> {
        Ok(Self {
            address,
            job: required_pubkey(fields, "job", RUN_ACCOUNT)?,
            node: required_pubkey(fields, "node", RUN_ACCOUNT)?,
            payer: required_pubkey(fields, "payer", RUN_ACCOUNT)?,
            time: fields.get("time").and_then(Value::as_i64).unwrap_or(0),
        })
    }
}

impl Job {
    pub fn from_fields(address: Pubkey, fields: &HashMap<String, Value>) -> Result<Self> {
        let raw = fields
            .get("ipfsJob")
            .and_then(Value::as_bytes)
            .ok_or_else(|| {
                NodeError::InvalidAccountData(format!("{JOB_ACCOUNT}: bad `ipfsJob`"))
            })?;
        let digest = crate::ipfs::field_to_digest(&raw)?;

        Ok(Self {
            address,
            ipfs_job: digest,
            project: fields.get("project").and_then(Value::as_pubkey),
            time_start: fields.get("timeStart").and_then(Value::as_i64),
            time_end: fields.get("timeEnd").and_then(Value::as_i64),
        })
    }
}

impl Market {
    pub fn from_fields(address: Pubkey, fields: &HashMap<String, Value>) -> Result<Self> {
        let queue = fields
            .get("queue")
            .and_then(Value::items)
            .ok_or_else(|| NodeError::InvalidAccountData(format!("{MARKET_ACCOUNT}: no queue")))?
            .iter()
            .map(|v| {
                v.as_pubkey().ok_or_else(|| {
                    NodeError::InvalidAccountData(format!("{MARKET_ACCOUNT}: non-key in queue"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            address,
            authority: fields.get("authority").and_then(Value::as_pubkey),
            queue,
        })
    }
}

/// Program-account filters selecting this node's runs: discriminator match
/// plus a memcmp on the `node` field. Pure; fails before any I/O when the
/// IDL lacks the field.
pub fn run_filters(def: &IdlAccount, node: &Pubkey) -> Result<Vec<MemcmpFilter>> {
    idl::account_filters(def, &[("node", &Value::Pubkey(*node))])
}

/// Wrap a 32-byte digest as the `[u8; 32]` instruction argument.
fn digest_arg(digest: &[u8; 32]) -> Value {
    Value::Array(digest.iter().copied().map(Value::U8).collect())
}

/// Client for the jobs program, bound to one node configuration.
pub struct JobsProgram {
    rpc: Arc<RpcClient>,
    registry: Arc<IdlRegistry>,
    cfg: Arc<NodeConfig>,
}

impl JobsProgram {
    pub fn new(rpc: Arc<RpcClient>, registry: Arc<IdlRegistry>, cfg: Arc<NodeConfig>) -> Self {
        Self { rpc, registry, cfg }
    }

    async fn account_def(&self, name: &str) -> Result<IdlAccount> {
        let idl = self.registry.fetch(&self.rpc, &self.cfg.programs.jobs).await?;
        idl.account(name)
            .cloned()
            .ok_or_else(|| NodeError::UnknownIdlType(format!("no account type `{name}`")))
    }

    /// The configured market, with its current queue.
    pub async fn get_market(&self) -> Result<Market> {
        let def = self.account_def(MARKET_ACCOUNT).await?;
        let data = self
            .rpc
            .get_account_info(&self.cfg.market)
            .await?
            .ok_or_else(|| {
                NodeError::InvalidAccountData(format!("market {} not found", self.cfg.market))
            })?;
        let fields = idl::decode_account(&def, &data)?;
        Market::from_fields(self.cfg.market, &fields)
    }

    /// A job account, or `None` when it no longer exists.
    pub async fn get_job(&self, address: &Pubkey) -> Result<Option<Job>> {
        let def = self.account_def(JOB_ACCOUNT).await?;
        match self.rpc.get_account_info(address).await? {
            Some(data) => {
                let fields = idl::decode_account(&def, &data)?;
                Ok(Some(Job::from_fields(*address, &fields)?))
            }
            None => Ok(None),
        }
    }

    /// A run account, or `None` when it has been closed.
    pub async fn get_run(&self, address: &Pubkey) -> Result<Option<Run>> {
        let def = self.account_def(RUN_ACCOUNT).await?;
        match self.rpc.get_account_info(address).await? {
            Some(data) => {
                let fields = idl::decode_account(&def, &data)?;
                Ok(Some(Run::from_fields(*address, &fields)?))
            }
            None => Ok(None),
        }
    }

    /// Every run currently claimed by this node, oldest first.
    pub async fn find_my_runs(&self) -> Result<Vec<Run>> {
        let def = self.account_def(RUN_ACCOUNT).await?;
        let filters = run_filters(&def, &self.cfg.address)?;

        let accounts = self
            .rpc
            .get_program_accounts(&self.cfg.programs.jobs, &filters)
            .await?;
        debug!(count = accounts.len(), "claimed runs");

        let mut runs = accounts
            .into_iter()
            .map(|(address, data)| {
                let fields = idl::decode_account(&def, &data)?;
                Run::from_fields(address, &fields)
            })
            .collect::<Result<Vec<_>>>()?;
        runs.sort_by_key(|r| r.time);
        Ok(runs)
    }

    /// Enter the market: claim an available job or enqueue this worker.
    /// Creates a fresh run account.
    pub async fn enter_market(&self) -> Result<String> {
        let run_key = Keypair::new();
        let table = self.cfg.accounts_with(&[("run", run_key.pubkey())]);

        let mut tx = tx::build_idl_tx(
            &self.registry,
            &self.rpc,
            &self.cfg.programs.jobs,
            "work",
            &[],
            &table,
            &self.cfg.address,
        )
        .await?;
        let signature = tx::send_tx(&self.rpc, &mut tx, &[&self.cfg.signer, &run_key]).await?;
        tx::await_tx(&self.rpc, &signature, tx::DEFAULT_POLL_MS, tx::DEFAULT_MAX_TRIES).await?;

        info!(%signature, "entered market");
        Ok(signature)
    }

    /// Post a job whose pipeline was uploaded under `digest`. Creates fresh
    /// job and run accounts; returns `(signature, job, run)`.
    pub async fn list_job(&self, digest: &[u8; 32]) -> Result<(String, Pubkey, Pubkey)> {
        let job_key = Keypair::new();
        let run_key = Keypair::new();
        let table = self
            .cfg
            .accounts_with(&[("job", job_key.pubkey()), ("run", run_key.pubkey())]);

        let mut tx = tx::build_idl_tx(
            &self.registry,
            &self.rpc,
            &self.cfg.programs.jobs,
            "list",
            &[digest_arg(digest)],
            &table,
            &self.cfg.address,
        )
        .await?;
        let signature =
            tx::send_tx(&self.rpc, &mut tx, &[&self.cfg.signer, &job_key, &run_key]).await?;
        tx::await_tx(&self.rpc, &signature, tx::DEFAULT_POLL_MS, tx::DEFAULT_MAX_TRIES).await?;

        info!(%signature, job = %job_key.pubkey(), "job listed");
        Ok((signature, job_key.pubkey(), run_key.pubkey()))
    }

    /// Finalize an owned run with the 32-byte result digest. Closes the run
    /// account and pays out; the run's original payer gets the rent back.
    pub async fn finish_run(&self, run: &Run, result: &[u8; 32]) -> Result<String> {
        let table = self.cfg.accounts_with(&[
            ("job", run.job),
            ("run", run.address),
            ("payer", run.payer),
        ]);

        let mut tx = tx::build_idl_tx(
            &self.registry,
            &self.rpc,
            &self.cfg.programs.jobs,
            "finish",
            &[digest_arg(result)],
            &table,
            &self.cfg.address,
        )
        .await?;
        let signature = tx::send_tx(&self.rpc, &mut tx, &[&self.cfg.signer]).await?;
        tx::await_tx(&self.rpc, &signature, tx::DEFAULT_POLL_MS, tx::DEFAULT_MAX_TRIES).await?;

        info!(%signature, run = %run.address, "run finished");
        Ok(signature)
    }

    /// Abandon a run without a result. Same account set as `finish`, no args.
    pub async fn quit_run(&self, run: &Run) -> Result<String> {
        let table = self.cfg.accounts_with(&[
            ("job", run.job),
            ("run", run.address),
            ("payer", run.payer),
        ]);

        let mut tx = tx::build_idl_tx(
            &self.registry,
            &self.rpc,
            &self.cfg.programs.jobs,
            "quit",
            &[],
            &table,
            &self.cfg.address,
        )
        .await?;
        let signature = tx::send_tx(&self.rpc, &mut tx, &[&self.cfg.signer]).await?;
        tx::await_tx(&self.rpc, &signature, tx::DEFAULT_POLL_MS, tx::DEFAULT_MAX_TRIES).await?;

        info!(%signature, run = %run.address, "run quit");
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idl::types::{IdlField, IdlType, IdlTypeDef};

    fn run_def() -> IdlAccount {
        IdlAccount {
            name: RUN_ACCOUNT.into(),
            ty: IdlTypeDef {
                kind: "struct".into(),
                fields: vec![
                    IdlField {
                        name: "job".into(),
                        ty: IdlType::PublicKey,
                    },
                    IdlField {
                        name: "node".into(),
                        ty: IdlType::PublicKey,
                    },
                    IdlField {
                        name: "payer".into(),
                        ty: IdlType::PublicKey,
                    },
                    IdlField {
                        name: "time".into(),
                        ty: IdlType::I64,
                    },
                ],
            },
        }
    }

    #[test]
    fn run_filters_target_discriminator_and_node_field() {
        let node = Pubkey::new_unique();
        let filters = run_filters(&run_def(), &node).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].offset, 0);
        assert_eq!(
            bs58::decode(&filters[0].bytes).into_vec().unwrap(),
            idl::account_discriminator(RUN_ACCOUNT)
        );
        // job pubkey sits between the discriminator and `node`.
        assert_eq!(filters[1].offset, 8 + 32);
        assert_eq!(
            bs58::decode(&filters[1].bytes).into_vec().unwrap(),
            node.as_ref()
        );
    }

    #[test]
    fn unknown_filter_field_fails_before_io() {
        let mut def = run_def();
        def.ty.fields.retain(|f| f.name != "node");
        assert!(run_filters(&def, &Pubkey::new_unique()).is_err());
    }

    #[test]
    fn run_from_decoded_fields() {
        let job = Pubkey::new_unique();
        let node = Pubkey::new_unique();
        let payer = Pubkey::new_unique();
        let mut fields = HashMap::new();
        fields.insert("job".to_string(), Value::Pubkey(job));
        fields.insert("node".to_string(), Value::Pubkey(node));
        fields.insert("payer".to_string(), Value::Pubkey(payer));
        fields.insert("time".to_string(), Value::I64(1_700_000_000));

        let run = Run::from_fields(Pubkey::new_unique(), &fields).unwrap();
        assert_eq!(run.job, job);
        assert_eq!(run.node, node);
        assert_eq!(run.payer, payer);
        assert_eq!(run.time, 1_700_000_000);

        fields.remove("payer");
        assert!(Run::from_fields(Pubkey::new_unique(), &fields).is_err());
    }

    #[test]
    fn market_queue_membership() {
        let me = Pubkey::new_unique();
        let mut fields = HashMap::new();
        fields.insert(
            "queue".to_string(),
            Value::Vec(vec![Value::Pubkey(Pubkey::new_unique()), Value::Pubkey(me)]),
        );

        let market = Market::from_fields(Pubkey::new_unique(), &fields).unwrap();
        assert!(market.contains(&me));
        assert!(!market.contains(&Pubkey::new_unique()));
    }

    #[test]
    fn job_accepts_bare_and_prefixed_digests() {
        let mut fields = HashMap::new();
        fields.insert(
            "ipfsJob".to_string(),
            Value::Array((0..32u8).map(Value::U8).collect()),
        );
        let job = Job::from_fields(Pubkey::new_unique(), &fields).unwrap();
        assert_eq!(job.ipfs_job[31], 31);

        // 34-byte multihash form: 0x12 0x20 prefix is stripped.
        let mut prefixed = vec![Value::U8(0x12), Value::U8(0x20)];
        prefixed.extend((0..32u8).map(Value::U8));
        fields.insert("ipfsJob".to_string(), Value::Array(prefixed));
        let job = Job::from_fields(Pubkey::new_unique(), &fields).unwrap();
        assert_eq!(job.ipfs_job[0], 0);
        assert_eq!(job.ipfs_job[31], 31);

        fields.insert(
            "ipfsJob".to_string(),
            Value::Array((0..16u8).map(Value::U8).collect()),
        );
        assert!(Job::from_fields(Pubkey::new_unique(), &fields).is_err());
    }
}
