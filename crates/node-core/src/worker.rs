//! ============================================================================
//! Work Loop — Poll, claim, execute, finalize
//! ============================================================================
//! One controller task drives the job lifecycle. Each iteration takes
//! exactly one of four branches:
//!
//!   active flow  -> poll it; finalize when finished
//!   claimed run  -> download the job and start a flow
//!   queued       -> idle
//!   otherwise    -> enter the market
//!
//! A delivered exit signal terminates the loop before the next iteration.
//! ============================================================================

use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::flow::{Flow, FlowEngine, FlowStore, COMPLETE_JOB_EFFECT};
use crate::idl::IdlRegistry;
use crate::ipfs::{self, IpfsClient};
use crate::jobs::{JobsProgram, Run};
use crate::rpc::RpcClient;

/// What one loop iteration should do, given the observed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Poll the active flow and finalize if it is done.
    ProcessFlow(String),
    /// Start a flow for the oldest claimed run.
    StartRun(Run),
    /// Already queued; nothing to do.
    Idle,
    /// Submit the enter-market transaction.
    EnterMarket,
}

/// The iteration state table. Pure so the branching is testable without a
/// cluster. `runs` is expected oldest-first.
pub fn decide(active_flow: Option<String>, runs: Vec<Run>, queued: bool) -> Decision {
    if let Some(id) = active_flow {
        return Decision::ProcessFlow(id);
    }
    if let Some(run) = runs.into_iter().next() {
        return Decision::StartRun(run);
    }
    if queued {
        Decision::Idle
    } else {
        Decision::EnterMarket
    }
}

pub struct Worker {
    cfg: Arc<NodeConfig>,
    jobs: JobsProgram,
    ipfs: IpfsClient,
    store: Arc<FlowStore>,
    engine: Arc<dyn FlowEngine>,
    active_flow: Option<String>,
}

impl Worker {
    pub fn new(
        cfg: Arc<NodeConfig>,
        rpc: Arc<RpcClient>,
        registry: Arc<IdlRegistry>,
        store: Arc<FlowStore>,
        engine: Arc<dyn FlowEngine>,
    ) -> Self {
        let ipfs = IpfsClient::new(cfg.ipfs_url.clone(), cfg.pinata_jwt.clone());
        let jobs = JobsProgram::new(rpc, registry, cfg.clone());

        Self {
            cfg,
            jobs,
            ipfs,
            store,
            engine,
            active_flow: None,
        }
    }

    /// Run until a value arrives on the exit channel. In-flight RPCs are not
    /// interrupted; shutdown takes effect at the next iteration boundary.
    pub async fn run(mut self, mut exit: mpsc::Receiver<()>) {
        info!(address = %self.cfg.address, market = %self.cfg.market, "work loop started");

        loop {
            if let Err(e) = self.tick().await {
                warn!("iteration failed, retrying next poll: {e:#}");
            }

            tokio::select! {
                _ = exit.recv() => {
                    info!("exit signal received, stopping work loop");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(self.cfg.poll_delay_ms)) => {}
            }
        }
    }

    /// One iteration of the state machine. RPC reads are short-circuited:
    /// an active flow skips the run scan, and claimed runs skip the market
    /// read.
    pub async fn tick(&mut self) -> anyhow::Result<()> {
        let active = self.active_flow.clone();
        let runs = if active.is_none() {
            self.jobs.find_my_runs().await?
        } else {
            Vec::new()
        };
        let queued = if active.is_none() && runs.is_empty() {
            self.jobs.get_market().await?.contains(&self.cfg.address)
        } else {
            false
        };

        match decide(active, runs, queued) {
            Decision::ProcessFlow(id) => {
                self.active_flow = self.process_flow(&id).await;
            }
            Decision::StartRun(run) => {
                let id = self.start_run(run).await?;
                self.active_flow = Some(id);
            }
            Decision::Idle => {
                debug!("queued in market, waiting for work");
            }
            Decision::EnterMarket => {
                let signature = self.jobs.enter_market().await?;
                info!(%signature, "entered market queue");
            }
        }
        Ok(())
    }

    /// Poll the active flow. Transient failures keep the flow active so the
    /// next iteration retries it.
    async fn process_flow(&self, id: &str) -> Option<String> {
        match self.try_process_flow(id).await {
            Ok(next) => next,
            Err(e) => {
                warn!(flow = %id, "flow poll failed, keeping it active: {e:#}");
                Some(id.to_string())
            }
        }
    }

    async fn try_process_flow(&self, id: &str) -> anyhow::Result<Option<String>> {
        let Some(mut flow) = self.store.load(id)? else {
            warn!(flow = %id, "active flow missing from store, dropping it");
            return Ok(None);
        };

        if flow.is_git_failed() && !flow.is_finished() {
            info!(flow = %id, "git stage failed, dispatching {COMPLETE_JOB_EFFECT}");
            flow = self.engine.handle_effect(COMPLETE_JOB_EFFECT, &flow).await?;
            self.store.save(&flow)?;
        }

        if flow.is_finished() {
            if self.finalize(&flow).await? {
                return Ok(None);
            }
            // Finalization timed out; re-enter this branch next iteration.
            return Ok(Some(id.to_string()));
        }

        trace!(flow = %id, "flow still running");
        Ok(Some(id.to_string()))
    }

    /// Submit the finish transaction for a finished flow. Returns `true`
    /// once the run is finalized (by us or by an earlier attempt), `false`
    /// when confirmation timed out and the flow must stay active.
    async fn finalize(&self, flow: &Flow) -> anyhow::Result<bool> {
        let run_address = Pubkey::from_str(&flow.run)
            .map_err(|e| NodeError::InvalidKey(format!("run address {}: {e}", flow.run)))?;

        let Some(run) = self.jobs.get_run(&run_address).await? else {
            info!(run = %run_address, "run already closed, nothing to finalize");
            return Ok(true);
        };

        let result = flow.results.result_ipfs.as_ref().ok_or_else(|| {
            NodeError::FlowFailed {
                flow_id: flow.id.clone(),
                reason: "finished flow has no result hash".into(),
            }
        })?;
        let digest = ipfs::ipfs_hash_to_bytes(result)?;

        match self.jobs.finish_run(&run, &digest).await {
            Ok(signature) => {
                info!(%signature, flow = %flow.id, "flow finalized");
                Ok(true)
            }
            Err(NodeError::Timeout { signature, .. }) => {
                warn!(%signature, flow = %flow.id, "finish confirmation timed out, will retry");
                Ok(false)
            }
            Err(e) => {
                // A deterministic failure against an already-closed run means
                // an earlier finish landed; that is success.
                if self.jobs.get_run(&run_address).await?.is_none() {
                    info!(flow = %flow.id, "run closed by earlier finish, treating as success");
                    Ok(true)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Build (or resume) the flow for a claimed run and signal the engine.
    async fn start_run(&self, run: Run) -> anyhow::Result<String> {
        let id = run.address.to_string();

        if self.store.load(&id)?.is_some() {
            info!(flow = %id, "resuming stored flow for rediscovered run");
        } else {
            let job = self
                .jobs
                .get_job(&run.job)
                .await?
                .ok_or_else(|| NodeError::InvalidAccountData(format!(
                    "job {} for run {id} not found",
                    run.job
                )))?;

            let definition = self.ipfs.download_job(&job.ipfs_job).await?;
            let flow = Flow::new(&id, &run.job.to_string(), definition.source);
            self.store.save(&flow)?;
            info!(flow = %id, job = %run.job, "flow created");
        }

        self.engine.trigger(&id).await?;
        Ok(id)
    }
}
