// ============================================================================
// nosana-node — Worker daemon for the Nosana compute market
// ============================================================================
// Usage:
//   nosana-node start              Run the daemon (health gate + work loop)
//   nosana-node health             Print the health banner and exit
//   nosana-node address            Print the signer address and exit
//   nosana-node flows              List persisted flows
//   nosana-node post --file f.json Pin a job definition and list it
//
// Configuration comes from the environment (or a .env file): SOLANA_NETWORK,
// SOLANA_PRIVATE_KEY, NOSANA_MARKET, NFT, IPFS_URL, PINATA_JWT,
// POLL_DELAY_MS, START_JOB_LOOP, SECRETS_ENDPOINT, FLOW_ENGINE_URL, ...
// ============================================================================

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use node_core::{
    config::{NodeConfig, Vault},
    flow::{FlowStore, HttpFlowEngine},
    health,
    idl::IdlRegistry,
    rpc::RpcClient,
    secrets::SecretsClient,
    worker::Worker,
};

/// Default flow engine endpoint when none is configured.
const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:8124";

/// Nosana worker node
#[derive(Parser)]
#[command(name = "nosana-node", version, about = "Worker daemon for the Nosana compute market")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: health gate, then the work loop
    Start,

    /// Print the health banner and exit
    Health,

    /// Print the signer address and exit
    Address,

    /// List persisted flows and their state
    Flows,

    /// Pin a job definition to IPFS and list it on the configured market
    Post {
        /// Path to the job definition (JSON with a YAML `pipeline` field)
        #[arg(long)]
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Arc::new(NodeConfig::derive(Vault::from_env()?)?);

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => cmd_start(cfg).await,
        Commands::Health => cmd_health(cfg).await,
        Commands::Address => {
            println!("{}", cfg.address);
            Ok(())
        }
        Commands::Flows => cmd_flows(cfg),
        Commands::Post { file } => cmd_post(cfg, &file).await,
    }
}

/// Pin a job definition and create the job + run accounts for it.
async fn cmd_post(cfg: Arc<NodeConfig>, file: &str) -> Result<()> {
    let body: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
    // Validate the pipeline before spending anything.
    node_core::ipfs::JobDefinition::from_json(&body)?;

    let ipfs = node_core::ipfs::IpfsClient::new(cfg.ipfs_url.clone(), cfg.pinata_jwt.clone());
    let hash = ipfs.pin_json(&body).await?;
    let digest = node_core::ipfs::ipfs_hash_to_bytes(&hash)?;
    println!("Pinned job definition: {hash}");

    let rpc = Arc::new(RpcClient::new(cfg.rpc_url.clone()));
    let registry = Arc::new(IdlRegistry::new());
    let jobs = node_core::jobs::JobsProgram::new(rpc, registry, cfg);
    let (signature, job, run) = jobs.list_job(&digest).await?;

    println!("Job listed: {job}");
    println!("Run:        {run}");
    println!("Signature:  {signature}");
    Ok(())
}

/// Try the secrets login; the health gate wants to know whether a
/// credential is obtainable at all.
async fn secrets_login(cfg: &NodeConfig) -> bool {
    let Some(endpoint) = &cfg.secrets_endpoint else {
        return false;
    };
    let client = SecretsClient::new(endpoint.clone());
    match client.login(&cfg.signer, None).await {
        Ok(()) => true,
        Err(e) => {
            warn!("secrets login failed: {e}");
            false
        }
    }
}

async fn cmd_health(cfg: Arc<NodeConfig>) -> Result<()> {
    let rpc = RpcClient::new(cfg.rpc_url.clone());
    let secrets_ok = secrets_login(&cfg).await;
    let health = health::check(&rpc, &cfg, secrets_ok).await?;
    println!("{}", health::banner(&health, &cfg));
    Ok(())
}

async fn cmd_start(cfg: Arc<NodeConfig>) -> Result<()> {
    let rpc = Arc::new(RpcClient::new(cfg.rpc_url.clone()));
    let registry = Arc::new(IdlRegistry::new());

    let secrets_ok = secrets_login(&cfg).await;
    let health = health::check(&rpc, &cfg, secrets_ok).await?;
    println!("{}", health::banner(&health, &cfg));

    let (exit_tx, exit_rx) = mpsc::channel::<()>(1);
    spawn_shutdown_listener(exit_tx);

    if !health.is_ok() {
        warn!("health gate failed, job loop disabled; waiting for shutdown");
        wait_for_exit(exit_rx).await;
        return Ok(());
    }
    if !cfg.start_job_loop {
        info!("job loop disabled by configuration; waiting for shutdown");
        wait_for_exit(exit_rx).await;
        return Ok(());
    }

    let store = Arc::new(FlowStore::open(cfg.flow_db_path.as_deref())?);
    let engine_url = cfg
        .flow_engine_url
        .clone()
        .unwrap_or_else(|| DEFAULT_ENGINE_URL.to_string());
    let engine = Arc::new(HttpFlowEngine::new(engine_url));

    let worker = Worker::new(cfg, rpc, registry, store, engine);
    worker.run(exit_rx).await;

    info!("shutdown complete");
    Ok(())
}

fn cmd_flows(cfg: Arc<NodeConfig>) -> Result<()> {
    let store = FlowStore::open(cfg.flow_db_path.as_deref())?;
    let flows = store.list()?;

    if flows.is_empty() {
        println!("No flows stored.");
        return Ok(());
    }

    println!("{:<46}  {:<10}  {}", "FLOW (RUN)", "STATE", "RESULT");
    for flow in &flows {
        let state = if flow.is_finished() {
            "finished"
        } else if flow.is_git_failed() {
            "git-failed"
        } else {
            "running"
        };
        println!(
            "{:<46}  {:<10}  {}",
            flow.id,
            state,
            flow.results.result_ipfs.as_deref().unwrap_or("-")
        );
    }
    println!("\nTotal: {} flows ({})", flows.len(), store.path().display());
    Ok(())
}

/// Deliver one exit value on Ctrl-C or SIGTERM.
fn spawn_shutdown_listener(exit_tx: mpsc::Sender<()>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!("cannot install SIGTERM handler: {e}");
                    let _ = tokio::signal::ctrl_c().await;
                    let _ = exit_tx.send(()).await;
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown signal received");
        let _ = exit_tx.send(()).await;
    });
}

async fn wait_for_exit(mut exit_rx: mpsc::Receiver<()>) {
    let _ = exit_rx.recv().await;
}
