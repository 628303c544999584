//! ============================================================================
//! Flows — Persisted per-job workflow state and the engine interface
//! ============================================================================
//! A flow is the off-chain execution attached to one claimed run. The node
//! owns the persisted record (redb); the flow engine that actually runs the
//! pipeline is an external collaborator behind `FlowEngine`.
//! ============================================================================

use async_trait::async_trait;
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{NodeError, Result};

/// Effect dispatched when a flow's git stages failed: the engine records a
/// failed-result artifact so the run can still be finalized.
pub const COMPLETE_JOB_EFFECT: &str = "complete-job";

const FLOWS: TableDefinition<&str, &[u8]> = TableDefinition::new("flows");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failure(String),
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failure(_))
    }
}

/// The slice of engine results the node reads back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowResults {
    /// IPFS hash of the result artifact; present iff the flow is finished.
    pub result_ipfs: Option<String>,
    pub clone: Option<StepOutcome>,
    pub checkout: Option<StepOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Flow id; the base58 run account address, so rediscovered runs
    /// re-attach to their stored flow.
    pub id: String,
    /// Base58 job account address.
    pub job: String,
    /// Base58 run account address.
    pub run: String,
    /// Pipeline document as downloaded from IPFS.
    pub pipeline: String,
    pub created_at: i64,
    pub results: FlowResults,
}

impl Flow {
    pub fn new(run: &str, job: &str, pipeline: String) -> Self {
        Self {
            id: run.to_string(),
            job: job.to_string(),
            run: run.to_string(),
            pipeline,
            created_at: chrono::Utc::now().timestamp(),
            results: FlowResults::default(),
        }
    }

    /// A flow is finished iff the engine stored a result hash.
    pub fn is_finished(&self) -> bool {
        self.results.result_ipfs.is_some()
    }

    /// A flow is git-failed iff a clone or checkout stage recorded an error.
    pub fn is_git_failed(&self) -> bool {
        self.results
            .clone
            .as_ref()
            .map(StepOutcome::is_failure)
            .unwrap_or(false)
            || self
                .results
                .checkout
                .as_ref()
                .map(StepOutcome::is_failure)
                .unwrap_or(false)
    }
}

/// Embedded store for flow records. Safe for concurrent readers; writes go
/// through redb's single-writer transactions.
pub struct FlowStore {
    db: Database,
    path: PathBuf,
}

impl FlowStore {
    /// Open (or create) the store. Defaults to `~/.nosana/flows.redb`.
    pub fn open(path: Option<&Path>) -> Result<Self> {
        let db_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let home = dirs::home_dir()
                    .ok_or_else(|| NodeError::Store("cannot determine home directory".into()))?;
                let dir = home.join(".nosana");
                std::fs::create_dir_all(&dir)
                    .map_err(|e| NodeError::Store(format!("create {}: {e}", dir.display())))?;
                dir.join("flows.redb")
            }
        };

        let db = Database::create(&db_path)
            .map_err(|e| NodeError::Store(format!("open {}: {e}", db_path.display())))?;

        // Ensure the table exists before the first read.
        let txn = db.begin_write().map_err(|e| NodeError::Store(e.to_string()))?;
        txn.open_table(FLOWS)
            .map_err(|e| NodeError::Store(e.to_string()))?;
        txn.commit().map_err(|e| NodeError::Store(e.to_string()))?;

        info!("flow store ready at {}", db_path.display());
        Ok(Self { db, path: db_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, flow: &Flow) -> Result<()> {
        let value = bincode::serialize(flow).map_err(|e| NodeError::Store(e.to_string()))?;

        let txn = self
            .db
            .begin_write()
            .map_err(|e| NodeError::Store(e.to_string()))?;
        {
            let mut table = txn
                .open_table(FLOWS)
                .map_err(|e| NodeError::Store(e.to_string()))?;
            table
                .insert(flow.id.as_str(), value.as_slice())
                .map_err(|e| NodeError::Store(e.to_string()))?;
        }
        txn.commit().map_err(|e| NodeError::Store(e.to_string()))?;

        debug!(flow = %flow.id, "flow saved");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<Flow>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| NodeError::Store(e.to_string()))?;
        let table = txn
            .open_table(FLOWS)
            .map_err(|e| NodeError::Store(e.to_string()))?;

        match table.get(id).map_err(|e| NodeError::Store(e.to_string()))? {
            Some(value) => {
                let flow = bincode::deserialize(value.value())
                    .map_err(|e| NodeError::Store(e.to_string()))?;
                Ok(Some(flow))
            }
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<Flow>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| NodeError::Store(e.to_string()))?;
        let table = txn
            .open_table(FLOWS)
            .map_err(|e| NodeError::Store(e.to_string()))?;

        let mut flows = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(|e| NodeError::Store(e.to_string()))?;
        for entry in iter {
            let (_, value) = entry.map_err(|e| NodeError::Store(e.to_string()))?;
            flows.push(
                bincode::deserialize(value.value())
                    .map_err(|e| NodeError::Store(e.to_string()))?,
            );
        }
        Ok(flows)
    }
}

/// The external pipeline executor. The node only signals it and reads back
/// the flow record; pipeline execution is not specified here.
#[async_trait]
pub trait FlowEngine: Send + Sync {
    /// Tell the engine to start (or resume) executing a persisted flow.
    async fn trigger(&self, flow_id: &str) -> Result<()>;

    /// Dispatch a named effect against a flow and return the updated record.
    async fn handle_effect(&self, name: &str, flow: &Flow) -> Result<Flow>;
}

/// Flow engine reachable over HTTP, sharing the flow store with the node.
pub struct HttpFlowEngine {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpFlowEngine {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("nosana-node/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl FlowEngine for HttpFlowEngine {
    async fn trigger(&self, flow_id: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/flows/{flow_id}/start")))
            .send()
            .await
            .map_err(|e| NodeError::FlowFailed {
                flow_id: flow_id.to_string(),
                reason: format!("trigger: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(NodeError::FlowFailed {
                flow_id: flow_id.to_string(),
                reason: format!("trigger rejected with status {}", response.status()),
            });
        }
        debug!(flow = %flow_id, "engine triggered");
        Ok(())
    }

    async fn handle_effect(&self, name: &str, flow: &Flow) -> Result<Flow> {
        let response = self
            .http
            .post(self.url(&format!("/flows/{}/effects", flow.id)))
            .json(&serde_json::json!({"name": name, "flow": flow}))
            .send()
            .await
            .map_err(|e| NodeError::FlowFailed {
                flow_id: flow.id.clone(),
                reason: format!("effect {name}: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(NodeError::FlowFailed {
                flow_id: flow.id.clone(),
                reason: format!("effect {name} rejected with status {}", response.status()),
            });
        }

        response.json().await.map_err(|e| NodeError::FlowFailed {
            flow_id: flow.id.clone(),
            reason: format!("effect {name}: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_flow(id: &str) -> Flow {
        Flow::new(id, "job-addr", "jobs:\n  - name: build\n".into())
    }

    fn temp_store(tag: &str) -> FlowStore {
        let path = std::env::temp_dir().join(format!(
            "nosana-flow-test-{}-{tag}.redb",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        FlowStore::open(Some(&path)).unwrap()
    }

    #[test]
    fn fresh_flow_is_neither_finished_nor_git_failed() {
        let flow = test_flow("run-1");
        assert!(!flow.is_finished());
        assert!(!flow.is_git_failed());
    }

    #[test]
    fn result_hash_marks_finished() {
        let mut flow = test_flow("run-1");
        flow.results.result_ipfs = Some("QmResult".into());
        assert!(flow.is_finished());
    }

    #[test]
    fn failed_git_stage_marks_git_failed() {
        let mut flow = test_flow("run-1");
        flow.results.clone = Some(StepOutcome::Failure("remote unreachable".into()));
        assert!(flow.is_git_failed());

        let mut flow = test_flow("run-2");
        flow.results.checkout = Some(StepOutcome::Failure("bad ref".into()));
        assert!(flow.is_git_failed());

        let mut flow = test_flow("run-3");
        flow.results.clone = Some(StepOutcome::Success);
        flow.results.checkout = Some(StepOutcome::Success);
        assert!(!flow.is_git_failed());
    }

    #[test]
    fn store_roundtrip() {
        let store = temp_store("roundtrip");
        assert!(store.load("run-1").unwrap().is_none());

        let mut flow = test_flow("run-1");
        store.save(&flow).unwrap();
        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.id, "run-1");
        assert_eq!(loaded.pipeline, flow.pipeline);
        assert!(!loaded.is_finished());

        // Updates overwrite in place.
        flow.results.result_ipfs = Some("QmResult".into());
        store.save(&flow).unwrap();
        assert!(store.load("run-1").unwrap().unwrap().is_finished());

        assert_eq!(store.list().unwrap().len(), 1);
    }
}
