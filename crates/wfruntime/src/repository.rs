//! Run history persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use wfcore::{RepositoryError, RunId, WorkflowRun};

#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Upsert keyed by run id.
    async fn save(&self, run: &WorkflowRun) -> Result<(), RepositoryError>;

    /// Runs of one workflow, newest first.
    async fn history(&self, workflow_name: &str, limit: usize) -> Result<Vec<WorkflowRun>, RepositoryError>;

    async fn get(&self, run_id: RunId) -> Result<WorkflowRun, RepositoryError>;
}

fn newest_first(mut runs: Vec<WorkflowRun>, limit: usize) -> Vec<WorkflowRun> {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit);
    runs
}

#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: RwLock<HashMap<RunId, WorkflowRun>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn save(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn history(&self, workflow_name: &str, limit: usize) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let runs = self.runs.read().await;
        let matching = runs
            .values()
            .filter(|r| r.workflow_name == workflow_name)
            .cloned()
            .collect();
        Ok(newest_first(matching, limit))
    }

    async fn get(&self, run_id: RunId) -> Result<WorkflowRun, RepositoryError> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(RepositoryError::NotFound(run_id))
    }
}

/// One `<run-id>.json` document per run in a directory
pub struct JsonRunRepository {
    dir: PathBuf,
}

impl JsonRunRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: RunId) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }
}

fn storage_error(path: &Path, e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Storage(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl RunRepository for JsonRunRepository {
    async fn save(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        let path = self.path_for(run.id);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error(&self.dir, e))?;
        let json = serde_json::to_vec_pretty(run).map_err(|e| storage_error(&path, e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| storage_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error(&path, e))
    }

    async fn history(&self, workflow_name: &str, limit: usize) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error(&self.dir, e)),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| storage_error(&path, e))?;
            match serde_json::from_slice::<WorkflowRun>(&bytes) {
                Ok(run) if run.workflow_name == workflow_name => runs.push(run),
                Ok(_) => {}
                Err(e) => tracing::warn!("skipping unreadable run record {}: {}", path.display(), e),
            }
        }
        Ok(newest_first(runs, limit))
    }

    async fn get(&self, run_id: RunId) -> Result<WorkflowRun, RepositoryError> {
        let path = self.path_for(run_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepositoryError::NotFound(run_id))
            }
            Err(e) => return Err(storage_error(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| storage_error(&path, e))
    }
}
