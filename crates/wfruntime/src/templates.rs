//! Versioned template storage keyed by `(name, version)`.
//!
//! Each template name owns one mutable "latest" document and an append-only
//! list of numbered snapshots. Numbered versions are only ever created by
//! `create_version`, which snapshots the current latest document.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use wfcore::{TemplateError, TemplateVersion, WorkflowTemplate};

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Load a template; `None` means latest.
    async fn load(
        &self,
        name: &str,
        version: Option<&TemplateVersion>,
    ) -> Result<WorkflowTemplate, TemplateError>;

    /// Replace the latest document for `template.name`.
    async fn save_latest(&self, template: WorkflowTemplate) -> Result<(), TemplateError>;

    /// Snapshot latest into the next numbered version and return its number.
    async fn create_version(&self, name: &str) -> Result<u32, TemplateError>;

    /// `Latest` first, then numbered versions ascending.
    async fn list_versions(&self, name: &str) -> Result<Vec<TemplateVersion>, TemplateError>;
}

/// Everything stored for one template name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateHistory {
    #[serde(default)]
    pub latest: Option<WorkflowTemplate>,
    #[serde(default)]
    pub versions: BTreeMap<u32, WorkflowTemplate>,
}

impl TemplateHistory {
    fn resolve(&self, name: &str, version: Option<&TemplateVersion>) -> Result<WorkflowTemplate, TemplateError> {
        let version = version.cloned().unwrap_or_default();
        let found = match &version {
            TemplateVersion::Latest => self.latest.as_ref(),
            TemplateVersion::Number(n) => self.versions.get(n),
        };
        found
            .cloned()
            .map(|mut template| {
                template.name = name.to_string();
                template.version = version.clone();
                template
            })
            .ok_or_else(|| TemplateError::NotFound {
                name: name.to_string(),
                version,
            })
    }

    fn snapshot_latest(&mut self, name: &str) -> Result<u32, TemplateError> {
        let latest = self.latest.clone().ok_or_else(|| not_found(name))?;
        let next = self.versions.keys().next_back().map_or(1, |n| n + 1);
        let mut snapshot = latest;
        snapshot.name = name.to_string();
        snapshot.version = TemplateVersion::Number(next);
        self.versions.insert(next, snapshot);
        Ok(next)
    }

    fn version_list(&self) -> Vec<TemplateVersion> {
        self.latest
            .iter()
            .map(|_| TemplateVersion::Latest)
            .chain(self.versions.keys().map(|n| TemplateVersion::Number(*n)))
            .collect()
    }
}

fn not_found(name: &str) -> TemplateError {
    TemplateError::NotFound {
        name: name.to_string(),
        version: TemplateVersion::Latest,
    }
}

fn prepare_latest(mut template: WorkflowTemplate) -> Result<WorkflowTemplate, TemplateError> {
    template.validate()?;
    template.version = TemplateVersion::Latest;
    Ok(template)
}

/// Template store held entirely in memory
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<String, TemplateHistory>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn load(
        &self,
        name: &str,
        version: Option<&TemplateVersion>,
    ) -> Result<WorkflowTemplate, TemplateError> {
        let templates = self.templates.read().await;
        match templates.get(name) {
            Some(history) => history.resolve(name, version),
            None => Err(TemplateError::NotFound {
                name: name.to_string(),
                version: version.cloned().unwrap_or_default(),
            }),
        }
    }

    async fn save_latest(&self, template: WorkflowTemplate) -> Result<(), TemplateError> {
        let template = prepare_latest(template)?;
        let name = template.name.clone();
        let mut templates = self.templates.write().await;
        templates.entry(name).or_default().latest = Some(template);
        Ok(())
    }

    async fn create_version(&self, name: &str) -> Result<u32, TemplateError> {
        let mut templates = self.templates.write().await;
        let history = templates.get_mut(name).ok_or_else(|| not_found(name))?;
        history.snapshot_latest(name)
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<TemplateVersion>, TemplateError> {
        let templates = self.templates.read().await;
        templates
            .get(name)
            .map(TemplateHistory::version_list)
            .ok_or_else(|| not_found(name))
    }
}

/// Template store backed by a directory with one JSON document per template
/// name. Writes go through a temporary file and a rename.
pub struct JsonTemplateStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, TemplateError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(TemplateError::Invalid(format!(
                "template name '{}' is not a valid document name",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }

    async fn read_history(&self, name: &str) -> Result<Option<TemplateHistory>, TemplateError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| TemplateError::Storage(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TemplateError::Storage(format!("{}: {}", path.display(), e))),
        }
    }

    async fn write_history(&self, name: &str, history: &TemplateHistory) -> Result<(), TemplateError> {
        let path = self.path_for(name)?;
        let storage = |e: std::io::Error| TemplateError::Storage(format!("{}: {}", path.display(), e));

        tokio::fs::create_dir_all(&self.dir).await.map_err(storage)?;
        let json = serde_json::to_vec_pretty(history)
            .map_err(|e| TemplateError::Storage(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(storage)?;
        tokio::fs::rename(&tmp, &path).await.map_err(storage)?;
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for JsonTemplateStore {
    async fn load(
        &self,
        name: &str,
        version: Option<&TemplateVersion>,
    ) -> Result<WorkflowTemplate, TemplateError> {
        match self.read_history(name).await? {
            Some(history) => history.resolve(name, version),
            None => Err(TemplateError::NotFound {
                name: name.to_string(),
                version: version.cloned().unwrap_or_default(),
            }),
        }
    }

    async fn save_latest(&self, template: WorkflowTemplate) -> Result<(), TemplateError> {
        let template = prepare_latest(template)?;
        let name = template.name.clone();
        let _guard = self.write_lock.lock().await;
        let mut history = self.read_history(&name).await?.unwrap_or_default();
        history.latest = Some(template);
        self.write_history(&name, &history).await
    }

    async fn create_version(&self, name: &str) -> Result<u32, TemplateError> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.read_history(name).await?.ok_or_else(|| not_found(name))?;
        let version = history.snapshot_latest(name)?;
        self.write_history(name, &history).await?;
        Ok(version)
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<TemplateVersion>, TemplateError> {
        self.read_history(name)
            .await?
            .map(|h| h.version_list())
            .ok_or_else(|| not_found(name))
    }
}
