//! Persistence collaborator for result bundles.
//!
//! Write-once, keyed by experiment id. The file store lays bundles out as
//! `<base>/storage/experiment/<experiment_id>.json`; the in-memory store
//! backs tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::results::ExperimentBundle;

#[async_trait]
pub trait ExperimentStore: Send + Sync {
    /// Persist a bundle. Storing a second bundle under the same experiment
    /// id is an error.
    async fn store(&self, bundle: &ExperimentBundle) -> Result<()>;
}

/// Writes each bundle as pretty-printed JSON under
/// `<base>/storage/experiment/`.
pub struct JsonFileStore {
    base_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn bundle_path(&self, experiment_id: &str) -> PathBuf {
        self.base_dir
            .join("storage")
            .join("experiment")
            .join(format!("{}.json", experiment_id))
    }
}

#[async_trait]
impl ExperimentStore for JsonFileStore {
    async fn store(&self, bundle: &ExperimentBundle) -> Result<()> {
        let path = self.bundle_path(&bundle.experiment_id);
        if path.exists() {
            bail!(
                "Experiment {} is already stored at {}",
                bundle.experiment_id,
                path.display()
            );
        }
        let dir = path.parent().expect("bundle path has a parent");
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let json = serde_json::to_string_pretty(bundle)
            .context("Failed to serialize experiment bundle")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        info!(
            experiment = %bundle.experiment_id,
            path = %path.display(),
            sessions = bundle.sessions.len(),
            "Stored experiment bundle"
        );
        Ok(())
    }
}

/// Capturing store for tests.
#[derive(Default)]
pub struct MemoryStore {
    bundles: Mutex<Vec<ExperimentBundle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bundles(&self) -> Vec<ExperimentBundle> {
        self.bundles.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExperimentStore for MemoryStore {
    async fn store(&self, bundle: &ExperimentBundle) -> Result<()> {
        let mut bundles = self.bundles.lock().unwrap();
        if bundles
            .iter()
            .any(|b| b.experiment_id == bundle.experiment_id)
        {
            bail!("Experiment {} is already stored", bundle.experiment_id);
        }
        bundles.push(bundle.clone());
        Ok(())
    }
}
