//! Трекинг экспериментов: параметры, артефакты и модели.
//!
//! Ядро вызывает [`Tracker`] всегда; что делать с записями, решает
//! [`ExperimentSink`]. Ошибки приемника логируются и не прерывают стадию.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("artifact `{0}` is not a file")]
    NotAFile(PathBuf),

    #[error("tracker state poisoned")]
    Poisoned,
}

/// Приемник записей эксперимента
pub trait ExperimentSink: Send + Sync {
    fn log_param(&self, key: &str, value: &str) -> Result<(), TrackerError>;

    fn log_artifact(&self, path: &Path, artifact_path: Option<&str>) -> Result<(), TrackerError>;

    fn log_model(&self, name: &str, model: &serde_json::Value) -> Result<(), TrackerError>;
}

/// Ничего не записывает
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ExperimentSink for NoopSink {
    fn log_param(&self, _key: &str, _value: &str) -> Result<(), TrackerError> {
        Ok(())
    }

    fn log_artifact(&self, _path: &Path, _artifact_path: Option<&str>) -> Result<(), TrackerError> {
        Ok(())
    }

    fn log_model(&self, _name: &str, _model: &serde_json::Value) -> Result<(), TrackerError> {
        Ok(())
    }
}

/// Локальный run: `<root>/<experiment>/<run_id>/{params.json, artifacts/, models/}`
#[derive(Debug)]
pub struct LocalRunSink {
    run_dir: PathBuf,
    params: Mutex<BTreeMap<String, String>>,
}

impl LocalRunSink {
    pub fn start(root: impl AsRef<Path>, experiment: &str) -> Result<Self, TrackerError> {
        let run_id = Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
        let run_dir = root.as_ref().join(experiment).join(run_id);
        fs::create_dir_all(&run_dir)?;

        tracing::info!("Tracking run started at {}", run_dir.display());

        Ok(Self {
            run_dir,
            params: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl ExperimentSink for LocalRunSink {
    fn log_param(&self, key: &str, value: &str) -> Result<(), TrackerError> {
        let mut params = self.params.lock().map_err(|_| TrackerError::Poisoned)?;
        params.insert(key.to_string(), value.to_string());

        let file = fs::File::create(self.run_dir.join("params.json"))?;
        serde_json::to_writer_pretty(file, &*params)?;
        Ok(())
    }

    fn log_artifact(&self, path: &Path, artifact_path: Option<&str>) -> Result<(), TrackerError> {
        let file_name = match (path.is_file(), path.file_name()) {
            (true, Some(name)) => name,
            _ => return Err(TrackerError::NotAFile(path.to_path_buf())),
        };

        let mut dest = self.run_dir.join("artifacts");
        if let Some(sub) = artifact_path {
            dest = dest.join(sub);
        }
        fs::create_dir_all(&dest)?;
        fs::copy(path, dest.join(file_name))?;
        Ok(())
    }

    fn log_model(&self, name: &str, model: &serde_json::Value) -> Result<(), TrackerError> {
        let dir = self.run_dir.join("models");
        fs::create_dir_all(&dir)?;
        let file = fs::File::create(dir.join(format!("{}.json", name)))?;
        serde_json::to_writer_pretty(file, model)?;
        Ok(())
    }
}

/// Best-effort фасад над приемником
#[derive(Clone)]
pub struct Tracker {
    sink: Arc<dyn ExperimentSink>,
}

impl Tracker {
    pub fn new(sink: impl ExperimentSink + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn noop() -> Self {
        Self::new(NoopSink)
    }

    /// Локальный run, а при ошибке создания - пустой трекер
    pub fn local_or_noop(root: Option<&Path>, experiment: &str) -> Self {
        match root.map(|root| LocalRunSink::start(root, experiment)) {
            Some(Ok(sink)) => Self::new(sink),
            Some(Err(e)) => {
                tracing::warn!("Tracking disabled for '{}': {}", experiment, e);
                Self::noop()
            }
            None => Self::noop(),
        }
    }

    pub fn log_param(&self, key: &str, value: &str) {
        if let Err(e) = self.sink.log_param(key, value) {
            tracing::warn!("Failed to log param '{}': {}", key, e);
        }
    }

    pub fn log_artifact(&self, path: &Path, artifact_path: Option<&str>) {
        if let Err(e) = self.sink.log_artifact(path, artifact_path) {
            tracing::warn!("Failed to log artifact {}: {}", path.display(), e);
        }
    }

    pub fn log_model(&self, name: &str, model: &serde_json::Value) {
        if let Err(e) = self.sink.log_model(name, model) {
            tracing::warn!("Failed to log model '{}': {}", name, e);
        }
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker").finish_non_exhaustive()
    }
}
