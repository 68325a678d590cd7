//! Run log: one JSON file per finished run under `.onboard/runs/`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::orchestrator::RunSummary;

pub struct RunLog {
    runs_dir: PathBuf,
}

impl RunLog {
    pub fn new(runs_dir: &Path) -> Self {
        Self {
            runs_dir: runs_dir.to_path_buf(),
        }
    }

    /// Persist a summary as `<started-at>_<run-id prefix>.json`.
    pub fn write(&self, summary: &RunSummary) -> Result<PathBuf> {
        fs::create_dir_all(&self.runs_dir).with_context(|| {
            format!("Failed to create runs directory {}", self.runs_dir.display())
        })?;

        let prefix: String = summary.run_id.chars().take(8).collect();
        let filename = format!(
            "{}_{}.json",
            summary.started_at.format("%Y-%m-%dT%H-%M-%S"),
            prefix
        );
        let path = self.runs_dir.join(filename);

        let json = serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write run summary to {}", path.display()))?;
        Ok(path)
    }

    /// Run files, most recent first.
    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs: Vec<PathBuf> = fs::read_dir(&self.runs_dir)
            .with_context(|| format!("Failed to read {}", self.runs_dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        runs.sort();
        runs.reverse();
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<RunSummary> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run file {}", path.display()))
    }

    pub fn latest(&self) -> Result<Option<RunSummary>> {
        match self.list_runs()?.first() {
            Some(path) => self.load_run(path).map(Some),
            None => Ok(None),
        }
    }
}
