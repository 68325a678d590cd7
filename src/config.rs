use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::ConfigurationError;
use crate::finalizer::{CommandFinalizer, Finalizer, FinalizerChain, LogFinalizer, WebhookFinalizer};
use crate::init::ONBOARD_DIR;
use crate::onboard_config::{OnboardToml, SourceKind};
use crate::source::{CommandSource, FileSource, WorkItemSource};
use crate::state::JsonFileStore;
use crate::workflow::command::EnvironmentVars;
use crate::workflow::{CommandStep, StepSpec, WorkflowDefinition};

/// Runtime configuration.
///
/// Bridges `onboard.toml` with environment and CLI overrides, resolves all
/// paths under `.onboard/`, and builds the collaborators a run needs. Read
/// once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub onboard_dir: PathBuf,
    pub state_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub yes: bool,
    /// Interpolated project file
    pub toml: OnboardToml,
    cli_max_parallel: Option<usize>,
    cli_approval_timeout: Option<u64>,
}

impl Config {
    /// Load `.env` and `onboard.toml` from `project_dir` and interpolate it.
    pub fn load(project_dir: &Path, verbose: bool, yes: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory {}", project_dir.display()))?;

        let dotenv = project_dir.join(".env");
        if dotenv.exists() {
            dotenvy::from_path(&dotenv)
                .with_context(|| format!("Failed to load {}", dotenv.display()))?;
        }

        let onboard_dir = project_dir.join(ONBOARD_DIR);
        let toml = OnboardToml::load_or_default(&onboard_dir)?.resolve()?;

        Ok(Self::from_toml(project_dir, toml, verbose, yes))
    }

    /// Build from an already-resolved file. Paths are not canonicalized.
    pub fn from_toml(project_dir: PathBuf, toml: OnboardToml, verbose: bool, yes: bool) -> Self {
        let onboard_dir = project_dir.join(ONBOARD_DIR);
        Self {
            state_dir: onboard_dir.join("state"),
            runs_dir: onboard_dir.join("runs"),
            log_dir: onboard_dir.join("logs"),
            onboard_dir,
            project_dir,
            verbose,
            yes,
            toml,
            cli_max_parallel: None,
            cli_approval_timeout: None,
        }
    }

    pub fn with_cli_overrides(
        mut self,
        max_parallel: Option<usize>,
        approval_timeout: Option<u64>,
    ) -> Self {
        self.cli_max_parallel = max_parallel;
        self.cli_approval_timeout = approval_timeout;
        self
    }

    /// CLI → `ONBOARD_MAX_PARALLEL` → file.
    pub fn max_parallel(&self) -> Result<usize, ConfigurationError> {
        let value = match self.cli_max_parallel {
            Some(v) => v,
            None => env_override("ONBOARD_MAX_PARALLEL")?
                .unwrap_or(self.toml.defaults.max_parallel),
        };
        if value == 0 {
            return Err(ConfigurationError::Invalid {
                key: "max_parallel".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    }

    /// CLI → `ONBOARD_APPROVAL_TIMEOUT` → file. Zero means no timeout.
    pub fn approval_timeout_secs(&self) -> Result<u64, ConfigurationError> {
        match self.cli_approval_timeout {
            Some(v) => Ok(v),
            None => Ok(env_override("ONBOARD_APPROVAL_TIMEOUT")?
                .unwrap_or(self.toml.defaults.approval_timeout_secs)),
        }
    }

    pub fn tickets_dir(&self) -> PathBuf {
        match &self.toml.source.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.onboard_dir.join(dir),
            None => self.onboard_dir.join("tickets"),
        }
    }

    /// Configured environment tags. Empty means any tag is accepted.
    pub fn environments(&self) -> BTreeSet<String> {
        self.toml.environments.keys().cloned().collect()
    }

    fn environment_vars(&self) -> EnvironmentVars {
        self.toml
            .environments
            .iter()
            .map(|(tag, env)| (tag.clone(), env.vars.clone()))
            .collect()
    }

    pub fn build_workflow(&self) -> Result<WorkflowDefinition, ConfigurationError> {
        self.toml.check()?;
        let environments = Arc::new(self.environment_vars());
        let steps: Vec<Arc<dyn StepSpec>> = self
            .toml
            .steps
            .iter()
            .map(|step| {
                Arc::new(CommandStep::new(
                    step.clone(),
                    &self.project_dir,
                    self.toml.defaults.command_timeout_secs,
                    environments.clone(),
                )) as Arc<dyn StepSpec>
            })
            .collect();
        WorkflowDefinition::new(steps)
    }

    pub fn build_source(&self) -> Result<Arc<dyn WorkItemSource>, ConfigurationError> {
        let source = &self.toml.source;
        match source.kind {
            SourceKind::Files => Ok(Arc::new(FileSource::new(self.tickets_dir()))),
            SourceKind::Command => {
                let fetch = source.fetch.clone().ok_or_else(|| ConfigurationError::Missing {
                    key: "source.fetch".to_string(),
                })?;
                Ok(Arc::new(
                    CommandSource::new(
                        source.list.clone(),
                        fetch,
                        &self.project_dir,
                        self.toml.defaults.command_timeout_secs,
                    )
                    .with_env(BTreeMap::new()),
                ))
            }
        }
    }

    pub fn build_finalizer(&self) -> Arc<dyn Finalizer> {
        let finalize = &self.toml.finalize;
        let mut chain = FinalizerChain::new().push(Arc::new(LogFinalizer));
        if finalize.has_commands() {
            chain = chain.push(Arc::new(CommandFinalizer {
                on_started: finalize.on_started.clone(),
                on_complete: finalize.on_complete.clone(),
                on_paused: finalize.on_paused.clone(),
                on_failed: finalize.on_failed.clone(),
                working_dir: self.project_dir.clone(),
                timeout_secs: self.toml.defaults.command_timeout_secs,
            }));
        }
        if let Some(url) = finalize.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            chain = chain.push(Arc::new(WebhookFinalizer::new(url)));
        }
        Arc::new(chain)
    }

    pub fn build_store(&self) -> JsonFileStore {
        JsonFileStore::new(&self.state_dir)
    }
}

fn env_override<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigurationError> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigurationError::Invalid {
                    key: name.to_string(),
                    message: format!("'{raw}' is not a valid number"),
                })
        }
        _ => Ok(None),
    }
}
