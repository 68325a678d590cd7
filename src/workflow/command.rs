//! Steps backed by shell commands.
//!
//! `run` performs the side effect and `check` answers the idempotency
//! question. Both get the step input as JSON on stdin and these variables:
//! `ONBOARD_ITEM_ID`, `ONBOARD_ENVIRONMENT`, `ONBOARD_STEP`, plus the item
//! environment's configured `vars`.
//!
//! `check` exit codes: 0 = effect present (stdout kept as detail),
//! 1 = absent, anything else = error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::template;
use super::{Presence, StepInput, StepSpec};
use crate::errors::ExecutionError;
use crate::shell::ShellCommand;
use crate::util::output_to_value;

/// Per-environment variables keyed by environment tag.
pub type EnvironmentVars = BTreeMap<String, BTreeMap<String, String>>;

/// A `[[steps]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStepConfig {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub run: String,
    #[serde(default)]
    pub check: Option<String>,
    /// Template with `{{ path }}` placeholders
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default = "default_requires_approval")]
    pub requires_approval: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_requires_approval() -> bool {
    true
}

impl CommandStepConfig {
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            run: run.into(),
            check: None,
            preview: None,
            requires_approval: true,
            timeout_secs: None,
        }
    }
}

pub struct CommandStep {
    config: CommandStepConfig,
    working_dir: PathBuf,
    timeout_secs: u64,
    environments: Arc<EnvironmentVars>,
}

impl CommandStep {
    pub fn new(
        config: CommandStepConfig,
        working_dir: impl Into<PathBuf>,
        default_timeout_secs: u64,
        environments: Arc<EnvironmentVars>,
    ) -> Self {
        let timeout_secs = config.timeout_secs.unwrap_or(default_timeout_secs);
        Self {
            config,
            working_dir: working_dir.into(),
            timeout_secs,
            environments,
        }
    }

    fn vars_for(&self, input: &StepInput<'_>) -> BTreeMap<String, String> {
        self.environments
            .get(&input.item.environment)
            .cloned()
            .unwrap_or_default()
    }

    fn command(&self, script: &str, input: &StepInput<'_>) -> (ShellCommand, String) {
        let vars = self.vars_for(input);
        let stdin = input.to_json(&vars).to_string();
        let cmd = ShellCommand::new(script, &self.working_dir, self.timeout_secs)
            .envs(&vars)
            .env("ONBOARD_ITEM_ID", &input.item.id)
            .env("ONBOARD_ENVIRONMENT", &input.item.environment)
            .env("ONBOARD_STEP", &self.config.name);
        (cmd, stdin)
    }
}

#[async_trait]
impl StepSpec for CommandStep {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn title(&self) -> &str {
        self.config.title.as_deref().unwrap_or(&self.config.name)
    }

    fn requires_approval(&self) -> bool {
        self.config.requires_approval
    }

    async fn check(&self, input: &StepInput<'_>) -> Result<Presence, ExecutionError> {
        let Some(check) = &self.config.check else {
            return Ok(Presence::Absent);
        };
        let (cmd, stdin) = self.command(check, input);
        let output = cmd.run(&stdin).await?;
        match output.exit_code {
            0 => {
                let detail = output_to_value(&output.stdout);
                Ok(Presence::Present {
                    detail: (!detail.is_null()).then_some(detail),
                })
            }
            1 => Ok(Presence::Absent),
            code => Err(ExecutionError::CommandFailed {
                command: check.clone(),
                exit_code: code,
                stderr: output.failure_detail(),
            }),
        }
    }

    fn preview(&self, input: &StepInput<'_>) -> Result<String, ExecutionError> {
        match &self.config.preview {
            Some(tpl) => template::render(tpl, &input.to_json(&self.vars_for(input))),
            None => Ok(format!(
                "{} for {} ({})\n  $ {}",
                self.title(),
                input.item.id,
                input.item.environment,
                self.config.run
            )),
        }
    }

    async fn execute(&self, input: &StepInput<'_>) -> Result<Value, ExecutionError> {
        let (cmd, stdin) = self.command(&self.config.run, input);
        let output = cmd.run_ok(&stdin).await?;
        Ok(output_to_value(&output.stdout))
    }
}
