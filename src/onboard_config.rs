//! Project configuration read from `.onboard/onboard.toml`.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "customer-onboarding"
//!
//! [defaults]
//! command_timeout_secs = 300
//! max_parallel = 1
//! approval_timeout_secs = 0
//!
//! [source]
//! kind = "files"          # or "command"
//! dir = "tickets"         # relative to .onboard/
//! # list = "scripts/list-open-tickets.sh"
//! # fetch = "scripts/fetch-ticket.sh"
//!
//! [environments."UAE POC"]
//! vars = { API_URL = "https://uae.example.com", PG_DSN = "${UAE_PG_DSN}" }
//!
//! [[steps]]
//! name = "fetch-tenant"
//! title = "Fetch tenant from Postgres"
//! run = "scripts/fetch-tenant.sh"
//! check = "scripts/tenant-exists.sh"
//! preview = "SELECT * FROM tenant WHERE name = '{{ item.entities.tenant }}'"
//!
//! [finalize]
//! on_complete = "scripts/close-ticket.sh"
//! webhook_url = "${ONBOARD_WEBHOOK_URL}"
//! ```
//!
//! `${NAME}` references are replaced from the process environment (after
//! `.env` is loaded) in environment vars, step commands, source commands and
//! finalizer settings. Preview templates are left alone.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::errors::ConfigurationError;
use crate::workflow::CommandStepConfig;

/// Name of the configuration file inside `.onboard/`.
pub const CONFIG_FILE: &str = "onboard.toml";

static VAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Timeout for step, source and finalizer commands
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Work items processed concurrently
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Seconds to wait for an approval decision; 0 waits forever
    #[serde(default)]
    pub approval_timeout_secs: u64,
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_max_parallel() -> usize {
    1
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            max_parallel: default_max_parallel(),
            approval_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Files,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    /// Ticket directory for `files`, relative to `.onboard/`
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub list: Option<String>,
    #[serde(default)]
    pub fetch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FinalizeConfig {
    #[serde(default)]
    pub on_started: Option<String>,
    #[serde(default)]
    pub on_complete: Option<String>,
    #[serde(default)]
    pub on_paused: Option<String>,
    #[serde(default)]
    pub on_failed: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl FinalizeConfig {
    pub fn has_commands(&self) -> bool {
        self.on_started.is_some()
            || self.on_complete.is_some()
            || self.on_paused.is_some()
            || self.on_failed.is_some()
    }
}

/// The complete onboard.toml structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OnboardToml {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub source: SourceConfig,
    /// Keyed by the environment tag carried on work items
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
    #[serde(default)]
    pub steps: Vec<CommandStepConfig>,
    #[serde(default)]
    pub finalize: FinalizeConfig,
}

impl OnboardToml {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|e| match e {
            ConfigurationError::Parse { message, .. } => ConfigurationError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(content).map_err(|e| ConfigurationError::Parse {
            path: PathBuf::from(CONFIG_FILE),
            message: e.to_string(),
        })
    }

    /// Load `.onboard/onboard.toml`, or defaults if it does not exist.
    pub fn load_or_default(onboard_dir: &Path) -> Result<Self, ConfigurationError> {
        let path = onboard_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let content = toml::to_string_pretty(self).context("Failed to serialize onboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// TOML view with literal secrets partially masked, for display.
    pub fn masked(&self) -> Result<toml::Value, ConfigurationError> {
        let mut value = toml::Value::try_from(self).map_err(|e| ConfigurationError::Invalid {
            key: CONFIG_FILE.to_string(),
            message: e.to_string(),
        })?;
        mask_secrets(&mut value);
        Ok(value)
    }

    /// Copy with every `${NAME}` replaced from the process environment.
    pub fn resolve(&self) -> Result<Self, ConfigurationError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(&self, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = self.clone();

        for (tag, env) in out.environments.iter_mut() {
            for (key, value) in env.vars.iter_mut() {
                *value = interpolate(value, &format!("environments.{tag}.vars.{key}"), &lookup)?;
            }
        }
        for step in out.steps.iter_mut() {
            step.run = interpolate(&step.run, &format!("steps.{}.run", step.name), &lookup)?;
            if let Some(check) = step.check.as_mut() {
                *check = interpolate(check, &format!("steps.{}.check", step.name), &lookup)?;
            }
        }
        for (key, slot) in [
            ("source.list", &mut out.source.list),
            ("source.fetch", &mut out.source.fetch),
            ("finalize.on_started", &mut out.finalize.on_started),
            ("finalize.on_complete", &mut out.finalize.on_complete),
            ("finalize.on_paused", &mut out.finalize.on_paused),
            ("finalize.on_failed", &mut out.finalize.on_failed),
            ("finalize.webhook_url", &mut out.finalize.webhook_url),
        ] {
            if let Some(value) = slot.as_mut() {
                *value = interpolate(value, key, &lookup)?;
            }
        }
        Ok(out)
    }

    /// Fatal problems: the workflow cannot be built from this file.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        if self.steps.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "steps".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ConfigurationError::Missing {
                    key: format!("steps[{i}].name"),
                });
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ConfigurationError::Invalid {
                    key: format!("steps.{}", step.name),
                    message: "duplicate step name".to_string(),
                });
            }
            if step.run.trim().is_empty() {
                return Err(ConfigurationError::Missing {
                    key: format!("steps.{}.run", step.name),
                });
            }
        }

        if self.source.kind == SourceKind::Command
            && self.source.fetch.as_deref().is_none_or(|f| f.trim().is_empty())
        {
            return Err(ConfigurationError::Missing {
                key: "source.fetch".to_string(),
            });
        }
        if self.defaults.max_parallel == 0 {
            return Err(ConfigurationError::Invalid {
                key: "defaults.max_parallel".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Non-fatal warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.defaults.command_timeout_secs == 0 {
            warnings.push(
                "defaults.command_timeout_secs is 0: commands without their own timeout will time out immediately"
                    .to_string(),
            );
        }
        for step in &self.steps {
            if step.timeout_secs == Some(0) {
                warnings.push(format!(
                    "steps.{}.timeout_secs is 0: the step will always time out",
                    step.name
                ));
            }
            if step.check.is_none() {
                warnings.push(format!(
                    "steps.{} has no check command: a crash after it runs cannot be detected",
                    step.name
                ));
            }
        }
        if self.source.kind == SourceKind::Command && self.source.list.is_none() {
            warnings.push(
                "source.list is not set: runs must name a single item id".to_string(),
            );
        }
        if self.environments.is_empty() {
            warnings.push(
                "no [environments] configured: items with any environment tag will be accepted"
                    .to_string(),
            );
        }
        warnings
    }
}

fn interpolate<F>(value: &str, key: &str, lookup: &F) -> Result<String, ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    for caps in VAR_REGEX.captures_iter(value) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let resolved = lookup(name.as_str()).ok_or_else(|| ConfigurationError::UnsetVariable {
            key: key.to_string(),
            name: name.as_str().to_string(),
        })?;
        out.push_str(&value[last..whole.start()]);
        out.push_str(&resolved);
        last = whole.end();
    }
    out.push_str(&value[last..]);
    Ok(out)
}

const SECRET_KEY_PARTS: [&str; 4] = ["password", "token", "secret", "api_key"];

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower == "webhook_url" || SECRET_KEY_PARTS.iter().any(|part| lower.contains(part))
}

/// Keep two characters at each end of a literal; `${VAR}` references are shown as-is.
fn mask_value(value: &str) -> String {
    if VAR_REGEX.is_match(value) {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 4 {
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{head}***{tail}")
    } else {
        "***".to_string()
    }
}

fn mask_secrets(value: &mut toml::Value) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table.iter_mut() {
                match child {
                    toml::Value::String(s) if is_secret_key(key) => *s = mask_value(s),
                    _ => mask_secrets(child),
                }
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(mask_secrets),
        _ => {}
    }
}
