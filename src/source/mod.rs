//! Work item sources.
//!
//! A source answers two questions: which items are open, and what does one
//! item look like right now. Details are fetched once, when an item is first
//! seen; after that the persisted snapshot is authoritative.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::LookupError;
use crate::shell::ShellCommand;

/// One unit of work, typically a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    pub environment: String,
    /// Extracted entities, e.g. `users: [{firstname, lastname, email}]`
    #[serde(default)]
    pub entities: BTreeMap<String, Value>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: String::new(),
            environment: environment.into(),
            entities: BTreeMap::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_entity(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entities.insert(key.into(), value);
        self
    }
}

/// Reference to a work item as returned by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItemRef {
    pub id: String,
}

impl WorkItemRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
pub trait WorkItemSource: Send + Sync {
    async fn list_open_items(&self) -> Result<Vec<WorkItemRef>, LookupError>;

    async fn fetch_details(&self, item: &WorkItemRef) -> Result<WorkItem, LookupError>;
}

/// On-disk ticket: a work item plus an open/closed flag.
#[derive(Debug, Clone, Deserialize)]
struct TicketFile {
    #[serde(flatten)]
    item: WorkItem,
    #[serde(default = "default_open")]
    open: bool,
}

fn default_open() -> bool {
    true
}

/// Tickets stored as `*.json` files in a directory.
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_all(&self) -> Result<Vec<TicketFile>, LookupError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let pattern = self.dir.join("*.json");
        let paths = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| LookupError::Enumerate(e.to_string()))?;

        let mut tickets = Vec::new();
        for path in paths.filter_map(|p| p.ok()) {
            match read_ticket(&path) {
                Ok(ticket) => tickets.push(ticket),
                Err(message) => {
                    tracing::warn!(path = %path.display(), %message, "skipping unreadable ticket file");
                }
            }
        }
        tickets.sort_by(|a, b| a.item.id.cmp(&b.item.id));
        Ok(tickets)
    }
}

fn read_ticket(path: &Path) -> Result<TicketFile, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}

#[async_trait]
impl WorkItemSource for FileSource {
    async fn list_open_items(&self) -> Result<Vec<WorkItemRef>, LookupError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|t| t.open)
            .map(|t| WorkItemRef::new(t.item.id))
            .collect())
    }

    async fn fetch_details(&self, item: &WorkItemRef) -> Result<WorkItem, LookupError> {
        self.read_all()
            .map_err(|e| LookupError::Source {
                id: item.id.clone(),
                message: e.to_string(),
            })?
            .into_iter()
            .find(|t| t.item.id == item.id)
            .map(|t| t.item)
            .ok_or_else(|| LookupError::NotFound {
                id: item.id.clone(),
            })
    }
}

/// Source backed by two shell commands.
///
/// `list` prints a JSON array of ids (or of objects with an `id` field).
/// `fetch` receives `ONBOARD_ITEM_ID` and prints one work item as JSON; exit
/// code 1 means the item does not exist.
pub struct CommandSource {
    list: Option<String>,
    fetch: String,
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
    timeout_secs: u64,
}

impl CommandSource {
    pub fn new(
        list: Option<String>,
        fetch: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            list,
            fetch: fetch.into(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            timeout_secs,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

fn parse_id_list(value: Value) -> Result<Vec<WorkItemRef>, String> {
    let Value::Array(entries) = value else {
        return Err("expected a JSON array".to_string());
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::String(id) => Ok(WorkItemRef::new(id)),
            Value::Object(map) => match map.get("id") {
                Some(Value::String(id)) => Ok(WorkItemRef::new(id.clone())),
                _ => Err("object entry without a string 'id'".to_string()),
            },
            other => Err(format!("unexpected entry {other}")),
        })
        .collect()
}

#[async_trait]
impl WorkItemSource for CommandSource {
    async fn list_open_items(&self) -> Result<Vec<WorkItemRef>, LookupError> {
        let Some(list) = &self.list else {
            return Err(LookupError::Enumerate(
                "source has no 'list' command; pass an item id".to_string(),
            ));
        };
        let output = ShellCommand::new(list, &self.working_dir, self.timeout_secs)
            .envs(&self.env)
            .run_ok("")
            .await
            .map_err(|e| LookupError::Enumerate(e.to_string()))?;
        let value: Value = serde_json::from_str(output.stdout.trim())
            .map_err(|e| LookupError::Enumerate(format!("invalid list output: {e}")))?;
        parse_id_list(value).map_err(LookupError::Enumerate)
    }

    async fn fetch_details(&self, item: &WorkItemRef) -> Result<WorkItem, LookupError> {
        let source_err = |message: String| LookupError::Source {
            id: item.id.clone(),
            message,
        };

        let output = ShellCommand::new(&self.fetch, &self.working_dir, self.timeout_secs)
            .envs(&self.env)
            .env("ONBOARD_ITEM_ID", &item.id)
            .run("")
            .await
            .map_err(|e| source_err(e.to_string()))?;

        match output.exit_code {
            0 => {}
            1 => {
                return Err(LookupError::NotFound {
                    id: item.id.clone(),
                });
            }
            _ => return Err(source_err(output.failure_detail())),
        }

        let fetched: WorkItem = serde_json::from_str(output.stdout.trim())
            .map_err(|e| source_err(format!("invalid work item JSON: {e}")))?;
        if fetched.id != item.id {
            return Err(source_err(format!(
                "fetch returned item '{}' instead",
                fetched.id
            )));
        }
        Ok(fetched)
    }
}

/// Fixed in-memory set of work items.
#[derive(Default)]
pub struct StaticSource {
    items: Vec<WorkItem>,
}

impl StaticSource {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl WorkItemSource for StaticSource {
    async fn list_open_items(&self) -> Result<Vec<WorkItemRef>, LookupError> {
        Ok(self
            .items
            .iter()
            .map(|i| WorkItemRef::new(i.id.clone()))
            .collect())
    }

    async fn fetch_details(&self, item: &WorkItemRef) -> Result<WorkItem, LookupError> {
        self.items
            .iter()
            .find(|i| i.id == item.id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                id: item.id.clone(),
            })
    }
}
