//! Finalizers: best-effort notifications about an item's lifecycle.
//!
//! Failures are logged and never change an item's outcome. A completion that
//! could not be delivered leaves `finalized_at` unset so the next run retries
//! it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::shell::ShellCommand;
use crate::source::WorkItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Complete,
    Paused,
    Failed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Complete => "complete",
            Self::Paused => "paused",
            Self::Failed => "failed",
        }
    }
}

/// Payload delivered to every finalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeEvent {
    pub event: EventKind,
    pub item: WorkItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FinalizeEvent {
    fn new(event: EventKind, item: &WorkItem) -> Self {
        Self {
            event,
            item: item.clone(),
            results: None,
            step: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn notify(&self, event: &FinalizeEvent) -> Result<()>;

    /// First time an item is picked up. Retried on later runs until it succeeds.
    async fn notify_started(&self, item: &WorkItem) -> Result<()> {
        self.notify(&FinalizeEvent::new(EventKind::Started, item))
            .await
    }

    async fn notify_complete(
        &self,
        item: &WorkItem,
        results: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let mut event = FinalizeEvent::new(EventKind::Complete, item);
        event.results = Some(results.clone());
        self.notify(&event).await
    }

    async fn notify_paused(&self, item: &WorkItem, step: &str, reason: &str) -> Result<()> {
        let mut event = FinalizeEvent::new(EventKind::Paused, item);
        event.step = Some(step.to_string());
        event.reason = Some(reason.to_string());
        self.notify(&event).await
    }

    async fn notify_failed(&self, item: &WorkItem, step: &str, error: &str) -> Result<()> {
        let mut event = FinalizeEvent::new(EventKind::Failed, item);
        event.step = Some(step.to_string());
        event.reason = Some(error.to_string());
        self.notify(&event).await
    }
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct LogFinalizer;

#[async_trait]
impl Finalizer for LogFinalizer {
    async fn notify(&self, event: &FinalizeEvent) -> Result<()> {
        match event.event {
            EventKind::Failed => tracing::warn!(
                item = %event.item.id,
                step = event.step.as_deref().unwrap_or(""),
                error = event.reason.as_deref().unwrap_or(""),
                "item failed"
            ),
            kind => tracing::info!(
                item = %event.item.id,
                event = kind.as_str(),
                step = event.step.as_deref().unwrap_or(""),
                "item {}",
                kind.as_str()
            ),
        }
        Ok(())
    }
}

/// Runs a configured shell command per event kind with the event JSON on stdin.
#[derive(Debug, Clone, Default)]
pub struct CommandFinalizer {
    pub on_started: Option<String>,
    pub on_complete: Option<String>,
    pub on_paused: Option<String>,
    pub on_failed: Option<String>,
    pub working_dir: PathBuf,
    pub timeout_secs: u64,
}

impl CommandFinalizer {
    fn command_for(&self, kind: EventKind) -> Option<&str> {
        match kind {
            EventKind::Started => self.on_started.as_deref(),
            EventKind::Complete => self.on_complete.as_deref(),
            EventKind::Paused => self.on_paused.as_deref(),
            EventKind::Failed => self.on_failed.as_deref(),
        }
    }
}

#[async_trait]
impl Finalizer for CommandFinalizer {
    async fn notify(&self, event: &FinalizeEvent) -> Result<()> {
        let Some(command) = self.command_for(event.event) else {
            return Ok(());
        };
        let payload = serde_json::to_string(event).context("Failed to serialize event")?;
        ShellCommand::new(command, &self.working_dir, self.timeout_secs)
            .env("ONBOARD_ITEM_ID", &event.item.id)
            .env("ONBOARD_EVENT", event.event.as_str())
            .run_ok(&payload)
            .await
            .with_context(|| format!("Finalizer command for '{}' failed", event.event.as_str()))?;
        Ok(())
    }
}

/// POSTs the event JSON to a URL.
pub struct WebhookFinalizer {
    client: reqwest::Client,
    url: String,
}

impl WebhookFinalizer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Finalizer for WebhookFinalizer {
    async fn notify(&self, event: &FinalizeEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .header("User-Agent", "onboard")
            .json(event)
            .send()
            .await
            .context("Failed to send webhook notification")?
            .error_for_status()
            .context("Webhook endpoint returned error status")?;
        Ok(())
    }
}

/// Delivers to every member; succeeds only if all of them did.
#[derive(Default)]
pub struct FinalizerChain {
    members: Vec<Arc<dyn Finalizer>>,
}

impl FinalizerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, finalizer: Arc<dyn Finalizer>) -> Self {
        self.members.push(finalizer);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl Finalizer for FinalizerChain {
    async fn notify(&self, event: &FinalizeEvent) -> Result<()> {
        let mut failures = Vec::new();
        for member in &self.members {
            if let Err(e) = member.notify(event).await {
                tracing::warn!(
                    item = %event.item.id,
                    event = event.event.as_str(),
                    error = %format!("{e:#}"),
                    "finalizer failed"
                );
                failures.push(format!("{e:#}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("{} finalizer(s) failed: {}", failures.len(), failures.join("; "))
        }
    }
}
