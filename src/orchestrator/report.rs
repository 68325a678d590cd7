//! Per-item outcomes and the run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status of one work item within a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Every step is now `Completed` or `Skipped`
    Completed,
    /// Nothing to do: finished on an earlier run
    AlreadyFinished,
    /// A step was declined with halt
    Paused { step: String },
    Failed { step: String, error: String },
    /// Lookup failed, item locked, or persisted record unusable
    Unavailable { reason: String },
    /// Cancelled between steps
    Interrupted { step: String },
    /// Never started because the run was aborted or cancelled first
    NotAttempted,
    /// Hit the infrastructure error that aborted the run
    Aborted { reason: String },
}

impl ItemOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::AlreadyFinished => "already finished",
            Self::Paused { .. } => "paused",
            Self::Failed { .. } => "failed",
            Self::Unavailable { .. } => "unavailable",
            Self::Interrupted { .. } => "interrupted",
            Self::NotAttempted => "not attempted",
            Self::Aborted { .. } => "aborted",
        }
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused { step } => write!(f, "paused at '{step}'"),
            Self::Failed { step, error } => write!(f, "failed at '{step}': {error}"),
            Self::Unavailable { reason } => write!(f, "unavailable: {reason}"),
            Self::Interrupted { step } => write!(f, "interrupted before '{step}'"),
            Self::Aborted { reason } => write!(f, "aborted: {reason}"),
            other => write!(f, "{}", other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub id: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub items: Vec<ItemReport>,
    /// Set when an infrastructure error stopped the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            items: Vec::new(),
            aborted: None,
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn outcome_of(&self, id: &str) -> Option<&ItemOutcome> {
        self.items.iter().find(|r| r.id == id).map(|r| &r.outcome)
    }

    /// How many items ended with the given label.
    pub fn count(&self, label: &str) -> usize {
        self.items
            .iter()
            .filter(|r| r.outcome.label() == label)
            .count()
    }
}
