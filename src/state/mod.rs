//! Durable per-item workflow state.
//!
//! A [`WorkflowState`] is created the first time a work item is seen and is
//! mutated one step transition at a time. Every transition goes through
//! [`WorkflowState::transition`], which enforces the ordering and
//! immutability invariants before anything reaches the store.

pub mod lock;
pub mod store;

pub use lock::ItemLock;
pub use store::{JsonFileStore, MemoryStateStore, StateStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{LookupError, TransitionError};
use crate::source::WorkItem;
use crate::workflow::WorkflowDefinition;

/// Status of a single step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    AwaitingApproval,
    Completed,
    Skipped,
    Failed,
}

impl StepStatus {
    /// `Completed` or `Skipped`: the record is immutable from here on.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    fn can_move_to(&self, to: StepStatus) -> bool {
        use StepStatus::*;
        match self {
            Pending => matches!(to, AwaitingApproval | Completed | Failed),
            AwaitingApproval => matches!(to, AwaitingApproval | Completed | Skipped | Failed),
            Failed => matches!(to, AwaitingApproval | Completed | Failed),
            Completed | Skipped => false,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::AwaitingApproval => write!(f, "awaiting_approval"),
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Overall status of a work item's workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    Paused,
}

impl OverallStatus {
    /// Only `Completed` items are never executed again.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// One record per (work item, step index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Stable step name from the workflow definition
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Step-defined output, present once `Completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure detail, present only while `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    /// Completed because the check found the effect, not by executing it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pre_existing: bool,
}

impl StepRecord {
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            attempts: 0,
            pre_existing: false,
        }
    }
}

/// Persisted workflow state for one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Point-in-time snapshot of the work item, never re-fetched
    pub item: WorkItem,
    /// SHA-256 over the ordered step names this state was created for
    pub workflow_fingerprint: String,
    pub steps: Vec<StepRecord>,
    pub status: OverallStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once `notify_started` was delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_notified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    /// Fresh state: `InProgress`, every step `Pending`.
    pub fn new(item: WorkItem, workflow: &WorkflowDefinition) -> Self {
        let now = Utc::now();
        Self {
            item,
            workflow_fingerprint: workflow.fingerprint().to_string(),
            steps: workflow
                .step_names()
                .iter()
                .map(|name| StepRecord::pending(name))
                .collect(),
            status: OverallStatus::InProgress,
            created_at: now,
            updated_at: now,
            started_notified_at: None,
            finalized_at: None,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.item.id
    }

    /// Reject state recorded against a different step table.
    pub fn check_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), LookupError> {
        let recorded: Vec<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        let defined = workflow.step_names();
        if recorded == defined {
            return Ok(());
        }
        Err(LookupError::WorkflowMismatch {
            id: self.item.id.clone(),
            recorded: recorded.join(", "),
            defined: defined.join(", "),
        })
    }

    /// First step that is neither `Completed` nor `Skipped`.
    pub fn resume_point(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| !s.status.is_terminal_success())
    }

    /// Results of completed steps before `index`, keyed by step name.
    pub fn prior_results(&self, index: usize) -> BTreeMap<String, Value> {
        self.steps
            .iter()
            .take(index)
            .filter(|s| s.status == StepStatus::Completed)
            .filter_map(|s| s.result.clone().map(|r| (s.name.clone(), r)))
            .collect()
    }

    /// Results of every completed step.
    pub fn all_results(&self) -> BTreeMap<String, Value> {
        self.prior_results(self.steps.len())
    }

    /// Move step `index` to `to`, enforcing order and immutability.
    pub fn transition(&mut self, index: usize, to: StepStatus) -> Result<(), TransitionError> {
        let len = self.steps.len();
        if index >= len {
            return Err(TransitionError::OutOfRange { index, len });
        }
        if index > 0 {
            let previous_status = self.steps[index - 1].status;
            if !previous_status.is_terminal_success() {
                return Err(TransitionError::PredecessorIncomplete {
                    index,
                    previous: index - 1,
                    previous_status,
                });
            }
        }

        let now = Utc::now();
        let record = &mut self.steps[index];
        let from = record.status;
        if !from.can_move_to(to) {
            return Err(TransitionError::Illegal { index, from, to });
        }

        let starts_attempt = matches!(from, StepStatus::Pending | StepStatus::Failed)
            || (from == StepStatus::AwaitingApproval && to == StepStatus::AwaitingApproval);
        if starts_attempt {
            record.attempts += 1;
            record.started_at = Some(now);
        }

        record.status = to;
        match to {
            StepStatus::Completed | StepStatus::Skipped | StepStatus::Failed => {
                record.completed_at = Some(now);
            }
            _ => record.completed_at = None,
        }
        if to != StepStatus::Failed {
            record.error = None;
        }
        if to != StepStatus::Completed {
            record.result = None;
        }
        record.pre_existing = false;

        self.updated_at = now;
        self.refresh_status();
        Ok(())
    }

    pub fn await_approval(&mut self, index: usize) -> Result<(), TransitionError> {
        self.transition(index, StepStatus::AwaitingApproval)
    }

    pub fn complete(&mut self, index: usize, result: Value) -> Result<(), TransitionError> {
        self.transition(index, StepStatus::Completed)?;
        self.steps[index].result = Some(result);
        Ok(())
    }

    /// Complete a step whose effect the idempotency check already found.
    /// The check's detail stands in for the result `execute` would return.
    pub fn complete_pre_existing(
        &mut self,
        index: usize,
        detail: Option<Value>,
    ) -> Result<(), TransitionError> {
        self.transition(index, StepStatus::Completed)?;
        self.steps[index].result = detail;
        self.steps[index].pre_existing = true;
        Ok(())
    }

    pub fn skip(&mut self, index: usize) -> Result<(), TransitionError> {
        self.transition(index, StepStatus::Skipped)
    }

    pub fn fail(&mut self, index: usize, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(index, StepStatus::Failed)?;
        self.steps[index].error = Some(error.into());
        Ok(())
    }

    /// Mark the item paused after a decline-and-halt.
    pub fn pause(&mut self) {
        if self.status == OverallStatus::InProgress {
            self.status = OverallStatus::Paused;
            self.updated_at = Utc::now();
        }
    }

    /// Re-open a paused or failed item for another pass.
    pub fn resume(&mut self) {
        if !self.status.is_finished() {
            self.status = OverallStatus::InProgress;
        }
    }

    pub fn mark_started_notified(&mut self) {
        let now = Utc::now();
        self.started_notified_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_finalized(&mut self) {
        let now = Utc::now();
        self.finalized_at = Some(now);
        self.updated_at = now;
    }

    /// Derive the overall status from the step records.
    ///
    /// `Completed` iff every record is `Completed`/`Skipped`; `Failed` iff any
    /// record is `Failed`; otherwise the current transient status is kept.
    pub fn refresh_status(&mut self) {
        if self.steps.iter().all(|s| s.status.is_terminal_success()) {
            self.status = OverallStatus::Completed;
        } else if self.steps.iter().any(|s| s.status.is_failed()) {
            self.status = OverallStatus::Failed;
        } else if self.status != OverallStatus::Paused {
            self.status = OverallStatus::InProgress;
        }
    }

    /// Check the ordering invariant over the whole record list.
    pub fn is_ordered(&self) -> bool {
        self.steps.windows(2).all(|pair| {
            pair[1].status == StepStatus::Pending || pair[0].status.is_terminal_success()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::NoopStep;
    use serde_json::json;
    use std::sync::Arc;

    fn workflow(names: &[&str]) -> WorkflowDefinition {
        WorkflowDefinition::new(
            names
                .iter()
                .map(|n| Arc::new(NoopStep::new(n)) as Arc<dyn crate::workflow::StepSpec>)
                .collect(),
        )
        .unwrap()
    }

    fn state(names: &[&str]) -> WorkflowState {
        WorkflowState::new(WorkItem::new("OPS-1", "UAE POC"), &workflow(names))
    }

    #[test]
    fn test_new_state_is_all_pending() {
        let s = state(&["a", "b", "c"]);
        assert_eq!(s.status, OverallStatus::InProgress);
        assert_eq!(s.steps.len(), 3);
        assert!(s.steps.iter().all(|r| r.status == StepStatus::Pending));
        assert_eq!(s.resume_point(), Some(0));
    }

    #[test]
    fn test_transition_requires_completed_predecessor() {
        let mut s = state(&["a", "b"]);
        let err = s.await_approval(1).unwrap_err();
        assert_eq!(
            err,
            TransitionError::PredecessorIncomplete {
                index: 1,
                previous: 0,
                previous_status: StepStatus::Pending,
            }
        );
        assert!(s.is_ordered());
    }

    #[test]
    fn test_completed_record_is_immutable() {
        let mut s = state(&["a"]);
        s.complete(0, json!({"id": 1})).unwrap();
        assert!(matches!(
            s.fail(0, "late failure"),
            Err(TransitionError::Illegal { .. })
        ));
        assert!(s.complete(0, json!({"id": 2})).is_err());
        assert_eq!(s.steps[0].result, Some(json!({"id": 1})));
    }

    #[test]
    fn test_pre_existing_result_matches_executed_shape() {
        let mut s = state(&["a", "b"]);
        s.complete_pre_existing(0, Some(json!({"tenant_id": 7}))).unwrap();
        s.complete(1, json!({"tenant_id": 8})).unwrap();

        assert!(s.steps[0].pre_existing);
        assert!(!s.steps[1].pre_existing);
        assert_eq!(s.prior_results(1)["a"]["tenant_id"], 7);
        let raw = serde_json::to_value(&s.steps[1]).unwrap();
        assert!(raw.get("pre_existing").is_none());
    }

    #[test]
    fn test_skipped_record_is_immutable() {
        let mut s = state(&["a", "b"]);
        s.await_approval(0).unwrap();
        s.skip(0).unwrap();
        assert!(s.await_approval(0).is_err());
        assert_eq!(s.resume_point(), Some(1));
    }

    #[test]
    fn test_out_of_range_transition() {
        let mut s = state(&["a"]);
        assert_eq!(
            s.await_approval(3).unwrap_err(),
            TransitionError::OutOfRange { index: 3, len: 1 }
        );
    }

    #[test]
    fn test_overall_status_follows_records() {
        let mut s = state(&["a", "b"]);
        s.complete(0, json!(null)).unwrap();
        assert_eq!(s.status, OverallStatus::InProgress);

        s.fail(1, "boom").unwrap();
        assert_eq!(s.status, OverallStatus::Failed);
        assert_eq!(s.steps[1].error.as_deref(), Some("boom"));

        s.resume();
        s.await_approval(1).unwrap();
        assert_eq!(s.status, OverallStatus::InProgress);
        assert!(s.steps[1].error.is_none());

        s.complete(1, json!("ok")).unwrap();
        assert_eq!(s.status, OverallStatus::Completed);
        assert_eq!(s.resume_point(), None);
    }

    #[test]
    fn test_pause_survives_refresh_until_resumed() {
        let mut s = state(&["a", "b"]);
        s.await_approval(0).unwrap();
        s.skip(0).unwrap();
        s.pause();
        s.refresh_status();
        assert_eq!(s.status, OverallStatus::Paused);
        s.resume();
        assert_eq!(s.status, OverallStatus::InProgress);
    }

    #[test]
    fn test_attempts_count_each_start() {
        let mut s = state(&["a"]);
        s.await_approval(0).unwrap();
        s.fail(0, "first").unwrap();
        s.await_approval(0).unwrap();
        s.await_approval(0).unwrap();
        assert_eq!(s.steps[0].attempts, 3);
        assert!(s.steps[0].started_at.is_some());
        assert!(s.steps[0].completed_at.is_none());
    }

    #[test]
    fn test_prior_results_only_include_completed() {
        let mut s = state(&["a", "b", "c"]);
        s.complete(0, json!({"tenant": "t-1"})).unwrap();
        s.await_approval(1).unwrap();
        s.skip(1).unwrap();
        let prior = s.prior_results(2);
        assert_eq!(prior.len(), 1);
        assert_eq!(prior["a"], json!({"tenant": "t-1"}));
        assert!(s.prior_results(0).is_empty());
    }

    #[test]
    fn test_check_workflow_detects_mismatch() {
        let s = state(&["a", "b"]);
        assert!(s.check_workflow(&workflow(&["a", "b"])).is_ok());
        let err = s.check_workflow(&workflow(&["a", "c"])).unwrap_err();
        assert!(matches!(err, LookupError::WorkflowMismatch { .. }));
    }

    #[test]
    fn test_state_serde_roundtrip_keeps_snapshot() {
        let mut item = WorkItem::new("OPS-9", "IND POC");
        item.entities.insert(
            "users".into(),
            json!([{"firstname": "Ada", "email": "ada@example.com"}]),
        );
        let mut s = WorkflowState::new(item, &workflow(&["a"]));
        s.complete(0, json!({"created": true})).unwrap();

        let text = serde_json::to_string(&s).unwrap();
        let back: WorkflowState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, s);
        assert!(text.contains("\"status\":\"completed\""));
    }
}
