//! Run coordination across work items.
//!
//! Items are independent: a failure on one never stops the others. Only an
//! infrastructure error (the state store going away) aborts the run, after
//! which remaining items are reported `NotAttempted`.

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use super::executor::{Halt, StepExecutor};
use super::planner::{Plan, ResumePlanner};
use super::report::{ItemOutcome, ItemReport, RunSummary};
use super::CancelFlag;
use crate::errors::{LookupError, OnboardError};
use crate::finalizer::{Finalizer, LogFinalizer};
use crate::gates::ApprovalGate;
use crate::source::{WorkItemRef, WorkItemSource};
use crate::state::{StateStore, WorkflowState};
use crate::workflow::WorkflowDefinition;

pub struct RunCoordinator {
    source: Arc<dyn WorkItemSource>,
    store: Arc<dyn StateStore>,
    workflow: Arc<WorkflowDefinition>,
    gate: Arc<dyn ApprovalGate>,
    finalizer: Arc<dyn Finalizer>,
    cancel: CancelFlag,
    environments: BTreeSet<String>,
    max_parallel: usize,
    abort_reason: Mutex<Option<String>>,
}

impl RunCoordinator {
    pub fn new(
        source: Arc<dyn WorkItemSource>,
        store: Arc<dyn StateStore>,
        workflow: Arc<WorkflowDefinition>,
        gate: Arc<dyn ApprovalGate>,
    ) -> Self {
        Self {
            source,
            store,
            workflow,
            gate,
            finalizer: Arc::new(LogFinalizer),
            cancel: CancelFlag::new(),
            environments: BTreeSet::new(),
            max_parallel: 1,
            abort_reason: Mutex::new(None),
        }
    }

    pub fn with_finalizer(mut self, finalizer: Arc<dyn Finalizer>) -> Self {
        self.finalizer = finalizer;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_environments(mut self, environments: BTreeSet<String>) -> Self {
        self.environments = environments;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Process one item, or every open item when `only` is `None`.
    ///
    /// Fails only if open items cannot be enumerated; everything else is
    /// reported per item in the summary.
    pub async fn run(&self, only: Option<&str>) -> Result<RunSummary, LookupError> {
        let mut summary = RunSummary::start();

        let refs = match only {
            Some(id) => vec![WorkItemRef::new(id)],
            None => self.source.list_open_items().await?,
        };
        tracing::info!(run_id = %summary.run_id, items = refs.len(), max_parallel = self.max_parallel, "run started");

        let planner = ResumePlanner::new(
            self.workflow.clone(),
            self.store.clone(),
            self.source.clone(),
            self.finalizer.clone(),
        )
        .with_environments(self.environments.clone());
        let executor = StepExecutor::new(
            self.workflow.clone(),
            self.store.clone(),
            self.gate.clone(),
            self.cancel.clone(),
        );

        let mut reports: Vec<(usize, ItemReport)> = stream::iter(refs.into_iter().enumerate())
            .map(|(position, item)| {
                let planner = &planner;
                let executor = &executor;
                async move {
                    let outcome = self.process(planner, executor, &item).await;
                    tracing::info!(item = %item.id, outcome = %outcome, "item finished");
                    (
                        position,
                        ItemReport {
                            id: item.id,
                            outcome,
                        },
                    )
                }
            })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;
        reports.sort_by_key(|(position, _)| *position);

        summary.items = reports.into_iter().map(|(_, report)| report).collect();
        summary.aborted = self.abort_reason.lock().ok().and_then(|r| r.clone());
        summary.finish();
        tracing::info!(
            run_id = %summary.run_id,
            completed = summary.count("completed"),
            failed = summary.count("failed"),
            paused = summary.count("paused"),
            aborted = summary.is_aborted(),
            "run finished"
        );
        Ok(summary)
    }

    async fn process(
        &self,
        planner: &ResumePlanner,
        executor: &StepExecutor,
        item: &WorkItemRef,
    ) -> ItemOutcome {
        if self.is_aborted() || self.cancel.is_cancelled() {
            return ItemOutcome::NotAttempted;
        }

        let _lock = match self.store.lock(&item.id) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                return ItemOutcome::Unavailable {
                    reason: LookupError::Locked {
                        id: item.id.clone(),
                    }
                    .to_string(),
                };
            }
            Err(e) => return self.item_error(&item.id, e.into()),
        };

        let plan = match planner.plan(item).await {
            Ok(plan) => plan,
            Err(e) => return self.item_error(&item.id, e),
        };

        match plan {
            Plan::AlreadyFinished(mut state) => {
                if state.finalized_at.is_none() {
                    self.finalize(&mut state).await;
                }
                ItemOutcome::AlreadyFinished
            }
            Plan::ResumeAt { mut state, index } => {
                tracing::info!(item = %item.id, index, "processing item");
                match executor.run_from(&mut state, index).await {
                    Ok(halt) => self.conclude(&mut state, halt).await,
                    Err(e) => self.item_error(&item.id, e),
                }
            }
        }
    }

    async fn conclude(&self, state: &mut WorkflowState, halt: Halt) -> ItemOutcome {
        match halt {
            Halt::Completed => {
                self.finalize(state).await;
                ItemOutcome::Completed
            }
            Halt::Paused { step } => {
                let reason = format!("step '{step}' was declined");
                if let Err(e) = self.finalizer.notify_paused(&state.item, &step, &reason).await {
                    tracing::warn!(item = %state.item.id, error = %format!("{e:#}"), "pause notification failed");
                }
                ItemOutcome::Paused { step }
            }
            Halt::Failed { step, error } => {
                if let Err(e) = self.finalizer.notify_failed(&state.item, &step, &error).await {
                    tracing::warn!(item = %state.item.id, error = %format!("{e:#}"), "failure notification failed");
                }
                ItemOutcome::Failed { step, error }
            }
            Halt::Interrupted { step } => ItemOutcome::Interrupted { step },
        }
    }

    /// Deliver the completion notice and record that it was delivered.
    async fn finalize(&self, state: &mut WorkflowState) {
        let results = state.all_results();
        if let Err(e) = self.finalizer.notify_complete(&state.item, &results).await {
            tracing::warn!(item = %state.item.id, error = %format!("{e:#}"), "completion notification failed, will retry next run");
            return;
        }
        state.mark_finalized();
        if let Err(e) = self.store.save(state) {
            tracing::warn!(item = %state.item.id, error = %e, "failed to record finalization");
            if !e.is_item_scoped() {
                self.abort(e.to_string());
            }
        }
    }

    fn item_error(&self, id: &str, error: OnboardError) -> ItemOutcome {
        if error.is_infrastructure() {
            tracing::error!(item = %id, error = %error, "infrastructure error, aborting run");
            let reason = error.to_string();
            self.abort(reason.clone());
            return ItemOutcome::Aborted { reason };
        }
        tracing::warn!(item = %id, error = %error, "item unavailable");
        ItemOutcome::Unavailable {
            reason: error.to_string(),
        }
    }

    fn abort(&self, reason: String) {
        if let Ok(mut slot) = self.abort_reason.lock()
            && slot.is_none()
        {
            *slot = Some(reason);
        }
        // In-flight items stop at their next step boundary.
        self.cancel.cancel();
    }

    fn is_aborted(&self) -> bool {
        self.abort_reason
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(true)
    }
}
