//! Step execution: check, preview, approve, execute, checkpoint.
//!
//! Every state transition is persisted before the executor moves on, so a
//! crash leaves the store at the last committed transition and a resumed run
//! re-validates the interrupted step through its idempotency check.

use std::sync::Arc;

use super::CancelFlag;
use crate::errors::{ExecutionError, OnboardError, TransitionError};
use crate::gates::{ApprovalGate, Decision, Preview};
use crate::state::{OverallStatus, StateStore, StepStatus, WorkflowState};
use crate::workflow::{Presence, StepInput, StepSpec, WorkflowDefinition};

/// Why processing of an item stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    Completed,
    Paused { step: String },
    Failed { step: String, error: String },
    Interrupted { step: String },
}

#[derive(Clone)]
pub struct StepExecutor {
    workflow: Arc<WorkflowDefinition>,
    store: Arc<dyn StateStore>,
    gate: Arc<dyn ApprovalGate>,
    cancel: CancelFlag,
}

impl StepExecutor {
    pub fn new(
        workflow: Arc<WorkflowDefinition>,
        store: Arc<dyn StateStore>,
        gate: Arc<dyn ApprovalGate>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            workflow,
            store,
            gate,
            cancel,
        }
    }

    /// Process steps from `start` until the item completes or halts.
    pub async fn run_from(
        &self,
        state: &mut WorkflowState,
        start: usize,
    ) -> Result<Halt, OnboardError> {
        for index in start..self.workflow.len() {
            if let Some(halt) = self.run_step(state, index).await? {
                return Ok(halt);
            }
        }
        Ok(Halt::Completed)
    }

    /// Process a single step. `None` means carry on with the next one.
    pub async fn run_step(
        &self,
        state: &mut WorkflowState,
        index: usize,
    ) -> Result<Option<Halt>, OnboardError> {
        let step = self
            .workflow
            .step(index)
            .ok_or(TransitionError::OutOfRange {
                index,
                len: self.workflow.len(),
            })?
            .clone();
        let name = step.name().to_string();

        if state.steps[index].status.is_terminal_success() {
            tracing::debug!(item = %state.item.id, step = %name, "step already terminal");
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            return Ok(Some(Halt::Interrupted { step: name }));
        }

        let item = state.item.clone();
        let prior = state.prior_results(index);
        let input = StepInput::new(&item, &prior);

        match step.check(&input).await {
            Ok(Presence::Present { detail }) => {
                tracing::info!(item = %item.id, step = %name, index, "effect already present, recording as completed");
                state.complete_pre_existing(index, detail)?;
                self.save(state)?;
                return Ok(None);
            }
            Ok(Presence::Absent) => {}
            Err(e) => return self.record_failure(state, index, &name, e),
        }

        let body = match step.preview(&input) {
            Ok(body) => body,
            Err(e) => return self.record_failure(state, index, &name, e),
        };

        let decision = if step.requires_approval() {
            state.await_approval(index)?;
            self.save(state)?;
            let preview = Preview {
                item_id: item.id.clone(),
                environment: item.environment.clone(),
                step_index: index,
                step_count: self.workflow.len(),
                step_name: name.clone(),
                title: step.title().to_string(),
                body,
            };
            let decision = match self.gate.ask(&preview).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(item = %item.id, step = %name, error = %e, "no approval decision, pausing");
                    Decision::DeclineAndHalt
                }
            };
            if self.cancel.is_cancelled() {
                return Ok(Some(Halt::Interrupted { step: name }));
            }
            decision
        } else {
            tracing::info!(item = %item.id, step = %name, "{}", body);
            Decision::Approve
        };

        match decision {
            Decision::Decline => {
                tracing::info!(item = %item.id, step = %name, "step declined, skipping");
                state.skip(index)?;
                self.save(state)?;
                Ok(None)
            }
            Decision::DeclineAndHalt => {
                tracing::info!(item = %item.id, step = %name, "step declined, pausing item");
                state.skip(index)?;
                if state.status == OverallStatus::Completed {
                    // Nothing left to pause on.
                    self.save(state)?;
                    return Ok(None);
                }
                state.pause();
                self.save(state)?;
                Ok(Some(Halt::Paused { step: name }))
            }
            Decision::Approve => self.execute(state, index, step.as_ref(), &input).await,
        }
    }

    async fn execute(
        &self,
        state: &mut WorkflowState,
        index: usize,
        step: &dyn StepSpec,
        input: &StepInput<'_>,
    ) -> Result<Option<Halt>, OnboardError> {
        let name = step.name().to_string();
        tracing::info!(item = %input.item.id, step = %name, index, "executing step");

        match step.execute(input).await {
            Ok(result) => {
                state.complete(index, result)?;
                self.save(state)?;
                tracing::info!(item = %input.item.id, step = %name, "step completed");
                Ok(None)
            }
            Err(e) if self.cancel.is_cancelled() => {
                // The step stays as last saved; its check decides next time.
                tracing::warn!(item = %input.item.id, step = %name, error = %e, "step interrupted");
                Ok(Some(Halt::Interrupted { step: name }))
            }
            Err(e) => self.record_failure(state, index, &name, e),
        }
    }

    fn record_failure(
        &self,
        state: &mut WorkflowState,
        index: usize,
        name: &str,
        error: ExecutionError,
    ) -> Result<Option<Halt>, OnboardError> {
        let message = error.to_string();
        tracing::error!(item = %state.item.id, step = %name, error = %message, "step failed");
        state.fail(index, message.clone())?;
        self.save(state)?;
        Ok(Some(Halt::Failed {
            step: name.to_string(),
            error: message,
        }))
    }

    fn save(&self, state: &WorkflowState) -> Result<(), OnboardError> {
        self.store.save(state)?;
        tracing::debug!(
            item = %state.item.id,
            status = %state.status,
            steps = ?state.steps.iter().map(|s| s.status).collect::<Vec<StepStatus>>(),
            "checkpoint"
        );
        Ok(())
    }
}
