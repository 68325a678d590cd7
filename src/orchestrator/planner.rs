//! Resume planning: load or create an item's state and find where to start.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::errors::{LookupError, OnboardError};
use crate::finalizer::Finalizer;
use crate::source::{WorkItemRef, WorkItemSource};
use crate::state::{StateStore, WorkflowState};
use crate::workflow::WorkflowDefinition;

#[derive(Debug)]
pub enum Plan {
    /// Overall status is `Completed`; no step will run.
    AlreadyFinished(WorkflowState),
    ResumeAt { state: WorkflowState, index: usize },
}

pub struct ResumePlanner {
    workflow: Arc<WorkflowDefinition>,
    store: Arc<dyn StateStore>,
    source: Arc<dyn WorkItemSource>,
    finalizer: Arc<dyn Finalizer>,
    /// Configured environment tags; empty accepts any tag
    environments: BTreeSet<String>,
}

impl ResumePlanner {
    pub fn new(
        workflow: Arc<WorkflowDefinition>,
        store: Arc<dyn StateStore>,
        source: Arc<dyn WorkItemSource>,
        finalizer: Arc<dyn Finalizer>,
    ) -> Self {
        Self {
            workflow,
            store,
            source,
            finalizer,
            environments: BTreeSet::new(),
        }
    }

    pub fn with_environments(mut self, environments: BTreeSet<String>) -> Self {
        self.environments = environments;
        self
    }

    pub async fn plan(&self, item: &WorkItemRef) -> Result<Plan, OnboardError> {
        let mut state = match self.store.load(&item.id)? {
            Some(state) => {
                state.check_workflow(&self.workflow)?;
                self.check_environment(&state)?;
                state
            }
            None => self.create(item).await?,
        };
        if state.started_notified_at.is_none() && !state.status.is_finished() {
            self.announce(&mut state).await?;
        }
        self.locate(state)
    }

    async fn create(&self, item: &WorkItemRef) -> Result<WorkflowState, OnboardError> {
        let details = self.source.fetch_details(item).await?;
        let state = WorkflowState::new(details, &self.workflow);
        self.check_environment(&state)?;
        self.store.save(&state)?;
        tracing::info!(item = %item.id, environment = %state.item.environment, "workflow state created");
        Ok(state)
    }

    /// Deliver `notify_started` until it succeeds once.
    async fn announce(&self, state: &mut WorkflowState) -> Result<(), OnboardError> {
        if let Err(e) = self.finalizer.notify_started(&state.item).await {
            tracing::warn!(item = %state.item.id, error = %format!("{e:#}"), "start notification failed, will retry next run");
            return Ok(());
        }
        state.mark_started_notified();
        self.store.save(state)?;
        Ok(())
    }

    fn locate(&self, mut state: WorkflowState) -> Result<Plan, OnboardError> {
        if state.status.is_finished() {
            return Ok(Plan::AlreadyFinished(state));
        }
        match state.resume_point() {
            Some(index) => {
                state.resume();
                tracing::debug!(item = %state.item.id, index, "resume point");
                Ok(Plan::ResumeAt { state, index })
            }
            None => {
                // Every record is terminal but the status lagged behind.
                state.refresh_status();
                self.store.save(&state)?;
                Ok(Plan::AlreadyFinished(state))
            }
        }
    }

    fn check_environment(&self, state: &WorkflowState) -> Result<(), LookupError> {
        if self.environments.is_empty() || self.environments.contains(&state.item.environment) {
            return Ok(());
        }
        Err(LookupError::UnknownEnvironment {
            id: state.item.id.clone(),
            environment: state.item.environment.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalizer::{FinalizeEvent, LogFinalizer};
    use crate::source::{StaticSource, WorkItem};
    use crate::state::{MemoryStateStore, OverallStatus, StepStatus};
    use crate::workflow::StepSpec;
    use crate::workflow::testing::NoopStep;
    use serde_json::json;

    fn planner(items: Vec<WorkItem>) -> (ResumePlanner, Arc<MemoryStateStore>) {
        let specs: Vec<Arc<dyn StepSpec>> = vec![
            Arc::new(NoopStep::new("a")),
            Arc::new(NoopStep::new("b")),
            Arc::new(NoopStep::new("c")),
        ];
        let store = Arc::new(MemoryStateStore::new());
        let planner = ResumePlanner::new(
            Arc::new(WorkflowDefinition::new(specs).unwrap()),
            store.clone(),
            Arc::new(StaticSource::new(items)),
            Arc::new(LogFinalizer),
        );
        (planner, store)
    }

    #[tokio::test]
    async fn test_plan_creates_fresh_state() {
        let (planner, store) = planner(vec![WorkItem::new("T1", "UAE POC")]);
        match planner.plan(&WorkItemRef::new("T1")).await.unwrap() {
            Plan::ResumeAt { state, index } => {
                assert_eq!(index, 0);
                assert!(state.steps.iter().all(|s| s.status == StepStatus::Pending));
            }
            other => panic!("unexpected plan: {other:?}"),
        }
        assert!(store.load("T1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_plan_unknown_item_is_lookup_error() {
        let (planner, store) = planner(vec![]);
        let err = planner.plan(&WorkItemRef::new("T9")).await.unwrap_err();
        assert!(matches!(err, OnboardError::Lookup(LookupError::NotFound { .. })));
        assert!(!err.is_infrastructure());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_plan_resumes_after_terminal_prefix() {
        let (planner, store) = planner(vec![WorkItem::new("T2", "UAE POC")]);
        let Plan::ResumeAt { mut state, .. } = planner.plan(&WorkItemRef::new("T2")).await.unwrap()
        else {
            panic!("expected ResumeAt");
        };
        state.complete(0, json!(1)).unwrap();
        state.await_approval(1).unwrap();
        state.skip(1).unwrap();
        state.pause();
        store.save(&state).unwrap();

        match planner.plan(&WorkItemRef::new("T2")).await.unwrap() {
            Plan::ResumeAt { state, index } => {
                assert_eq!(index, 2);
                assert_eq!(state.status, OverallStatus::InProgress);
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plan_completed_item_is_already_finished() {
        let (planner, store) = planner(vec![WorkItem::new("T1", "UAE POC")]);
        let Plan::ResumeAt { mut state, .. } = planner.plan(&WorkItemRef::new("T1")).await.unwrap()
        else {
            panic!("expected ResumeAt");
        };
        for i in 0..3 {
            state.complete(i, json!(i)).unwrap();
        }
        store.save(&state).unwrap();

        assert!(matches!(
            planner.plan(&WorkItemRef::new("T1")).await.unwrap(),
            Plan::AlreadyFinished(_)
        ));
    }

    #[tokio::test]
    async fn test_plan_rejects_unconfigured_environment() {
        let (planner, store) = planner(vec![WorkItem::new("T1", "MARS POC")]);
        let planner = planner.with_environments(["UAE POC".to_string()].into_iter().collect());
        let err = planner.plan(&WorkItemRef::new("T1")).await.unwrap_err();
        assert!(matches!(
            err,
            OnboardError::Lookup(LookupError::UnknownEnvironment { .. })
        ));
        assert!(store.load("T1").unwrap().is_none());
    }

    /// Rejects the first `failures` notifications.
    struct FlakyFinalizer {
        failures: std::sync::atomic::AtomicUsize,
        delivered: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Finalizer for FlakyFinalizer {
        async fn notify(&self, _event: &FinalizeEvent) -> anyhow::Result<()> {
            use std::sync::atomic::Ordering;
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("ticket system unreachable");
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_notification_retried_until_delivered() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let specs: Vec<Arc<dyn StepSpec>> = vec![Arc::new(NoopStep::new("a"))];
        let store = Arc::new(MemoryStateStore::new());
        let finalizer = Arc::new(FlakyFinalizer {
            failures: AtomicUsize::new(1),
            delivered: AtomicUsize::new(0),
        });
        let planner = ResumePlanner::new(
            Arc::new(WorkflowDefinition::new(specs).unwrap()),
            store.clone(),
            Arc::new(StaticSource::new(vec![WorkItem::new("T1", "UAE POC")])),
            finalizer.clone(),
        );

        planner.plan(&WorkItemRef::new("T1")).await.unwrap();
        assert!(store.load("T1").unwrap().unwrap().started_notified_at.is_none());

        planner.plan(&WorkItemRef::new("T1")).await.unwrap();
        assert_eq!(finalizer.delivered.load(Ordering::SeqCst), 1);
        assert!(store.load("T1").unwrap().unwrap().started_notified_at.is_some());

        planner.plan(&WorkItemRef::new("T1")).await.unwrap();
        assert_eq!(finalizer.delivered.load(Ordering::SeqCst), 1);
    }
}
