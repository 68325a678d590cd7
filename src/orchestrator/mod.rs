pub mod coordinator;
pub mod executor;
pub mod planner;
pub mod report;

pub use coordinator::RunCoordinator;
pub use executor::{Halt, StepExecutor};
pub use planner::{Plan, ResumePlanner};
pub use report::{ItemOutcome, ItemReport, RunSummary};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared interrupt flag, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
