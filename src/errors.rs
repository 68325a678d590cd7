//! Typed error hierarchy for the onboarding orchestrator.
//!
//! One enum per failure class, each with a different blast radius:
//! - `ConfigurationError` — fatal before the run starts
//! - `LookupError` — the work item is skipped, the run continues
//! - `ExecutionError` — a step's side effect failed, the item halts at `Failed`
//! - `PersistenceError` — the state store failed, the run is aborted
//! - `ApprovalError` — treated as decline-and-halt by the executor

use std::path::PathBuf;
use thiserror::Error;

use crate::state::StepStatus;

/// Invalid or missing configuration. Halts startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Required config key '{key}' is missing or empty")]
    Missing { key: String },

    #[error("Environment variable '{name}' referenced by '{key}' is not set")]
    UnsetVariable { key: String, name: String },

    #[error("Invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },
}

/// A work item (or its persisted record) could not be found or used.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Work item {id} not found")]
    NotFound { id: String },

    #[error("Failed to look up {id}: {message}")]
    Source { id: String, message: String },

    #[error("Failed to enumerate open work items: {0}")]
    Enumerate(String),

    #[error("Work item {id} is locked by another worker")]
    Locked { id: String },

    #[error("Environment '{environment}' of {id} is not configured")]
    UnknownEnvironment { id: String, environment: String },

    #[error(
        "Persisted state for {id} was recorded with steps [{recorded}] but the workflow defines [{defined}]"
    )]
    WorkflowMismatch {
        id: String,
        recorded: String,
        defined: String,
    },
}

/// A step's idempotency check, preview or side effect failed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("'{command}' timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Preview placeholder '{{{{{placeholder}}}}}' could not be resolved")]
    Template { placeholder: String },

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The state store could not durably record or read state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("State I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize state for {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Persisted state at {path} is unreadable: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("State store lock poisoned")]
    LockPoisoned,

    #[error("State store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    /// A single unreadable record does not mean the store itself is down.
    pub fn is_item_scoped(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// The approval gate could not produce a decision.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("No approval decision within {secs}s")]
    Timeout { secs: u64 },

    #[error("Approval prompt aborted: {0}")]
    Aborted(String),
}

/// A step record transition that would break the workflow invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Step {index} does not exist (workflow has {len} steps)")]
    OutOfRange { index: usize, len: usize },

    #[error("Step {index} cannot leave Pending while step {previous} is {previous_status}")]
    PredecessorIncomplete {
        index: usize,
        previous: usize,
        previous_status: StepStatus,
    },

    #[error("Step {index} is {from} and cannot move to {to}")]
    Illegal {
        index: usize,
        from: StepStatus,
        to: StepStatus,
    },
}

/// Top-level error for library callers that need a single type.
#[derive(Debug, Error)]
pub enum OnboardError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("Step '{step}' failed: {source}")]
    Execution {
        step: String,
        #[source]
        source: ExecutionError,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl OnboardError {
    /// Whether the error should abort the whole run rather than a single item.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::Persistence(e) => !e.is_item_scoped(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_error_not_found_carries_id() {
        let err = LookupError::NotFound {
            id: "OPS-42".into(),
        };
        match &err {
            LookupError::NotFound { id } => assert_eq!(id, "OPS-42"),
            _ => panic!("Expected NotFound"),
        }
        assert!(err.to_string().contains("OPS-42"));
    }

    #[test]
    fn execution_error_command_failed_mentions_exit_code() {
        let err = ExecutionError::CommandFailed {
            command: "scripts/merge-tenant.sh".into(),
            exit_code: 3,
            stderr: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("code 3"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn template_error_renders_braces() {
        let err = ExecutionError::Template {
            placeholder: "steps.fetch-tenant.id".into(),
        };
        assert_eq!(
            err.to_string(),
            "Preview placeholder '{{steps.fetch-tenant.id}}' could not be resolved"
        );
    }

    #[test]
    fn persistence_error_io_carries_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = PersistenceError::Io {
            path: PathBuf::from("/state/OPS-1.json"),
            source: io_err,
        };
        match &err {
            PersistenceError::Io { path, source } => {
                assert_eq!(path, &PathBuf::from("/state/OPS-1.json"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn onboard_error_classifies_infrastructure() {
        let persistence: OnboardError = PersistenceError::LockPoisoned.into();
        assert!(persistence.is_infrastructure());

        let config: OnboardError = ConfigurationError::Missing { key: "steps".into() }.into();
        assert!(config.is_infrastructure());

        let lookup: OnboardError = LookupError::Locked { id: "OPS-1".into() }.into();
        assert!(!lookup.is_infrastructure());

        let exec = OnboardError::Execution {
            step: "apply-updates".into(),
            source: ExecutionError::Failed("boom".into()),
        };
        assert!(!exec.is_infrastructure());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ConfigurationError::Missing { key: "x".into() });
        assert_std_error(&LookupError::Enumerate("x".into()));
        assert_std_error(&ExecutionError::Failed("x".into()));
        assert_std_error(&PersistenceError::LockPoisoned);
        assert_std_error(&ApprovalError::Timeout { secs: 5 });
        assert_std_error(&TransitionError::OutOfRange { index: 4, len: 3 });
    }
}
