//! Workflow definition: the fixed, ordered table of steps.
//!
//! Each step is a [`StepSpec`] bound at startup. The orchestrator selects
//! steps by index and never mutates the table.

pub mod command;
pub mod template;

pub use command::{CommandStep, CommandStepConfig};

use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::errors::{ConfigurationError, ExecutionError};
use crate::source::WorkItem;

/// Everything a step may depend on: the item snapshot and earlier results.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub item: &'a WorkItem,
    /// Results of completed earlier steps, keyed by step name
    pub prior: &'a BTreeMap<String, Value>,
}

impl<'a> StepInput<'a> {
    pub fn new(item: &'a WorkItem, prior: &'a BTreeMap<String, Value>) -> Self {
        Self { item, prior }
    }

    /// JSON view handed to commands and preview templates.
    pub fn to_json(&self, env: &BTreeMap<String, String>) -> Value {
        json!({
            "item": {
                "id": self.item.id,
                "summary": self.item.summary,
                "environment": self.item.environment,
                "entities": self.item.entities,
            },
            "env": env,
            "steps": self.prior,
        })
    }
}

/// Outcome of an idempotency check against external state.
#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    Absent,
    Present { detail: Option<Value> },
}

impl Presence {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }
}

/// One gated, side-effecting step.
#[async_trait]
pub trait StepSpec: Send + Sync {
    /// Stable identifier. Recorded in state and used as the key for results.
    fn name(&self) -> &str;

    fn title(&self) -> &str {
        self.name()
    }

    fn requires_approval(&self) -> bool {
        true
    }

    /// Has this step's effect already happened, regardless of local records?
    async fn check(&self, input: &StepInput<'_>) -> Result<Presence, ExecutionError>;

    /// Human-readable description of what `execute` is about to do.
    fn preview(&self, input: &StepInput<'_>) -> Result<String, ExecutionError>;

    /// Perform the side effect and return the step's result payload.
    async fn execute(&self, input: &StepInput<'_>) -> Result<Value, ExecutionError>;
}

/// Ordered, immutable table of steps.
#[derive(Clone)]
pub struct WorkflowDefinition {
    steps: Vec<Arc<dyn StepSpec>>,
    fingerprint: String,
}

impl WorkflowDefinition {
    pub fn new(steps: Vec<Arc<dyn StepSpec>>) -> Result<Self, ConfigurationError> {
        if steps.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "steps".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if step.name().trim().is_empty() {
                return Err(ConfigurationError::Invalid {
                    key: "steps.name".to_string(),
                    message: "step names must not be empty".to_string(),
                });
            }
            if !seen.insert(step.name()) {
                return Err(ConfigurationError::Invalid {
                    key: format!("steps.{}", step.name()),
                    message: "duplicate step name".to_string(),
                });
            }
        }

        let mut hasher = Sha256::new();
        for step in &steps {
            hasher.update(step.name().as_bytes());
            hasher.update([0u8]);
        }
        let fingerprint = format!("{:x}", hasher.finalize());

        Ok(Self { steps, fingerprint })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&Arc<dyn StepSpec>> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[Arc<dyn StepSpec>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// SHA-256 over the ordered step names.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("steps", &self.step_names())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Step with no external effect: never present, always succeeds.
    pub struct NoopStep {
        name: String,
    }

    impl NoopStep {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl StepSpec for NoopStep {
        fn name(&self) -> &str {
            &self.name
        }

        async fn check(&self, _input: &StepInput<'_>) -> Result<Presence, ExecutionError> {
            Ok(Presence::Absent)
        }

        fn preview(&self, input: &StepInput<'_>) -> Result<String, ExecutionError> {
            Ok(format!("{} for {}", self.name, input.item.id))
        }

        async fn execute(&self, _input: &StepInput<'_>) -> Result<Value, ExecutionError> {
            Ok(Value::Null)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::NoopStep;
    use super::*;

    fn steps(names: &[&str]) -> Vec<Arc<dyn StepSpec>> {
        names
            .iter()
            .map(|n| Arc::new(NoopStep::new(n)) as Arc<dyn StepSpec>)
            .collect()
    }

    #[test]
    fn test_definition_keeps_order() {
        let wf = WorkflowDefinition::new(steps(&["onboard-users", "fetch-tenant"])).unwrap();
        assert_eq!(wf.len(), 2);
        assert_eq!(wf.step_names(), vec!["onboard-users", "fetch-tenant"]);
        assert_eq!(wf.step(1).map(|s| s.name()), Some("fetch-tenant"));
        assert!(wf.step(2).is_none());
    }

    #[test]
    fn test_empty_definition_rejected() {
        assert!(matches!(
            WorkflowDefinition::new(Vec::new()),
            Err(ConfigurationError::Missing { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = WorkflowDefinition::new(steps(&["a", "b", "a"])).unwrap_err();
        assert!(err.to_string().contains("steps.a"));
    }

    #[test]
    fn test_fingerprint_depends_on_order() {
        let ab = WorkflowDefinition::new(steps(&["a", "b"])).unwrap();
        let ab2 = WorkflowDefinition::new(steps(&["a", "b"])).unwrap();
        let ba = WorkflowDefinition::new(steps(&["b", "a"])).unwrap();
        assert_eq!(ab.fingerprint(), ab2.fingerprint());
        assert_ne!(ab.fingerprint(), ba.fingerprint());
        assert_eq!(ab.fingerprint().len(), 64);
    }

    #[test]
    fn test_step_input_json_shape() {
        let item = WorkItem::new("OPS-1", "UAE POC").with_summary("Acme");
        let mut prior = BTreeMap::new();
        prior.insert("fetch-tenant".to_string(), json!({"tenant_id": 3}));
        let mut env = BTreeMap::new();
        env.insert("DOMAIN".to_string(), "uae.example.com".to_string());

        let value = StepInput::new(&item, &prior).to_json(&env);
        assert_eq!(value["item"]["id"], "OPS-1");
        assert_eq!(value["item"]["summary"], "Acme");
        assert_eq!(value["env"]["DOMAIN"], "uae.example.com");
        assert_eq!(value["steps"]["fetch-tenant"]["tenant_id"], 3);
    }

    #[test]
    fn test_presence_is_present() {
        assert!(Presence::Present { detail: None }.is_present());
        assert!(!Presence::Absent.is_present());
    }
}
