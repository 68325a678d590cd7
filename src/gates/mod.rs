//! Approval gates.
//!
//! The executor hands a [`Preview`] to an [`ApprovalGate`] before every
//! gated step and waits for a [`Decision`]. Gates are swappable: an
//! interactive terminal prompt, unconditional approval for `--yes`, and a
//! scripted gate for tests and automation.

use async_trait::async_trait;
use dialoguer::{Select, theme::ColorfulTheme};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::errors::ApprovalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    /// Skip this step, continue with the next one
    Decline,
    /// Skip this step and pause the item
    DeclineAndHalt,
}

/// What a step is about to do, rendered for a human.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub item_id: String,
    pub environment: String,
    /// Zero-based
    pub step_index: usize,
    pub step_count: usize,
    pub step_name: String,
    pub title: String,
    pub body: String,
}

impl fmt::Display for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] Step {}/{}: {} ({})",
            self.item_id,
            self.step_index + 1,
            self.step_count,
            self.title,
            self.environment
        )?;
        write!(f, "{}", self.body)
    }
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn ask(&self, preview: &Preview) -> Result<Decision, ApprovalError>;
}

#[async_trait]
impl<G: ApprovalGate + ?Sized> ApprovalGate for Arc<G> {
    async fn ask(&self, preview: &Preview) -> Result<Decision, ApprovalError> {
        (**self).ask(preview).await
    }
}

/// Terminal prompt. Prompts from parallel items are serialised.
pub struct InteractiveGate {
    prompt_lock: tokio::sync::Mutex<()>,
    approve_all: AtomicBool,
}

impl InteractiveGate {
    pub fn new() -> Self {
        Self {
            prompt_lock: tokio::sync::Mutex::new(()),
            approve_all: AtomicBool::new(false),
        }
    }
}

impl Default for InteractiveGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalGate for InteractiveGate {
    async fn ask(&self, preview: &Preview) -> Result<Decision, ApprovalError> {
        let _guard = self.prompt_lock.lock().await;

        crate::ui::print_preview(preview);

        if self.approve_all.load(Ordering::SeqCst) {
            println!(
                "  {} (approve remaining)",
                console::style("Auto-approved").dim()
            );
            return Ok(Decision::Approve);
        }

        let selection = tokio::task::spawn_blocking(|| {
            let options = &[
                "Yes, run this step",
                "Yes, and approve all remaining steps",
                "Skip this step",
                "Skip this step and pause the ticket",
            ];
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Proceed with this step?")
                .items(options)
                .default(0)
                .interact()
        })
        .await
        .map_err(|e| ApprovalError::Aborted(e.to_string()))?
        .map_err(|e| ApprovalError::Aborted(e.to_string()))?;

        match selection {
            0 => Ok(Decision::Approve),
            1 => {
                self.approve_all.store(true, Ordering::SeqCst);
                Ok(Decision::Approve)
            }
            2 => Ok(Decision::Decline),
            _ => Ok(Decision::DeclineAndHalt),
        }
    }
}

/// Approves everything (`--yes`).
#[derive(Debug, Default)]
pub struct AutoApproveGate;

#[async_trait]
impl ApprovalGate for AutoApproveGate {
    async fn ask(&self, preview: &Preview) -> Result<Decision, ApprovalError> {
        tracing::info!(
            item = %preview.item_id,
            step = %preview.step_name,
            "auto-approved"
        );
        Ok(Decision::Approve)
    }
}

/// Replays a fixed queue of decisions, then falls back to a default.
/// Every preview it was shown is recorded.
pub struct ScriptedGate {
    decisions: Mutex<VecDeque<Decision>>,
    fallback: Decision,
    seen: Mutex<Vec<Preview>>,
}

impl ScriptedGate {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            fallback: Decision::Approve,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: Decision) -> Self {
        self.fallback = fallback;
        self
    }

    /// Previews shown so far, in order.
    pub fn seen(&self) -> Vec<Preview> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ApprovalGate for ScriptedGate {
    async fn ask(&self, preview: &Preview) -> Result<Decision, ApprovalError> {
        self.seen
            .lock()
            .map_err(|e| ApprovalError::Aborted(e.to_string()))?
            .push(preview.clone());
        let next = self
            .decisions
            .lock()
            .map_err(|e| ApprovalError::Aborted(e.to_string()))?
            .pop_front();
        Ok(next.unwrap_or(self.fallback))
    }
}

/// Bounds how long another gate may take to decide. Zero waits forever.
pub struct TimeoutGate<G> {
    inner: G,
    secs: u64,
}

impl<G: ApprovalGate> TimeoutGate<G> {
    pub fn new(inner: G, secs: u64) -> Self {
        Self { inner, secs }
    }
}

#[async_trait]
impl<G: ApprovalGate> ApprovalGate for TimeoutGate<G> {
    async fn ask(&self, preview: &Preview) -> Result<Decision, ApprovalError> {
        if self.secs == 0 {
            return self.inner.ask(preview).await;
        }
        tokio::time::timeout(Duration::from_secs(self.secs), self.inner.ask(preview))
            .await
            .map_err(|_| ApprovalError::Timeout { secs: self.secs })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview(step: &str) -> Preview {
        Preview {
            item_id: "OPS-1".into(),
            environment: "UAE POC".into(),
            step_index: 1,
            step_count: 5,
            step_name: step.into(),
            title: "Fetch tenant".into(),
            body: "SELECT * FROM tenant".into(),
        }
    }

    struct SlowGate;

    #[async_trait]
    impl ApprovalGate for SlowGate {
        async fn ask(&self, _preview: &Preview) -> Result<Decision, ApprovalError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Decision::Approve)
        }
    }

    #[test]
    fn test_preview_display() {
        let text = preview("fetch-tenant").to_string();
        assert!(text.starts_with("[OPS-1] Step 2/5: Fetch tenant (UAE POC)"));
        assert!(text.ends_with("SELECT * FROM tenant"));
    }

    #[tokio::test]
    async fn test_scripted_gate_replays_then_falls_back() {
        let gate = ScriptedGate::new([Decision::Decline, Decision::DeclineAndHalt])
            .with_fallback(Decision::Approve);
        assert_eq!(gate.ask(&preview("a")).await.unwrap(), Decision::Decline);
        assert_eq!(
            gate.ask(&preview("b")).await.unwrap(),
            Decision::DeclineAndHalt
        );
        assert_eq!(gate.ask(&preview("c")).await.unwrap(), Decision::Approve);

        let names: Vec<String> = gate.seen().into_iter().map(|p| p.step_name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_auto_approve_gate() {
        assert_eq!(
            AutoApproveGate.ask(&preview("a")).await.unwrap(),
            Decision::Approve
        );
    }

    #[tokio::test]
    async fn test_timeout_gate_elapses() {
        let gate = TimeoutGate::new(SlowGate, 1);
        let err = gate.ask(&preview("a")).await.unwrap_err();
        assert!(matches!(err, ApprovalError::Timeout { secs: 1 }));
    }

    #[tokio::test]
    async fn test_timeout_gate_zero_waits_for_inner() {
        let gate = TimeoutGate::new(ScriptedGate::new([Decision::Decline]), 0);
        assert_eq!(gate.ask(&preview("a")).await.unwrap(), Decision::Decline);
    }
}
