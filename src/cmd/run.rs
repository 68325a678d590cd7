//! Work item processing, `onboard run [ITEM_ID]`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::super::Cli;

pub fn check_run_prerequisites(project_dir: &Path) -> Result<()> {
    use onboard::init::is_initialized;

    if !is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'onboard init' first.");
    }
    Ok(())
}

pub async fn cmd_run(
    cli: &Cli,
    project_dir: &Path,
    item_id: Option<&str>,
    max_parallel: Option<usize>,
    approval_timeout: Option<u64>,
) -> Result<()> {
    use onboard::audit::RunLog;
    use onboard::config::Config;
    use onboard::gates::{ApprovalGate, AutoApproveGate, InteractiveGate, TimeoutGate};
    use onboard::orchestrator::{CancelFlag, RunCoordinator};
    use onboard::state::StateStore;

    check_run_prerequisites(project_dir)?;

    let config = Config::load(project_dir, cli.verbose, cli.yes)?
        .with_cli_overrides(max_parallel, approval_timeout);
    for warning in config.toml.validate() {
        tracing::warn!("{}", warning);
    }

    let workflow = Arc::new(config.build_workflow()?);
    let source = config.build_source()?;
    let store: Arc<dyn StateStore> = Arc::new(config.build_store());
    let gate: Arc<dyn ApprovalGate> = if config.yes {
        Arc::new(AutoApproveGate)
    } else {
        Arc::new(TimeoutGate::new(
            InteractiveGate::new(),
            config.approval_timeout_secs()?,
        ))
    };

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current step");
            on_signal.cancel();
        }
    });

    let coordinator = RunCoordinator::new(source, store, workflow, gate)
        .with_finalizer(config.build_finalizer())
        .with_cancel(cancel)
        .with_environments(config.environments())
        .with_max_parallel(config.max_parallel()?);

    let summary = coordinator
        .run(item_id)
        .await
        .context("Failed to enumerate open work items")?;

    onboard::ui::print_summary(&summary);

    let path = RunLog::new(&config.runs_dir).write(&summary)?;
    tracing::debug!(path = %path.display(), "run summary written");

    if let Some(reason) = &summary.aborted {
        anyhow::bail!("Run aborted: {}", reason);
    }
    Ok(())
}
