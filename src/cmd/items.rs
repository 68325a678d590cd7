//! Item inspection and reset commands.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::run::check_run_prerequisites;

fn store_for(project_dir: &Path) -> onboard::state::JsonFileStore {
    use onboard::init::get_onboard_dir;
    onboard::state::JsonFileStore::new(get_onboard_dir(project_dir).join("state"))
}

fn progress(state: &onboard::state::WorkflowState) -> String {
    let done = state
        .steps
        .iter()
        .filter(|s| s.status.is_terminal_success())
        .count();
    format!("{}/{}", done, state.steps.len())
}

pub fn cmd_status(project_dir: &Path, item_id: Option<&str>) -> Result<()> {
    use onboard::audit::RunLog;
    use onboard::init::get_onboard_dir;
    use onboard::state::StateStore;

    check_run_prerequisites(project_dir)?;
    let store = store_for(project_dir);

    if let Some(id) = item_id {
        match store.load(id)? {
            Some(state) => onboard::ui::print_state(&state),
            None => {
                println!();
                println!("No state recorded for {}", id);
                println!();
            }
        }
        return Ok(());
    }

    let states = store.list()?;
    println!();
    if states.is_empty() {
        println!("No work items have been processed yet.");
    } else {
        println!(
            "{:<16} {:<12} {:<8} {:<16} Updated",
            "Item", "Status", "Steps", "Environment"
        );
        println!(
            "{:<16} {:<12} {:<8} {:<16} -------",
            "----------------", "------------", "--------", "----------------"
        );
        for state in &states {
            println!(
                "{:<16} {:<12} {:<8} {:<16} {}",
                state.item.id,
                state.status.to_string(),
                progress(state),
                state.item.environment,
                style(state.updated_at.format("%Y-%m-%d %H:%M")).dim()
            );
        }
    }
    println!();

    let runs = RunLog::new(&get_onboard_dir(project_dir).join("runs"));
    if let Some(last) = runs.latest()? {
        println!(
            "Last run: {} ({} items{})",
            last.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            last.items.len(),
            if last.is_aborted() { ", aborted" } else { "" }
        );
        println!();
    }
    Ok(())
}

pub async fn cmd_list(project_dir: &Path) -> Result<()> {
    use onboard::config::Config;
    use onboard::state::StateStore;

    check_run_prerequisites(project_dir)?;
    let config = Config::load(project_dir, false, false)?;
    let source = config.build_source()?;
    let store = config.build_store();

    let items = source
        .list_open_items()
        .await
        .context("Failed to enumerate open work items")?;

    println!();
    if items.is_empty() {
        println!("No open work items.");
        println!();
        return Ok(());
    }

    println!("{:<16} {:<12} Steps", "Item", "Status");
    println!("{:<16} {:<12} -----", "----------------", "------------");
    for item in &items {
        let (status, steps) = match store.load(&item.id) {
            Ok(Some(state)) => (state.status.to_string(), progress(&state)),
            Ok(None) => ("new".to_string(), "-".to_string()),
            Err(e) => (style("unreadable").red().to_string(), e.to_string()),
        };
        println!("{:<16} {:<12} {}", item.id, status, steps);
    }
    println!();
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, item_id: &str, force: bool) -> Result<()> {
    use dialoguer::Confirm;
    use onboard::state::StateStore;

    check_run_prerequisites(project_dir)?;
    let store = store_for(project_dir);

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "This will discard all recorded progress for {}. Are you sure?",
                item_id
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let Some(_lock) = store.lock(item_id)? else {
        anyhow::bail!("{} is being processed by another run", item_id);
    };

    if store.remove(item_id)? {
        println!("Reset {}. It starts from the first step on the next run.", item_id);
    } else {
        println!("No state recorded for {}", item_id);
    }
    Ok(())
}
