//! Terminal rendering of previews, persisted state and run summaries.

pub mod icons;

use console::{Term, style};

use crate::gates::Preview;
use crate::orchestrator::{ItemOutcome, ItemReport, RunSummary};
use crate::state::{StepStatus, WorkflowState};

const MIN_WIDTH: usize = 40;

fn term_width() -> usize {
    let (_, cols) = Term::stdout().size();
    (cols as usize).max(MIN_WIDTH)
}

/// Print a step preview before asking for approval.
pub fn print_preview(preview: &Preview) {
    println!();
    println!(
        "{} {} {}",
        style(format!("[{}]", preview.item_id)).cyan().bold(),
        style(format!(
            "Step {}/{}:",
            preview.step_index + 1,
            preview.step_count
        ))
        .dim(),
        style(&preview.title).bold()
    );
    println!("  {} {}", style("environment:").dim(), preview.environment);
    for line in wrap_body(&preview.body, term_width()) {
        println!("{line}");
    }
    println!();
}

fn wrap_body(body: &str, width: usize) -> Vec<String> {
    let options = textwrap::Options::new(width)
        .initial_indent("    ")
        .subsequent_indent("    ");
    body.lines()
        .flat_map(|line| {
            if line.trim().is_empty() {
                vec![String::new()]
            } else {
                textwrap::wrap(line, &options)
                    .into_iter()
                    .map(|l| l.into_owned())
                    .collect()
            }
        })
        .collect()
}

fn outcome_line(report: &ItemReport) -> String {
    let (icon, text) = match &report.outcome {
        ItemOutcome::Completed => (icons::CHECK, style(report.outcome.to_string()).green()),
        ItemOutcome::AlreadyFinished => (icons::CHECK, style(report.outcome.to_string()).dim()),
        ItemOutcome::Paused { .. } => (icons::PAUSE, style(report.outcome.to_string()).yellow()),
        ItemOutcome::Failed { .. } | ItemOutcome::Aborted { .. } => {
            (icons::CROSS, style(report.outcome.to_string()).red())
        }
        ItemOutcome::Unavailable { .. } => (icons::LOCK, style(report.outcome.to_string()).yellow()),
        ItemOutcome::Interrupted { .. } => (icons::STOP, style(report.outcome.to_string()).yellow()),
        ItemOutcome::NotAttempted => (icons::SKIP, style(report.outcome.to_string()).dim()),
    };
    format!("  {}{:<16} {}", icon, report.id, text)
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", style("Run summary").bold());
    println!("{}", style("===========").dim());
    if summary.items.is_empty() {
        println!("  No open work items.");
    }
    for report in &summary.items {
        println!("{}", outcome_line(report));
    }
    println!();

    let counts: Vec<String> = [
        "completed",
        "already finished",
        "paused",
        "failed",
        "unavailable",
        "interrupted",
        "not attempted",
        "aborted",
    ]
    .into_iter()
    .filter_map(|label| match summary.count(label) {
        0 => None,
        n => Some(format!("{n} {label}")),
    })
    .collect();
    if !counts.is_empty() {
        println!("  {}", counts.join(", "));
    }
    if let Some(reason) = &summary.aborted {
        println!("  {} {}", style("Run aborted:").red().bold(), reason);
    }
    println!();
}

fn step_icon(status: StepStatus) -> console::Emoji<'static, 'static> {
    match status {
        StepStatus::Pending => icons::PENDING,
        StepStatus::AwaitingApproval => icons::QUESTION,
        StepStatus::Completed => icons::CHECK,
        StepStatus::Skipped => icons::SKIP,
        StepStatus::Failed => icons::CROSS,
    }
}

/// Lines describing one persisted item, as shown by `onboard status ID`.
pub fn state_lines(state: &WorkflowState) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{} {}",
            style(&state.item.id).cyan().bold(),
            style(format!("({})", state.status)).dim()
        ),
        format!("  environment: {}", state.item.environment),
    ];
    if !state.item.summary.is_empty() {
        lines.push(format!("  summary:     {}", state.item.summary));
    }
    lines.push(format!(
        "  updated:     {}",
        state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(at) = state.finalized_at {
        lines.push(format!("  finalized:   {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    for (i, record) in state.steps.iter().enumerate() {
        let mut line = format!(
            "  {}{}. {:<28} {}",
            step_icon(record.status),
            i + 1,
            record.name,
            record.status
        );
        if record.pre_existing {
            line.push_str(" (found existing)");
        }
        if record.attempts > 1 {
            line.push_str(&format!(" (attempts: {})", record.attempts));
        }
        lines.push(line);
        if let Some(error) = &record.error {
            lines.push(format!("       {}", style(error).red()));
        }
    }
    lines
}

pub fn print_state(state: &WorkflowState) {
    println!();
    for line in state_lines(state) {
        println!("{line}");
    }
    println!();
}
