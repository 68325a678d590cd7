//! Project initialization, `onboard init`.

use anyhow::Result;
use std::path::Path;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use onboard::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized onboard project at {}",
            result.onboard_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .onboard/");
        println!("  ├── onboard.toml  # Steps, source, environments, finalizers");
        println!("  ├── state/        # Per-item workflow state");
        println!("  ├── runs/         # Run summaries");
        println!("  ├── logs/         # JSON logs");
        println!("  └── tickets/      # Ticket files (files source)");
        println!();
        println!("Next steps:");
        println!("  1. Edit .onboard/onboard.toml to describe your steps");
        println!("  2. Run `onboard config validate`");
        println!("  3. Run `onboard run` to process open items");
    } else {
        println!(
            "Onboard project already initialized at {}",
            result.onboard_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}
