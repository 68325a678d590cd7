//! Configuration view and validation commands, `onboard config`.

use anyhow::{Context, Result};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use onboard::config::Config;
    use onboard::init::get_onboard_dir;
    use onboard::onboard_config::{CONFIG_FILE, OnboardToml};

    let onboard_dir = get_onboard_dir(project_dir);
    let config_path = onboard_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Onboard Configuration");
            println!("=====================");
            println!();

            if !config_path.exists() {
                println!("No onboard.toml found at {}", config_path.display());
                println!();
                println!("Run 'onboard init' to create one.");
                println!();
                return Ok(());
            }

            println!("Config file: {}", config_path.display());
            println!();

            // Uninterpolated, with literal secrets masked.
            let toml = OnboardToml::load(&config_path)?;
            let rendered = toml::to_string_pretty(&toml.masked()?)
                .context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            let config = Config::load(project_dir, false, false)?;
            println!("Effective values (with env overrides):");
            println!("  max_parallel = {}", config.max_parallel()?);
            println!(
                "  approval_timeout_secs = {}",
                config.approval_timeout_secs()?
            );
            println!("  state_dir = \"{}\"", config.state_dir.display());
            println!("  tickets_dir = \"{}\"", config.tickets_dir().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                anyhow::bail!(
                    "No onboard.toml found at {}. Run 'onboard init' first.",
                    config_path.display()
                );
            }

            let config = Config::load(project_dir, false, false)?;
            config.toml.check()?;

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration is valid, with warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
