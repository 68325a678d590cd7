//! Project scaffolding for `onboard init`.
//!
//! ```text
//! .onboard/
//! ├── onboard.toml     # Steps, source, environments, finalizers
//! ├── state/           # One JSON record per work item
//! ├── runs/            # Run summaries
//! ├── logs/            # JSON log files
//! └── tickets/         # Ticket files for the `files` source
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::onboard_config::CONFIG_FILE;

/// The name of the onboard project directory.
pub const ONBOARD_DIR: &str = ".onboard";

const SUBDIRECTORIES: [&str; 4] = ["state", "runs", "logs", "tickets"];

/// Sample configuration modelled on a tenant onboarding workflow.
pub const SAMPLE_CONFIG: &str = r#"[project]
name = "tenant-onboarding"

[defaults]
command_timeout_secs = 300
max_parallel = 1
approval_timeout_secs = 0

[source]
kind = "files"

[environments."UAE POC"]
vars = { IDP_URL = "https://idp.poc.example.com", GRAFANA_URL = "https://grafana.poc.example.com" }

[[steps]]
name = "onboard-users"
title = "Create identity provider users"
check = "scripts/users-exist.sh"
run = "scripts/create-users.sh"
preview = """
Create {{ item.entities.users }} in {{ env.IDP_URL }}"""

[[steps]]
name = "fetch-tenant"
title = "Resolve tenant id"
run = "scripts/fetch-tenant.sh"
requires_approval = false

[[steps]]
name = "create-monitoring-user"
title = "Create monitoring user"
check = "scripts/monitoring-user-exists.sh"
run = "scripts/create-monitoring-user.sh"
preview = "Create monitoring user for tenant {{ steps.fetch-tenant.tenant_id }}"

[[steps]]
name = "apply-updates"
title = "Apply tenant configuration"
run = "scripts/apply-updates.sh"

[[steps]]
name = "merge-tenant"
title = "Merge tenant into the environment"
check = "scripts/tenant-merged.sh"
run = "scripts/merge-tenant.sh"

[finalize]
on_complete = "scripts/close-ticket.sh"
on_failed = "scripts/comment-ticket.sh"
"#;

/// Result of initializing an onboard project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the `.onboard` directory
    pub onboard_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Create `.onboard/` with its subdirectories and a sample `onboard.toml`.
///
/// Re-running on an existing project only fills in what is missing; an
/// existing `onboard.toml` is never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let onboard_dir = project_dir.join(ONBOARD_DIR);
    let created = !onboard_dir.exists();

    std::fs::create_dir_all(&onboard_dir)
        .with_context(|| format!("Failed to create directory: {}", onboard_dir.display()))?;

    for name in SUBDIRECTORIES {
        let path = onboard_dir.join(name);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {} directory: {}", name, path.display()))?;
    }

    let config_file = onboard_dir.join(CONFIG_FILE);
    if !config_file.exists() {
        std::fs::write(&config_file, SAMPLE_CONFIG)
            .with_context(|| format!("Failed to write {}", config_file.display()))?;
    }

    Ok(InitResult {
        onboard_dir,
        created,
    })
}

/// Check if a project is already initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(ONBOARD_DIR).exists()
}

pub fn get_onboard_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(ONBOARD_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboard_config::OnboardToml;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_structure() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.created);
        assert_eq!(result.onboard_dir, dir.path().join(".onboard"));
        for name in SUBDIRECTORIES {
            assert!(result.onboard_dir.join(name).is_dir(), "{name} missing");
        }
        assert!(result.onboard_dir.join("onboard.toml").is_file());
    }

    #[test]
    fn test_init_project_twice_keeps_existing_config() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let config = dir.path().join(".onboard/onboard.toml");
        std::fs::write(&config, "[project]\nname = \"mine\"\n").unwrap();
        std::fs::remove_dir_all(dir.path().join(".onboard/runs")).unwrap();

        let again = init_project(dir.path()).unwrap();
        assert!(!again.created);
        assert!(dir.path().join(".onboard/runs").is_dir());
        assert_eq!(
            std::fs::read_to_string(&config).unwrap(),
            "[project]\nname = \"mine\"\n"
        );
    }

    #[test]
    fn test_sample_config_is_valid() {
        let toml = OnboardToml::parse(SAMPLE_CONFIG).unwrap();
        toml.check().unwrap();
        let names: Vec<_> = toml.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "onboard-users",
                "fetch-tenant",
                "create-monitoring-user",
                "apply-updates",
                "merge-tenant"
            ]
        );
        assert!(!toml.steps[1].requires_approval);
    }

    #[test]
    fn test_is_initialized() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
        init_project(dir.path()).unwrap();
        assert!(is_initialized(dir.path()));
        assert_eq!(get_onboard_dir(dir.path()), dir.path().join(".onboard"));
    }
}
