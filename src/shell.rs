//! Shell command runner shared by command steps, sources and finalizers.
//!
//! Commands run through `sh -c` in a working directory, receive a JSON payload
//! on stdin and a set of environment variables, and are killed if they
//! outlive their timeout. Interpreting the exit code is left to the caller.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::errors::ExecutionError;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// -1 when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best human-readable explanation of a failure.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("exit code {}", self.exit_code)
    }
}

#[derive(Debug, Clone)]
pub struct ShellCommand {
    command: String,
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
    timeout_secs: u64,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>, working_dir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.as_ref().to_path_buf(),
            env: BTreeMap::new(),
            timeout_secs,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (k, v) in vars {
            self.env.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Spawn the command, feed `stdin`, and wait for it to exit.
    pub async fn run(&self, stdin: &str) -> Result<CommandOutput, ExecutionError> {
        tracing::debug!(command = %self.command, timeout_secs = self.timeout_secs, "spawning command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if let Some(mut pipe) = child.stdin.take() {
            // A command that ignores stdin may close it early; that is not an error.
            if let Err(e) = pipe.write_all(stdin.as_bytes()).await {
                tracing::debug!(command = %self.command, error = %e, "stdin closed early");
            }
        }

        let output = match timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(result) => result.map_err(|source| ExecutionError::Spawn {
                command: self.command.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ExecutionError::Timeout {
                    command: self.command.clone(),
                    secs: self.timeout_secs,
                });
            }
        };

        let output = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(command = %self.command, exit_code = output.exit_code, "command finished");
        Ok(output)
    }

    /// Run and require exit code 0.
    pub async fn run_ok(&self, stdin: &str) -> Result<CommandOutput, ExecutionError> {
        let output = self.run(stdin).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ExecutionError::CommandFailed {
                command: self.command.clone(),
                exit_code: output.exit_code,
                stderr: output.failure_detail(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) fn write_script(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    #[tokio::test]
    async fn test_run_captures_stdout_and_exit_code() {
        let dir = tempdir().unwrap();
        let out = ShellCommand::new("echo hello; exit 3", dir.path(), 5)
            .run("")
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_passes_stdin_and_env() {
        let dir = tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "echo.sh",
            "#!/bin/sh\nread line\necho \"$ONBOARD_ITEM_ID:$line\"\n",
        );
        let out = ShellCommand::new(script.to_string_lossy(), dir.path(), 5)
            .env("ONBOARD_ITEM_ID", "OPS-1")
            .run("{\"a\":1}\n")
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "OPS-1:{\"a\":1}");
    }

    #[tokio::test]
    async fn test_run_runs_in_working_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let out = ShellCommand::new("cat marker.txt", dir.path(), 5)
            .run("")
            .await
            .unwrap();
        assert_eq!(out.stdout, "here");
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let dir = tempdir().unwrap();
        let err = ShellCommand::new("sleep 5", dir.path(), 1)
            .run("")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_run_ok_reports_stderr() {
        let dir = tempdir().unwrap();
        let err = ShellCommand::new("echo 'no route to host' >&2; exit 2", dir.path(), 5)
            .run_ok("")
            .await
            .unwrap_err();
        match err {
            ExecutionError::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "no route to host");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
