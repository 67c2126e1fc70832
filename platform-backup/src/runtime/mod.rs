//! Subprocess execution.
//!
//! Everything the engine does to containers goes through [`CommandRunner`],
//! so orchestration can be exercised without a container runtime.

pub mod docker;

pub use docker::{Docker, Mount};

use crate::utils::errors::{BackupError, Result};
use std::future::Future;
use tracing::debug;

/// A program invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child process. Values are never logged.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), ..Default::default() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Command line for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { status: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self { status: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout and stderr together, trimmed, for error reports.
    pub fn combined(&self) -> String {
        let status = match self.status {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let text = [self.stdout.trim(), self.stderr.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            status
        } else {
            format!("{}: {}", status, text)
        }
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is not an error
    /// at this level; spawn failures are.
    fn run(&self, spec: &CommandSpec) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec.display(), "Running command");

        let output = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| BackupError::Transfer {
                operation: format!("Starting `{}`", spec.program),
                output: e.to_string(),
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_omits_environment() {
        let spec = CommandSpec::new("docker")
            .args(["exec", "-e", "PGPASSWORD", "abc123"])
            .env("PGPASSWORD", "hunter2");
        assert_eq!(spec.display(), "docker exec -e PGPASSWORD abc123");
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(CommandOutput::failed(2, "  boom \n").combined(), "exit code 2: boom");
        assert_eq!(CommandOutput::failed(1, "").combined(), "exit code 1");
        assert!(CommandOutput::ok("x").success());
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() -> Result<()> {
        let output = SystemRunner
            .run(&CommandSpec::new("sh").args(["-c", "echo \"$GREETING\"; exit 3"]).env("GREETING", "hi"))
            .await?;
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout.trim(), "hi");
        Ok(())
    }
}
