//! Container CLI invocations.

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::utils::errors::{BackupError, Result};
use std::path::Path;
use tracing::{debug, info};

const DOCKER: &str = "docker";

/// A `-v source:target` mount for a helper container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
}

impl Mount {
    pub fn volume(name: &str, target: &str) -> Self {
        Self { source: name.to_string(), target: target.to_string() }
    }

    pub fn bind(path: &Path, target: &str) -> Self {
        Self { source: path.to_string_lossy().into_owned(), target: target.to_string() }
    }

    fn to_arg(&self) -> String {
        format!("{}:{}", self.source, self.target)
    }
}

/// Thin wrapper building `docker` command lines on top of a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct Docker<R> {
    runner: R,
    helper_image: String,
}

impl<R: CommandRunner> Docker<R> {
    pub fn new(runner: R, helper_image: impl Into<String>) -> Self {
        Self { runner, helper_image: helper_image.into() }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run `command` in a throwaway root helper container with `mounts`.
    pub async fn run_helper(&self, mounts: &[Mount], command: &[&str], operation: &str) -> Result<()> {
        let mut spec = CommandSpec::new(DOCKER).args(["run", "--rm", "--user=0:0"]);
        for mount in mounts {
            spec = spec.arg("-v").arg(mount.to_arg());
        }
        let spec = spec.arg(&self.helper_image).args(command.iter().copied());

        debug!(operation, command = %spec.display(), "Running helper container");
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(BackupError::Transfer {
                operation: operation.to_string(),
                output: output.combined(),
            });
        }
        Ok(())
    }

    /// Whether a named volume exists. The CLI filter matches substrings, so
    /// names are compared exactly here.
    pub async fn volume_exists(&self, name: &str) -> Result<bool> {
        let spec = CommandSpec::new(DOCKER)
            .args(["volume", "ls", "-q", "-f"])
            .arg(format!("name={}", name));
        let output = self.checked(&spec, "Listing volumes").await?;
        Ok(output.stdout.lines().any(|line| line.trim() == name))
    }

    /// Create `name` unless it already exists.
    pub async fn ensure_volume(&self, name: &str) -> Result<()> {
        if self.volume_exists(name).await? {
            return Ok(());
        }
        info!(volume = name, "Creating volume");
        let spec = CommandSpec::new(DOCKER).args(["volume", "create", name]);
        self.checked(&spec, &format!("Creating volume {}", name)).await?;
        Ok(())
    }

    /// Id of the container (running or not) whose name matches `name`.
    pub async fn container_id(&self, name: &str) -> Result<String> {
        let spec = CommandSpec::new(DOCKER)
            .args(["ps", "-aq", "-f"])
            .arg(format!("name={}", name));
        let output = self.checked(&spec, "Listing containers").await?;
        output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BackupError::Transfer {
                operation: format!("Locating container {}", name),
                output: "no matching container".to_string(),
            })
    }

    /// Whether a container matching `name` is currently running. A failing
    /// `docker ps` counts as not running.
    pub async fn is_running(&self, name: &str) -> Result<bool> {
        let spec = CommandSpec::new(DOCKER)
            .args(["ps", "-q", "-f"])
            .arg(format!("name={}", name));
        let output = self.runner.run(&spec).await?;
        Ok(output.success() && !output.stdout.trim().is_empty())
    }

    /// Run a bash script inside a container. `env` entries are passed through
    /// from this process's environment so their values stay off the command line.
    pub async fn exec(
        &self,
        container: &str,
        as_root: bool,
        env: &[(&str, &str)],
        script: &str,
    ) -> Result<CommandOutput> {
        let mut spec = CommandSpec::new(DOCKER).args(["exec", "-i"]);
        if as_root {
            spec = spec.arg("--user=0:0");
        }
        for (key, value) in env {
            spec = spec.arg("-e").arg(*key).env(*key, *value);
        }
        let spec = spec.arg(container).args(["/bin/bash", "-c", script]);
        self.runner.run(&spec).await
    }

    /// Remove everything below `dir` inside the container matching `name`.
    pub async fn clear_directory(&self, name: &str, dir: &str) -> Result<()> {
        let id = self.container_id(name).await?;
        let script = format!("rm -rf {}/*", dir.trim_end_matches('/'));
        let output = self.exec(&id, true, &[], &script).await?;
        if !output.success() {
            return Err(BackupError::Transfer {
                operation: format!("Clearing {} in {}", dir, name),
                output: output.combined(),
            });
        }
        Ok(())
    }

    async fn checked(&self, spec: &CommandSpec, operation: &str) -> Result<CommandOutput> {
        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(BackupError::Transfer {
                operation: operation.to_string(),
                output: output.combined(),
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;

    #[tokio::test]
    async fn test_run_helper_builds_command_line() -> Result<()> {
        let runner = FakeRunner::succeeding();
        let docker = Docker::new(runner.clone(), "busybox");

        docker
            .run_helper(
                &[Mount::volume("vol", "/mnt/vol"), Mount::bind(Path::new("/tmp/out"), "/mnt/backup")],
                &["cp", "-a", "/mnt/vol", "/mnt/backup"],
                "Copy",
            )
            .await?;

        assert_eq!(
            runner.command_lines(),
            vec!["docker run --rm --user=0:0 -v vol:/mnt/vol -v /tmp/out:/mnt/backup busybox cp -a /mnt/vol /mnt/backup"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_helper_failure_carries_output() {
        let runner = FakeRunner::new(|_| CommandOutput::failed(1, "cp: can't stat"));
        let docker = Docker::new(runner, "busybox");

        let err = docker.run_helper(&[], &["cp"], "Backing up volume x").await.unwrap_err();
        assert_eq!(err.to_string(), "Backing up volume x failed: exit code 1: cp: can't stat");
    }

    #[tokio::test]
    async fn test_ensure_volume_creates_only_when_missing() -> Result<()> {
        let runner = FakeRunner::new(|spec| {
            if spec.args.starts_with(&["volume".to_string(), "ls".to_string()]) {
                // substring match from the CLI filter must not count
                CommandOutput::ok("server_auth-secrets-old\n")
            } else {
                CommandOutput::ok("")
            }
        });
        let docker = Docker::new(runner.clone(), "busybox");

        docker.ensure_volume("server_auth-secrets").await?;

        let lines = runner.command_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "docker volume create server_auth-secrets");
        Ok(())
    }

    #[tokio::test]
    async fn test_exec_passes_env_out_of_band() -> Result<()> {
        let runner = FakeRunner::succeeding();
        let docker = Docker::new(runner.clone(), "busybox");

        docker.exec("abc123", false, &[("PGPASSWORD", "hunter2")], "pg_dump db").await?;

        let calls = runner.calls();
        assert_eq!(calls[0].display(), "docker exec -i -e PGPASSWORD abc123 /bin/bash -c pg_dump db");
        assert_eq!(calls[0].env, vec![("PGPASSWORD".to_string(), "hunter2".to_string())]);
        Ok(())
    }

    #[tokio::test]
    async fn test_container_lookup() -> Result<()> {
        let docker = Docker::new(FakeRunner::new(|_| CommandOutput::ok("f00d\n")), "busybox");
        assert_eq!(docker.container_id("server_db_1").await?, "f00d");
        assert!(docker.is_running("server_db_1").await?);

        let docker = Docker::new(FakeRunner::new(|_| CommandOutput::ok("")), "busybox");
        assert!(docker.container_id("server_db_1").await.is_err());
        assert!(!docker.is_running("server_db_1").await?);
        Ok(())
    }
}
