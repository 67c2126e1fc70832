//! Search index snapshots.
//!
//! The search engine snapshots into a filesystem repository whose location is
//! bind-mounted from the host, so a finished snapshot is copied into the
//! archive straight from the host side. Snapshot creation is asynchronous and
//! polled; restore is only checked for acceptance.

use crate::config::SearchConfig;
use crate::fs::{copy_tree, CopyOptions};
use crate::poll::{poll_until, PollPolicy, Probe};
use crate::runtime::{CommandRunner, Docker};
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// REST access to the search engine.
pub trait SearchApi: Send + Sync {
    /// Issue `method path` with an optional JSON body and return the parsed response.
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> impl Future<Output = Result<Value>> + Send;
}

/// Calls the engine with `curl` from inside its own container, where its
/// port is reachable without being published on the host.
#[derive(Debug, Clone)]
pub struct DockerSearchApi<R> {
    docker: Docker<R>,
    container: String,
    port: u16,
}

impl<R: CommandRunner> DockerSearchApi<R> {
    pub fn new(docker: Docker<R>, container: impl Into<String>, port: u16) -> Self {
        Self { docker, container: container.into(), port }
    }
}

impl<R: CommandRunner> SearchApi for DockerSearchApi<R> {
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let script = curl_command(&method, self.port, path, body);
        debug!(method = %method, path, "Search API request");

        let id = self.docker.container_id(&self.container).await?;
        let output = self.docker.exec(&id, false, &[], &script).await?;
        if !output.success() {
            return Err(BackupError::SearchApi(format!("{} {}: {}", method, path, output.combined())));
        }

        let text = output.stdout.trim();
        if text.is_empty() {
            return Err(BackupError::SearchApi(format!("{} {}: empty response", method, path)));
        }
        Ok(serde_json::from_str(text)?)
    }
}

fn curl_command(method: &Method, port: u16, path: &str, body: Option<&Value>) -> String {
    let mut command = String::from("curl -s ");
    if *method != Method::GET {
        command.push_str("-H 'Content-Type: application/json' ");
    }
    command.push_str(&format!("-X {} ", method));
    if let Some(body) = body {
        command.push_str(&format!("-d {} ", shell_quote(&body.to_string())));
    }
    command.push_str(&format!("http://localhost:{}/{}", port, path.trim_start_matches('/')));
    command
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotState {
    InProgress,
    Success,
    Failed,
    Partial,
    Incompatible,
    #[serde(other)]
    Unknown,
}

impl SnapshotState {
    /// States a snapshot never leaves and that are not usable.
    pub fn is_failure(self) -> bool {
        matches!(self, SnapshotState::Failed | SnapshotState::Partial | SnapshotState::Incompatible)
    }
}

/// A snapshot as reported by `_snapshot/<repo>/<name>` and `_all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    #[serde(rename = "snapshot")]
    pub name: String,
    pub state: SnapshotState,
    #[serde(default)]
    pub indices: Vec<String>,
    #[serde(default)]
    pub end_time_in_millis: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotList {
    #[serde(default)]
    snapshots: Vec<SnapshotRecord>,
}

/// Snapshot name for a backup started at `now`. Lowercase, as the engine requires.
pub fn snapshot_name(now: DateTime<Utc>) -> String {
    format!("hoss-snap-{}", now.timestamp_millis())
}

/// Pick the snapshot that finished last. Snapshots without an end time lose.
pub fn latest(snapshots: Vec<SnapshotRecord>) -> Option<SnapshotRecord> {
    snapshots.into_iter().max_by_key(|s| s.end_time_in_millis.unwrap_or(i64::MIN))
}

pub struct SearchIndexTransfer<'a, S> {
    api: &'a S,
    settings: &'a SearchConfig,
}

impl<'a, S: SearchApi> SearchIndexTransfer<'a, S> {
    pub fn new(api: &'a S, settings: &'a SearchConfig) -> Self {
        Self { api, settings }
    }

    fn repository_path(&self) -> String {
        format!("_snapshot/{}", self.settings.repository)
    }

    async fn settle(&self) {
        if self.settings.settle_secs > 0 {
            tokio::time::sleep(Duration::from_secs(self.settings.settle_secs)).await;
        }
    }

    /// Register the filesystem snapshot repository. Re-registering is harmless.
    pub async fn ensure_snapshot_repository(&self) -> Result<()> {
        let body = json!({
            "type": "fs",
            "settings": { "location": self.settings.mount_path },
        });
        let response = self.api.request(Method::PUT, &self.repository_path(), Some(&body)).await?;

        match response.get("acknowledged").and_then(Value::as_bool) {
            Some(true) => {}
            Some(false) => {
                return Err(BackupError::Snapshot(format!(
                    "snapshot repository registration was not acknowledged: {}",
                    response
                )))
            }
            None => {
                return Err(BackupError::Snapshot(format!(
                    "failed to create snapshot repository: {}",
                    response
                )))
            }
        }

        info!(repository = %self.settings.repository, "Snapshot repository ready");
        self.settle().await;
        Ok(())
    }

    /// Trigger a snapshot, wait for it to finish, then copy the repository's
    /// host directory to `dest`.
    pub async fn create_snapshot(
        &self,
        name: &str,
        repository_host_dir: &Path,
        dest: &Path,
        policy: PollPolicy,
    ) -> Result<SnapshotRecord> {
        let path = format!("{}/{}", self.repository_path(), name);
        let response = self.api.request(Method::PUT, &path, None).await?;
        if let Some(error) = response.get("error") {
            let reason = error.get("reason").and_then(Value::as_str).map(str::to_string);
            return Err(BackupError::Snapshot(format!(
                "failed to start snapshot {}: {}",
                name,
                reason.unwrap_or_else(|| error.to_string())
            )));
        }
        if response.get("accepted").and_then(Value::as_bool) == Some(false) {
            return Err(BackupError::Snapshot(format!("snapshot {} was not accepted: {}", name, response)));
        }
        info!(snapshot = name, "Snapshot started");

        let api = self.api;
        let path = path.as_str();
        let target = format!("snapshot '{}'", name);
        let record = poll_until(&target, policy, |attempt| async move {
            let response = api.request(Method::GET, path, None).await?;
            let record = serde_json::from_value::<SnapshotList>(response.clone())?
                .snapshots
                .into_iter()
                .next()
                .ok_or_else(|| BackupError::Snapshot(format!("snapshot missing from response: {}", response)))?;

            debug!(snapshot = %record.name, state = ?record.state, attempt, "Snapshot state");
            match record.state {
                SnapshotState::Success => Ok(Probe::Ready(record)),
                state if state.is_failure() => Err(BackupError::Snapshot(format!(
                    "snapshot {} ended in state {:?}",
                    record.name, state
                ))),
                state => Ok(Probe::Pending(format!("{:?}", state))),
            }
        })
        .await?;

        let stats = copy_tree(repository_host_dir, dest, CopyOptions::default())?;
        info!(snapshot = name, files = stats.files, bytes = stats.bytes, "Snapshot copied");
        Ok(record)
    }

    /// The snapshot in the repository with the greatest end time.
    pub async fn latest_snapshot(&self) -> Result<SnapshotRecord> {
        let path = format!("{}/_all", self.repository_path());
        let response = self.api.request(Method::GET, &path, None).await?;
        let list: SnapshotList = serde_json::from_value(response)?;

        let record = latest(list.snapshots)
            .ok_or_else(|| BackupError::Snapshot("no snapshots found in repository".to_string()))?;
        info!(snapshot = %record.name, indices = record.indices.len(), "Selected snapshot to restore");
        Ok(record)
    }

    /// Delete every index the snapshot contains so it can be restored over them.
    /// An index that does not exist counts as deleted.
    pub async fn delete_conflicting_indices(&self, snapshot: &SnapshotRecord) -> Result<()> {
        for index in &snapshot.indices {
            let response = self.api.request(Method::DELETE, index, None).await?;

            let error_type = response.pointer("/error/type").and_then(Value::as_str);
            if error_type == Some("index_not_found_exception") {
                debug!(index, "Index already absent");
                continue;
            }
            if response.get("acknowledged").and_then(Value::as_bool) != Some(true) {
                return Err(BackupError::Snapshot(format!(
                    "failed to delete index '{}' before restore: {}",
                    index, response
                )));
            }
            debug!(index, "Deleted index");
        }
        Ok(())
    }

    /// Ask the engine to restore `snapshot`, including global cluster state.
    /// Completion is not awaited.
    pub async fn restore_snapshot(&self, snapshot: &SnapshotRecord) -> Result<()> {
        self.settle().await;
        let path = format!("{}/{}/_restore", self.repository_path(), snapshot.name);
        let body = json!({ "include_global_state": true });
        let response = self.api.request(Method::POST, &path, Some(&body)).await?;

        if response.get("accepted").and_then(Value::as_bool) != Some(true) {
            return Err(BackupError::Snapshot(format!("failed to start index restore: {}", response)));
        }
        info!(snapshot = %snapshot.name, "Index restore accepted");
        Ok(())
    }

    /// Wait for cluster health to reach yellow or green. A single node never
    /// gets past yellow since replicas cannot be assigned.
    pub async fn wait_for_health(&self, policy: PollPolicy) -> Result<()> {
        let api = self.api;
        poll_until("search service health", policy, |_| async move {
            let response = match api.request(Method::GET, "_cluster/health", None).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "Search service not reachable yet");
                    return Ok(Probe::Pending(format!("unreachable: {}", e)));
                }
            };
            match response.get("status").and_then(Value::as_str) {
                Some("yellow") | Some("green") => Ok(Probe::Ready(())),
                Some(status) => Ok(Probe::Pending(format!("status {}", status))),
                None => Ok(Probe::Pending(format!("no status in {}", response))),
            }
        })
        .await?;

        info!("Search service healthy");
        self.settle().await;
        Ok(())
    }
}
