//! Bounded readiness polling.
//!
//! Every wait in the engine goes through [`poll_until`]: a probe is retried at
//! a fixed interval until it reports ready, fails outright, or the attempt cap
//! is exhausted. Exhaustion is always an error.

use crate::fs::permissions::group_of;
use crate::runtime::{CommandRunner, Docker};
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Interval and attempt cap for a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval_secs: u64, max_attempts: u32) -> Self {
        Self { interval_secs, max_attempts }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Upper bound on the time spent waiting
    pub fn budget(&self) -> Duration {
        self.interval() * self.max_attempts
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Ready(T),
    /// Not there yet; the string describes what was observed.
    Pending(String),
}

/// Run `probe` until it is ready or `policy.max_attempts` probes have failed.
///
/// A probe returning `Err` aborts the loop immediately; only `Pending`
/// outcomes are retried.
pub async fn poll_until<T, F, Fut>(target: &str, policy: PollPolicy, mut probe: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let mut last_status = String::from("not checked");

    for attempt in 1..=policy.max_attempts {
        match probe(attempt).await? {
            Probe::Ready(value) => {
                debug!(target, attempt, "Poll condition met");
                return Ok(value);
            }
            Probe::Pending(status) => {
                debug!(target, attempt, status = %status, "Poll condition not met yet");
                last_status = status;
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval()).await;
        }
    }

    Err(BackupError::ReadinessTimeout {
        target: target.to_string(),
        attempts: policy.max_attempts,
        last_status,
        remediation: Default::default(),
    })
}

/// Wait until a container matching `name` is running.
pub async fn wait_for_container<R: CommandRunner>(
    docker: &Docker<R>,
    name: &str,
    policy: PollPolicy,
) -> Result<()> {
    info!(container = name, "Waiting for container to start");
    let target = format!("container '{}' to be running", name);
    poll_until(&target, policy, |_| async move {
        if docker.is_running(name).await? {
            Ok(Probe::Ready(()))
        } else {
            Ok(Probe::Pending("not running".to_string()))
        }
    })
    .await
}

/// Wait until the group owner of `path` becomes `gid`. The path itself is
/// never modified; an operator changes it out of band.
pub async fn wait_for_group(path: &Path, gid: u32, policy: PollPolicy) -> Result<()> {
    info!(path = %path.display(), gid, "Waiting for group ownership");
    let target = format!("group {} on {}", gid, path.display());
    poll_until(&target, policy, |_| async move {
        let current = group_of(path)?;
        if current == gid {
            Ok(Probe::Ready(()))
        } else {
            Ok(Probe::Pending(format!("group is {}", current)))
        }
    })
    .await
}
