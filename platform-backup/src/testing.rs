//! Fakes for the engine's seams, plus a deployment fixture on a temp dir.

use crate::config::Config;
use crate::orchestrator::{Operator, Phase, Platform};
use crate::poll::PollPolicy;
use crate::runtime::{CommandOutput, CommandRunner, CommandSpec, Docker};
use crate::transfer::config_tree::{CONFIG_DIRS, CONFIG_FILES};
use crate::transfer::SearchApi;
use crate::utils::errors::Result;
use crate::version::{VersionManifest, VersionSource};
use reqwest::Method;
use serde_json::{json, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type RunHandler = dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync;

/// Records every command and answers with a canned output.
#[derive(Clone)]
pub struct FakeRunner {
    calls: Arc<Mutex<Vec<CommandSpec>>>,
    handler: Arc<RunHandler>,
}

impl FakeRunner {
    pub fn new(handler: impl Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static) -> Self {
        Self { calls: Arc::default(), handler: Arc::new(handler) }
    }

    pub fn succeeding() -> Self {
        Self::new(|_| CommandOutput::ok(""))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }
}

impl std::fmt::Debug for FakeRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRunner").finish_non_exhaustive()
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        Ok((self.handler)(spec))
    }
}

type SearchHandler = dyn Fn(Method, &str, Option<&Value>) -> Result<Value> + Send + Sync;

/// Search engine double answering from a closure.
pub struct FakeSearch {
    calls: Mutex<Vec<(Method, String, Option<Value>)>>,
    handler: Box<SearchHandler>,
}

impl FakeSearch {
    pub fn new(handler: impl Fn(Method, &str, Option<&Value>) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self { calls: Mutex::default(), handler: Box::new(handler) }
    }

    pub fn calls(&self) -> Vec<(Method, String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SearchApi for FakeSearch {
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        self.calls.lock().unwrap().push((method.clone(), path.to_string(), body.cloned()));
        (self.handler)(method, path, body)
    }
}

pub struct FakeVersions(pub VersionManifest);

impl VersionSource for FakeVersions {
    async fn live_version(&self) -> Result<VersionManifest> {
        Ok(self.0.clone())
    }
}

/// Operator with a fixed answer to every prompt.
#[derive(Default)]
pub struct ScriptedOperator {
    answer: bool,
    phases: Mutex<Vec<Phase>>,
    notices: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn answering(answer: bool) -> Self {
        Self { answer, ..Default::default() }
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.phases.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Operator for ScriptedOperator {
    fn phase(&self, phase: Phase) {
        self.phases.lock().unwrap().push(phase);
    }

    fn notice(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }

    fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
    }
}

/// Write a configuration root holding every allow-listed entry.
pub fn write_live_config(root: &Path) -> io::Result<()> {
    for dir in CONFIG_DIRS {
        fs::create_dir_all(root.join(dir))?;
        fs::write(root.join(dir).join("settings.yaml"), format!("service: {}\n", dir))?;
    }
    for file in CONFIG_FILES {
        fs::write(root.join(file), format!("# {}\n", file))?;
    }
    Ok(())
}

/// A deployment laid out under one temp dir: a live configuration root, its
/// backup root with the database and snapshot mounts, an empty restore target
/// and a scratch directory.
pub struct Fixture {
    _temp_dir: TempDir,
    pub live_config: PathBuf,
    pub backup_root: PathBuf,
    pub restore_target: PathBuf,
    pub scratch: PathBuf,
}

impl Fixture {
    pub fn new(uid: u32) -> io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let live_config = temp_dir.path().join("live");
        let backup_root = temp_dir.path().join("backup");
        let restore_target = temp_dir.path().join("target");
        let scratch = temp_dir.path().join("scratch");

        write_live_config(&live_config)?;
        fs::create_dir_all(live_config.join("core/db-init-scripts"))?;
        fs::write(live_config.join("core/db-init-scripts/create-databases.sh"), "#!/bin/bash\n")?;
        fs::write(
            live_config.join(".env"),
            format!(
                "BACKUP_ROOT={}\nUID={uid}\nGID={uid}\nPOSTGRES_USER=admin\nPOSTGRES_PASSWORD=secret\n",
                backup_root.display()
            ),
        )?;

        fs::create_dir_all(backup_root.join(".db"))?;
        fs::create_dir_all(backup_root.join(".opensearch/indices"))?;
        fs::write(backup_root.join(".opensearch/index-0"), "{}")?;
        fs::create_dir_all(&scratch)?;

        Ok(Self { _temp_dir: temp_dir, live_config, backup_root, restore_target, scratch })
    }

    /// Default settings with every wait shortened.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.search.settle_secs = 0;
        config.polling.snapshot = PollPolicy::new(0, 5);
        config.polling.container = PollPolicy::new(0, 5);
        config.polling.health = PollPolicy::new(0, 5);
        config.polling.ownership = PollPolicy::new(0, 2);
        config
    }
}

/// A platform whose containers and search engine always cooperate. Database
/// dumps land in the fixture's `.db` mount as the real container would write them.
pub fn fake_platform(fixture: &Fixture, version: &str) -> Platform<FakeRunner, FakeSearch, FakeVersions> {
    let db_mount = fixture.backup_root.join(".db");
    let runner = FakeRunner::new(move |spec| match spec.args.first().map(String::as_str) {
        Some("exec") => {
            let script = spec.args.last().map(String::as_str).unwrap_or_default();
            if let Some(target) = script.split("> ").nth(1) {
                let file = target.rsplit('/').next().unwrap_or(target);
                let database = file.trim_start_matches("postgres-").trim_end_matches("-backup.dump");
                let _ = fs::write(db_mount.join(file), format!("dump of {}", database));
            }
            CommandOutput::ok("")
        }
        Some("ps") => CommandOutput::ok("c0ffee\n"),
        _ => CommandOutput::ok(""),
    });

    let search = FakeSearch::new(|method, path, _| {
        Ok(match (method.as_str(), path) {
            ("GET", "_cluster/health") => json!({"status": "yellow"}),
            ("GET", p) if p.ends_with("/_all") => json!({"snapshots": [
                {"snapshot": "hoss-snap-old", "state": "SUCCESS", "indices": ["metadata-index"], "end_time_in_millis": 100},
                {"snapshot": "hoss-snap-new", "state": "SUCCESS", "indices": ["metadata-index", ".kibana"], "end_time_in_millis": 200},
            ]}),
            ("GET", _) => json!({"snapshots": [{"snapshot": "hoss-snap-new", "state": "SUCCESS"}]}),
            ("POST", _) => json!({"accepted": true}),
            _ => json!({"acknowledged": true}),
        })
    });

    Platform {
        docker: Docker::new(runner, "busybox"),
        search,
        versions: FakeVersions(VersionManifest::new(version, "test-build")),
    }
}
