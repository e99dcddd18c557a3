//! In-memory hosts for driving pipelines without SSH
//!
//! Every endpoint name maps to a fake host holding a set of file paths. The fake understands the
//! handful of commands the pipeline issues (archive, `rm -f`, unzip) and treats everything else
//! as a hook that succeeds. Every call is appended to a shared event log.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use remote::{Auth, CommandOutput, Connector, RemoteSession, SessionPool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run(String),
    Upload { local: String, remote: String },
    Download { remote: String, local: String },
    Close,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub seq: usize,
    pub host: String,
    pub action: Action,
}

#[derive(Default)]
struct State {
    files: HashMap<String, HashSet<String>>,
    events: Vec<Event>,
    failures: Vec<(String, String)>,
    panics: Vec<String>,
    delays: Vec<(String, Duration)>,
    in_flight: usize,
    peak_in_flight: usize,
    connects: usize,
}

/// Shared state of every fake host
#[derive(Default)]
pub struct World {
    state: Mutex<State>,
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make any action on `host` whose description contains `pattern` fail
    pub fn fail(&self, host: &str, pattern: &str) {
        let mut state = self.state.lock().unwrap();
        state.failures.push((host.to_string(), pattern.to_string()));
    }

    /// Panic inside any command containing `pattern`, on every host
    pub fn panic(&self, pattern: &str) {
        let mut state = self.state.lock().unwrap();
        state.panics.push(pattern.to_string());
    }

    /// Delay any command containing `pattern`, on every host
    pub fn delay(&self, pattern: &str, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        state.delays.push((pattern.to_string(), delay));
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    /// Commands run on `host`, in order
    pub fn commands(&self, host: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.host == host)
            .filter_map(|e| match e.action {
                Action::Run(command) => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Sequence number of the first event on `host` whose description contains `pattern`
    pub fn first_seq(&self, host: &str, pattern: &str) -> Option<usize> {
        self.events()
            .into_iter()
            .find(|e| e.host == host && describe(&e.action).contains(pattern))
            .map(|e| e.seq)
    }

    pub fn has_file(&self, host: &str, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.files.get(host).is_some_and(|f| f.contains(path))
    }

    pub fn files(&self, host: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut files: Vec<String> = state
            .files
            .get(host)
            .map(|f| f.iter().cloned().collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    /// Highest number of transfers seen between their archive step and their cleanup
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    fn record(&self, host: &str, action: Action) -> anyhow::Result<Option<Duration>> {
        let mut state = self.state.lock().unwrap();
        let description = describe(&action);
        let seq = state.events.len();
        state.events.push(Event {
            seq,
            host: host.to_string(),
            action,
        });
        if is_archive(&description) {
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        }
        if description.starts_with("rm -f ") && description.ends_with("/dump.zip") {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        let delay = state
            .delays
            .iter()
            .find(|(pattern, _)| description.contains(pattern.as_str()))
            .map(|(_, delay)| *delay);
        if state.panics.iter().any(|p| description.contains(p.as_str())) {
            drop(state);
            panic!("injected panic on {host}: {description}");
        }
        if state
            .failures
            .iter()
            .any(|(h, pattern)| h == host && description.contains(pattern.as_str()))
        {
            anyhow::bail!("injected failure on {host}: {description}");
        }
        Ok(delay)
    }

    fn apply(&self, host: &str, command: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let files = state.files.entry(host.to_string()).or_default();
        if is_archive(command) {
            let dir = command
                .strip_prefix("cd ")
                .and_then(|rest| rest.split(" && ").next())
                .unwrap_or_default();
            files.insert(format!("{dir}/dump.zip"));
        } else if let Some(path) = command.strip_prefix("rm -f ") {
            files.remove(path);
        } else if let Some(rest) = command.strip_prefix("unzip -o -q ") {
            let (archive, dest) = rest.split_once(" -d ").unwrap();
            if !files.contains(archive) {
                anyhow::bail!("unzip: cannot find {archive}");
            }
            files.insert(format!("{dest}/.restored"));
        }
        Ok(())
    }
}

fn is_archive(command: &str) -> bool {
    command.starts_with("cd ") && command.contains("zip -q -r dump.zip .")
}

fn describe(action: &Action) -> String {
    match action {
        Action::Run(command) => command.clone(),
        Action::Upload { local, remote } => format!("upload {local} {remote}"),
        Action::Download { remote, local } => format!("download {remote} {local}"),
        Action::Close => "close".to_string(),
    }
}

#[derive(Clone)]
pub struct FakeSession {
    pub host: String,
    world: Arc<World>,
}

impl FakeSession {
    pub fn new(world: &Arc<World>, host: &str) -> Self {
        Self {
            host: host.to_string(),
            world: world.clone(),
        }
    }

    async fn enter(&self, action: Action) -> anyhow::Result<()> {
        if let Some(delay) = self.world.record(&self.host, action)? {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

impl RemoteSession for FakeSession {
    async fn run(&self, command: &str) -> anyhow::Result<CommandOutput> {
        self.enter(Action::Run(command.to_string())).await?;
        self.world.apply(&self.host, command)?;
        Ok(CommandOutput::default())
    }

    async fn upload(&self, local: &Path, remote: &str) -> anyhow::Result<()> {
        self.enter(Action::Upload {
            local: local.display().to_string(),
            remote: remote.to_string(),
        })
        .await?;
        if !local.exists() {
            anyhow::bail!("{local:?} does not exist");
        }
        let mut state = self.world.state.lock().unwrap();
        state
            .files
            .entry(self.host.clone())
            .or_default()
            .insert(remote.to_string());
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> anyhow::Result<()> {
        self.enter(Action::Download {
            remote: remote.to_string(),
            local: local.display().to_string(),
        })
        .await?;
        if !self.world.has_file(&self.host, remote) {
            anyhow::bail!("{remote} does not exist on {}", self.host);
        }
        std::fs::write(local, b"PK")?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.enter(Action::Close).await
    }
}

pub struct FakeConnector {
    pub world: Arc<World>,
    pub refuse: HashSet<String>,
}

impl FakeConnector {
    pub fn new(world: &Arc<World>) -> Self {
        Self {
            world: world.clone(),
            refuse: HashSet::new(),
        }
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, endpoint: &common::Endpoint, _auth: Auth) -> anyhow::Result<FakeSession> {
        self.world.state.lock().unwrap().connects += 1;
        if self.refuse.contains(&endpoint.name) {
            anyhow::bail!("connection refused");
        }
        Ok(FakeSession::new(&self.world, &endpoint.name))
    }
}

/// A validated config with endpoints `src` and `dst` and `count` transfers `/src/<i>` -> `/dst/<i>`
pub fn config(count: usize) -> common::Config {
    config_from_yaml(&yaml(count, ""))
}

/// YAML for [`config`], with `extra` appended to the top level
pub fn yaml(count: usize, extra: &str) -> String {
    let mut text = String::from(
        "adaptors:\n  - name: src\n    pass: secret\n  - name: dst\n    pass: secret\nfiles:\n",
    );
    for i in 0..count {
        text.push_str(&format!(
            "  - src: {{ path: /src/{i}/, adaptor: src }}\n    dest: {{ path: /dst/{i}, adaptor: dst }}\n"
        ));
    }
    text.push_str(extra);
    text
}

pub fn config_from_yaml(text: &str) -> common::Config {
    let mut config = common::Config::from_yaml(text).unwrap();
    config.validate().unwrap();
    config
}

/// Pipeline context with one fake session per endpoint of `config`
pub fn context(
    world: &Arc<World>,
    config: &common::Config,
    staging_dir: &Path,
) -> Arc<syncbit::pipeline::TransferContext<FakeSession>> {
    let pool = SessionPool::from_sessions(
        config
            .endpoints
            .iter()
            .map(|e| (e.name.clone(), FakeSession::new(world, &e.name))),
    );
    Arc::new(syncbit::pipeline::TransferContext::new(
        pool,
        config,
        staging_dir.to_path_buf(),
    ))
}

/// Files left in a local staging directory
pub fn staging_leftovers(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}
