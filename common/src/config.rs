//! Configuration file schema, validation and location lookup
//!
//! The configuration is a YAML document with four top-level sections:
//!
//! ```yaml
//! settings:
//!   verbose: true
//!   colors: false
//! adaptors:
//!   - name: web
//!     user: deploy
//!     host: web.example.com
//!     pass: /home/me/.ssh/id_ed25519
//!     port: 22
//! global:
//!   hooks:
//!     pre-backup: ["systemctl stop app"]
//! files:
//!   - src: { path: /srv/app/data/, adaptor: web, post-backup: ["systemctl start app"] }
//!     dest: { path: /srv/app/data, adaptor: backup, post-restore: ["chown -R app /srv/app/data"] }
//! ```
//!
//! Parsing only checks the shape of the document. [`Config::validate`] must run before the
//! configuration is used: it fills endpoint defaults in place, normalizes paths and rejects
//! references to endpoints that do not exist.

use serde::Deserialize;

use crate::hooks::{HookKind, HookSet, Side};

/// Environment variable consulted first when looking for the configuration file
pub const CONFIG_ENV_VAR: &str = "SYNCBIT_CONFIG";

pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 22;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    ParseFile {
        path: std::path::PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse config")]
    Parse(#[from] serde_yaml::Error),
    #[error("couldn't find any adaptor to connect to")]
    NoEndpoints,
    #[error("adaptor {0:?} is defined more than once")]
    DuplicateEndpoint(String),
    #[error("no files found to transfer")]
    NoFiles,
    #[error("adaptor name {name:?} used by the {side} of file #{index} is not recognized")]
    UnknownEndpoint {
        index: usize,
        side: Side,
        name: String,
    },
    #[error("{side} path is missing for file #{index}")]
    MissingPath { index: usize, side: Side },
    #[error(
        "config file is required: set SYNCBIT_CONFIG, pass it as the first argument or enter it at the prompt"
    )]
    NoConfigLocation,
}

/// Behaviour switches for the process itself
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Show debug logs on stderr
    pub verbose: bool,
    /// Colorize log output
    pub colors: bool,
}

/// A named remote side that files are transferred from or to
#[derive(Clone, Deserialize)]
pub struct Endpoint {
    pub name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub host: String,
    /// Path to a private key file or a literal password
    #[serde(rename = "pass", default)]
    pub credential: String,
    #[serde(default)]
    pub port: u16,
}

// credential is never printed
impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Fill unset user, host and port with their defaults
    fn apply_defaults(&mut self) {
        if self.user.is_empty() {
            tracing::debug!("Defaulting user '{}' for {} adaptor", DEFAULT_USER, self.name);
            self.user = DEFAULT_USER.to_string();
        }
        if self.host.is_empty() {
            tracing::debug!("Defaulting host '{}' for {} adaptor", DEFAULT_HOST, self.name);
            self.host = DEFAULT_HOST.to_string();
        }
        if self.port == 0 {
            tracing::debug!("Defaulting port '{}' for {} adaptor", DEFAULT_PORT, self.name);
            self.port = DEFAULT_PORT;
        }
    }

    /// `user@host` form used in log messages
    pub fn address(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// All eight hook lists, as they appear under `global.hooks`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HookLists {
    pub pre_backup: Vec<String>,
    pub post_backup: Vec<String>,
    pub pre_download: Vec<String>,
    pub post_download: Vec<String>,
    pub pre_upload: Vec<String>,
    pub post_upload: Vec<String>,
    pub pre_restore: Vec<String>,
    pub post_restore: Vec<String>,
}

impl HookLists {
    pub fn to_set(&self) -> HookSet {
        enum_map::enum_map! {
            HookKind::PreBackup => self.pre_backup.clone(),
            HookKind::PostBackup => self.post_backup.clone(),
            HookKind::PreDownload => self.pre_download.clone(),
            HookKind::PostDownload => self.post_download.clone(),
            HookKind::PreUpload => self.pre_upload.clone(),
            HookKind::PostUpload => self.post_upload.clone(),
            HookKind::PreRestore => self.pre_restore.clone(),
            HookKind::PostRestore => self.post_restore.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Global {
    pub hooks: HookLists,
}

/// Source half of a file entry: the directory to archive and its backup/download hooks
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SourceSide {
    pub path: String,
    #[serde(rename = "adaptor")]
    pub endpoint: String,
    pub pre_backup: Vec<String>,
    pub post_backup: Vec<String>,
    pub pre_download: Vec<String>,
    pub post_download: Vec<String>,
}

/// Destination half of a file entry: the directory to restore into and its upload/restore hooks
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DestinationSide {
    pub path: String,
    #[serde(rename = "adaptor")]
    pub endpoint: String,
    pub pre_upload: Vec<String>,
    pub post_upload: Vec<String>,
    pub pre_restore: Vec<String>,
    pub post_restore: Vec<String>,
}

/// One directory to move from a source endpoint to a destination endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferSpec {
    pub src: SourceSide,
    pub dest: DestinationSide,
}

impl TransferSpec {
    /// Hooks of one category scoped to this entry; categories of the other side are empty
    pub fn scoped(&self, kind: HookKind) -> &[String] {
        match kind {
            HookKind::PreBackup => &self.src.pre_backup,
            HookKind::PostBackup => &self.src.post_backup,
            HookKind::PreDownload => &self.src.pre_download,
            HookKind::PostDownload => &self.src.post_download,
            HookKind::PreUpload => &self.dest.pre_upload,
            HookKind::PostUpload => &self.dest.post_upload,
            HookKind::PreRestore => &self.dest.pre_restore,
            HookKind::PostRestore => &self.dest.post_restore,
        }
    }

    pub fn path(&self, side: Side) -> &str {
        match side {
            Side::Source => &self.src.path,
            Side::Destination => &self.dest.path,
        }
    }

    pub fn endpoint(&self, side: Side) -> &str {
        match side {
            Side::Source => &self.src.endpoint,
            Side::Destination => &self.dest.endpoint,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    #[serde(rename = "adaptors")]
    pub endpoints: Vec<Endpoint>,
    pub global: Global,
    #[serde(rename = "files")]
    pub transfers: Vec<TransferSpec>,
}

/// Strip trailing slashes, keeping a bare `/` intact
fn normalize_path(path: &mut String) {
    let trimmed_len = path.trim_end_matches('/').len();
    if trimmed_len == 0 {
        path.truncate(1);
    } else {
        path.truncate(trimmed_len);
    }
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the configuration and normalize it in place
    ///
    /// Endpoint defaults are written back into `self.endpoints`, so every later lookup by name
    /// observes them.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        tracing::debug!("Validating the config file");
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        for endpoint in &mut self.endpoints {
            endpoint.apply_defaults();
        }
        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if !seen.insert(endpoint.name.as_str()) {
                return Err(ConfigError::DuplicateEndpoint(endpoint.name.clone()));
            }
        }
        if self.transfers.is_empty() {
            return Err(ConfigError::NoFiles);
        }
        let known: std::collections::HashSet<String> =
            self.endpoints.iter().map(|e| e.name.clone()).collect();
        for (index, transfer) in self.transfers.iter_mut().enumerate() {
            for side in [Side::Source, Side::Destination] {
                let name = transfer.endpoint(side);
                if !known.contains(name) {
                    return Err(ConfigError::UnknownEndpoint {
                        index,
                        side,
                        name: name.to_string(),
                    });
                }
            }
            for side in [Side::Source, Side::Destination] {
                if transfer.path(side).is_empty() {
                    return Err(ConfigError::MissingPath { index, side });
                }
            }
            normalize_path(&mut transfer.src.path);
            normalize_path(&mut transfer.dest.path);
        }
        Ok(())
    }
}

/// Find the configuration file path
///
/// The environment value wins over the command line argument; when both are absent the
/// `prompt` callback is asked. Empty values count as absent.
pub fn resolve_location<F>(
    env_value: Option<String>,
    arg: Option<std::path::PathBuf>,
    prompt: F,
) -> Result<std::path::PathBuf, ConfigError>
where
    F: FnOnce() -> std::io::Result<String>,
{
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        return Ok(value.into());
    }
    if let Some(path) = arg.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path);
    }
    match prompt() {
        Ok(answer) if !answer.trim().is_empty() => Ok(answer.trim().into()),
        _ => Err(ConfigError::NoConfigLocation),
    }
}

/// Ask for the configuration file name on stdin
pub fn prompt_stdin() -> std::io::Result<String> {
    use std::io::Write;
    let mut stdout = std::io::stdout();
    write!(stdout, "Enter config file name: ")?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}
