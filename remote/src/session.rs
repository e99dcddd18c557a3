//! The remote session capability the transfer pipeline is built on

use std::future::Future;

/// Output of a remote command that exited successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout and stderr, interleaved in the order the host sent them
    pub output: String,
}

/// One authenticated channel to a host
///
/// Implementations must tolerate concurrent calls: sessions are shared by every pipeline that
/// references the same endpoint.
pub trait RemoteSession: Send + Sync + 'static {
    /// Run a shell command; a non-zero exit status is an error
    fn run(&self, command: &str) -> impl Future<Output = anyhow::Result<CommandOutput>> + Send;

    /// Copy a local file to `remote` on this host
    fn upload(
        &self,
        local: &std::path::Path,
        remote: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Copy `remote` on this host to a local file
    fn download(
        &self,
        remote: &str,
        local: &std::path::Path,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn close(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// How a session authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// Private key material (file contents, not a path)
    Key(String),
    Password(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method())
    }
}

impl Auth {
    /// Pick the authentication method for an endpoint credential
    ///
    /// A credential naming an existing filesystem entry that is not a directory is read as a
    /// private key; any other value is used literally as a password.
    pub fn from_credential(credential: &str) -> anyhow::Result<Self> {
        match std::fs::metadata(credential) {
            Ok(metadata) if !metadata.is_dir() => {
                let key = std::fs::read_to_string(credential).map_err(|error| {
                    anyhow::anyhow!("failed reading private key {:?}: {}", credential, error)
                })?;
                Ok(Auth::Key(key))
            }
            _ => Ok(Auth::Password(credential.to_string())),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Auth::Key(_) => "publickey",
            Auth::Password(_) => "password",
        }
    }
}

/// Opens sessions for configured endpoints
pub trait Connector: Send + Sync {
    type Session: RemoteSession;

    fn connect(
        &self,
        endpoint: &common::Endpoint,
        auth: Auth,
    ) -> impl Future<Output = anyhow::Result<Self::Session>> + Send;
}
