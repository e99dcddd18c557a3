//! [`RemoteSession`] over libssh2
//!
//! libssh2 calls block, so every operation is moved onto tokio's blocking pool. The underlying
//! `ssh2::Session` serializes access internally, which is what lets several pipelines share one
//! session.

use anyhow::{Context, anyhow};
use std::io::Read;

use crate::session::{Auth, CommandOutput, Connector, RemoteSession};

/// Permissions of files created by [`SshSession::upload`]
const UPLOAD_MODE: i32 = 0o600;

pub struct SshSession {
    session: ssh2::Session,
    address: String,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("address", &self.address)
            .finish()
    }
}

async fn blocking<T, F>(what: &'static str, func: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(func)
        .await
        .with_context(|| format!("{what} task failed"))?
}

/// Number of trailing output lines quoted in a failed command's error
const ERROR_TAIL_LINES: usize = 10;

/// Read a command's output until the remote end closes it; invalid UTF-8 is replaced
fn collect_output<R: Read>(mut reader: R) -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .context("failed reading command output")?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn check_status(status: i32, output: &str) -> anyhow::Result<()> {
    if status == 0 {
        return Ok(());
    }
    let lines: Vec<&str> = output.trim_end().lines().collect();
    let tail = lines[lines.len().saturating_sub(ERROR_TAIL_LINES)..].join("\n");
    Err(anyhow!("command exited with status {}: {}", status, tail))
}

fn exec(session: &ssh2::Session, command: &str) -> anyhow::Result<CommandOutput> {
    let mut channel = session
        .channel_session()
        .context("failed to open session channel")?;
    // stderr is interleaved into the one stream we read, so a chatty stderr cannot fill its
    // window while we wait on stdout
    channel
        .handle_extended_data(ssh2::ExtendedData::Merge)
        .context("failed to merge command stderr")?;
    channel
        .exec(command)
        .with_context(|| format!("failed to execute {command:?}"))?;
    let output = collect_output(&mut channel)?;
    channel
        .wait_close()
        .context("failed waiting for channel close")?;
    let status = channel
        .exit_status()
        .context("failed reading exit status")?;
    check_status(status, &output)?;
    Ok(CommandOutput { output })
}

fn upload(session: &ssh2::Session, local: &std::path::Path, remote: &str) -> anyhow::Result<()> {
    let mut file = std::fs::File::open(local)
        .with_context(|| format!("failed opening {:?} for upload", local))?;
    let size = file.metadata()?.len();
    let mut channel = session
        .scp_send(std::path::Path::new(remote), UPLOAD_MODE, size, None)
        .with_context(|| format!("failed starting upload to {remote}"))?;
    std::io::copy(&mut file, &mut channel)
        .with_context(|| format!("failed uploading {:?} to {}", local, remote))?;
    channel.send_eof()?;
    channel.wait_eof()?;
    channel.close()?;
    channel.wait_close()?;
    Ok(())
}

fn download(session: &ssh2::Session, remote: &str, local: &std::path::Path) -> anyhow::Result<()> {
    let (mut channel, stat) = session
        .scp_recv(std::path::Path::new(remote))
        .with_context(|| format!("failed starting download of {remote}"))?;
    let mut file = std::fs::File::create(local)
        .with_context(|| format!("failed creating {:?}", local))?;
    std::io::copy(&mut (&mut channel).take(stat.size()), &mut file)
        .with_context(|| format!("failed downloading {} to {:?}", remote, local))?;
    channel.send_eof()?;
    channel.wait_eof()?;
    channel.close()?;
    channel.wait_close()?;
    Ok(())
}

impl RemoteSession for SshSession {
    async fn run(&self, command: &str) -> anyhow::Result<CommandOutput> {
        let session = self.session.clone();
        let command = command.to_string();
        blocking("remote command", move || exec(&session, &command)).await
    }

    async fn upload(&self, local: &std::path::Path, remote: &str) -> anyhow::Result<()> {
        let session = self.session.clone();
        let local = local.to_path_buf();
        let remote = remote.to_string();
        blocking("upload", move || upload(&session, &local, &remote)).await
    }

    async fn download(&self, remote: &str, local: &std::path::Path) -> anyhow::Result<()> {
        let session = self.session.clone();
        let remote = remote.to_string();
        let local = local.to_path_buf();
        blocking("download", move || download(&session, &remote, &local)).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        let session = self.session.clone();
        blocking("disconnect", move || {
            session
                .disconnect(None, "syncbit done", None)
                .context("failed to disconnect")
        })
        .await
    }
}

/// Opens [`SshSession`]s: TCP connect, handshake, then key or password authentication
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(
        &self,
        endpoint: &common::Endpoint,
        auth: Auth,
    ) -> anyhow::Result<SshSession> {
        let address = format!("{}:{}", endpoint.host, endpoint.port);
        let user = endpoint.user.clone();
        tracing::debug!("Connecting to {}@{} using {:?}", user, address, auth);
        blocking("ssh connect", move || {
            let tcp = std::net::TcpStream::connect(&address)
                .with_context(|| format!("TCP connection to {address} failed"))?;
            let mut session = ssh2::Session::new().context("failed to create SSH session")?;
            session.set_tcp_stream(tcp);
            session
                .handshake()
                .with_context(|| format!("SSH handshake with {address} failed"))?;
            match &auth {
                Auth::Key(key) => session.userauth_pubkey_memory(&user, None, key, None),
                Auth::Password(password) => session.userauth_password(&user, password),
            }
            .with_context(|| format!("{} authentication failed for {user}@{address}", auth.method()))?;
            if !session.authenticated() {
                return Err(anyhow!(
                    "{} authentication was not accepted for {}@{}",
                    auth.method(),
                    user,
                    address
                ));
            }
            Ok(SshSession { session, address })
        })
        .await
    }
}
