//! Remote sessions for syncbit
//!
//! [`RemoteSession`] is the only thing the transfer code knows about a host: run a command,
//! upload a file, download a file, close. [`SshSession`] implements it over SSH and
//! [`SessionPool`] holds one session per configured endpoint for the lifetime of a batch.

pub mod pool;
pub mod session;
pub mod ssh;

pub use pool::SessionPool;
pub use session::{Auth, CommandOutput, Connector, RemoteSession};
pub use ssh::{SshConnector, SshSession};

/// Quote `value` for safe interpolation into a POSIX shell command
///
/// Values made only of characters that need no quoting are returned unchanged, everything else
/// is wrapped in single quotes. `~` counts as plain so `~/path` still expands on the remote side.
pub fn shell_escape(value: &str) -> String {
    let is_plain = |c: char| c.is_ascii_alphanumeric() || "_-./,:=@%+~".contains(c);
    if !value.is_empty() && value.chars().all(is_plain) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
