//! Synchronize directory trees between remote hosts
//!
//! Every configured transfer archives a directory on its source host, pulls the archive into a
//! local staging directory, pushes it to the destination host and unpacks it there. Shell hooks
//! run at eight points around those steps, see [`common::HookKind`].
//!
//! # Layout
//!
//! - [`hooks`] - global and scoped hook commands for a stage
//! - [`pipeline`] - the per-transfer state machine and its cleanup
//! - [`scheduler`] - bounded concurrent execution of a whole batch
//!
//! # Failure handling
//!
//! Configuration errors and connection errors are fatal and reported before any transfer
//! starts. Once the batch runs, a failed transfer only affects itself: its staging files are
//! removed and the remaining transfers carry on. The outcome of the batch is returned as a
//! [`common::TransferSummary`].

pub mod hooks;
pub mod pipeline;
pub mod scheduler;

pub use scheduler::Strategy;

/// Batch execution settings that do not come from the configuration file
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of concurrent transfers, 0 means detected hardware parallelism
    pub parallelism: usize,
    pub strategy: Strategy,
    /// Local directory for staging copies
    pub staging_dir: std::path::PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            parallelism: 0,
            strategy: Strategy::default(),
            staging_dir: std::env::temp_dir(),
        }
    }
}

/// Validate `config`, connect every endpoint and run all transfers
///
/// Fails only when the configuration is invalid or a session could not be opened; the state of
/// individual transfers is reported in the returned summary.
pub async fn sync<C: remote::Connector>(
    mut config: common::Config,
    connector: &C,
    options: &Options,
) -> anyhow::Result<common::TransferSummary> {
    config.validate()?;
    let pool = remote::SessionPool::connect(&config.endpoints, connector).await?;
    let transfers = std::mem::take(&mut config.transfers);
    let parallelism = scheduler::effective_parallelism(options.parallelism, transfers.len());
    tracing::info!("Using {} workers", parallelism);
    let ctx = std::sync::Arc::new(pipeline::TransferContext::new(
        pool,
        &config,
        options.staging_dir.clone(),
    ));
    let summary = scheduler::run_batch(ctx.clone(), transfers, parallelism, options.strategy).await;
    ctx.pool.shutdown().await;
    tracing::info!(
        "Finished {} transfers: {} completed, {} aborted",
        summary.total(),
        summary.completed,
        summary.aborted
    );
    Ok(summary)
}
