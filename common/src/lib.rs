//! Shared pieces of the syncbit tool
//!
//! - [`config`] - YAML configuration schema, validation and location lookup
//! - [`hooks`] - hook categories and the sides they run on
//! - [`staging`] - collision-free staging names and archive locations
//! - [`summary`] - batch result counters
//!
//! [`run`] builds the tokio runtime, installs the tracing subscriber and drives an async main
//! function, the same way for every binary in the workspace.

pub mod config;
pub mod hooks;
pub mod staging;
pub mod summary;

pub use config::{Config, ConfigError, Endpoint, TransferSpec};
pub use hooks::{HookKind, HookSet, Side};
pub use summary::TransferSummary;

/// Runtime configuration for tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Only report errors
    pub quiet: bool,
    /// Verbosity level: 0=INFO, 1=DEBUG, 2+=TRACE
    pub verbose: u8,
    /// ANSI colors in log output
    pub colors: bool,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    pub fn level(&self) -> tracing::level_filters::LevelFilter {
        use tracing::level_filters::LevelFilter;
        if self.quiet {
            return LevelFilter::ERROR;
        }
        match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Logical thread count of this host, at least 1
pub fn detected_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

fn init_tracing(output: &OutputConfig) {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(output.level().into())
        .from_env_lossy();
    // a subscriber may already be installed (e.g. by a test harness)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(output.colors)
        .with_target(false)
        .try_init();
}

/// Run `func` on a freshly built multi-threaded runtime
///
/// Returns `None` when the runtime could not be built or `func` failed; the error chain has
/// already been logged in that case, so callers only need to pick an exit code.
pub fn run<Fut, Summary>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<Summary>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let rt = match builder.build() {
        Ok(rt) => rt,
        Err(error) => {
            tracing::error!("failed to build tokio runtime: {:#}", error);
            return None;
        }
    };
    match rt.block_on(func()) {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            tracing::error!("{:#}", error);
            None
        }
    }
}
