use anyhow::{Context, Result};
use clap::Parser;
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "syncbit",
    version,
    about = "Synchronize directory trees between remote hosts over SSH",
    long_about = "`syncbit` archives directories on source hosts, moves the archives through a local staging \
directory and unpacks them on destination hosts, running configured shell hooks around every step.

The configuration file is taken from the SYNCBIT_CONFIG environment variable, then from the CONFIG \
argument. When neither is set, its name is read from stdin.

EXAMPLE:
    # Validate a configuration without connecting anywhere
    syncbit backup.yml --check

    # Run all transfers, 4 at a time, and print a summary
    syncbit backup.yml --workers 4 --summary"
)]
struct Args {
    // Transfer options
    /// Maximum number of concurrent transfers, 0 means number of logical CPUs
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Transfer options"
    )]
    workers: usize,

    /// How transfers are scheduled (queue: no fixed groups; barrier: groups of --workers)
    ///
    /// `queue` keeps every worker busy until the batch is done, so transfers are not grouped.
    /// `barrier` starts transfers in consecutive groups of --workers (10 files with 4 workers run
    /// as 4, 4, 2) and waits for a whole group before starting the next one. Only `barrier`
    /// guarantees that grouping.
    #[arg(
        long,
        value_enum,
        default_value_t = syncbit::Strategy::default(),
        help_heading = "Transfer options"
    )]
    strategy: syncbit::Strategy,

    /// Local directory for staging copies (default: system temp directory)
    #[arg(long, value_name = "PATH", help_heading = "Transfer options")]
    staging_dir: Option<std::path::PathBuf>,

    /// Validate the configuration and exit without connecting
    #[arg(long, help_heading = "Transfer options")]
    check: bool,

    // Progress & output
    /// Verbose level: -v DEBUG / -vv TRACE (default: INFO, or DEBUG with `settings.verbose`)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, only report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Configuration file
    #[arg()]
    config: Option<std::path::PathBuf>,
}

/// Result of a `--check` run
struct Checked {
    endpoints: usize,
    transfers: usize,
}

impl std::fmt::Display for Checked {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "adaptors: {}", self.endpoints)?;
        writeln!(f, "files: {}", self.transfers)?;
        Ok(())
    }
}

enum Report {
    Checked(Checked),
    Synced(common::TransferSummary),
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Report::Checked(checked) => std::fmt::Display::fmt(checked, f),
            Report::Synced(summary) => std::fmt::Display::fmt(summary, f),
        }
    }
}

#[instrument(skip(config))]
async fn async_main(args: Args, mut config: common::Config) -> Result<Report> {
    if args.check {
        config.validate()?;
        tracing::info!("Configuration is valid");
        return Ok(Report::Checked(Checked {
            endpoints: config.endpoints.len(),
            transfers: config.transfers.len(),
        }));
    }
    let options = syncbit::Options {
        parallelism: args.workers,
        strategy: args.strategy,
        staging_dir: args.staging_dir.unwrap_or_else(std::env::temp_dir),
    };
    let summary = syncbit::sync(config, &remote::SshConnector, &options).await?;
    Ok(Report::Synced(summary))
}

fn load_config(args: &Args) -> Result<common::Config> {
    let location = common::config::resolve_location(
        std::env::var(common::config::CONFIG_ENV_VAR).ok(),
        args.config.clone(),
        common::config::prompt_stdin,
    )?;
    common::Config::from_file(&location).with_context(|| format!("cannot load {location:?}"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error:#}");
            std::process::exit(1);
        }
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose.max(u8::from(config.settings.verbose)),
        colors: config.settings.colors,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let func = {
        let args = args.clone();
        || async_main(args, config)
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
