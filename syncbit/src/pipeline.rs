//! Per-file transfer pipeline
//!
//! A transfer walks a fixed sequence of stages:
//!
//! ```text
//! Start -> pre-backup hooks -> Archive -> post-backup hooks -> pre-download hooks -> Download
//!   -> post-download hooks -> pre-upload hooks -> Upload -> post-upload hooks
//!   -> pre-restore hooks -> Unarchive -> post-restore hooks -> Done
//! ```
//!
//! Hook failures are logged and skipped over. A failed core operation (archive, download,
//! upload, unarchive) aborts the transfer. Right before the archive stage the staging files are
//! named and their removal is registered; removal runs on every exit, in reverse order of
//! registration, and its failures are only logged.

use futures::FutureExt;

use common::staging::StagingArtifact;
use common::{Endpoint, HookKind, HookSet, Side, TransferSpec, TransferSummary};
use remote::{RemoteSession, SessionPool, shell_escape};

/// The four stages whose failure aborts a transfer
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CoreOp {
    Archive,
    Download,
    Upload,
    Unarchive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Start,
    Hooks(HookKind),
    Core(CoreOp),
    Done,
}

impl Stage {
    pub fn next(self) -> Stage {
        match self {
            Stage::Start => Stage::Hooks(HookKind::PreBackup),
            Stage::Hooks(HookKind::PreBackup) => Stage::Core(CoreOp::Archive),
            Stage::Core(CoreOp::Archive) => Stage::Hooks(HookKind::PostBackup),
            Stage::Hooks(HookKind::PostBackup) => Stage::Hooks(HookKind::PreDownload),
            Stage::Hooks(HookKind::PreDownload) => Stage::Core(CoreOp::Download),
            Stage::Core(CoreOp::Download) => Stage::Hooks(HookKind::PostDownload),
            Stage::Hooks(HookKind::PostDownload) => Stage::Hooks(HookKind::PreUpload),
            Stage::Hooks(HookKind::PreUpload) => Stage::Core(CoreOp::Upload),
            Stage::Core(CoreOp::Upload) => Stage::Hooks(HookKind::PostUpload),
            Stage::Hooks(HookKind::PostUpload) => Stage::Hooks(HookKind::PreRestore),
            Stage::Hooks(HookKind::PreRestore) => Stage::Core(CoreOp::Unarchive),
            Stage::Core(CoreOp::Unarchive) => Stage::Hooks(HookKind::PostRestore),
            Stage::Hooks(HookKind::PostRestore) | Stage::Done => Stage::Done,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Done,
    Aborted { stage: CoreOp, error: anyhow::Error },
    /// An endpoint of the transfer has no session; nothing was attempted
    Unresolved(anyhow::Error),
    /// A stage panicked after the staging files were registered; cleanup still ran
    Panicked(anyhow::Error),
}

#[derive(Debug)]
pub struct PipelineReport {
    pub outcome: Outcome,
    pub hook_failures: usize,
    pub cleanup_failures: usize,
}

impl PipelineReport {
    pub fn is_done(&self) -> bool {
        matches!(self.outcome, Outcome::Done)
    }

    pub fn summary(&self) -> TransferSummary {
        let done = self.is_done();
        TransferSummary {
            completed: usize::from(done),
            aborted: usize::from(!done),
            hook_failures: self.hook_failures,
            cleanup_failures: self.cleanup_failures,
        }
    }
}

/// Archive `source_path` into `dump.zip` inside it, replacing any previous archive
pub fn archive_command(source_path: &str) -> String {
    format!(
        "cd {} && rm -f dump.zip && zip -q -r dump.zip .",
        shell_escape(source_path)
    )
}

/// Extract `archive` into `destination_path`, overwriting existing files
pub fn restore_command(archive: &str, destination_path: &str) -> String {
    format!(
        "unzip -o -q {} -d {}",
        shell_escape(archive),
        shell_escape(destination_path)
    )
}

/// Everything a pipeline needs besides its own transfer entry; shared by all pipelines of a batch
#[derive(Debug)]
pub struct TransferContext<S> {
    pub pool: SessionPool<S>,
    pub endpoints: std::collections::HashMap<String, Endpoint>,
    pub global_hooks: HookSet,
    /// Local directory holding staging copies
    pub staging_dir: std::path::PathBuf,
}

impl<S: RemoteSession> TransferContext<S> {
    pub fn new(
        pool: SessionPool<S>,
        config: &common::Config,
        staging_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            pool,
            endpoints: config
                .endpoints
                .iter()
                .map(|e| (e.name.clone(), e.clone()))
                .collect(),
            global_hooks: config.global.hooks.to_set(),
            staging_dir,
        }
    }
}

struct Party<'a, S> {
    endpoint: &'a Endpoint,
    session: std::sync::Arc<S>,
    path: &'a str,
}

impl<S> Party<'_, S> {
    fn location(&self, path: &str) -> String {
        format!("{}@{}:{}", self.endpoint.user, self.endpoint.host, path)
    }
}

enum Obligation<'a, S> {
    Local(std::path::PathBuf),
    Remote { party: &'a Party<'a, S>, path: String },
}

/// Removal obligations, run in reverse order of registration
struct Cleanup<'a, S> {
    obligations: Vec<Obligation<'a, S>>,
}

impl<S: RemoteSession> Cleanup<'_, S> {
    /// Returns the number of removals that failed
    async fn run(self) -> usize {
        let mut failures = 0;
        for obligation in self.obligations.into_iter().rev() {
            match obligation {
                Obligation::Local(path) => {
                    tracing::debug!("Removing {:?}", path);
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => {}
                        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                        Err(error) => {
                            tracing::warn!("Failed removing {:?}: {}", path, error);
                            failures += 1;
                        }
                    }
                }
                Obligation::Remote { party, path } => {
                    tracing::debug!("Removing {}", party.location(&path));
                    let command = format!("rm -f {}", shell_escape(&path));
                    if let Err(error) = party.session.run(&command).await {
                        tracing::warn!("Failed removing {}: {:#}", party.location(&path), error);
                        failures += 1;
                    }
                }
            }
        }
        failures
    }
}

fn resolve<'a, S: RemoteSession>(
    ctx: &'a TransferContext<S>,
    spec: &'a TransferSpec,
    side: Side,
) -> anyhow::Result<Party<'a, S>> {
    let name = spec.endpoint(side);
    let endpoint = ctx
        .endpoints
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("{side} adaptor {name} is not configured"))?;
    let session = ctx
        .pool
        .get(name)
        .ok_or_else(|| anyhow::anyhow!("{side} adaptor {name} has no open session"))?;
    Ok(Party {
        endpoint,
        session,
        path: spec.path(side),
    })
}

struct Pipeline<'a, S> {
    ctx: &'a TransferContext<S>,
    spec: &'a TransferSpec,
    source: Party<'a, S>,
    destination: Party<'a, S>,
}

impl<'a, S: RemoteSession> Pipeline<'a, S> {
    fn party(&self, side: Side) -> &Party<'a, S> {
        match side {
            Side::Source => &self.source,
            Side::Destination => &self.destination,
        }
    }

    /// Returns the number of hooks that failed
    async fn run_hooks(&self, kind: HookKind) -> usize {
        let party = self.party(kind.side());
        tracing::debug!("Executing {} hooks", kind);
        let mut failures = 0;
        for command in crate::hooks::commands(&self.ctx.global_hooks, self.spec, kind) {
            match party.session.run(&command).await {
                Ok(result) => {
                    if !result.output.is_empty() {
                        tracing::trace!("'{}' printed: {}", command, result.output.trim_end());
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        "Error while executing '{}' {} hook on {}: {:#}",
                        command,
                        kind,
                        party.location(party.path),
                        error
                    );
                    failures += 1;
                }
            }
        }
        tracing::debug!("Completed {} hooks", kind);
        failures
    }

    async fn core(&self, op: CoreOp, artifact: &StagingArtifact) -> anyhow::Result<()> {
        let (source, destination) = (&self.source, &self.destination);
        match op {
            CoreOp::Archive => {
                tracing::debug!("Archiving {}", source.location(source.path));
                source.session.run(&archive_command(source.path)).await?;
            }
            CoreOp::Download => {
                tracing::debug!(
                    "Downloading {} to {:?}",
                    source.location(&artifact.source_archive),
                    artifact.local_staging
                );
                source
                    .session
                    .download(&artifact.source_archive, &artifact.local_staging)
                    .await?;
            }
            CoreOp::Upload => {
                tracing::info!(
                    "Restoring {:?} to {}",
                    artifact.local_staging,
                    destination.location(destination.path)
                );
                destination
                    .session
                    .upload(&artifact.local_staging, &artifact.destination_temp)
                    .await?;
            }
            CoreOp::Unarchive => {
                destination
                    .session
                    .run(&restore_command(&artifact.destination_temp, destination.path))
                    .await?;
            }
        }
        Ok(())
    }

    fn abort_location(&self, op: CoreOp) -> String {
        match op {
            CoreOp::Archive | CoreOp::Download => self.source.location(self.source.path),
            CoreOp::Upload | CoreOp::Unarchive => {
                self.destination.location(self.destination.path)
            }
        }
    }
}

/// Run one transfer to completion or abort, always attempting cleanup
pub async fn run_transfer<S: RemoteSession>(
    ctx: &TransferContext<S>,
    spec: &TransferSpec,
) -> PipelineReport {
    let (source, destination) = match (
        resolve(ctx, spec, Side::Source),
        resolve(ctx, spec, Side::Destination),
    ) {
        (Ok(source), Ok(destination)) => (source, destination),
        (Err(error), _) | (_, Err(error)) => {
            tracing::warn!("Skipping {} because {:#}", spec.src.path, error);
            return PipelineReport {
                outcome: Outcome::Unresolved(error),
                hook_failures: 0,
                cleanup_failures: 0,
            };
        }
    };
    let pipeline = Pipeline {
        ctx,
        spec,
        source,
        destination,
    };
    tracing::info!(
        "Backing up {}",
        pipeline.source.location(pipeline.source.path)
    );
    let mut hook_failures = 0;
    // hook stages ahead of the archive need no staging files
    let mut stage = Stage::Start.next();
    while let Stage::Hooks(kind) = stage {
        hook_failures += pipeline.run_hooks(kind).await;
        stage = stage.next();
    }
    let artifact = StagingArtifact::with_id(
        common::staging::staging_name(),
        pipeline.source.path,
        &ctx.staging_dir,
    );
    let cleanup = Cleanup {
        obligations: vec![
            Obligation::Local(artifact.local_staging.clone()),
            Obligation::Remote {
                party: &pipeline.source,
                path: artifact.source_archive.clone(),
            },
            Obligation::Remote {
                party: &pipeline.destination,
                path: artifact.destination_temp.clone(),
            },
        ],
    };
    let outcome = match std::panic::AssertUnwindSafe(drive(
        &pipeline,
        stage,
        &artifact,
        &mut hook_failures,
    ))
    .catch_unwind()
    .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let error = anyhow::anyhow!("transfer panicked: {}", panic_message(panic.as_ref()));
            tracing::error!(
                "Skipping {} because {:#}",
                pipeline.source.location(pipeline.source.path),
                error
            );
            Outcome::Panicked(error)
        }
    };
    let cleanup_failures = cleanup.run().await;
    if let Outcome::Done = outcome {
        tracing::info!(
            "{} has been successfully restored to {}",
            pipeline.source.location(pipeline.source.path),
            pipeline.destination.location(pipeline.destination.path)
        );
    }
    PipelineReport {
        outcome,
        hook_failures,
        cleanup_failures,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("no panic message")
}

async fn drive<S: RemoteSession>(
    pipeline: &Pipeline<'_, S>,
    mut stage: Stage,
    artifact: &StagingArtifact,
    hook_failures: &mut usize,
) -> Outcome {
    loop {
        match stage {
            Stage::Start => {}
            Stage::Hooks(kind) => *hook_failures += pipeline.run_hooks(kind).await,
            Stage::Core(op) => {
                if let Err(error) = pipeline.core(op, artifact).await {
                    tracing::warn!(
                        "Skipping {} because {} failed: {:#}",
                        pipeline.abort_location(op),
                        op,
                        error
                    );
                    return Outcome::Aborted { stage: op, error };
                }
            }
            Stage::Done => return Outcome::Done,
        }
        stage = stage.next();
    }
}
