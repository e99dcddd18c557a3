//! Running many transfer pipelines with bounded concurrency
//!
//! Two strategies are available:
//!
//! - [`Strategy::Barrier`] splits the transfers into consecutive chunks of `parallelism` entries,
//!   starts every pipeline of a chunk and waits for all of them before starting the next chunk.
//! - [`Strategy::Queue`] starts `parallelism` workers that keep pulling the next transfer from a
//!   shared queue, so one slow transfer never holds back the others.
//!
//! Both keep at most `parallelism` pipelines active at any time. A failing or panicking pipeline
//! only affects its own transfer.

use std::sync::Arc;
use tracing::Instrument;

use common::{TransferSpec, TransferSummary};
use remote::RemoteSession;

use crate::pipeline::{self, TransferContext};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Strategy {
    /// Fixed chunks, each joined before the next one starts
    Barrier,
    /// Long-lived workers pulling from a shared queue
    #[default]
    Queue,
}

/// Number of pipelines to run at once
///
/// `requested == 0` means the detected hardware parallelism. The result is clamped to the number
/// of transfers and is never 0.
pub fn effective_parallelism(requested: usize, transfers: usize) -> usize {
    let wanted = if requested == 0 {
        common::detected_parallelism()
    } else {
        requested
    };
    wanted.min(transfers).max(1)
}

/// Sizes of the chunks [`Strategy::Barrier`] launches, in launch order
pub fn chunk_sizes(transfers: usize, parallelism: usize) -> Vec<usize> {
    assert!(parallelism > 0);
    (0..transfers)
        .step_by(parallelism)
        .map(|start| parallelism.min(transfers - start))
        .collect()
}

fn spawn_transfer<S: RemoteSession>(
    ctx: &Arc<TransferContext<S>>,
    index: usize,
    spec: TransferSpec,
) -> tokio::task::JoinHandle<TransferSummary> {
    let ctx = ctx.clone();
    let span = tracing::info_span!("transfer", index, src = %spec.src.path, dest = %spec.dest.path);
    tokio::spawn(
        async move { pipeline::run_transfer(&ctx, &spec).await.summary() }.instrument(span),
    )
}

fn settle(index: usize, result: Result<TransferSummary, tokio::task::JoinError>) -> TransferSummary {
    match result {
        Ok(summary) => summary,
        Err(error) => {
            tracing::error!("transfer #{} did not finish: {}", index, error);
            TransferSummary {
                aborted: 1,
                ..Default::default()
            }
        }
    }
}

async fn run_barrier<S: RemoteSession>(
    ctx: Arc<TransferContext<S>>,
    transfers: Vec<TransferSpec>,
    parallelism: usize,
) -> TransferSummary {
    let mut summary = TransferSummary::default();
    let sizes = chunk_sizes(transfers.len(), parallelism);
    let mut transfers = transfers.into_iter().enumerate();
    for (chunk_no, size) in sizes.into_iter().enumerate() {
        tracing::debug!("Starting chunk {} with {} transfers", chunk_no, size);
        let handles: Vec<_> = transfers
            .by_ref()
            .take(size)
            .map(|(index, spec)| (index, spawn_transfer(&ctx, index, spec)))
            .collect();
        for (index, handle) in handles {
            summary = summary + settle(index, handle.await);
        }
        tracing::debug!("Chunk {} finished", chunk_no);
    }
    summary
}

async fn run_queue<S: RemoteSession>(
    ctx: Arc<TransferContext<S>>,
    transfers: Vec<TransferSpec>,
    parallelism: usize,
) -> TransferSummary {
    let (sender, receiver) = async_channel::bounded::<(usize, TransferSpec)>(parallelism);
    let producer = tokio::spawn(async move {
        for item in transfers.into_iter().enumerate() {
            if sender.send(item).await.is_err() {
                tracing::error!("transfer queue closed before all transfers were queued");
                break;
            }
        }
    });
    let mut workers = tokio::task::JoinSet::new();
    for worker in 0..parallelism {
        let receiver = receiver.clone();
        let ctx = ctx.clone();
        workers.spawn(async move {
            let mut summary = TransferSummary::default();
            while let Ok((index, spec)) = receiver.recv().await {
                tracing::trace!("worker {} picked transfer #{}", worker, index);
                summary = summary + settle(index, spawn_transfer(&ctx, index, spec).await);
            }
            summary
        });
    }
    drop(receiver);
    let mut summary = TransferSummary::default();
    while let Some(result) = workers.join_next().await {
        match result {
            Ok(worker_summary) => summary = summary + worker_summary,
            Err(error) => tracing::error!("transfer worker failed: {}", error),
        }
    }
    if let Err(error) = producer.await {
        tracing::error!("transfer queue producer failed: {}", error);
    }
    summary
}

/// Run every transfer and wait until all of them reached a terminal state
pub async fn run_batch<S: RemoteSession>(
    ctx: Arc<TransferContext<S>>,
    transfers: Vec<TransferSpec>,
    parallelism: usize,
    strategy: Strategy,
) -> TransferSummary {
    if transfers.is_empty() {
        return TransferSummary::default();
    }
    let parallelism = parallelism.clamp(1, transfers.len());
    tracing::info!(
        "Running {} transfers with {} workers ({} strategy)",
        transfers.len(),
        parallelism,
        strategy
    );
    match strategy {
        Strategy::Barrier => run_barrier(ctx, transfers, parallelism).await,
        Strategy::Queue => run_queue(ctx, transfers, parallelism).await,
    }
}
