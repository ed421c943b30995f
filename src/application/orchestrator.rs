//! Multi-source orchestration
//!
//! Sources run as isolated workers on a bounded pool and share one
//! cancellation token. Every worker owns its client and accumulator, so an
//! interrupt reaches each accumulator's flush path independently.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pipeline::{SourceOutcome, SourceRunner, SourceStatus};
use crate::domain::query::load_queries;
use crate::domain::{CollectionError, Query};
use crate::infrastructure::merge::{self, MergeStatistics};
use crate::infrastructure::{HarvestConfig, JsonApiSourceConfig, ProxyRotator, ResultAccumulator};

/// One source ready to run, with its output location
pub struct SourceJob {
    pub runner: SourceRunner,
    pub output: PathBuf,
}

/// Runs `jobs` with at most `max_concurrent` in flight. One outcome per job,
/// in job order.
pub async fn run_sources(
    jobs: Vec<SourceJob>,
    queries: Arc<Vec<Query>>,
    max_concurrent: usize,
    token: CancellationToken,
) -> Vec<SourceOutcome> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut names = Vec::with_capacity(jobs.len());
    let mut tasks = Vec::with_capacity(jobs.len());

    info!(
        "Starting {} sources ({} at a time) over {} queries",
        jobs.len(),
        max_concurrent,
        queries.len()
    );

    for job in jobs {
        names.push(job.runner.name().to_string());
        let semaphore = Arc::clone(&semaphore);
        let queries = Arc::clone(&queries);
        let token = token.clone();

        tasks.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    return SourceOutcome::setup_failed(
                        job.runner.name(),
                        &CollectionError::Setup { reason: e.to_string() },
                    );
                }
            };
            debug!("[{}] acquired worker slot", job.runner.name());
            run_job(&job, &queries, &token).await
        }));
    }

    let results = futures::future::join_all(tasks).await;
    results
        .into_iter()
        .zip(names)
        .map(|(result, name)| {
            result.unwrap_or_else(|e| {
                error!("[{}] worker panicked: {}", name, e);
                SourceOutcome::setup_failed(name, &CollectionError::Setup { reason: e.to_string() })
            })
        })
        .collect()
}

async fn run_job(job: &SourceJob, queries: &[Query], token: &CancellationToken) -> SourceOutcome {
    let mut accumulator = match ResultAccumulator::create(&job.output) {
        Ok(accumulator) => accumulator,
        Err(e) => {
            error!("[{}] output unavailable: {}", job.runner.name(), e);
            return SourceOutcome::setup_failed(job.runner.name(), &e);
        }
    };
    job.runner.run(queries, &mut accumulator, token).await
}

/// Cancels `token` on Ctrl+C, or SIGTERM on Unix
pub fn install_interrupt_handler(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if wait_for_interrupt(terminate_signal(), tokio::signal::ctrl_c(), &token).await {
            token.cancel();
        }
    })
}

#[cfg(unix)]
fn terminate_signal() -> Option<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => Some(async move {
            sigterm.recv().await;
        }),
        Err(e) => {
            error!("Failed to install SIGTERM handler, listening for Ctrl+C only: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
fn terminate_signal() -> Option<std::future::Pending<()>> {
    None
}

/// Waits for whichever signal source is available. Returns false when the
/// token was cancelled first or no signal source could be installed.
async fn wait_for_interrupt<T, C>(terminate: Option<T>, ctrl_c: C, token: &CancellationToken) -> bool
where
    T: Future<Output = ()>,
    C: Future<Output = std::io::Result<()>>,
{
    let terminate = async move {
        match terminate {
            Some(signal) => signal.await,
            None => std::future::pending().await,
        }
    };
    let ctrl_c = async move {
        if let Err(e) = ctrl_c.await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            warn!("Received Ctrl+C, saving collected data");
            true
        }
        () = terminate => {
            warn!("Received SIGTERM, saving collected data");
            true
        }
        () = token.cancelled() => false,
    }
}

/// Result of a `collect` invocation
#[derive(Debug)]
pub struct CollectReport {
    pub outcomes: Vec<SourceOutcome>,
    pub merge: Option<MergeStatistics>,
}

impl CollectReport {
    /// True only when there were sources and every one of them failed
    #[must_use]
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(SourceOutcome::is_failed)
    }
}

/// Loads queries and proxies, runs the selected sources, and optionally
/// merges their outputs into `merge_into`
pub async fn collect(
    config: &HarvestConfig,
    sources: Vec<JsonApiSourceConfig>,
    merge_into: Option<&Path>,
    token: CancellationToken,
) -> Result<CollectReport> {
    if sources.is_empty() {
        anyhow::bail!("No sources configured");
    }

    let mut queries = load_queries(&config.paths.queries_file).context("Failed to load queries")?;
    if let Some(range) = config.query_range {
        queries = range.filter(queries);
        info!(
            "Processing queries with ids {} to {} ({} selected)",
            range.start_id,
            range.end_id,
            queries.len()
        );
    }
    let queries = Arc::new(queries);

    let rotator = Arc::new(ProxyRotator::from_file(&config.paths.proxies_file));

    let mut outcomes = Vec::new();
    let mut jobs = Vec::new();
    for source in sources {
        let name = source.name.clone();
        match SourceRunner::from_source_config(source, config, Arc::clone(&rotator), token.clone()) {
            Ok(runner) => jobs.push(SourceJob {
                runner,
                output: config.paths.output_file_for(&name),
            }),
            Err(e) => {
                error!("[{}] setup failed: {}", name, e);
                outcomes.push(SourceOutcome::setup_failed(name, &e));
            }
        }
    }

    outcomes.extend(run_sources(jobs, queries, config.pipeline.max_concurrent_sources, token).await);

    let merge = match merge_into {
        Some(target) => Some(merge_outputs(&outcomes, target)?),
        None => None,
    };

    Ok(CollectReport { outcomes, merge })
}

/// Merges every persisted source output into `target`
pub fn merge_outputs(outcomes: &[SourceOutcome], target: &Path) -> Result<MergeStatistics> {
    let files: Vec<PathBuf> = outcomes
        .iter()
        .filter(|o| o.status != SourceStatus::Failed || o.records_saved > 0)
        .filter_map(|o| o.output.clone())
        .filter(|path| path.exists())
        .collect();

    if files.is_empty() {
        warn!("No source produced an output file; nothing to merge");
    }

    let (dataset, stats) = merge::merge(&files);
    dataset
        .write_to(target)
        .with_context(|| format!("Failed to write merged data to {}", target.display()))?;
    info!("Saved {} unique records to {}", dataset.len(), target.display());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::{Pending, Ready, pending, ready};
    use std::io;

    #[tokio::test]
    async fn test_ctrl_c_works_without_terminate_signal() {
        let token = CancellationToken::new();
        let interrupted = wait_for_interrupt(None::<Ready<()>>, ready(Ok(())), &token).await;
        assert!(interrupted);
    }

    #[tokio::test]
    async fn test_terminate_works_when_ctrl_c_fails() {
        let token = CancellationToken::new();
        let ctrl_c = ready(Err(io::Error::other("no console")));
        assert!(wait_for_interrupt(Some(ready(())), ctrl_c, &token).await);
    }

    #[tokio::test]
    async fn test_finished_run_stops_listening() {
        let token = CancellationToken::new();
        token.cancel();
        let ctrl_c = ready(Err(io::Error::other("no console")));
        assert!(!wait_for_interrupt(None::<Pending<()>>, ctrl_c, &token).await);
    }

    #[tokio::test]
    async fn test_handler_cancels_token_on_signal() {
        let token = CancellationToken::new();
        let listener = {
            let token = token.clone();
            tokio::spawn(async move {
                if wait_for_interrupt(Some(ready(())), pending::<io::Result<()>>(), &token).await {
                    token.cancel();
                }
            })
        };
        listener.await.unwrap();
        assert!(token.is_cancelled());
    }
}
