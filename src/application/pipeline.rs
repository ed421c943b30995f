//! Per-source collection pipeline
//!
//! For each query: search fetch, parse, cap, enrich, append, checkpoint.
//! Discovery order is preserved. A query that gives up costs only its own
//! results; an interrupt abandons the in-flight query and flushes what was
//! already appended.

use futures::StreamExt;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::{CollectionError, DelayRange, EnrichmentStatus, Query, Record, RunId, SourceAdapter};
use crate::infrastructure::config::{HarvestConfig, PipelineConfig};
use crate::infrastructure::{
    DetailEnricher, FetchOptions, JsonApiSource, JsonApiSourceConfig, ProxyRotator, RandomIdentitySupplier,
    ResilientClient, ResultAccumulator, RetryPolicy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Completed,
    Interrupted,
    Failed,
}

/// Summary of one source run
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub run_id: RunId,
    pub status: SourceStatus,
    pub queries_total: usize,
    pub queries_succeeded: usize,
    pub queries_failed: usize,
    pub records_saved: usize,
    pub enrichment_failures: usize,
    /// Persisted output, when a file was written
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

impl SourceOutcome {
    /// Outcome of a source that never started collecting
    #[must_use]
    pub fn setup_failed(source: impl Into<String>, error: &CollectionError) -> Self {
        Self {
            source: source.into(),
            run_id: RunId::new(),
            status: SourceStatus::Failed,
            queries_total: 0,
            queries_succeeded: 0,
            queries_failed: 0,
            records_saved: 0,
            enrichment_failures: 0,
            output: None,
            error: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == SourceStatus::Failed
    }
}

pub struct SourceRunner {
    adapter: Arc<dyn SourceAdapter>,
    client: Arc<ResilientClient>,
    enricher: DetailEnricher,
    search_policy: RetryPolicy,
    pipeline: PipelineConfig,
    run_id: RunId,
}

impl SourceRunner {
    #[must_use]
    pub fn new(adapter: Arc<dyn SourceAdapter>, client: Arc<ResilientClient>, config: &HarvestConfig) -> Self {
        let enricher = DetailEnricher::new(
            Arc::clone(&client),
            config.retry_policies.detail.clone(),
            config.pipeline.detail_delay_ms,
            config.pipeline.detail_concurrency,
        );
        Self {
            adapter,
            client,
            enricher,
            search_policy: config.retry_policies.search.clone(),
            pipeline: config.pipeline.clone(),
            run_id: RunId::new(),
        }
    }

    /// Builds a [`JsonApiSource`] runner with its own reqwest client
    pub fn from_source_config(
        source: JsonApiSourceConfig,
        config: &HarvestConfig,
        rotator: Arc<ProxyRotator>,
        token: CancellationToken,
    ) -> Result<Self, CollectionError> {
        let identities = Arc::new(RandomIdentitySupplier::with_headers(source.headers.clone()));
        let client = ResilientClient::new(&config.http, rotator, identities)?.with_cancellation(token);
        let adapter = JsonApiSource::new(source)?;
        Ok(Self::new(Arc::new(adapter), Arc::new(client), config))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Runs every query, appending into `accumulator` and flushing after each one
    pub async fn run(
        &self,
        queries: &[Query],
        accumulator: &mut ResultAccumulator,
        token: &CancellationToken,
    ) -> SourceOutcome {
        let name = self.adapter.name().to_string();
        let mut outcome = SourceOutcome {
            source: name.clone(),
            run_id: self.run_id,
            status: SourceStatus::Completed,
            queries_total: queries.len(),
            queries_succeeded: 0,
            queries_failed: 0,
            records_saved: 0,
            enrichment_failures: 0,
            output: Some(accumulator.path().to_path_buf()),
            error: None,
        };
        info!("[{}] run {} starting with {} queries", name, self.run_id, queries.len());

        for (index, query) in queries.iter().enumerate() {
            if token.is_cancelled() {
                outcome.status = SourceStatus::Interrupted;
                break;
            }
            info!(
                "[{}] query {}/{}: id={} keyword='{}'",
                name,
                index + 1,
                queries.len(),
                query.id,
                query.keyword
            );

            let records = match self.search(query).await {
                Ok(records) => records,
                Err(CollectionError::Cancelled) => {
                    outcome.status = SourceStatus::Interrupted;
                    break;
                }
                Err(e) => {
                    warn!("[{}] no data for query {}: {}", name, query.id, e);
                    outcome.queries_failed += 1;
                    self.pause(self.pipeline.failed_query_delay_ms, token).await;
                    continue;
                }
            };

            let mut enriched = std::pin::pin!(self.enricher.enrich_stream(self.adapter.as_ref(), records));
            while let Some(result) = enriched.next().await {
                match result {
                    Ok(record) => {
                        if record.enrichment == EnrichmentStatus::Failed {
                            outcome.enrichment_failures += 1;
                        }
                        accumulator.append(record);
                    }
                    Err(_) => {
                        outcome.status = SourceStatus::Interrupted;
                        break;
                    }
                }
            }
            if outcome.status == SourceStatus::Interrupted {
                break;
            }

            if let Err(e) = accumulator.flush() {
                error!("[{}] cannot persist results: {}", name, e);
                outcome.status = SourceStatus::Failed;
                outcome.error = Some(e.to_string());
                outcome.records_saved = 0;
                return outcome;
            }
            outcome.queries_succeeded += 1;
            info!("[{}] query {} done, {} records so far", name, query.id, accumulator.len());
            self.pause(self.pipeline.query_delay_ms, token).await;
        }

        // A cancel that lands during the last pause still counts as an interrupt
        if outcome.status == SourceStatus::Completed && token.is_cancelled() {
            outcome.status = SourceStatus::Interrupted;
        }
        let flushed = if outcome.status == SourceStatus::Interrupted {
            accumulator.flush_on_interrupt()
        } else {
            accumulator.flush()
        };
        if let Err(e) = flushed {
            error!("[{}] final flush failed: {}", name, e);
            outcome.status = SourceStatus::Failed;
            outcome.error = Some(e.to_string());
            return outcome;
        }

        outcome.records_saved = accumulator.len();
        if outcome.status == SourceStatus::Completed && outcome.queries_total > 0 && outcome.queries_succeeded == 0 {
            outcome.status = SourceStatus::Failed;
            outcome.error = Some("every query failed".to_string());
        }
        info!(
            "[{}] run {} {:?}: {} records, {}/{} queries ok, {} enrichment failures",
            name,
            self.run_id,
            outcome.status,
            outcome.records_saved,
            outcome.queries_succeeded,
            outcome.queries_total,
            outcome.enrichment_failures
        );
        outcome
    }

    async fn search(&self, query: &Query) -> Result<Vec<Record>, CollectionError> {
        let url = self.adapter.search_url(query);
        let options = FetchOptions::get(self.search_policy.clone())
            .with_context(format!("{}/query {}", self.adapter.name(), query.id));
        let body = self.client.fetch_body(&url, &options).await?;
        let mut records = self.adapter.parse_search(query, &body)?;
        records.truncate(self.pipeline.max_products_per_query);
        Ok(records)
    }

    async fn pause(&self, range: DelayRange, token: &CancellationToken) {
        tokio::select! {
            () = tokio::time::sleep(range.sample()) => {}
            () = token.cancelled() => {}
        }
    }
}
