//! Detail enrichment stage
//!
//! Each record gets one detail lookup through the resilient client with the
//! smaller detail budget. Failures stay with the record: a give-up or an
//! unparseable body yields an empty size list and `Failed` status, and the
//! batch carries on. Only cancellation propagates.

use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use super::http_client::{FetchOptions, ResilientClient};
use super::retry_policy::RetryPolicy;
use crate::domain::{CollectionError, DelayRange, EnrichedRecord, Record, SourceAdapter};

pub struct DetailEnricher {
    client: Arc<ResilientClient>,
    policy: RetryPolicy,
    pre_delay: DelayRange,
    concurrency: usize,
}

impl DetailEnricher {
    #[must_use]
    pub fn new(client: Arc<ResilientClient>, policy: RetryPolicy, pre_delay: DelayRange, concurrency: usize) -> Self {
        Self {
            client,
            policy,
            pre_delay,
            concurrency: concurrency.max(1),
        }
    }

    /// Enriches one record. `Err` only for [`CollectionError::Cancelled`].
    pub async fn enrich(&self, adapter: &dyn SourceAdapter, record: Record) -> Result<EnrichedRecord, CollectionError> {
        let Some(url) = adapter.detail_url(&record) else {
            debug!("[{}] no detail lookup for {}", adapter.name(), record.label());
            return Ok(EnrichedRecord::not_attempted(record));
        };

        let cancel = self.client.cancellation();
        tokio::select! {
            () = tokio::time::sleep(self.pre_delay.sample()) => {}
            () = cancel.cancelled() => return Err(CollectionError::Cancelled),
        }

        let label = record.label();
        let options = FetchOptions::get(self.policy.clone()).with_context(format!("{}/detail {label}", adapter.name()));
        let body = match self.client.fetch_body(&url, &options).await {
            Ok(body) => body,
            Err(CollectionError::Cancelled) => return Err(CollectionError::Cancelled),
            Err(e) => {
                warn!("[{}] detail lookup failed for {}: {}", adapter.name(), label, e);
                return Ok(EnrichedRecord::failed(record));
            }
        };

        match adapter.stock_rule().extract_from_body(&body) {
            Ok(sizes) => {
                debug!("[{}] {} in-stock sizes for {}", adapter.name(), sizes.len(), label);
                Ok(EnrichedRecord::complete(record, sizes))
            }
            Err(e) => {
                warn!("[{}] unusable detail document for {}: {}", adapter.name(), label, e);
                Ok(EnrichedRecord::failed(record))
            }
        }
    }

    /// Enriches records with at most `concurrency` lookups in flight,
    /// yielding results in input order
    pub fn enrich_stream<'a>(
        &'a self,
        adapter: &'a dyn SourceAdapter,
        records: Vec<Record>,
    ) -> impl Stream<Item = Result<EnrichedRecord, CollectionError>> + 'a {
        stream::iter(records)
            .map(move |record| self.enrich(adapter, record))
            .buffered(self.concurrency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::fields;
    use crate::domain::{EnrichmentStatus, FetchAttempt, Query, RequestIdentity, StockRule, TransientReason};
    use crate::infrastructure::http_client::Transport;
    use crate::infrastructure::identity::FixedIdentitySupplier;
    use crate::infrastructure::proxy_rotator::ProxyRotator;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::num::NonZeroU32;

    /// Detail endpoint `/p/{id}`; id "bad" always fails, "html" returns a non-JSON page
    struct DetailTransport;

    #[async_trait]
    impl Transport for DetailTransport {
        async fn execute(&self, attempt: &FetchAttempt) -> Result<(u16, String), TransientReason> {
            let id = attempt.target_url.rsplit('/').next().unwrap_or_default();
            match id {
                "bad" => Ok((503, String::new())),
                "html" => Ok((200, "<html>blocked</html>".into())),
                _ => Ok((
                    200,
                    json!({"variantOptions": [
                        {"scDisplaySize": "M", "stock": {"stockLevelStatus": "inStock"}},
                        {"scDisplaySize": "L", "stock": {"stockLevelStatus": "outOfStock"}}
                    ]})
                    .to_string(),
                )),
            }
        }
    }

    struct DetailSource {
        rule: StockRule,
    }

    impl SourceAdapter for DetailSource {
        fn name(&self) -> &str {
            "detail-test"
        }
        fn search_url(&self, _query: &Query) -> String {
            String::new()
        }
        fn parse_search(&self, _query: &Query, _body: &str) -> Result<Vec<Record>, CollectionError> {
            Ok(Vec::new())
        }
        fn detail_url(&self, record: &Record) -> Option<String> {
            record.product_id().map(|id| format!("http://detail.test/p/{id}"))
        }
        fn stock_rule(&self) -> &StockRule {
            &self.rule
        }
    }

    fn enricher() -> DetailEnricher {
        let client = ResilientClient::with_transport(
            Arc::new(DetailTransport),
            Arc::new(FixedIdentitySupplier(RequestIdentity {
                headers: BTreeMap::new(),
                user_agent: "t".into(),
            })),
            Arc::new(ProxyRotator::direct()),
            NonZeroU32::new(1000).unwrap(),
        );
        DetailEnricher::new(Arc::new(client), RetryPolicy::immediate(3), DelayRange::zero(), 2)
    }

    fn record(id: &str) -> Record {
        Record::new().with(fields::PRODUCT_ID, id).with(fields::PRODUCT_NAME, format!("item {id}"))
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_record() {
        let source = DetailSource { rule: StockRule::default() };
        let records = vec![record("1"), record("2"), record("bad"), record("html"), record("5")];

        let enriched: Vec<EnrichedRecord> = enricher()
            .enrich_stream(&source, records)
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(enriched.len(), 5);

        let statuses: Vec<EnrichmentStatus> = enriched.iter().map(|e| e.enrichment).collect();
        assert_eq!(
            statuses,
            vec![
                EnrichmentStatus::Complete,
                EnrichmentStatus::Complete,
                EnrichmentStatus::Failed,
                EnrichmentStatus::Failed,
                EnrichmentStatus::Complete,
            ]
        );
        assert_eq!(enriched[0].sizes_available, vec!["M"]);
        assert!(enriched[2].sizes_available.is_empty());
        assert_eq!(enriched[4].record.product_id().as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_records_without_detail_url_are_not_attempted() {
        let source = DetailSource { rule: StockRule::default() };
        let unnamed = Record::new().with(fields::PRODUCT_NAME, "no id");
        let enriched = enricher().enrich(&source, unnamed).await.unwrap();
        assert_eq!(enriched.enrichment, EnrichmentStatus::NotAttempted);
        assert!(enriched.sizes_available.is_empty());
    }
}
