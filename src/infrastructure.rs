//! Infrastructure layer - network, persistence, configuration and logging

pub mod accumulator;
pub mod config;
pub mod enrichment;
pub mod http_client;
pub mod identity;
pub mod json_api_source;
pub mod json_walk;
pub mod logging;
pub mod merge;
pub mod proxy_rotator;
pub mod retry_policy;
pub mod spreadsheet;

pub use accumulator::{AccumulatorState, ResultAccumulator};
pub use config::{ConfigError, HarvestConfig, LoggingConfig};
pub use enrichment::DetailEnricher;
pub use http_client::{FetchOptions, ReqwestTransport, ResilientClient, Transport};
pub use identity::{IdentitySupplier, RandomIdentitySupplier};
pub use json_api_source::{JsonApiSource, JsonApiSourceConfig};
pub use merge::{MergeStatistics, MergedDataset, identity_key, merge};
pub use proxy_rotator::ProxyRotator;
pub use retry_policy::{RetryDecision, RetryPolicy};
pub use spreadsheet::{KeywordEntry, export_xlsx, import_keywords, write_keywords};
