//! Product Harvester - resilient product collection pipeline
//!
//! Fetches search results from unreliable remote sources (proxy rotation,
//! identity randomization, exponential backoff), enriches every product with a
//! secondary stock lookup, persists results incrementally so interrupted runs
//! lose nothing, and merges independently produced result files into one
//! deduplicated dataset.

// Module declarations
pub mod domain;
pub mod infrastructure;
pub mod application;

// Re-export the pieces most callers need
pub use domain::{CollectionError, EnrichedRecord, FetchOutcome, Query, Record};
pub use infrastructure::{
    DetailEnricher, HarvestConfig, MergeStatistics, MergedDataset, ProxyRotator, ResilientClient,
    ResultAccumulator,
};
pub use application::{SourceOutcome, SourceRunner, SourceStatus, collect, run_sources};
