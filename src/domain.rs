//! Domain module - records, queries, fetch vocabulary and collaborator seams
//!
//! Nothing in here performs I/O. Infrastructure builds on these types and the
//! application layer wires them together.

pub mod errors;
pub mod fetch;
pub mod query;
pub mod record;
pub mod source;
pub mod stock;
pub mod value_objects;

pub use errors::CollectionError;
pub use fetch::{FetchAttempt, FetchOutcome, ProxyEndpoint, RequestIdentity, TransientReason};
pub use query::{Query, QueryRange};
pub use record::{EnrichedRecord, EnrichmentStatus, FieldSchema, Record};
pub use source::SourceAdapter;
pub use stock::StockRule;
pub use value_objects::{DelayRange, RunId};
