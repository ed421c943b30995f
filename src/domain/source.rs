//! Site/API collaborator seam
//!
//! A source knows how to address its search and detail endpoints and how to
//! turn a search response into records. Network access, retries and
//! persistence belong to the pipeline, not to the source.

use super::errors::CollectionError;
use super::query::Query;
use super::record::Record;
use super::stock::StockRule;

pub trait SourceAdapter: Send + Sync {
    /// Stable name used for the `site` field and output file naming
    fn name(&self) -> &str;

    /// Search endpoint for one query
    fn search_url(&self, query: &Query) -> String;

    /// Raw records from a search response body, in discovery order
    fn parse_search(&self, query: &Query, body: &str) -> Result<Vec<Record>, CollectionError>;

    /// Detail endpoint for a record, `None` when the source has no detail lookup
    /// or the record carries no identifier
    fn detail_url(&self, record: &Record) -> Option<String>;

    /// How in-stock sizes are read from this source's detail documents
    fn stock_rule(&self) -> &StockRule;
}
