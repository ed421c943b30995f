//! Search queries fed into a source run

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use super::errors::CollectionError;

/// One search request: `id` is an opaque correlation token, `keyword` the
/// literal search term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub keyword: String,
}

impl Query {
    pub fn new(id: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keyword: keyword.into(),
        }
    }

    /// Lowercased, trimmed keyword as sent to search endpoints
    #[must_use]
    pub fn normalized_keyword(&self) -> String {
        self.keyword.trim().to_lowercase()
    }

    /// Numeric form of the id, when it has one
    #[must_use]
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.trim().parse().ok()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Inclusive id window used to split one query list across several runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRange {
    pub start_id: u64,
    pub end_id: u64,
}

impl QueryRange {
    #[must_use]
    pub const fn new(start_id: u64, end_id: u64) -> Self {
        Self { start_id, end_id }
    }

    /// Queries without a numeric id never fall inside a range
    #[must_use]
    pub fn contains(&self, query: &Query) -> bool {
        query
            .numeric_id()
            .is_some_and(|id| (self.start_id..=self.end_id).contains(&id))
    }

    #[must_use]
    pub fn filter(&self, queries: Vec<Query>) -> Vec<Query> {
        queries.into_iter().filter(|q| self.contains(q)).collect()
    }
}

/// Loads a JSON array of `{id, keyword}` objects
pub fn load_queries(path: &Path) -> Result<Vec<Query>, CollectionError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CollectionError::input_unavailable(path, e.to_string()))?;
    serde_json::from_str(&text)
        .map_err(|e| CollectionError::input_unavailable(path, format!("invalid query list: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_query_ids_accept_numbers_and_strings() {
        let queries: Vec<Query> =
            serde_json::from_str(r#"[{"id": 7, "keyword": "Red Dress"}, {"id": "x-9", "keyword": "boots"}]"#)
                .unwrap();
        assert_eq!(queries[0].id, "7");
        assert_eq!(queries[0].normalized_keyword(), "red dress");
        assert_eq!(queries[1].id, "x-9");
        assert_eq!(queries[1].numeric_id(), None);
    }

    #[test]
    fn test_range_is_inclusive_and_skips_non_numeric() {
        let range = QueryRange::new(421, 525);
        let queries = vec![
            Query::new("420", "a"),
            Query::new("421", "b"),
            Query::new("525", "c"),
            Query::new("526", "d"),
            Query::new("abc", "e"),
        ];
        let kept: Vec<String> = range.filter(queries).into_iter().map(|q| q.id).collect();
        assert_eq!(kept, vec!["421", "525"]);
    }

    #[test]
    fn test_load_queries_reports_missing_file() {
        let err = load_queries(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, CollectionError::InputUnavailable { .. }));
    }

    #[test]
    fn test_load_queries_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id": 1, "keyword": "Linen"}}]"#).unwrap();
        let queries = load_queries(file.path()).unwrap();
        assert_eq!(queries, vec![Query::new("1", "Linen")]);
    }
}
