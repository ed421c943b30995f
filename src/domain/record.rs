//! Collected records
//!
//! A [`Record`] is an open JSON object. Declared fields are always present:
//! a value that could not be extracted is stored as the [`NOT_FOUND`]
//! sentinel instead of being omitted, so every consumer sees a stable schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Sentinel stored in place of a value that could not be extracted
pub const NOT_FOUND: &str = "Not found";

/// Field names shared by every source
pub mod fields {
    pub const SITE: &str = "site";
    pub const KEYWORD_ID: &str = "keyword_id";
    pub const KEYWORD: &str = "keyword";
    pub const PRODUCT_ID: &str = "product_id";
    pub const PRODUCT_NAME: &str = "product_name";
    pub const PRODUCT_URL: &str = "product_url";
    pub const PRODUCT_IMAGE_URLS: &str = "product_image_urls";
    pub const SIZES_AVAILABLE: &str = "product_sizes_available";
    pub const ENRICHMENT_STATUS: &str = "enrichment_status";
}

/// Ordered set of fields a source promises to emit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    declared: Vec<String>,
}

impl FieldSchema {
    /// Identity fields every record carries
    #[must_use]
    pub fn core() -> Self {
        Self {
            declared: [fields::PRODUCT_ID, fields::PRODUCT_NAME, fields::PRODUCT_URL]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Adds a declared field, keeping declaration order and skipping repeats
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.declared.contains(&field) {
            self.declared.push(field);
        }
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.declared.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills declared fields that are missing with the sentinel
    pub fn conform(&mut self, schema: &FieldSchema) {
        for field in schema.fields() {
            self.0
                .entry(field.to_string())
                .or_insert_with(|| Value::String(NOT_FOUND.to_string()));
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Stores the value when present, the sentinel otherwise
    pub fn set_or_not_found(&mut self, field: impl Into<String>, value: Option<Value>) {
        let value = value
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| Value::String(NOT_FOUND.to_string()));
        self.0.insert(field.into(), value);
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Trimmed textual value of a field. Numbers are rendered as text.
    /// Missing fields and non-scalar values yield an empty string.
    #[must_use]
    pub fn raw_text(&self, field: &str) -> Cow<'_, str> {
        match self.0.get(field) {
            Some(Value::String(s)) => Cow::Borrowed(s.trim()),
            Some(Value::Number(n)) => Cow::Owned(n.to_string()),
            _ => Cow::Borrowed(""),
        }
    }

    /// Textual value only when it carries information: non-empty and not
    /// the sentinel
    #[must_use]
    pub fn text(&self, field: &str) -> Option<Cow<'_, str>> {
        let text = self.raw_text(field);
        (!text.is_empty() && text != NOT_FOUND).then_some(text)
    }

    #[must_use]
    pub fn product_id(&self) -> Option<Cow<'_, str>> {
        self.text(fields::PRODUCT_ID)
    }

    #[must_use]
    pub fn product_name(&self) -> Option<Cow<'_, str>> {
        self.text(fields::PRODUCT_NAME)
    }

    #[must_use]
    pub fn product_url(&self) -> Option<Cow<'_, str>> {
        self.text(fields::PRODUCT_URL)
    }

    /// Label for log lines: id, else name, else a placeholder
    #[must_use]
    pub fn label(&self) -> String {
        self.product_id()
            .or_else(|| self.product_name())
            .map_or_else(|| "<unidentified>".to_string(), Cow::into_owned)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Outcome of the detail lookup for one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// Detail document fetched and parsed
    Complete,
    /// Lookup attempted but the fetch gave up or the body was malformed
    Failed,
    /// The source offers no detail lookup for this record
    #[default]
    NotAttempted,
}

/// Record plus the derived in-stock size list.
///
/// A failed or skipped lookup leaves `sizes_available` empty; `enrichment`
/// tells the two apart from a product that genuinely has no stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub record: Record,
    #[serde(rename = "product_sizes_available", default)]
    pub sizes_available: Vec<String>,
    #[serde(rename = "enrichment_status", default)]
    pub enrichment: EnrichmentStatus,
}

impl EnrichedRecord {
    #[must_use]
    pub fn new(mut record: Record, sizes_available: Vec<String>, enrichment: EnrichmentStatus) -> Self {
        // Derived fields live on the wrapper only
        record.remove(fields::SIZES_AVAILABLE);
        record.remove(fields::ENRICHMENT_STATUS);
        Self {
            record,
            sizes_available,
            enrichment,
        }
    }

    #[must_use]
    pub fn complete(record: Record, sizes_available: Vec<String>) -> Self {
        Self::new(record, sizes_available, EnrichmentStatus::Complete)
    }

    #[must_use]
    pub fn failed(record: Record) -> Self {
        Self::new(record, Vec::new(), EnrichmentStatus::Failed)
    }

    #[must_use]
    pub fn not_attempted(record: Record) -> Self {
        Self::new(record, Vec::new(), EnrichmentStatus::NotAttempted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_fields_default_to_sentinel() {
        let schema = FieldSchema::core().with_field("brand_name");
        let mut record = Record::new();
        record.conform(&schema);
        assert_eq!(record.len(), 4);
        assert_eq!(record.get("brand_name"), Some(&json!(NOT_FOUND)));
        assert!(record.product_id().is_none());
        assert_eq!(record.raw_text(fields::PRODUCT_ID), NOT_FOUND);
    }

    #[test]
    fn test_conform_keeps_existing_values() {
        let mut record = Record::new().with(fields::PRODUCT_NAME, "Linen Shirt");
        record.conform(&FieldSchema::core());
        assert_eq!(record.product_name().as_deref(), Some("Linen Shirt"));
        assert_eq!(record.get(fields::PRODUCT_URL), Some(&json!(NOT_FOUND)));
    }

    #[test]
    fn test_text_trims_and_renders_numbers() {
        let record = Record::new()
            .with(fields::PRODUCT_ID, 4411)
            .with(fields::PRODUCT_NAME, "  Boots  ")
            .with(fields::PRODUCT_URL, "   ");
        assert_eq!(record.product_id().as_deref(), Some("4411"));
        assert_eq!(record.product_name().as_deref(), Some("Boots"));
        assert!(record.product_url().is_none());
    }

    #[test]
    fn test_set_or_not_found_treats_null_as_missing() {
        let mut record = Record::new();
        record.set_or_not_found("brand_name", Some(Value::Null));
        record.set_or_not_found("color", Some(json!("red")));
        assert_eq!(record.get("brand_name"), Some(&json!(NOT_FOUND)));
        assert_eq!(record.get("color"), Some(&json!("red")));
    }

    #[test]
    fn test_enriched_record_flattens_into_one_object() {
        let record = Record::new()
            .with(fields::PRODUCT_ID, "A1")
            .with(fields::SIZES_AVAILABLE, json!(["stale"]));
        let enriched = EnrichedRecord::complete(record, vec!["S".into(), "M".into()]);

        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(
            value,
            json!({
                "product_id": "A1",
                "product_sizes_available": ["S", "M"],
                "enrichment_status": "complete"
            })
        );

        let back: EnrichedRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, enriched);
    }

    #[test]
    fn test_failed_and_not_attempted_are_distinct() {
        let failed = EnrichedRecord::failed(Record::new());
        let skipped = EnrichedRecord::not_attempted(Record::new());
        assert!(failed.sizes_available.is_empty());
        assert!(skipped.sizes_available.is_empty());
        assert_ne!(failed.enrichment, skipped.enrichment);
    }

    #[test]
    fn test_label_falls_back_to_name() {
        let record = Record::new().with(fields::PRODUCT_NAME, "Scarf");
        assert_eq!(record.label(), "Scarf");
        assert_eq!(Record::new().label(), "<unidentified>");
    }
}
