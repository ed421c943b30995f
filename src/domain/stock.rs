//! Size/stock extraction from detail documents
//!
//! A size counts as available only when every configured status field of its
//! variant equals the in-stock value. Missing or different values exclude
//! the size; nothing defaults to available.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::CollectionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockRule {
    /// Pointer to the variant array inside the detail document
    pub variants_pointer: String,
    /// Pointer, relative to a variant, to its qualifier list
    pub qualifiers_pointer: String,
    pub qualifier_name_key: String,
    pub qualifier_value_key: String,
    /// Qualifier whose value is the size label
    pub size_qualifier_name: String,
    /// Pointer, relative to a variant, used when no size qualifier exists
    pub size_fallback_pointer: String,
    /// Pointers, relative to a variant, that must all equal `in_stock_value`
    pub status_pointers: Vec<String>,
    pub in_stock_value: String,
}

impl Default for StockRule {
    fn default() -> Self {
        Self {
            variants_pointer: "/variantOptions".to_string(),
            qualifiers_pointer: "/variantOptionQualifiers".to_string(),
            qualifier_name_key: "name".to_string(),
            qualifier_value_key: "value".to_string(),
            size_qualifier_name: "Size*".to_string(),
            size_fallback_pointer: "/scDisplaySize".to_string(),
            status_pointers: vec!["/stock/stockLevelStatus".to_string()],
            in_stock_value: "inStock".to_string(),
        }
    }
}

impl StockRule {
    /// Parses a detail body and extracts the in-stock sizes
    pub fn extract_from_body(&self, body: &str) -> Result<Vec<String>, CollectionError> {
        let doc: Value = serde_json::from_str(body)
            .map_err(|e| CollectionError::malformed(format!("detail body is not JSON: {e}")))?;
        self.extract(&doc)
    }

    /// In-stock sizes in variant order, without repeats
    pub fn extract(&self, doc: &Value) -> Result<Vec<String>, CollectionError> {
        if !doc.is_object() {
            return Err(CollectionError::malformed("detail document is not an object"));
        }
        let variants = match doc.pointer(&self.variants_pointer) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(variants)) => variants,
            Some(_) => {
                return Err(CollectionError::malformed(format!(
                    "'{}' is not an array",
                    self.variants_pointer
                )));
            }
        };

        let mut sizes: Vec<String> = Vec::new();
        for variant in variants {
            let Some(size) = self.size_of(variant) else {
                continue;
            };
            if self.is_in_stock(variant) && !sizes.contains(&size) {
                sizes.push(size);
            }
        }
        Ok(sizes)
    }

    fn size_of(&self, variant: &Value) -> Option<String> {
        let from_qualifier = variant
            .pointer(&self.qualifiers_pointer)
            .and_then(Value::as_array)
            .and_then(|qualifiers| {
                qualifiers.iter().find(|q| {
                    q.get(&self.qualifier_name_key).and_then(Value::as_str)
                        == Some(self.size_qualifier_name.as_str())
                })
            })
            .and_then(|q| q.get(&self.qualifier_value_key))
            .and_then(scalar_text);

        from_qualifier.or_else(|| variant.pointer(&self.size_fallback_pointer).and_then(scalar_text))
    }

    fn is_in_stock(&self, variant: &Value) -> bool {
        !self.status_pointers.is_empty()
            && self.status_pointers.iter().all(|pointer| {
                variant.pointer(pointer).and_then(Value::as_str) == Some(self.in_stock_value.as_str())
            })
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
