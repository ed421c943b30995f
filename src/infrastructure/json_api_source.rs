//! Configuration-driven source for JSON search APIs
//!
//! Endpoints are URL templates and fields are JSON pointers, so a new site
//! is a configuration entry rather than code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

use super::json_walk::{collect_string_leaves, is_url_leaf};
use crate::domain::record::fields;
use crate::domain::{CollectionError, FieldSchema, Query, Record, SourceAdapter, StockRule};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonApiSourceConfig {
    pub name: String,
    /// Search endpoint; `{query}` is the encoded lowercased keyword, `{id}` the query id
    pub search_url_template: String,
    /// Pointer to the product array; empty for a top-level array
    pub products_pointer: String,
    pub id_pointer: String,
    pub name_pointer: String,
    pub url_pointer: Option<String>,
    /// Used when the product carries no usable URL, e.g. `https://shop.example/p/{id}`
    pub product_url_template: Option<String>,
    /// Base for relative product URLs
    pub base_url: Option<String>,
    /// Subtree whose URL-keyed string leaves become `product_image_urls`
    pub image_pointer: Option<String>,
    /// Extra output field -> JSON pointer
    pub fields: BTreeMap<String, String>,
    /// Detail endpoint with `{id}`; no enrichment when unset
    pub detail_url_template: Option<String>,
    pub stock_rule: StockRule,
    /// Static headers sent with every request of this source
    pub headers: BTreeMap<String, String>,
}

impl Default for JsonApiSourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            search_url_template: String::new(),
            products_pointer: "/products".to_string(),
            id_pointer: "/code".to_string(),
            name_pointer: "/name".to_string(),
            url_pointer: Some("/url".to_string()),
            product_url_template: None,
            base_url: None,
            image_pointer: Some("/images".to_string()),
            fields: BTreeMap::new(),
            detail_url_template: None,
            stock_rule: StockRule::default(),
            headers: BTreeMap::new(),
        }
    }
}

impl JsonApiSourceConfig {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

pub struct JsonApiSource {
    config: JsonApiSourceConfig,
    schema: FieldSchema,
    base_url: Option<Url>,
}

impl JsonApiSource {
    pub fn new(config: JsonApiSourceConfig) -> Result<Self, CollectionError> {
        let base_url = config
            .base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| CollectionError::Setup {
                reason: format!("source '{}' has an invalid base_url: {e}", config.name),
            })?;

        let schema = config.fields.keys().fold(
            FieldSchema::core()
                .with_field(fields::SITE)
                .with_field(fields::KEYWORD_ID)
                .with_field(fields::KEYWORD)
                .with_field(fields::PRODUCT_IMAGE_URLS),
            |schema, field| schema.with_field(field.as_str()),
        );

        Ok(Self {
            config,
            schema,
            base_url,
        })
    }

    fn product_record(&self, query: &Query, product: &Value) -> Option<Record> {
        let Some(name) = pointer_text(product, &self.config.name_pointer) else {
            debug!("[{}] skipping product without a name", self.config.name);
            return None;
        };
        let id = pointer_text(product, &self.config.id_pointer);

        let mut record = Record::new()
            .with(fields::SITE, self.config.name.as_str())
            .with(fields::KEYWORD_ID, query.id.as_str())
            .with(fields::KEYWORD, query.keyword.as_str())
            .with(fields::PRODUCT_NAME, name);
        record.set_or_not_found(fields::PRODUCT_ID, id.clone().map(Value::String));
        record.set_or_not_found(
            fields::PRODUCT_URL,
            self.product_url(product, id.as_deref()).map(Value::String),
        );

        if let Some(pointer) = &self.config.image_pointer {
            let images = product
                .pointer(pointer)
                .map(|subtree| Value::from(collect_string_leaves(subtree, is_url_leaf)));
            record.set_or_not_found(fields::PRODUCT_IMAGE_URLS, images);
        }

        for (field, pointer) in &self.config.fields {
            record.set_or_not_found(field.as_str(), product.pointer(pointer).cloned());
        }

        record.conform(&self.schema);
        Some(record)
    }

    fn product_url(&self, product: &Value, id: Option<&str>) -> Option<String> {
        let from_product = self
            .config
            .url_pointer
            .as_deref()
            .and_then(|pointer| pointer_text(product, pointer))
            .and_then(|raw| self.absolute_url(&raw));

        from_product.or_else(|| {
            let template = self.config.product_url_template.as_deref()?;
            Some(template.replace("{id}", &encode(id?)))
        })
    }

    fn absolute_url(&self, raw: &str) -> Option<String> {
        if Url::parse(raw).is_ok() {
            return Some(raw.to_string());
        }
        self.base_url
            .as_ref()
            .and_then(|base| base.join(raw).ok())
            .map(String::from)
    }
}

impl SourceAdapter for JsonApiSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn search_url(&self, query: &Query) -> String {
        self.config
            .search_url_template
            .replace("{query}", &encode(&query.normalized_keyword()))
            .replace("{id}", &encode(&query.id))
    }

    fn parse_search(&self, query: &Query, body: &str) -> Result<Vec<Record>, CollectionError> {
        let doc: Value = serde_json::from_str(body)
            .map_err(|e| CollectionError::malformed(format!("search body is not JSON: {e}")))?;

        let products = match doc.pointer(&self.config.products_pointer) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(products)) => products,
            Some(_) => {
                return Err(CollectionError::malformed(format!(
                    "'{}' is not an array",
                    self.config.products_pointer
                )));
            }
        };

        Ok(products
            .iter()
            .filter_map(|product| self.product_record(query, product))
            .collect())
    }

    fn detail_url(&self, record: &Record) -> Option<String> {
        let template = self.config.detail_url_template.as_deref()?;
        let id = record.product_id()?;
        Some(template.replace("{id}", &encode(&id)))
    }

    fn stock_rule(&self) -> &StockRule {
        &self.config.stock_rule
    }
}

fn encode(text: &str) -> String {
    url::form_urlencoded::byte_serialize(text.as_bytes()).collect()
}

fn pointer_text(value: &Value, pointer: &str) -> Option<String> {
    let text = match value.pointer(pointer)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
