//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate: an optional file (TOML, JSON
//! or YAML, chosen by extension) and then `HARVEST_*` environment overrides,
//! where `__` separates nested keys (`HARVEST_HTTP__TIMEOUT_SECS=10`).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::json_api_source::JsonApiSourceConfig;
use super::retry_policy::RetryPolicy;
use crate::domain::{DelayRange, QueryRange};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "HARVEST";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete harvester configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub http: HttpConfig,
    pub retry_policies: RetryPolicies,
    pub pipeline: PipelineConfig,
    pub paths: PathsConfig,
    /// Inclusive numeric id window; all queries when unset
    pub query_range: Option<QueryRange>,
    pub sources: Vec<JsonApiSourceConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Outbound rate limit shared by all attempts of one client
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            follow_redirects: true,
        }
    }
}

/// Retry budgets per request kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicies {
    pub search: RetryPolicy,
    pub detail: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            search: RetryPolicy::search(),
            detail: RetryPolicy::detail(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sources running at the same time
    pub max_concurrent_sources: usize,
    /// Detail lookups in flight per source; 1 keeps them strictly sequential
    pub detail_concurrency: usize,
    /// Pause before each detail lookup
    pub detail_delay_ms: DelayRange,
    /// Pause after a query that produced results
    pub query_delay_ms: DelayRange,
    /// Pause after a query whose search fetch gave up
    pub failed_query_delay_ms: DelayRange,
    pub max_products_per_query: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: defaults::MAX_CONCURRENT_SOURCES,
            detail_concurrency: defaults::DETAIL_CONCURRENCY,
            detail_delay_ms: defaults::DETAIL_DELAY_MS,
            query_delay_ms: defaults::QUERY_DELAY_MS,
            failed_query_delay_ms: defaults::FAILED_QUERY_DELAY_MS,
            max_products_per_query: defaults::MAX_PRODUCTS_PER_QUERY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub queries_file: PathBuf,
    pub proxies_file: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            queries_file: PathBuf::from(defaults::QUERIES_FILE),
            proxies_file: PathBuf::from(defaults::PROXIES_FILE),
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
        }
    }
}

impl PathsConfig {
    /// Output file of one source run
    #[must_use]
    pub fn output_file_for(&self, source_name: &str) -> PathBuf {
        self.output_dir.join(format!("{source_name}_products.json"))
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,
    pub file_output: bool,

    /// Directory for log files; `logs/` next to the working directory when unset
    pub log_dir: Option<PathBuf>,

    /// "unified" (one `harvest.log`) or "timestamped" (one file per day)
    pub file_naming_strategy: String,

    /// Number of log files to keep; older files are deleted at startup
    pub max_files: u32,

    /// Extra per-target directives, e.g. `"reqwest": "debug"`
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            file_naming_strategy: "unified".to_string(),
            max_files: defaults::MAX_LOG_FILES,
            module_filters: HashMap::new(),
        }
    }
}

impl HarvestConfig {
    /// Loads configuration from `path` (required) or, when `None`, from the
    /// default location if it exists. Environment overrides always apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (label, policy) in [
            ("search", &self.retry_policies.search),
            ("detail", &self.retry_policies.detail),
        ] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::invalid(format!(
                    "retry_policies.{label}.max_attempts must be greater than 0"
                )));
            }
        }

        if self.http.max_requests_per_second == 0 {
            return Err(ConfigError::invalid("http.max_requests_per_second must be greater than 0"));
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::invalid("http.timeout_secs must be greater than 0"));
        }

        let pipeline = &self.pipeline;
        if pipeline.max_concurrent_sources == 0 || pipeline.detail_concurrency == 0 {
            return Err(ConfigError::invalid("worker counts must be greater than 0"));
        }
        if pipeline.max_products_per_query == 0 {
            return Err(ConfigError::invalid("pipeline.max_products_per_query must be greater than 0"));
        }
        for (label, range) in [
            ("detail_delay_ms", pipeline.detail_delay_ms),
            ("query_delay_ms", pipeline.query_delay_ms),
            ("failed_query_delay_ms", pipeline.failed_query_delay_ms),
        ] {
            if !range.is_valid() {
                return Err(ConfigError::invalid(format!(
                    "pipeline.{label}: min_ms cannot be greater than max_ms"
                )));
            }
        }

        if self.query_range.is_some_and(|range| range.start_id > range.end_id) {
            return Err(ConfigError::invalid("query_range.start_id cannot be greater than end_id"));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::invalid("source name cannot be empty"));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::invalid(format!("duplicate source name '{}'", source.name)));
            }
        }

        Ok(())
    }

    /// Sources selected by name; every source when `names` is empty
    pub fn select_sources(&self, names: &[String]) -> Result<Vec<JsonApiSourceConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self.sources.clone());
        }
        names
            .iter()
            .map(|name| {
                self.sources
                    .iter()
                    .find(|s| &s.name == name)
                    .cloned()
                    .ok_or_else(|| ConfigError::invalid(format!("unknown source '{name}'")))
            })
            .collect()
    }
}

/// `<config dir>/product-harvester/harvest.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(defaults::CONFIG_DIR_NAME).join(defaults::CONFIG_FILE_NAME))
}

/// Default configuration values
pub mod defaults {
    use crate::domain::DelayRange;

    pub const CONFIG_DIR_NAME: &str = "product-harvester";
    pub const CONFIG_FILE_NAME: &str = "harvest.toml";

    /// Default request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const MAX_REQUESTS_PER_SECOND: u32 = 5;

    /// Attempt budget for search fetches
    pub const SEARCH_MAX_ATTEMPTS: u32 = 10;
    /// Attempt budget for detail fetches
    pub const DETAIL_MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY_MS: u64 = 2000;
    /// Doublings after which the backoff stops growing
    pub const BACKOFF_CAP: u32 = 5;
    pub const RETRY_JITTER_MS: u64 = 2000;

    pub const MAX_CONCURRENT_SOURCES: usize = 2;
    pub const DETAIL_CONCURRENCY: usize = 1;
    pub const DETAIL_DELAY_MS: DelayRange = DelayRange::new(500, 1500);
    pub const QUERY_DELAY_MS: DelayRange = DelayRange::new(3000, 5000);
    pub const FAILED_QUERY_DELAY_MS: DelayRange = DelayRange::new(2000, 3000);
    pub const MAX_PRODUCTS_PER_QUERY: usize = 10;

    pub const QUERIES_FILE: &str = "keywords.json";
    pub const PROXIES_FILE: &str = "proxies.txt";
    pub const OUTPUT_DIR: &str = "scraped_data";

    pub const MAX_LOG_FILES: u32 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = HarvestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_policies.search.max_attempts, 10);
        assert_eq!(config.retry_policies.detail.max_attempts, 3);
        assert_eq!(config.pipeline.max_products_per_query, 10);
    }

    #[test]
    fn test_validation_rejects_zero_attempts_and_inverted_ranges() {
        let mut config = HarvestConfig::default();
        config.retry_policies.detail.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        let mut config = HarvestConfig::default();
        config.pipeline.query_delay_ms = DelayRange::new(10, 1);
        assert!(config.validate().is_err());

        let mut config = HarvestConfig::default();
        config.http.max_requests_per_second = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_source_names() {
        let mut config = HarvestConfig::default();
        let source = JsonApiSourceConfig::named("shop");
        config.sources = vec![source.clone(), source];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file_keeps_unset_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[http]
timeout_secs = 12

[pipeline]
detail_concurrency = 3

[query_range]
start_id = 421
end_id = 525

[[sources]]
name = "shop"
search_url_template = "https://api.example.com/search?q={{query}}"
"#
        )
        .unwrap();

        let config = HarvestConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.http.timeout_secs, 12);
        assert_eq!(config.http.max_requests_per_second, 5);
        assert_eq!(config.pipeline.detail_concurrency, 3);
        assert_eq!(config.query_range, Some(QueryRange::new(421, 525)));
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].name, "shop");
    }

    #[test]
    fn test_select_sources_by_name() {
        let mut config = HarvestConfig::default();
        config.sources = vec![JsonApiSourceConfig::named("a"), JsonApiSourceConfig::named("b")];
        assert_eq!(config.select_sources(&[]).unwrap().len(), 2);
        let picked = config.select_sources(&["b".to_string()]).unwrap();
        assert_eq!(picked[0].name, "b");
        assert!(config.select_sources(&["zzz".to_string()]).is_err());
    }

    #[test]
    fn test_output_file_naming() {
        let paths = PathsConfig::default();
        assert_eq!(
            paths.output_file_for("shop"),
            PathBuf::from("scraped_data").join("shop_products.json")
        );
    }
}
