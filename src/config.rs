use crate::reconcile::models::BatchSettings;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Vector index settings; required by namespace procedures
    pub vector_store: Option<VectorStoreConfig>,

    /// Record table settings; required by user-record procedures
    pub table_store: Option<TableStoreConfig>,

    /// Batch sizing and pacing for mutations
    pub batch: BatchSettings,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

/// How the vector index enumerates a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListMode {
    /// Native paginated id listing
    Native,
    /// Overlapping similarity queries; approximate
    QuerySweep,
}

impl FromStr for ListMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" | "list" => Ok(ListMode::Native),
            "query-sweep" | "query_sweep" | "sweep" => Ok(ListMode::QuerySweep),
            _ => Err(format!("Invalid list mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Index host, e.g. https://coach-memories-abc123.svc.pinecone.io
    pub base_url: String,

    /// Passed through verbatim as the `Api-Key` header
    #[serde(skip_serializing)]
    pub api_key: String,

    pub list_mode: ListMode,

    /// Ids per list page, or top-k per sweep query
    pub page_size: usize,

    /// Number of probe queries used by the sweep
    pub sweep_queries: usize,

    /// Probe dimension; read from index stats when unset
    pub dimension: Option<usize>,

    /// Metadata field holding the duplicate group key
    pub group_key_field: String,

    /// Metadata field holding the record category
    pub category_field: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStoreConfig {
    /// PostgreSQL connection URL
    #[serde(skip_serializing)]
    pub database_url: String,

    /// Record table name; must be a plain SQL identifier
    pub table: String,

    pub max_connections: u32,

    /// Rows per keyset page
    pub page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vector_store: None,
            table_store: None,
            batch: BatchSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl VectorStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: String::new(),
            list_mode: ListMode::Native,
            page_size: 100,
            sweep_queries: 8,
            dimension: None,
            group_key_field: "memory".to_string(),
            category_field: "type".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl TableStoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            table: "user_records".to_string(),
            max_connections: 5,
            page_size: 500,
        }
    }
}

impl Config {
    /// Load configuration from the environment, reading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Config::default();

        if let Ok(base_url) = env::var("VECTOR_STORE_URL") {
            let mut vector = VectorStoreConfig::new(base_url);
            if let Ok(api_key) = env::var("VECTOR_STORE_API_KEY") {
                vector.api_key = api_key;
            }
            if let Ok(mode) = env::var("VECTOR_STORE_LIST_MODE") {
                vector.list_mode = mode
                    .parse()
                    .map_err(|e| anyhow::anyhow!("VECTOR_STORE_LIST_MODE: {e}"))?;
            }
            if let Some(page_size) = parse_var("VECTOR_STORE_PAGE_SIZE")? {
                vector.page_size = page_size;
            }
            if let Some(queries) = parse_var("VECTOR_STORE_SWEEP_QUERIES")? {
                vector.sweep_queries = queries;
            }
            vector.dimension = parse_var("VECTOR_STORE_DIMENSION")?;
            if let Ok(field) = env::var("VECTOR_GROUP_KEY_FIELD") {
                vector.group_key_field = field;
            }
            if let Ok(field) = env::var("VECTOR_CATEGORY_FIELD") {
                vector.category_field = field;
            }
            if let Some(timeout) = parse_var("VECTOR_STORE_TIMEOUT_SECONDS")? {
                vector.timeout_seconds = timeout;
            }
            config.vector_store = Some(vector);
        }

        if let Ok(database_url) = env::var("DATABASE_URL") {
            let mut table = TableStoreConfig::new(database_url);
            if let Ok(name) = env::var("RECORD_TABLE") {
                table.table = name;
            }
            if let Some(max) = parse_var("DB_MAX_CONNECTIONS")? {
                table.max_connections = max;
            }
            if let Some(page_size) = parse_var("TABLE_PAGE_SIZE")? {
                table.page_size = page_size;
            }
            config.table_store = Some(table);
        }

        if let Some(batch_size) = parse_var("BATCH_SIZE")? {
            config.batch.batch_size = batch_size;
        }
        if let Some(delay) = parse_var("INTER_BATCH_DELAY_MS")? {
            config.batch.inter_batch_delay_ms = delay;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides for batch settings.
    pub fn with_batch_overrides(mut self, batch_size: Option<usize>, delay_ms: Option<u64>) -> Result<Self> {
        if let Some(batch_size) = batch_size {
            self.batch.batch_size = batch_size;
        }
        if let Some(delay_ms) = delay_ms {
            self.batch.inter_batch_delay_ms = delay_ms;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.batch_size == 0 {
            return Err(anyhow::anyhow!("Batch size must be greater than 0"));
        }

        if let Some(vector) = &self.vector_store {
            url::Url::parse(&vector.base_url)
                .map_err(|e| anyhow::anyhow!("Invalid vector store URL '{}': {e}", vector.base_url))?;
            if vector.page_size == 0 {
                return Err(anyhow::anyhow!("Vector store page size must be greater than 0"));
            }
            if vector.list_mode == ListMode::QuerySweep && vector.sweep_queries == 0 {
                return Err(anyhow::anyhow!("Query sweep needs at least one query"));
            }
            if vector.dimension == Some(0) {
                return Err(anyhow::anyhow!("Vector dimension must be greater than 0"));
            }
        }

        if let Some(table) = &self.table_store {
            if !table.database_url.starts_with("postgres://")
                && !table.database_url.starts_with("postgresql://")
            {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must start with postgres:// or postgresql://"
                ));
            }
            if table.page_size == 0 {
                return Err(anyhow::anyhow!("Table page size must be greater than 0"));
            }
            if table.max_connections == 0 {
                return Err(anyhow::anyhow!("Max connections must be greater than 0"));
            }
        }

        Ok(())
    }

    pub fn require_vector_store(&self) -> Result<&VectorStoreConfig> {
        self.vector_store
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("VECTOR_STORE_URL is required for this command"))
    }

    pub fn require_table_store(&self) -> Result<&TableStoreConfig> {
        self.table_store
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for this command"))
    }

    /// Database URL with the password masked, for logs.
    pub fn safe_database_url(&self) -> Option<String> {
        self.table_store.as_ref().map(|t| mask_password(&t.database_url))
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {name} '{value}': {e}")),
        Err(_) => Ok(None),
    }
}

fn mask_password(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => database_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "VECTOR_STORE_URL",
        "VECTOR_STORE_API_KEY",
        "VECTOR_STORE_LIST_MODE",
        "VECTOR_STORE_PAGE_SIZE",
        "VECTOR_STORE_SWEEP_QUERIES",
        "VECTOR_STORE_DIMENSION",
        "DATABASE_URL",
        "RECORD_TABLE",
        "BATCH_SIZE",
        "INTER_BATCH_DELAY_MS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.batch.batch_size, 100);
        assert_eq!(config.batch.inter_batch_delay_ms, 1000);
        assert!(config.vector_store.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.batch.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.table_store = Some(TableStoreConfig::new("mysql://localhost/db"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        let mut vector = VectorStoreConfig::new("https://index.example.com");
        vector.list_mode = ListMode::QuerySweep;
        vector.sweep_queries = 0;
        config.vector_store = Some(vector);
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("VECTOR_STORE_URL", "https://index.example.com");
        env::set_var("VECTOR_STORE_LIST_MODE", "query-sweep");
        env::set_var("VECTOR_STORE_DIMENSION", "1536");
        env::set_var("BATCH_SIZE", "50");

        let config = Config::from_env().unwrap();
        let vector = config.require_vector_store().unwrap();
        assert_eq!(vector.list_mode, ListMode::QuerySweep);
        assert_eq!(vector.dimension, Some(1536));
        assert_eq!(config.batch.batch_size, 50);
        assert!(config.require_table_store().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_numbers() {
        clear_env();
        env::set_var("INTER_BATCH_DELAY_MS", "soon");
        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_batch_overrides() {
        let config = Config::default().with_batch_overrides(Some(25), Some(0)).unwrap();
        assert_eq!(config.batch.batch_size, 25);
        assert_eq!(config.batch.inter_batch_delay_ms, 0);
        assert!(Config::default().with_batch_overrides(Some(0), None).is_err());
    }

    #[test]
    fn test_safe_database_url() {
        let mut config = Config::default();
        config.table_store = Some(TableStoreConfig::new("postgresql://coach:hunter2@db:5432/app"));
        let masked = config.safe_database_url().unwrap();
        assert!(!masked.contains("hunter2"));
        assert!(masked.contains("***"));
    }
}
