//! Database connection management for the SurrealDB substrate.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: `mem://`, `rocksdb://path` or `ws://host:port`
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "scout".to_string(),
            database: "coordination".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for a shared SurrealDB server (requires remote feature).
    ///
    /// This is the only mode in which separate processes see the same store.
    pub fn remote(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `SCOUT_DB_ENDPOINT` (default: `mem://`)
    /// - `SCOUT_DB_NAMESPACE` (default: `scout`)
    /// - `SCOUT_DB_DATABASE` (default: `coordination`)
    /// - `SCOUT_DB_USER` / `SCOUT_DB_PASS` (optional, both required to sign in)
    pub fn from_env() -> Self {
        let mut config = match env_var("SCOUT_DB_ENDPOINT") {
            Some(endpoint) => Self::remote(endpoint),
            None => Self::memory(),
        };
        if let Some(namespace) = env_var("SCOUT_DB_NAMESPACE") {
            config = config.with_namespace(namespace);
        }
        if let Some(database) = env_var("SCOUT_DB_DATABASE") {
            config = config.with_database(database);
        }
        if let (Some(user), Some(pass)) = (env_var("SCOUT_DB_USER"), env_var("SCOUT_DB_PASS")) {
            config = config.with_credentials(user, pass);
        }
        config
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Errors raised by any shared-store substrate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Open a connection and select the namespace and database.
pub async fn open(config: &DbConfig) -> Result<Database, StoreError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect(&config.endpoint).await?;

    // Authenticate if credentials provided
    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }

    db.use_ns(&config.namespace).use_db(&config.database).await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}
