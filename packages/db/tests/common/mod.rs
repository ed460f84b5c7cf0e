use std::sync::atomic::{AtomicUsize, Ordering};

use scout_db::{DbConfig, StoreError, SurrealStore};

static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

/// A fresh in-memory SurrealDB store with its own database.
pub async fn surreal_store() -> Result<SurrealStore, StoreError> {
    let n = NEXT_DB.fetch_add(1, Ordering::SeqCst);
    let config = DbConfig::memory().with_database(format!("test_{}", n));
    SurrealStore::connect(&config).await
}
