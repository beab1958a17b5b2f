//! Schema Catalog cache.
//!
//! Process-wide cache of [`SchemaDescriptor`] snapshots, keyed by schema
//! filter. Entries are built lazily on first use and replaced after the TTL
//! or an explicit refresh.
//!
//! # Concurrency
//!
//! - **`OnceCell` per key**: concurrent lookups of a missing or expired entry
//!   collapse into one catalog fetch; every waiter gets the same result.
//! - A failed fetch leaves the cell empty, so the next caller retries.
//! - Expiry and refresh swap in a fresh cell only when the current one is
//!   populated, and only if no other task swapped it first. Concurrent
//!   refreshes therefore still share a single fetch.
//! - The map lock is never held across a fetch.

use crate::db::pool::DbPool;
use crate::db::schema::SchemaInspector;
use crate::error::GateResult;
use crate::models::SchemaDescriptor;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

/// Cache lifetime and size caps for described schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSettings {
    pub ttl: Duration,
    pub max_tables: usize,
    pub max_columns: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_tables: 40,
            max_columns: 60,
        }
    }
}

/// Immutable view of one cached description.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub schema: Arc<SchemaDescriptor>,
    /// When the catalog was read
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CatalogEntry {
    snapshot: CatalogSnapshot,
    loaded: Instant,
}

/// `None` describes every visible schema.
type SchemaKey = Option<String>;

type EntryCell = Arc<OnceCell<CatalogEntry>>;

#[derive(Debug)]
pub struct SchemaCatalog {
    pool: DbPool,
    settings: CatalogSettings,
    entries: RwLock<HashMap<SchemaKey, EntryCell>>,
    fetches: AtomicU64,
}

impl SchemaCatalog {
    pub fn new(pool: DbPool, settings: CatalogSettings) -> Self {
        Self {
            pool,
            settings,
            entries: RwLock::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    /// Catalog reads performed so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Acquire)
    }

    /// Describe `schema` (or every schema), from cache when fresh.
    pub async fn describe(&self, schema: Option<&str>) -> GateResult<CatalogSnapshot> {
        let key: SchemaKey = schema.map(str::to_string);
        let cell = self.live_cell(&key).await;

        let entry = cell
            .get_or_try_init(|| async {
                self.fetches.fetch_add(1, Ordering::AcqRel);
                let descriptor = SchemaInspector::describe(&self.pool, schema)
                    .await?
                    .capped(self.settings.max_tables, self.settings.max_columns);
                debug!(
                    schema = schema.unwrap_or("*"),
                    tables = descriptor.tables.len(),
                    truncated = descriptor.truncated,
                    "Schema catalog entry loaded"
                );
                Ok::<_, crate::error::GateError>(CatalogEntry {
                    snapshot: CatalogSnapshot {
                        schema: Arc::new(descriptor),
                        cached_at: Utc::now(),
                    },
                    loaded: Instant::now(),
                })
            })
            .await?;

        Ok(entry.snapshot.clone())
    }

    /// Drop the cached entry for `schema`; the next describe reads the
    /// catalog again.
    pub async fn invalidate(&self, schema: Option<&str>) {
        let key: SchemaKey = schema.map(str::to_string);
        let mut entries = self.entries.write().await;
        if let Some(cell) = entries.get(&key) {
            if cell.initialized() {
                entries.insert(key, Arc::new(OnceCell::new()));
                info!(schema = schema.unwrap_or("*"), "Schema catalog entry invalidated");
            }
        }
    }

    /// Drop every cached entry.
    pub async fn invalidate_all(&self) {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        info!(entries = count, "Schema catalog cleared");
    }

    /// Invalidate then describe.
    pub async fn refresh(&self, schema: Option<&str>) -> GateResult<CatalogSnapshot> {
        self.invalidate(schema).await;
        self.describe(schema).await
    }

    /// Cell for `key`, replacing an expired one.
    async fn live_cell(&self, key: &SchemaKey) -> EntryCell {
        {
            let entries = self.entries.read().await;
            if let Some(cell) = entries.get(key) {
                if !self.is_expired(cell) {
                    return Arc::clone(cell);
                }
            }
        }

        let mut entries = self.entries.write().await;
        // Re-check after acquiring write lock
        if let Some(cell) = entries.get(key).filter(|cell| !self.is_expired(cell)) {
            return Arc::clone(cell);
        }
        let cell: EntryCell = Arc::new(OnceCell::new());
        entries.insert(key.clone(), Arc::clone(&cell));
        cell
    }

    fn is_expired(&self, cell: &EntryCell) -> bool {
        cell.get()
            .is_some_and(|entry| entry.loaded.elapsed() >= self.settings.ttl)
    }
}
