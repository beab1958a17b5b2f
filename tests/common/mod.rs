//! Shared fixtures for integration tests: a seeded SQLite file opened
//! through the gate's own read-only pool.

#![allow(dead_code)]

use sqlgate::config::Config;
use sqlgate::db::{DbPool, QueryExecutor, SchemaCatalog};
use sqlgate::models::DatabaseType;
use sqlgate::mcp::GateService;
use sqlgate::tools::{QueryToolHandler, StatementGuard};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const SEED: &[&str] = &[
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT,
        active BOOLEAN NOT NULL DEFAULT 1,
        score REAL,
        avatar BLOB,
        prefs JSON
    )",
    "CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id),
        total NUMERIC NOT NULL,
        placed_at TEXT NOT NULL
    )",
    "INSERT INTO users (id, name, email, active, score, avatar, prefs) VALUES
        (1, 'ada', 'ada@example.com', 1, 9.5, X'CAFE', '{\"theme\":\"dark\"}'),
        (2, 'grace', 'grace@example.com', 0, 7.25, NULL, NULL),
        (3, 'edsger', NULL, 1, NULL, NULL, '[1,2]')",
    "INSERT INTO orders (id, user_id, total, placed_at) VALUES
        (10, 1, 19.99, '2024-01-05T10:00:00Z'),
        (11, 1, 5, '2024-02-01T08:30:00Z'),
        (12, 2, 120.5, '2024-03-11T17:45:00Z')",
];

/// A seeded database file plus the gate components built over it.
pub struct TestGate {
    _dir: TempDir,
    pub path: PathBuf,
    pub config: Config,
    pub pool: DbPool,
    pub catalog: Arc<SchemaCatalog>,
    pub query: QueryToolHandler,
}

impl TestGate {
    /// The URL the gate itself was opened with (read-only).
    pub fn url(&self) -> String {
        sqlite_url(&self.path)
    }

    pub fn service(&self) -> GateService {
        GateService::new(self.query.clone(), Arc::clone(&self.catalog))
    }

    /// A separate writable handle for changing the database under the gate.
    pub async fn writer(&self) -> SqlitePool {
        writable_pool(&self.path).await
    }
}

pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}", path.display())
}

pub async fn writable_pool(path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    SqlitePool::connect_with(options).await.unwrap()
}

/// Seed a fresh database file and open the gate over it with `config`
/// applied (its URL is replaced).
pub async fn gate_with(mut config: Config) -> TestGate {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.db");

    let setup = writable_pool(&path).await;
    for statement in SEED {
        sqlx::query(statement).execute(&setup).await.unwrap();
    }
    setup.close().await;

    config.database_url = sqlite_url(&path);
    config.validate().unwrap();

    let pool = DbPool::connect(&config.database_url, &config.pool_settings())
        .await
        .unwrap();
    let catalog = Arc::new(SchemaCatalog::new(pool.clone(), config.catalog_settings()));
    let query = QueryToolHandler::new(
        StatementGuard::new(DatabaseType::SQLite, config.guard_policy()),
        QueryExecutor::new(pool.clone(), config.executor_settings()),
    );

    TestGate {
        _dir: dir,
        path,
        config,
        pool,
        catalog,
        query,
    }
}

pub async fn gate() -> TestGate {
    gate_with(Config::for_url("sqlite:placeholder.db")).await
}
