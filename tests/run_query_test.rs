//! End-to-end run_query tests against a seeded SQLite file.

mod common;

use common::{gate, gate_with};
use serde_json::json;
use sqlgate::config::Config;
use sqlgate::error::ErrorKind;
use sqlgate::tools::RunQueryInput;

async fn run(gate: &common::TestGate, input: RunQueryInput) -> sqlgate::tools::RunQueryOutput {
    gate.query.run_query(input).await
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_select_without_limit_gets_default_limit() {
    let gate = gate().await;
    let out = run(&gate, RunQueryInput::new("SELECT id, name FROM users")).await;

    assert!(out.ok, "{:?}", out);
    assert_eq!(
        out.executed_sql.as_deref(),
        Some("SELECT id, name FROM users LIMIT 100")
    );
    assert_eq!(out.columns, Some(vec!["id".to_string(), "name".to_string()]));
    assert_eq!(out.limit, Some(100));
    assert_eq!(out.limit_injected, Some(true));
    assert_eq!(out.row_count, Some(3));
}

#[tokio::test]
async fn test_delete_is_rejected_before_backend_contact() {
    let gate = gate().await;
    // a closed pool would answer PoolExhausted if it were contacted
    gate.pool.close().await;

    let out = run(&gate, RunQueryInput::new("DELETE FROM users WHERE id=1")).await;
    assert!(!out.ok);
    assert_eq!(out.error_kind, Some(ErrorKind::DisallowedStatementKind));
    assert!(out.rows.is_none());

    let writer = gate.writer().await;
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(&writer)
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_stacked_statement_is_rejected() {
    let gate = gate().await;
    let out = run(&gate, RunQueryInput::new("SELECT * FROM users; DROP TABLE users")).await;
    assert_eq!(out.error_kind, Some(ErrorKind::MultiStatementRejected));

    let out = run(&gate, RunQueryInput::new("SELECT COUNT(*) AS n FROM users")).await;
    assert_eq!(out.rows, Some(vec![vec![json!(3)]]));
}

#[tokio::test]
async fn test_limit_above_max_is_rejected() {
    let gate = gate().await;
    gate.pool.close().await;
    let out = run(&gate, RunQueryInput::new("SELECT * FROM users LIMIT 999999")).await;
    assert_eq!(out.error_kind, Some(ErrorKind::LimitExceeded));
    assert_eq!(out.fragment.as_deref(), Some("LIMIT 999999"));
}

#[tokio::test]
async fn test_digit_separated_limit_above_max_is_rejected() {
    let gate = gate().await;
    gate.pool.close().await;
    let out = run(
        &gate,
        RunQueryInput::new(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5000) SELECT x FROM n LIMIT 2_000",
        ),
    )
    .await;
    assert!(!out.ok);
    assert_eq!(out.error_kind, Some(ErrorKind::LimitExceeded), "{:?}", out);
    assert!(out.rows.is_none());
}

#[tokio::test]
async fn test_unknown_column_fails_preflight() {
    let gate = gate().await;
    let out = run(&gate, RunQueryInput::new("SELECT shoe_size FROM users")).await;
    assert!(!out.ok);
    assert_eq!(out.error_kind, Some(ErrorKind::ValidationError));
    assert!(
        out.message.as_deref().unwrap_or_default().contains("shoe_size"),
        "{:?}",
        out.message
    );
    assert!(out.rows.is_none());
    assert!(out.columns.is_none());
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test]
async fn test_non_select_statements_never_reach_backend() {
    let gate = gate().await;
    gate.pool.close().await;
    for sql in [
        "INSERT INTO users (id, name) VALUES (9, 'x')",
        "UPDATE users SET name = 'x'",
        "PRAGMA table_info(users)",
        "VACUUM",
        "ATTACH DATABASE 'other.db' AS other",
        "EXPLAIN SELECT 1",
        "VALUES (1)",
    ] {
        let out = run(&gate, RunQueryInput::new(sql)).await;
        assert_eq!(
            out.error_kind,
            Some(ErrorKind::DisallowedStatementKind),
            "{}",
            sql
        );
    }
}

#[tokio::test]
async fn test_mutating_keywords_after_select_are_rejected() {
    let gate = gate().await;
    gate.pool.close().await;
    for sql in [
        "SELECT * FROM users WHERE id IN (DELETE FROM users RETURNING id)",
        "WITH gone AS (DELETE FROM users RETURNING *) SELECT * FROM gone",
        "SELECT name INTO backup FROM users",
        "SELECT 1 UNION SELECT 2 FROM (SELECT 1) t WHERE 1 = 1 AND 'x' = 'x' -- ok\n AND EXISTS (SELECT 1 FROM users) GRANT",
    ] {
        let out = run(&gate, RunQueryInput::new(sql)).await;
        assert_eq!(
            out.error_kind,
            Some(ErrorKind::DisallowedStatementKind),
            "{}",
            sql
        );
    }
}

#[tokio::test]
async fn test_explicit_limit_within_max_is_preserved() {
    let gate = gate().await;
    let out = run(
        &gate,
        RunQueryInput::new("SELECT id FROM users ORDER BY id LIMIT 2"),
    )
    .await;
    assert_eq!(
        out.executed_sql.as_deref(),
        Some("SELECT id FROM users ORDER BY id LIMIT 2")
    );
    assert_eq!(out.limit, Some(2));
    assert_eq!(out.limit_injected, Some(false));
    assert_eq!(out.rows, Some(vec![vec![json!(1)], vec![json!(2)]]));
    assert_eq!(out.limit_reached, Some(true));
}

#[tokio::test]
async fn test_row_count_never_exceeds_limit() {
    let gate = gate_with(Config {
        default_limit: 2,
        ..Config::for_url("sqlite:placeholder.db")
    })
    .await;

    let out = run(&gate, RunQueryInput::new("SELECT id FROM users ORDER BY id")).await;
    assert_eq!(
        out.executed_sql.as_deref(),
        Some("SELECT id FROM users ORDER BY id LIMIT 2")
    );
    assert_eq!(out.row_count, Some(2));
    assert_eq!(out.limit_reached, Some(true));

    let out = run(
        &gate,
        RunQueryInput::new("SELECT id FROM users ORDER BY id").with_limit(5),
    )
    .await;
    assert_eq!(out.row_count, Some(3));
    assert_eq!(out.limit_reached, Some(false));
}

#[tokio::test]
async fn test_run_query_is_idempotent() {
    let gate = gate().await;
    let input = RunQueryInput::new("SELECT u.name, o.total FROM users u JOIN orders o ON o.user_id = u.id WHERE u.id = :id ORDER BY o.id")
        .with_param("id", 1);
    let first = run(&gate, input.clone()).await;
    let second = run(&gate, input).await;
    assert!(first.ok, "{:?}", first);
    assert_eq!(first.columns, second.columns);
    assert_eq!(first.rows, second.rows);
}

// =============================================================================
// Parameters and values
// =============================================================================

#[tokio::test]
async fn test_named_params_are_bound_not_interpolated() {
    let gate = gate().await;
    let out = run(
        &gate,
        RunQueryInput::new("SELECT id FROM users WHERE name = :name OR email = :name")
            .with_param("name", "ada' OR '1'='1"),
    )
    .await;
    assert!(out.ok, "{:?}", out);
    assert_eq!(out.row_count, Some(0));

    let out = run(
        &gate,
        RunQueryInput::new("SELECT id FROM users WHERE name = :name").with_param("name", "grace"),
    )
    .await;
    assert_eq!(out.rows, Some(vec![vec![json!(2)]]));
}

#[tokio::test]
async fn test_param_mismatch_is_validation_error() {
    let gate = gate().await;
    let out = run(&gate, RunQueryInput::new("SELECT id FROM users WHERE id = :id")).await;
    assert_eq!(out.error_kind, Some(ErrorKind::ValidationError));

    let out = run(
        &gate,
        RunQueryInput::new("SELECT id FROM users").with_param("unused", 1),
    )
    .await;
    assert_eq!(out.error_kind, Some(ErrorKind::ValidationError));
}

#[tokio::test]
async fn test_values_are_normalised_to_json() {
    let gate = gate().await;
    let out = run(
        &gate,
        RunQueryInput::new(
            "SELECT id, email, active, score, avatar, prefs FROM users ORDER BY id",
        ),
    )
    .await;
    assert!(out.ok, "{:?}", out);
    assert_eq!(
        out.rows,
        Some(vec![
            vec![
                json!(1),
                json!("ada@example.com"),
                json!(true),
                json!(9.5),
                json!("yv4="),
                json!("{\"theme\":\"dark\"}")
            ],
            vec![
                json!(2),
                json!("grace@example.com"),
                json!(false),
                json!(7.25),
                json!(null),
                json!(null)
            ],
            vec![
                json!(3),
                json!(null),
                json!(true),
                json!(null),
                json!(null),
                json!("[1,2]")
            ],
        ])
    );
}

#[tokio::test]
async fn test_empty_result_still_reports_columns() {
    let gate = gate().await;
    let out = run(
        &gate,
        RunQueryInput::new("SELECT id, total FROM orders WHERE total > :min").with_param("min", 1000),
    )
    .await;
    assert!(out.ok, "{:?}", out);
    assert_eq!(out.columns, Some(vec!["id".to_string(), "total".to_string()]));
    assert_eq!(out.row_count, Some(0));
    assert_eq!(out.limit_reached, Some(false));
}

#[tokio::test]
async fn test_success_json_shape() {
    let gate = gate().await;
    let out = run(&gate, RunQueryInput::new("SELECT 1 AS one")).await;
    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json["ok"], json!(true));
    assert_eq!(json["columns"], json!(["one"]));
    assert_eq!(json["rows"], json!([[1]]));
    assert_eq!(json["row_count"], json!(1));
    assert_eq!(json["executed_sql"], json!("SELECT 1 AS one LIMIT 100"));
    assert!(json.get("error_kind").is_none());
}

#[tokio::test]
async fn test_gate_connection_is_read_only() {
    let gate = gate().await;
    let sqlgate::db::DbPool::SQLite(pool) = &gate.pool else {
        panic!("expected SQLite pool");
    };
    let write = sqlx::query("DELETE FROM users").execute(pool).await;
    assert!(write.is_err());
}
