//! One-shot helpers that open, use and close their own connection.
//!
//! All of them are best-effort: failures are logged and turned into an
//! empty / `false` / `None` answer.

use crate::client::DatabaseClient;
use crate::value::{PgValue, ResultSet};

/// Whether the server answers `SELECT 1`.
pub fn check_connection<C: DatabaseClient>(client: &C, connection_string: &str) -> bool {
    client.test_connection(connection_string)
}

/// The server's `version()` banner.
pub fn database_version<C: DatabaseClient>(client: &C, connection_string: &str) -> Option<String> {
    client.get_database_version(connection_string)
}

/// Base tables in `schema`, ordered by name.
pub fn table_names<C: DatabaseClient>(
    client: &C,
    connection_string: &str,
    schema: &str,
) -> Vec<String> {
    let result = client.with_connection(connection_string, |client, conn| {
        client.execute_query(
            conn,
            "SELECT table_name::text \
             FROM information_schema.tables \
             WHERE table_schema::text = $1::text AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
            &[PgValue::from(schema)],
        )
    });

    match result {
        Ok(rows) => rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|value| match value {
                PgValue::Text(name) => Some(name),
                _ => None,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to get table names: {}", e);
            Vec::new()
        }
    }
}

/// Whether `schema.table` exists.
pub fn table_exists<C: DatabaseClient>(
    client: &C,
    connection_string: &str,
    table: &str,
    schema: &str,
) -> bool {
    let result = client.with_connection(connection_string, |client, conn| {
        client.execute_query(
            conn,
            "SELECT EXISTS (\
                SELECT 1 FROM information_schema.tables \
                WHERE table_schema::text = $1::text AND table_name::text = $2::text)",
            &[PgValue::from(schema), PgValue::from(table)],
        )
    });

    match result {
        Ok(rows) => rows
            .first()
            .and_then(|row| row.first())
            .and_then(PgValue::as_bool)
            .unwrap_or(false),
        Err(e) => {
            tracing::warn!("failed to check table existence: {}", e);
            false
        }
    }
}

/// Run one statement on a fresh connection. `None` on any failure.
pub fn execute_sql<C: DatabaseClient>(
    client: &C,
    connection_string: &str,
    query: &str,
    params: &[PgValue],
) -> Option<ResultSet> {
    client
        .with_connection(connection_string, |client, conn| {
            client.execute_query(conn, query, params)
        })
        .inspect_err(|e| tracing::warn!("failed to execute SQL: {}", e))
        .ok()
}

/// Major version from `"16.2"` or from a banner like
/// `"PostgreSQL 16.2 on x86_64-pc-linux-gnu, ..."`.
pub fn major_version(version: &str) -> Option<u32> {
    let version = version.trim();
    let version = version.strip_prefix("PostgreSQL ").unwrap_or(version);
    let digits: String = version.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
