//! Client over sqlx, whose operations only progress inside a tokio runtime.
//!
//! Each call resolves the calling thread's event loop from the client's
//! [`LoopRegistry`] and blocks on it. When the thread is already inside a
//! runtime, the registry moves the call to a one-off worker thread instead.

use super::{ClientKind, DatabaseClient};
use crate::error::{ClientError, ClientResult};
use crate::event_loop::{EventLoop, LoopRegistry};
use crate::value::{Bind, PgValue, ResultSet, Row};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, PgConnection, Postgres, Row as _, TypeInfo};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Non-blocking PostgreSQL client with a synchronous surface.
#[derive(Default)]
pub struct NonBlockingClient {
    loops: LoopRegistry,
}

/// Connection handle returned by [`NonBlockingClient::connect`].
///
/// Holds on to the loop its socket was registered with, so that loop
/// outlives the connection.
pub struct AsyncConnection {
    inner: Option<PgConnection>,
    home: Arc<EventLoop>,
}

impl AsyncConnection {
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl NonBlockingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-thread loops this client has created.
    pub fn loops(&self) -> &LoopRegistry {
        &self.loops
    }

    fn block_on<F, T>(&self, fut: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>> + Send,
        T: Send,
    {
        self.loops.block_on(fut)?
    }
}

impl DatabaseClient for NonBlockingClient {
    type Connection = AsyncConnection;

    fn kind(&self) -> ClientKind {
        ClientKind::NonBlocking
    }

    fn connect(&self, connection_string: &str) -> ClientResult<AsyncConnection> {
        let home = self.loops.current()?;
        let inner = self.block_on(async move {
            PgConnection::connect(connection_string)
                .await
                .map_err(|e| ClientError::Connection(e.to_string()))
        })?;

        tracing::debug!(thread = ?home.owner(), "non-blocking connection opened");
        Ok(AsyncConnection {
            inner: Some(inner),
            home,
        })
    }

    fn execute_query(
        &self,
        connection: &mut AsyncConnection,
        query: &str,
        params: &[PgValue],
    ) -> ClientResult<ResultSet> {
        let conn = connection.inner.as_mut().ok_or_else(ClientError::closed)?;

        let statement = match Bind::from_params(params) {
            Bind::None => sqlx::query(query),
            Bind::Scalar(value) => bind_value(sqlx::query(query), value),
            Bind::Positional(values) => values
                .iter()
                .fold(sqlx::query(query), |statement, value| bind_value(statement, value)),
        };

        self.block_on(async move {
            let rows = statement.fetch_all(&mut *conn).await.map_err(|e| {
                tracing::warn!("non-blocking query failed: {}", e);
                ClientError::QueryExecution(e.to_string())
            })?;
            rows.iter().map(decode_row).collect()
        })
    }

    fn close_connection(&self, connection: &mut AsyncConnection) -> ClientResult<()> {
        let Some(conn) = connection.inner.take() else {
            return Ok(());
        };

        self.block_on(async move {
            match conn.close().await {
                Ok(()) => Ok(()),
                // The server hung up first; nothing left to terminate.
                Err(sqlx::Error::Io(e)) => {
                    tracing::debug!("non-blocking connection already dropped by the server: {}", e);
                    Ok(())
                }
                Err(e) => Err(ClientError::Connection(e.to_string())),
            }
        })?;
        tracing::debug!(thread = ?connection.home.owner(), "non-blocking connection closed");
        Ok(())
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q PgValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        // Untyped NULLs go out as text.
        PgValue::Null => query.bind(None::<String>),
        PgValue::Bool(v) => query.bind(*v),
        PgValue::Int(v) => query.bind(*v),
        PgValue::Float(v) => query.bind(*v),
        PgValue::Numeric(v) => query.bind(*v),
        PgValue::Text(v) => query.bind(v.as_str()),
        PgValue::Bytes(v) => query.bind(v.clone()),
        PgValue::Uuid(v) => query.bind(*v),
        PgValue::Date(v) => query.bind(*v),
        PgValue::Timestamp(v) => query.bind(*v),
        PgValue::TimestampTz(v) => query.bind(*v),
        PgValue::Json(v) => query.bind(v.clone()),
        PgValue::IntArray(v) => query.bind(v.clone()),
        PgValue::TextArray(v) => query.bind(v.clone()),
    }
}

fn query_error(e: sqlx::Error) -> ClientError {
    ClientError::QueryExecution(e.to_string())
}

/// Convert a sqlx row into a plain row, column by column.
fn decode_row(row: &PgRow) -> ClientResult<Row> {
    row.columns()
        .iter()
        .map(|column| {
            let i = column.ordinal();
            let value = match column.type_info().name() {
                "BOOL" => row.try_get::<Option<bool>, _>(i).map(|v| v.map(PgValue::Bool)),
                "INT2" => row
                    .try_get::<Option<i16>, _>(i)
                    .map(|v| v.map(|v| PgValue::Int(v.into()))),
                "INT4" => row
                    .try_get::<Option<i32>, _>(i)
                    .map(|v| v.map(|v| PgValue::Int(v.into()))),
                "INT8" => row.try_get::<Option<i64>, _>(i).map(|v| v.map(PgValue::Int)),
                "OID" => row
                    .try_get::<Option<Oid>, _>(i)
                    .map(|v| v.map(|oid| PgValue::Int(oid.0.into()))),
                "FLOAT4" => row
                    .try_get::<Option<f32>, _>(i)
                    .map(|v| v.map(|v| PgValue::Float(v.into()))),
                "FLOAT8" => row.try_get::<Option<f64>, _>(i).map(|v| v.map(PgValue::Float)),
                "NUMERIC" => row
                    .try_get::<Option<Decimal>, _>(i)
                    .map(|v| v.map(PgValue::Numeric)),
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "UNKNOWN" => {
                    row.try_get::<Option<String>, _>(i).map(|v| v.map(PgValue::Text))
                }
                "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(i).map(|v| v.map(PgValue::Bytes)),
                "UUID" => row.try_get::<Option<Uuid>, _>(i).map(|v| v.map(PgValue::Uuid)),
                "DATE" => row
                    .try_get::<Option<NaiveDate>, _>(i)
                    .map(|v| v.map(PgValue::Date)),
                "TIMESTAMP" => row
                    .try_get::<Option<NaiveDateTime>, _>(i)
                    .map(|v| v.map(PgValue::Timestamp)),
                "TIMESTAMPTZ" => row
                    .try_get::<Option<DateTime<Utc>>, _>(i)
                    .map(|v| v.map(PgValue::TimestampTz)),
                "JSON" | "JSONB" => row
                    .try_get::<Option<serde_json::Value>, _>(i)
                    .map(|v| v.map(PgValue::Json)),
                "INT2[]" => row.try_get::<Option<Vec<i16>>, _>(i).map(|v| {
                    v.map(|v| PgValue::IntArray(v.into_iter().map(i64::from).collect()))
                }),
                "INT4[]" => row.try_get::<Option<Vec<i32>>, _>(i).map(|v| {
                    v.map(|v| PgValue::IntArray(v.into_iter().map(i64::from).collect()))
                }),
                "INT8[]" => row
                    .try_get::<Option<Vec<i64>>, _>(i)
                    .map(|v| v.map(PgValue::IntArray)),
                "TEXT[]" | "VARCHAR[]" | "NAME[]" => row
                    .try_get::<Option<Vec<String>>, _>(i)
                    .map(|v| v.map(PgValue::TextArray)),
                other => {
                    return Err(ClientError::QueryExecution(format!(
                        "unsupported column type: {}",
                        other
                    )));
                }
            };
            value
                .map(|v| v.unwrap_or(PgValue::Null))
                .map_err(query_error)
        })
        .collect()
}
