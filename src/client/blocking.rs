//! Client over rust-postgres, which is already synchronous.
//!
//! Every operation is one call into the driver. The driver spins a private
//! runtime internally, so calls made from inside an async context are moved
//! off the runtime thread first.
//!
//! Parameters take the type the server infers for them. Where the server can
//! only say "text" (`SELECT $1`), the statement is prepared again with the
//! value's own type, which is the type the non-blocking driver declares.

use super::{ClientKind, DatabaseClient};
use crate::error::{ClientError, ClientResult};
use crate::event_loop::run_outside_loop;
use crate::value::{Bind, PgValue, ResultSet, Row};

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres::error::SqlState;
use postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use postgres::{Client as PgClient, NoTls};
use rust_decimal::Decimal;
use std::error::Error;
use std::io;
use uuid::Uuid;

/// Blocking PostgreSQL client.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingClient;

/// Connection handle returned by [`BlockingClient::connect`].
pub struct BlockingConnection {
    client: Option<PgClient>,
}

impl BlockingConnection {
    /// Closed by the caller, or dropped by the server.
    pub fn is_closed(&self) -> bool {
        self.client.as_ref().is_none_or(PgClient::is_closed)
    }
}

impl Drop for BlockingConnection {
    fn drop(&mut self) {
        // The driver's own drop blocks on its runtime.
        if let Some(client) = self.client.take() {
            if let Err(e) = run_outside_loop(move || drop(client)) {
                tracing::warn!("failed to release blocking connection: {}", e);
            }
        }
    }
}

impl BlockingClient {
    pub fn new() -> Self {
        Self
    }
}

impl DatabaseClient for BlockingClient {
    type Connection = BlockingConnection;

    fn kind(&self) -> ClientKind {
        ClientKind::Blocking
    }

    fn connect(&self, connection_string: &str) -> ClientResult<BlockingConnection> {
        let client = run_outside_loop(|| PgClient::connect(connection_string, NoTls))?
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        tracing::debug!("blocking connection opened");
        Ok(BlockingConnection {
            client: Some(client),
        })
    }

    fn execute_query(
        &self,
        connection: &mut BlockingConnection,
        query: &str,
        params: &[PgValue],
    ) -> ClientResult<ResultSet> {
        let client = connection.client.as_mut().ok_or_else(ClientError::closed)?;
        let bind = Bind::from_params(params);

        run_outside_loop(move || {
            let mut statement = client.prepare(query).map_err(query_error)?;
            if let Some(types) = declared_types(statement.params(), bind.values()) {
                statement = client.prepare_typed(query, &types).map_err(query_error)?;
            }

            let args: Vec<&(dyn ToSql + Sync)> = match bind {
                Bind::None => Vec::new(),
                Bind::Scalar(value) => vec![value as &(dyn ToSql + Sync)],
                Bind::Positional(values) => {
                    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
                }
            };

            // Not a row-returning statement: run it, report no rows.
            if statement.columns().is_empty() {
                client.execute(&statement, &args).map_err(query_error)?;
                return Ok(Vec::new());
            }

            let rows = client.query(&statement, &args).map_err(query_error)?;
            rows.iter().map(decode_row).collect()
        })?
    }

    fn close_connection(&self, connection: &mut BlockingConnection) -> ClientResult<()> {
        let Some(client) = connection.client.take() else {
            return Ok(());
        };
        if client.is_closed() {
            return Ok(());
        }

        match run_outside_loop(move || client.close())? {
            Ok(()) => tracing::debug!("blocking connection closed"),
            // The server hung up first; the socket only notices now.
            Err(e) if is_disconnect(&e) => {
                tracing::debug!("blocking connection already dropped by the server: {}", e)
            }
            Err(e) => return Err(ClientError::Connection(e.to_string())),
        }
        Ok(())
    }
}

fn is_disconnect(e: &postgres::Error) -> bool {
    e.is_closed()
        || e.code() == Some(&SqlState::ADMIN_SHUTDOWN)
        || e
            .source()
            .is_some_and(|source| source.downcast_ref::<io::Error>().is_some())
}

/// The type a value declares on its own, if it has one.
///
/// `Null` and text take whatever the statement says.
fn natural_type(value: &PgValue) -> Option<Type> {
    let ty = match value {
        PgValue::Null | PgValue::Text(_) => return None,
        PgValue::Bool(_) => Type::BOOL,
        PgValue::Int(_) => Type::INT8,
        PgValue::Float(_) => Type::FLOAT8,
        PgValue::Numeric(_) => Type::NUMERIC,
        PgValue::Bytes(_) => Type::BYTEA,
        PgValue::Uuid(_) => Type::UUID,
        PgValue::Date(_) => Type::DATE,
        PgValue::Timestamp(_) => Type::TIMESTAMP,
        PgValue::TimestampTz(_) => Type::TIMESTAMPTZ,
        PgValue::Json(_) => Type::JSONB,
        PgValue::IntArray(_) => Type::INT8_ARRAY,
        PgValue::TextArray(_) => Type::TEXT_ARRAY,
    };
    Some(ty)
}

/// Parameter types to prepare with, or `None` when the inferred ones fit.
///
/// Only parameters the server typed as text or unknown are overridden; the
/// rest are left as `UNKNOWN` so the server infers them again.
fn declared_types(inferred: &[Type], values: &[PgValue]) -> Option<Vec<Type>> {
    if inferred.len() != values.len() {
        return None;
    }

    let types: Vec<Type> = inferred
        .iter()
        .zip(values)
        .map(|(ty, value)| match natural_type(value) {
            Some(natural) if matches!(*ty, Type::TEXT | Type::UNKNOWN) => natural,
            _ => Type::UNKNOWN,
        })
        .collect();

    types.iter().any(|ty| *ty != Type::UNKNOWN).then_some(types)
}

fn query_error(e: postgres::Error) -> ClientError {
    ClientError::QueryExecution(e.to_string())
}

fn decode_row(row: &postgres::Row) -> ClientResult<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| decode_column(row, i, column.type_()))
        .collect()
}

fn decode_column(row: &postgres::Row, i: usize, ty: &Type) -> ClientResult<PgValue> {
    fn get<'a, T: postgres::types::FromSql<'a>>(
        row: &'a postgres::Row,
        i: usize,
    ) -> ClientResult<Option<T>> {
        row.try_get::<_, Option<T>>(i).map_err(query_error)
    }

    let value = match *ty {
        Type::BOOL => get::<bool>(row, i)?.map(PgValue::Bool),
        Type::INT2 => get::<i16>(row, i)?.map(|v| PgValue::Int(v.into())),
        Type::INT4 => get::<i32>(row, i)?.map(|v| PgValue::Int(v.into())),
        Type::INT8 => get::<i64>(row, i)?.map(PgValue::Int),
        Type::OID => get::<u32>(row, i)?.map(|v| PgValue::Int(v.into())),
        Type::FLOAT4 => get::<f32>(row, i)?.map(|v| PgValue::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, i)?.map(PgValue::Float),
        Type::NUMERIC => get::<Decimal>(row, i)?.map(PgValue::Numeric),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, i)?.map(PgValue::Text)
        }
        Type::BYTEA => get::<Vec<u8>>(row, i)?.map(PgValue::Bytes),
        Type::UUID => get::<Uuid>(row, i)?.map(PgValue::Uuid),
        Type::DATE => get::<NaiveDate>(row, i)?.map(PgValue::Date),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, i)?.map(PgValue::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, i)?.map(PgValue::TimestampTz),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, i)?.map(PgValue::Json),
        Type::INT2_ARRAY => get::<Vec<i16>>(row, i)?
            .map(|v| PgValue::IntArray(v.into_iter().map(i64::from).collect())),
        Type::INT4_ARRAY => get::<Vec<i32>>(row, i)?
            .map(|v| PgValue::IntArray(v.into_iter().map(i64::from).collect())),
        Type::INT8_ARRAY => get::<Vec<i64>>(row, i)?.map(PgValue::IntArray),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            get::<Vec<String>>(row, i)?.map(PgValue::TextArray)
        }
        _ => {
            return Err(ClientError::QueryExecution(format!(
                "unsupported column type: {}",
                ty.name()
            )));
        }
    };

    Ok(value.unwrap_or(PgValue::Null))
}

/// Encode `value` as `T` if the server's parameter type takes a `T`.
fn encode_as<T: ToSql>(
    value: T,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    if T::accepts(ty) {
        value.to_sql(ty, out)
    } else {
        Err(format!(
            "cannot bind {} to a parameter of type {}",
            std::any::type_name::<T>(),
            ty
        )
        .into())
    }
}

impl ToSql for PgValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => encode_as(*v, ty, out),
            PgValue::Int(v) => match *ty {
                Type::INT2 => encode_as(i16::try_from(*v)?, ty, out),
                Type::INT4 => encode_as(i32::try_from(*v)?, ty, out),
                Type::OID => encode_as(u32::try_from(*v)?, ty, out),
                Type::FLOAT4 => encode_as(*v as f32, ty, out),
                Type::FLOAT8 => encode_as(*v as f64, ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                    encode_as(v.to_string(), ty, out)
                }
                _ => encode_as(*v, ty, out),
            },
            PgValue::Float(v) => match *ty {
                Type::FLOAT4 => encode_as(*v as f32, ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::UNKNOWN => {
                    encode_as(v.to_string(), ty, out)
                }
                _ => encode_as(*v, ty, out),
            },
            PgValue::Numeric(v) => match *ty {
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::UNKNOWN => {
                    encode_as(v.to_string(), ty, out)
                }
                _ => encode_as(*v, ty, out),
            },
            PgValue::Text(v) => encode_as(v.as_str(), ty, out),
            PgValue::Bytes(v) => encode_as(v.as_slice(), ty, out),
            PgValue::Uuid(v) => encode_as(*v, ty, out),
            PgValue::Date(v) => encode_as(*v, ty, out),
            PgValue::Timestamp(v) => encode_as(*v, ty, out),
            PgValue::TimestampTz(v) => encode_as(*v, ty, out),
            PgValue::Json(v) => encode_as(v, ty, out),
            PgValue::IntArray(v) => match *ty {
                Type::INT2_ARRAY => {
                    let narrowed = v
                        .iter()
                        .map(|i| i16::try_from(*i))
                        .collect::<Result<Vec<_>, _>>()?;
                    encode_as(narrowed, ty, out)
                }
                Type::INT4_ARRAY => {
                    let narrowed = v
                        .iter()
                        .map(|i| i32::try_from(*i))
                        .collect::<Result<Vec<_>, _>>()?;
                    encode_as(narrowed, ty, out)
                }
                _ => encode_as(v.as_slice(), ty, out),
            },
            PgValue::TextArray(v) => encode_as(v.as_slice(), ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Checked per value in `to_sql`.
        true
    }

    to_sql_checked!();
}
