//! The synchronous client contract and the factory that picks a driver.
//!
//! Two implementations sit behind [`DatabaseClient`]:
//! - `blocking.rs` - rust-postgres, which already runs synchronously
//! - `nonblocking.rs` - sqlx, bridged through per-thread event loops
//!
//! Callers drive a client through connect → (execute/test/version)* → close.
//! Connection handles are owned by the caller; clients keep no per-connection
//! state, so several connections can be used through one client.

#[cfg(feature = "blocking")]
mod blocking;
#[cfg(feature = "nonblocking")]
mod nonblocking;

#[cfg(feature = "blocking")]
pub use blocking::{BlockingClient, BlockingConnection};
#[cfg(feature = "nonblocking")]
pub use nonblocking::{AsyncConnection, NonBlockingClient};

use crate::error::{ClientError, ClientResult};
use crate::value::{PgValue, ResultSet};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// The operations every client supports, with identical semantics
/// regardless of the driver behind it.
pub trait DatabaseClient {
    /// Caller-owned connection handle.
    type Connection;

    /// Which driver backs this client.
    fn kind(&self) -> ClientKind;

    /// Open a new connection.
    ///
    /// Fails with [`ClientError::Connection`] if the server is unreachable
    /// or rejects authentication.
    fn connect(&self, connection_string: &str) -> ClientResult<Self::Connection>;

    /// Run one statement and return its rows.
    ///
    /// Statements without a tabular result (DDL, DML without RETURNING)
    /// return an empty result set.
    fn execute_query(
        &self,
        connection: &mut Self::Connection,
        query: &str,
        params: &[PgValue],
    ) -> ClientResult<ResultSet>;

    /// Release the connection. Closing an already-closed handle is a no-op.
    fn close_connection(&self, connection: &mut Self::Connection) -> ClientResult<()>;

    /// Open a connection, run `f` on it, and close it on every path.
    ///
    /// The error from `f` wins over an error from closing.
    fn with_connection<T, F>(&self, connection_string: &str, f: F) -> ClientResult<T>
    where
        Self: Sized,
        F: FnOnce(&Self, &mut Self::Connection) -> ClientResult<T>,
    {
        let mut connection = self.connect(connection_string)?;
        let result = f(self, &mut connection);
        let closed = self.close_connection(&mut connection);
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Connect, run `SELECT 1`, and check the answer is a single `1`.
    ///
    /// Never fails: any error is logged and reported as `false`.
    fn test_connection(&self, connection_string: &str) -> bool
    where
        Self: Sized,
    {
        let result = self.with_connection(connection_string, |client, conn| {
            client.execute_query(conn, "SELECT 1", &[])
        });

        match result {
            Ok(rows) => matches!(rows.as_slice(), [row] if row.as_slice() == [PgValue::Int(1)]),
            Err(e) => {
                tracing::warn!(client = %self.kind(), "connection test failed: {}", e);
                false
            }
        }
    }

    /// The server's `version()` banner, or `None` if it cannot be fetched.
    fn get_database_version(&self, connection_string: &str) -> Option<String>
    where
        Self: Sized,
    {
        let result = self.with_connection(connection_string, |client, conn| {
            client.execute_query(conn, "SELECT version()", &[])
        });

        match result {
            Ok(rows) => rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .and_then(|value| match value {
                    PgValue::Text(version) => Some(version),
                    _ => None,
                }),
            Err(e) => {
                tracing::warn!(client = %self.kind(), "failed to get database version: {}", e);
                None
            }
        }
    }
}

/// Driver selection for the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum ClientKind {
    /// Blocking if available, otherwise non-blocking.
    #[default]
    Auto,
    /// rust-postgres.
    Blocking,
    /// sqlx on tokio.
    NonBlocking,
}

impl FromStr for ClientKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ClientKind::Auto),
            "blocking" | "postgres" => Ok(ClientKind::Blocking),
            "nonblocking" | "non-blocking" | "sqlx" => Ok(ClientKind::NonBlocking),
            _ => Err(ClientError::UnsupportedClient(s.to_string())),
        }
    }
}

impl TryFrom<String> for ClientKind {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKind::Auto => write!(f, "auto"),
            ClientKind::Blocking => write!(f, "blocking"),
            ClientKind::NonBlocking => write!(f, "nonblocking"),
        }
    }
}

/// A client chosen at runtime.
pub enum Client {
    #[cfg(feature = "blocking")]
    Blocking(BlockingClient),
    #[cfg(feature = "nonblocking")]
    NonBlocking(NonBlockingClient),
}

/// A connection opened through [`Client`].
pub enum Connection {
    #[cfg(feature = "blocking")]
    Blocking(BlockingConnection),
    #[cfg(feature = "nonblocking")]
    NonBlocking(AsyncConnection),
}

impl Connection {
    pub fn is_closed(&self) -> bool {
        match *self {
            #[cfg(feature = "blocking")]
            Connection::Blocking(ref conn) => conn.is_closed(),
            #[cfg(feature = "nonblocking")]
            Connection::NonBlocking(ref conn) => conn.is_closed(),
        }
    }
}

fn foreign_connection() -> ClientError {
    ClientError::QueryExecution("connection was opened by a different client type".to_string())
}

impl Client {
    /// Construct the requested client.
    ///
    /// `Auto` prefers the blocking driver and falls back to the non-blocking
    /// one. A driver that was not compiled in yields
    /// [`ClientError::MissingDriver`].
    pub fn new(kind: ClientKind) -> ClientResult<Self> {
        match kind {
            ClientKind::Blocking => Self::blocking(),
            ClientKind::NonBlocking => Self::nonblocking(),
            ClientKind::Auto => match Self::blocking() {
                Err(ClientError::MissingDriver { .. }) => {
                    Self::nonblocking().map_err(|e| match e {
                        ClientError::MissingDriver { .. } => ClientError::no_driver(),
                        other => other,
                    })
                }
                other => other,
            },
        }
    }

    fn blocking() -> ClientResult<Self> {
        #[cfg(feature = "blocking")]
        {
            Ok(Client::Blocking(BlockingClient::new()))
        }
        #[cfg(not(feature = "blocking"))]
        {
            Err(ClientError::missing(
                "postgres",
                "rebuild with the `blocking` feature",
            ))
        }
    }

    fn nonblocking() -> ClientResult<Self> {
        #[cfg(feature = "nonblocking")]
        {
            Ok(Client::NonBlocking(NonBlockingClient::new()))
        }
        #[cfg(not(feature = "nonblocking"))]
        {
            Err(ClientError::missing(
                "sqlx",
                "rebuild with the `nonblocking` feature",
            ))
        }
    }
}

impl DatabaseClient for Client {
    type Connection = Connection;

    fn kind(&self) -> ClientKind {
        match *self {
            #[cfg(feature = "blocking")]
            Client::Blocking(ref client) => client.kind(),
            #[cfg(feature = "nonblocking")]
            Client::NonBlocking(ref client) => client.kind(),
        }
    }

    fn connect(&self, connection_string: &str) -> ClientResult<Connection> {
        match *self {
            #[cfg(feature = "blocking")]
            Client::Blocking(ref client) => client.connect(connection_string).map(Connection::Blocking),
            #[cfg(feature = "nonblocking")]
            Client::NonBlocking(ref client) => client
                .connect(connection_string)
                .map(Connection::NonBlocking),
        }
    }

    #[allow(unreachable_patterns)]
    fn execute_query(
        &self,
        connection: &mut Connection,
        query: &str,
        params: &[PgValue],
    ) -> ClientResult<ResultSet> {
        match *self {
            #[cfg(feature = "blocking")]
            Client::Blocking(ref client) => match *connection {
                Connection::Blocking(ref mut conn) => client.execute_query(conn, query, params),
                _ => Err(foreign_connection()),
            },
            #[cfg(feature = "nonblocking")]
            Client::NonBlocking(ref client) => match *connection {
                Connection::NonBlocking(ref mut conn) => client.execute_query(conn, query, params),
                _ => Err(foreign_connection()),
            },
        }
    }

    #[allow(unreachable_patterns)]
    fn close_connection(&self, connection: &mut Connection) -> ClientResult<()> {
        match *self {
            #[cfg(feature = "blocking")]
            Client::Blocking(ref client) => match *connection {
                Connection::Blocking(ref mut conn) => client.close_connection(conn),
                _ => Err(foreign_connection()),
            },
            #[cfg(feature = "nonblocking")]
            Client::NonBlocking(ref client) => match *connection {
                Connection::NonBlocking(ref mut conn) => client.close_connection(conn),
                _ => Err(foreign_connection()),
            },
        }
    }
}

/// Build a client by name: `auto`, `blocking` or `nonblocking`.
pub fn get_client(name: &str) -> ClientResult<Client> {
    Client::new(name.parse()?)
}

/// The auto-detected client.
pub fn default_client() -> ClientResult<Client> {
    Client::new(ClientKind::Auto)
}
