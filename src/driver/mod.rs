//! Database driver abstraction.
//!
//! The worker only talks to these traits, so the collection pipeline runs
//! the same against a real PostgreSQL server and against the in-memory
//! [`MockDriver`] used in tests.
//!
//! ```text
//!   Driver ──open──▶ Connection ──query──▶ RowCursor ──next_row──▶ Vec<RawValue>
//!     │                  │
//!     │                  └──close
//!     ├── PostgresDriver (postgres crate, optional TLS)
//!     └── MockDriver     (scripted results, for tests)
//! ```

pub mod mock;
mod pg;

use thiserror::Error;

use crate::event::RawValue;
use crate::target::Target;

pub use pg::{DEFAULT_CONNECT_TIMEOUT, PostgresDriver};
pub use mock::MockDriver;

/// Errors reported by a driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// Target unreachable, bad descriptor or authentication failure.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The query could not be executed.
    #[error("query failed: {0}")]
    Query(String),
    /// A row could not be fetched from an executing query.
    #[error("row fetch failed: {0}")]
    Fetch(String),
    #[error("close failed: {0}")]
    Close(String),
}

/// Opens connections to targets.
///
/// Shared by every worker, so implementations must be thread-safe.
pub trait Driver: Send + Sync {
    /// Opens one connection. Fails fast; no retry.
    fn open(&self, target: &Target) -> Result<Box<dyn Connection>, DriverError>;
}

/// One open database connection, owned by a single worker.
pub trait Connection: Send {
    /// Executes a query and returns a cursor over its rows.
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DriverError>;

    /// Releases the connection.
    fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Row-by-row access to a query result.
pub trait RowCursor {
    /// Column names in result order.
    fn columns(&self) -> &[String];

    /// Fetches the next row, values in column order.
    ///
    /// Returns `Ok(None)` once the result is exhausted. A row may hold fewer
    /// values than there are columns; missing positions bind as NULL.
    fn next_row(&mut self) -> Result<Option<Vec<RawValue>>, DriverError>;
}
