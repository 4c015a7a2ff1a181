//! In-memory driver for testing the pipeline without a database.
//!
//! Each descriptor maps to a scripted [`MockTarget`]: whether connecting
//! fails, which queries return which rows, and which queries fail. The
//! driver counts opened and closed connections so tests can check that
//! every connection is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Connection, Driver, DriverError, RowCursor};
use crate::event::RawValue;
use crate::target::Target;

/// Scripted result of one query.
#[derive(Debug, Clone, Default)]
pub struct MockResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
    /// Fail with a fetch error after this many rows.
    pub fail_after: Option<usize>,
}

impl MockResult {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn row(mut self, values: Vec<RawValue>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn fail_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }
}

/// Scripted behavior of one target.
#[derive(Debug, Clone, Default)]
pub struct MockTarget {
    connect_error: Option<String>,
    queries: HashMap<String, Result<MockResult, String>>,
    delay: Duration,
}

impl MockTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target whose connection attempts always fail.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            connect_error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_result(mut self, sql: impl Into<String>, result: MockResult) -> Self {
        self.queries.insert(sql.into(), Ok(result));
        self
    }

    pub fn with_error(mut self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.queries.insert(sql.into(), Err(message.into()));
        self
    }

    /// Sleeps this long before answering each query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Driver serving scripted targets keyed by descriptor.
///
/// Unknown descriptors fail to connect. Queries without a script fail
/// with a query error.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    targets: HashMap<String, MockTarget>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_target(&mut self, descriptor: impl Into<String>, target: MockTarget) {
        self.targets.insert(descriptor.into(), target);
    }

    pub fn with_target(mut self, descriptor: impl Into<String>, target: MockTarget) -> Self {
        self.add_target(descriptor, target);
        self
    }

    /// Number of successfully opened connections.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of connections closed so far.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Driver for MockDriver {
    fn open(&self, target: &Target) -> Result<Box<dyn Connection>, DriverError> {
        let script = self.targets.get(target.descriptor()).ok_or_else(|| {
            DriverError::Connect(format!("no such target: {}", target.name()))
        })?;
        if let Some(message) = &script.connect_error {
            return Err(DriverError::Connect(message.clone()));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            script: script.clone(),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct MockConnection {
    script: MockTarget,
    closed: Arc<AtomicUsize>,
}

impl Connection for MockConnection {
    fn query<'a>(&'a mut self, sql: &str) -> Result<Box<dyn RowCursor + 'a>, DriverError> {
        if !self.script.delay.is_zero() {
            std::thread::sleep(self.script.delay);
        }
        match self.script.queries.get(sql) {
            Some(Ok(result)) => Ok(Box::new(MockCursor {
                result,
                position: 0,
            })),
            Some(Err(message)) => Err(DriverError::Query(message.clone())),
            None => Err(DriverError::Query(format!("relation does not exist: {sql}"))),
        }
    }

    fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockCursor<'a> {
    result: &'a MockResult,
    position: usize,
}

impl RowCursor for MockCursor<'_> {
    fn columns(&self) -> &[String] {
        &self.result.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<RawValue>>, DriverError> {
        if self.result.fail_after == Some(self.position) {
            return Err(DriverError::Fetch("connection reset".to_string()));
        }
        let row = self.result.rows.get(self.position).cloned();
        self.position += 1;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_descriptor_fails_to_connect() {
        let driver = MockDriver::new();
        let err = driver.open(&Target::new("nowhere")).err().unwrap();
        assert!(matches!(err, DriverError::Connect(_)));
        assert_eq!(driver.opened(), 0);
    }

    #[test]
    fn scripted_query_yields_rows_in_order() {
        let driver = MockDriver::new().with_target(
            "db",
            MockTarget::new().with_result(
                "q",
                MockResult::new(&["N"])
                    .row(vec![RawValue::Int(1)])
                    .row(vec![RawValue::Int(2)]),
            ),
        );

        let mut conn = driver.open(&Target::new("db")).unwrap();
        {
            let mut cursor = conn.query("q").unwrap();
            assert_eq!(cursor.columns(), ["N".to_string()]);
            assert_eq!(cursor.next_row().unwrap(), Some(vec![RawValue::Int(1)]));
            assert_eq!(cursor.next_row().unwrap(), Some(vec![RawValue::Int(2)]));
            assert_eq!(cursor.next_row().unwrap(), None);
        }
        assert!(conn.query("other").is_err());
        conn.close().unwrap();

        assert_eq!(driver.opened(), 1);
        assert_eq!(driver.closed(), 1);
    }

    #[test]
    fn fetch_failure_after_rows() {
        let driver = MockDriver::new().with_target(
            "db",
            MockTarget::new().with_result(
                "q",
                MockResult::new(&["N"])
                    .row(vec![RawValue::Int(1)])
                    .row(vec![RawValue::Int(2)])
                    .fail_after(1),
            ),
        );

        let mut conn = driver.open(&Target::new("db")).unwrap();
        let mut cursor = conn.query("q").unwrap();
        assert!(cursor.next_row().unwrap().is_some());
        assert!(matches!(cursor.next_row(), Err(DriverError::Fetch(_))));
    }
}
