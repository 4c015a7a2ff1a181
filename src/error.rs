//! Collection error taxonomy.
//!
//! None of these abort the process. Each one degrades the data of a single
//! target, metric, column or event for the current tick only.

use thiserror::Error;

use crate::driver::DriverError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollectError {
    /// Target unreachable or login refused. No query ran for this target.
    #[error("cannot connect to {target}: {source}")]
    Connection { target: String, source: DriverError },

    /// One metric's query failed; the worker moved on to the next metric.
    #[error("metric '{metric}': {source}")]
    Query { metric: String, source: DriverError },

    /// One column was left out of an event that was still published.
    #[error("metric '{metric}': column '{column}' has unsupported representation '{representation}'")]
    Decode {
        metric: String,
        column: String,
        representation: String,
    },

    /// The sink did not accept an event.
    #[error("metric '{metric}': sink rejected event for row {row}")]
    Publish { metric: String, row: usize },
}

impl CollectError {
    /// Short class name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Connection { .. } => "connection",
            CollectError::Query { .. } => "query",
            CollectError::Decode { .. } => "decode",
            CollectError::Publish { .. } => "publish",
        }
    }

    /// Metric the error belongs to, if any.
    pub fn metric(&self) -> Option<&str> {
        match self {
            CollectError::Connection { .. } => None,
            CollectError::Query { metric, .. }
            | CollectError::Decode { metric, .. }
            | CollectError::Publish { metric, .. } => Some(metric),
        }
    }
}
