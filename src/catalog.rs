//! Metric catalog: the named queries run against every target.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named diagnostic query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Becomes the `type` field of every event the query produces.
    pub name: String,
    /// Plain query text, opaque to the collector.
    #[serde(alias = "sql")]
    pub query: String,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("metric catalog is empty")]
    Empty,
    #[error("metric #{0} has an empty name")]
    EmptyName(usize),
    #[error("metric '{0}' has an empty query")]
    EmptyQuery(String),
    #[error("metric '{0}' is defined more than once")]
    Duplicate(String),
}

/// Ordered, validated list of metrics.
///
/// Immutable after construction; workers share it through an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCatalog {
    metrics: Vec<MetricDefinition>,
}

impl MetricCatalog {
    /// Validates and wraps a list of metrics, keeping their order.
    pub fn new(metrics: Vec<MetricDefinition>) -> Result<Self, CatalogError> {
        if metrics.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::new();
        for (idx, metric) in metrics.iter().enumerate() {
            if metric.name.trim().is_empty() {
                return Err(CatalogError::EmptyName(idx));
            }
            if metric.query.trim().is_empty() {
                return Err(CatalogError::EmptyQuery(metric.name.clone()));
            }
            if !seen.insert(metric.name.as_str()) {
                return Err(CatalogError::Duplicate(metric.name.clone()));
            }
        }

        Ok(Self { metrics })
    }

    /// Built-in PostgreSQL diagnostics.
    pub fn builtin() -> Self {
        Self {
            metrics: builtin_metrics(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetricDefinition> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.iter().any(|m| m.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|m| m.name.as_str())
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl<'a> IntoIterator for &'a MetricCatalog {
    type Item = &'a MetricDefinition;
    type IntoIter = std::slice::Iter<'a, MetricDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn builtin_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new(
            "db_status",
            r#"
                SELECT
                    (SELECT system_identifier FROM pg_control_system()) AS dbid,
                    current_database() AS instance_name,
                    CASE WHEN pg_is_in_recovery() THEN 'STANDBY' ELSE 'OPEN' END AS status,
                    current_setting('server_version') AS version
            "#,
        ),
        MetricDefinition::new(
            "db_sessions",
            r#"
                SELECT
                    COALESCE(datname, '') AS datname,
                    state,
                    count(*) AS sessions
                FROM pg_stat_activity
                WHERE state IS NOT NULL
                GROUP BY datname, state
            "#,
        ),
        MetricDefinition::new(
            "db_size",
            r#"
                SELECT
                    datname,
                    pg_database_size(datname) AS size_bytes
                FROM pg_database
                WHERE NOT datistemplate
            "#,
        ),
        MetricDefinition::new(
            "db_transactions",
            r#"
                SELECT
                    datname,
                    xact_commit,
                    xact_rollback,
                    deadlocks,
                    round(blks_hit * 100.0 / NULLIF(blks_hit + blks_read, 0), 2) AS cache_hit_pct
                FROM pg_stat_database
                WHERE datname IS NOT NULL
            "#,
        ),
    ]
}
