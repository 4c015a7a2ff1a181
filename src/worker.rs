//! Target worker: runs the whole catalog against one target.
//!
//! A worker owns its connection and its error list; nothing it mutates is
//! shared with other workers. The only shared resources are the read-only
//! catalog, the driver and the sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::catalog::{MetricCatalog, MetricDefinition};
use crate::decoder::decode_row;
use crate::driver::{Connection, Driver};
use crate::error::CollectError;
use crate::event::{Event, RawRow};
use crate::sink::SinkHandle;
use crate::target::Target;

/// Outcome of one worker run.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Display name of the target.
    pub target: String,
    /// Tick that launched the worker.
    pub tick_at: DateTime<Utc>,
    pub connected: bool,
    /// Metrics whose query ran to the end of its result.
    pub metrics_completed: usize,
    /// Rows read across all metrics.
    pub rows: usize,
    /// Events accepted by the sink.
    pub published: usize,
    /// Every error met during the run, in order.
    pub errors: Vec<CollectError>,
    pub elapsed: Duration,
}

impl WorkerReport {
    fn new(target: &Target, tick_at: DateTime<Utc>) -> Self {
        Self {
            target: target.name().to_string(),
            tick_at,
            connected: false,
            metrics_completed: 0,
            rows: 0,
            published: 0,
            errors: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Number of events the sink rejected.
    pub fn publish_failures(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| matches!(e, CollectError::Publish { .. }))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the metric catalog against one target.
pub struct TargetWorker {
    target: Target,
    catalog: Arc<MetricCatalog>,
    driver: Arc<dyn Driver>,
    sink: SinkHandle,
}

impl TargetWorker {
    pub fn new(
        target: Target,
        catalog: Arc<MetricCatalog>,
        driver: Arc<dyn Driver>,
        sink: SinkHandle,
    ) -> Self {
        Self {
            target,
            catalog,
            driver,
            sink,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Connects, runs every metric in catalog order and closes the
    /// connection.
    ///
    /// Never fails as a whole: connection, query, decode and publish
    /// failures are recorded in the report.
    pub fn run(&self, tick_at: DateTime<Utc>) -> WorkerReport {
        let started = Instant::now();
        let mut report = WorkerReport::new(&self.target, tick_at);

        let mut conn = match self.driver.open(&self.target) {
            Ok(conn) => conn,
            Err(source) => {
                report.errors.push(CollectError::Connection {
                    target: self.target.name().to_string(),
                    source,
                });
                report.elapsed = started.elapsed();
                return report;
            }
        };
        report.connected = true;

        for metric in self.catalog.iter() {
            match self.collect_metric(conn.as_mut(), metric, tick_at, &mut report) {
                Ok(rows) => {
                    report.metrics_completed += 1;
                    debug!(
                        target_name = %self.target,
                        metric = %metric.name,
                        rows,
                        "Metric collected"
                    );
                }
                Err(e) => report.errors.push(e),
            }
        }

        if let Err(e) = conn.close() {
            debug!(target_name = %self.target, "Connection close failed: {}", e);
        }

        report.elapsed = started.elapsed();
        report
    }

    /// Streams one metric's rows through the decoder into the sink.
    ///
    /// Returns the number of rows read. Decode and publish failures are
    /// pushed to the report as they happen; a query or fetch failure ends
    /// the metric and is returned.
    fn collect_metric(
        &self,
        conn: &mut dyn Connection,
        metric: &MetricDefinition,
        tick_at: DateTime<Utc>,
        report: &mut WorkerReport,
    ) -> Result<usize, CollectError> {
        let query_error = |source| CollectError::Query {
            metric: metric.name.clone(),
            source,
        };

        let mut cursor = conn.query(&metric.query).map_err(query_error)?;
        let columns = cursor.columns().to_vec();

        let mut rows = 0;
        while let Some(values) = cursor.next_row().map_err(query_error)? {
            let row = RawRow::bind(&columns, values);
            let decoded = decode_row(&row);

            for issue in decoded.issues {
                report.errors.push(CollectError::Decode {
                    metric: metric.name.clone(),
                    column: issue.column,
                    representation: issue.representation,
                });
            }

            let event = Event::new(&metric.name, capture_time(tick_at), decoded.fields);
            trace!(target_name = %self.target, metric = %metric.name, row = rows, "Publishing event");
            if self.sink.publish(event) {
                report.published += 1;
            } else {
                report.errors.push(CollectError::Publish {
                    metric: metric.name.clone(),
                    row: rows,
                });
            }

            rows += 1;
            report.rows += 1;
        }

        Ok(rows)
    }
}

/// Wall clock, never earlier than the tick that produced the row.
fn capture_time(tick_at: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(tick_at)
}
