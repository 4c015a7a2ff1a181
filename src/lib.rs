//! sqlbeat - periodic SQL metrics collector library.
//!
//! Polls a set of database targets on a fixed schedule, runs a catalog of
//! diagnostic queries against each, turns every result row into a typed
//! [`Event`] and publishes it to an [`EventSink`].
//!
//! The `sqlbeatd` binary wires these pieces to the PostgreSQL driver and a
//! stdout or file sink.

pub mod catalog;
pub mod config;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod event;
pub mod scheduler;
pub mod sink;
pub mod target;
pub mod util;
pub mod worker;

pub use catalog::{MetricCatalog, MetricDefinition};
pub use config::{Config, ConfigError};
pub use driver::{Driver, DriverError, MockDriver, PostgresDriver};
pub use error::CollectError;
pub use event::{Event, FieldValue, RawRow, RawValue};
pub use scheduler::{OverlapPolicy, RunSummary, Scheduler};
pub use sink::{EventSink, MemorySink, SinkConfig, SinkHandle};
pub use target::Target;
pub use worker::{TargetWorker, WorkerReport};
