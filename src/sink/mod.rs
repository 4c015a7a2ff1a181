//! Event sinks: the publish boundary of the collector.
//!
//! Workers hand events to a sink one at a time and synchronously. A sink
//! answers with a plain success flag; the collector logs a rejection and
//! moves on. There is no retry, buffering or backpressure.
//!
//! Sinks are shared by every worker thread, including workers of
//! overlapping ticks, so each implementation synchronizes internally.

mod file;
mod memory;
mod stdout;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::event::Event;

pub use file::FileSink;
pub use memory::MemorySink;
pub use stdout::StdoutSink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open sink '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Downstream receiver of decoded events.
pub trait EventSink: Send + Sync {
    /// Publishes one event. Returns `false` if the event was not accepted.
    fn publish(&self, event: Event) -> bool;

    /// Releases the sink. Later publishes are rejected.
    fn close(&self);
}

/// Shared handle to a connected sink.
pub type SinkHandle = Arc<dyn EventSink>;

/// Which sink to connect to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Newline-delimited JSON on stdout.
    #[default]
    Stdout,
    /// Newline-delimited JSON appended to a file.
    File { path: PathBuf },
}

impl SinkConfig {
    /// Connects the configured sink.
    pub fn connect(&self) -> Result<SinkHandle, SinkError> {
        match self {
            SinkConfig::Stdout => Ok(Arc::new(StdoutSink::new())),
            SinkConfig::File { path } => Ok(Arc::new(FileSink::open(path)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_config_parses_tagged_yaml() {
        let config: SinkConfig = serde_yaml::from_str("kind: stdout").unwrap();
        assert_eq!(config, SinkConfig::Stdout);

        let config: SinkConfig =
            serde_yaml::from_str("kind: file\npath: /tmp/events.jsonl").unwrap();
        assert_eq!(
            config,
            SinkConfig::File {
                path: PathBuf::from("/tmp/events.jsonl")
            }
        );
    }

    #[test]
    fn connect_file_sink_reports_bad_path() {
        let config = SinkConfig::File {
            path: PathBuf::from("/nonexistent/dir/12345/events.jsonl"),
        };
        let err = config.connect().err().unwrap();
        assert!(err.to_string().contains("/nonexistent/dir/12345"));
    }
}
