use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use super::{EventSink, SinkError};
use crate::event::Event;

/// Appends each event as one JSON line to a file.
///
/// The writer is flushed after every event. `None` marks a closed sink.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    /// Opens `path` for appending, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for FileSink {
    fn publish(&self, event: Event) -> bool {
        let line = match event.to_json() {
            Ok(line) => line,
            Err(e) => {
                debug!("Failed to serialize event: {}", e);
                return false;
            }
        };

        let mut guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(writer) = guard.as_mut() else {
            return false;
        };

        match writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Write to {} failed: {}", self.path.display(), e);
                false
            }
        }
    }

    fn close(&self) {
        let mut guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut writer) = guard.take()
            && let Err(e) = writer.flush()
        {
            warn!("Flush of {} on close failed: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::Utc;

    use crate::event::FieldValue;

    fn event(metric: &str, n: i64) -> Event {
        let mut fields = BTreeMap::new();
        fields.insert("n".to_string(), FieldValue::Int(n));
        Event::new(metric, Utc::now(), fields)
    }

    #[test]
    fn writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = FileSink::open(&path).unwrap();

        assert!(sink.publish(event("status", 1)));
        assert!(sink.publish(event("status", 2)));
        sink.close();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["n"], 1);
        assert_eq!(lines[1]["type"], "status");
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{\"previous\":true}\n").unwrap();

        let sink = FileSink::open(&path).unwrap();
        assert!(sink.publish(event("status", 1)));
        sink.close();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn closed_sink_rejects_events() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(dir.path().join("events.jsonl")).unwrap();
        sink.close();
        assert!(!sink.publish(event("status", 1)));
    }

    #[test]
    fn concurrent_publishers_do_not_interleave_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = Arc::new(FileSink::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for n in 0..50 {
                        assert!(sink.publish(event(&format!("m{t}"), n)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        sink.close();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed.len(), 200);
    }
}
