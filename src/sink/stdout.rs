use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::EventSink;
use crate::event::Event;

/// Writes each event as one JSON line to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink {
    closed: AtomicBool,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for StdoutSink {
    fn publish(&self, event: Event) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let line = match event.to_json() {
            Ok(line) => line,
            Err(e) => {
                debug!("Failed to serialize event: {}", e);
                return false;
            }
        };

        // The stdout lock keeps concurrent lines from interleaving.
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}").and_then(|_| out.flush()).is_ok()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
