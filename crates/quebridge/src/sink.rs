//! Publish sink that writes one JSON object per line to stdout.

use std::io::Write;

use quebridge_core::PublishSink;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Serialize)]
struct Message<'a> {
    topic: &'a str,
    payload: &'a str,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLineSink;

impl JsonLineSink {
    /// Write any serializable record as a single line.
    pub fn emit<T: Serialize>(&self, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "unable to encode output line");
                return;
            }
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            debug!(error = %e, "stdout write failed");
        }
    }
}

impl PublishSink for JsonLineSink {
    fn publish(&self, topic: &str, payload: &str) {
        self.emit(&Message { topic, payload });
    }

    fn subscribe(&self, topic: &str) {
        debug!(topic, "command topic announced");
    }
}
