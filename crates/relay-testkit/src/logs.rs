//! Capture structured log output in tests.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// Collects JSON log lines written while its guard is installed. The guard
/// is thread-local, so use it with the current-thread test runtime.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// New, empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install as the default subscriber for the current thread.
    #[must_use]
    pub fn install(&self, filter: &str) -> tracing::subscriber::DefaultGuard {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(self.clone())
            .json()
            .with_ansi(false)
            .with_target(false)
            .with_current_span(false)
            .flatten_event(true);

        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(layer);
        tracing::subscriber::set_default(subscriber)
    }

    /// Raw JSON lines.
    #[must_use]
    pub fn jsonl(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).to_string()
    }

    /// Parsed log records.
    #[must_use]
    pub fn records(&self) -> Vec<Value> {
        self.jsonl()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Records whose message equals `message`.
    #[must_use]
    pub fn find(&self, message: &str) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter(|r| r.get("message").and_then(Value::as_str) == Some(message))
            .collect()
    }

    /// Check if any record has `message`.
    #[must_use]
    pub fn contains(&self, message: &str) -> bool {
        !self.find(message).is_empty()
    }
}

/// Writer handed out by [`LogCapture`].
#[derive(Debug)]
pub struct LogCaptureWriter {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            bytes: Arc::clone(&self.bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_fields_as_json() {
        let capture = LogCapture::new();
        {
            let _guard = capture.install("info");
            tracing::warn!(attempt = 2, "Retrying");
            tracing::debug!("filtered out");
        }

        let found = capture.find("Retrying");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["attempt"], 2);
        assert!(!capture.contains("filtered out"));
    }
}
