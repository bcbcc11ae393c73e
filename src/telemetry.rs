//! Request telemetry as JSON lines.
//!
//! Every handled request appends one record:
//!
//! ```json
//! {"timestamp":"2026-10-15T09:12:44.120Z","endpoint":"chat","pathway":"rag",
//!  "latency_sec":0.8421,"input_length":31,"output_length":212,"success":true}
//! ```
//!
//! Telemetry is write-only and best effort: a failed write is logged with
//! `tracing` and never reaches the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::TelemetryConfig;

/// Which path a request took through the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pathway {
    /// Chat answered with retrieved context.
    Rag,
    /// Chat answered with nothing indexed or nothing retrieved.
    NoContext,
    ValidationRejected,
    ModelUnreachable,
    ModelError,
    /// Query embedding failed before the model was called.
    RetrievalFailed,
    Ingest,
    /// Upload refused before extraction (bad multipart, non-PDF, empty, too large).
    UploadRejected,
    IngestFailed,
    EmptyIndex,
    Flashcards,
    Quiz,
    /// Generation succeeded but the output could not be parsed.
    MalformedOutput,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub pathway: Pathway,
    pub latency_sec: f64,
    pub input_length: usize,
    pub output_length: usize,
    pub success: bool,
}

impl TelemetryRecord {
    pub fn new(endpoint: &str, pathway: Pathway, latency: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            endpoint: endpoint.to_string(),
            pathway,
            latency_sec: (latency.as_secs_f64() * 10_000.0).round() / 10_000.0,
            input_length: 0,
            output_length: 0,
            success: true,
        }
    }

    pub fn lengths(mut self, input_length: usize, output_length: usize) -> Self {
        self.input_length = input_length;
        self.output_length = output_length;
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

pub struct TelemetrySink {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl TelemetrySink {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            path: config.enabled.then(|| config.path.clone()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append `record` as one line. Errors are logged and swallowed.
    pub async fn log(&self, record: &TelemetryRecord) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = self.append(path, record).await {
            warn!(path = %path.display(), error = %e, "telemetry logging failed");
        }
    }

    async fn append(&self, path: &Path, record: &TelemetryRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_in(dir: &tempfile::TempDir) -> TelemetrySink {
        TelemetrySink::new(&TelemetryConfig {
            enabled: true,
            path: dir.path().join("telemetry.jsonl"),
        })
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(&dir);

        sink.log(&TelemetryRecord::new("chat", Pathway::Rag, Duration::from_millis(1234)).lengths(31, 212))
            .await;
        sink.log(
            &TelemetryRecord::new("chat", Pathway::ValidationRejected, Duration::from_micros(120))
                .lengths(40, 0)
                .failed(),
        )
        .await;

        let lines = read_lines(sink.path().unwrap());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["endpoint"], "chat");
        assert_eq!(lines[0]["pathway"], "rag");
        assert_eq!(lines[0]["latency_sec"], 1.234);
        assert_eq!(lines[0]["input_length"], 31);
        assert_eq!(lines[0]["success"], true);
        assert_eq!(lines[1]["pathway"], "validation_rejected");
        assert_eq!(lines[1]["latency_sec"], 0.0001);
        assert_eq!(lines[1]["success"], false);

        let ts = lines[0]["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[tokio::test]
    async fn disabled_sink_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");
        let sink = TelemetrySink::new(&TelemetryConfig {
            enabled: false,
            path: path.clone(),
        });
        sink.log(&TelemetryRecord::new("upload", Pathway::Ingest, Duration::ZERO))
            .await;
        assert!(!path.exists());
        assert!(sink.path().is_none());
    }

    #[tokio::test]
    async fn unwritable_path_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TelemetrySink::new(&TelemetryConfig {
            enabled: true,
            path: dir.path().join("missing").join("telemetry.jsonl"),
        });
        sink.log(&TelemetryRecord::new("quiz", Pathway::Quiz, Duration::ZERO))
            .await;
    }
}
