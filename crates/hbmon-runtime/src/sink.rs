//! Publish and alert sinks: where the board payload and alerts go.
//!
//! The daemon ships file-backed sinks; anything that can upsert one message
//! or deliver a short text can stand in for them.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use hbmon_core::{Alert, AlertKind, WorkerId};

/// Identity of a published board message, returned by the first upsert and
/// passed back on every later one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle(pub String);

/// Upsert-one-message publisher for the live board.
#[async_trait]
pub trait BoardSink: Send + Sync {
    fn name(&self) -> &str;

    /// Edit the message behind `handle`, or create one when `handle` is
    /// `None`. Returns the handle to use next time.
    async fn upsert(
        &self,
        handle: Option<&MessageHandle>,
        payload: &str,
    ) -> anyhow::Result<MessageHandle>;
}

/// Fire-and-forget delivery of alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;
}

// ─── File Board Sink ─────────────────────────────────────────────

/// Keeps the board in a single file, replaced atomically on every upsert.
pub struct FileBoardSink {
    path: PathBuf,
}

impl FileBoardSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BoardSink for FileBoardSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn upsert(
        &self,
        _handle: Option<&MessageHandle>,
        payload: &str,
    ) -> anyhow::Result<MessageHandle> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(MessageHandle(self.path.display().to_string()))
    }
}

// ─── JSONL Alert Sink ────────────────────────────────────────────

/// A single alert line in the JSONL file.
#[derive(Debug, Serialize)]
struct AlertRecord<'a> {
    ts: String,
    worker_id: &'a WorkerId,
    #[serde(flatten)]
    kind: &'a AlertKind,
    message: String,
}

/// Appends one JSON line per alert.
pub struct JsonlAlertSink {
    path: PathBuf,
}

impl JsonlAlertSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AlertSink for JsonlAlertSink {
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let record = AlertRecord {
            ts: Utc::now().to_rfc3339(),
            worker_id: &alert.worker_id,
            kind: &alert.kind,
            message: alert.message(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use super::*;

    /// Records every upsert; fails while `failing` is set.
    #[derive(Default)]
    pub struct FakeBoardSink {
        pub calls: Mutex<Vec<(Option<MessageHandle>, String)>>,
        pub failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl BoardSink for FakeBoardSink {
        fn name(&self) -> &str {
            "fake"
        }

        async fn upsert(
            &self,
            handle: Option<&MessageHandle>,
            payload: &str,
        ) -> anyhow::Result<MessageHandle> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("sink unavailable");
            }
            let mut calls = self.calls.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
            calls.push((handle.cloned(), payload.to_string()));
            Ok(MessageHandle("msg-1".into()))
        }
    }

    #[derive(Default)]
    pub struct FakeAlertSink {
        pub sent: Mutex<Vec<Alert>>,
    }

    #[async_trait]
    impl AlertSink for FakeAlertSink {
        async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
            self.sent
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push(alert.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> Alert {
        Alert {
            worker_id: WorkerId::new("42"),
            kind: AlertKind::LowRate {
                rate: 50.0,
                floor: 100.0,
            },
            emitted_at: 0,
        }
    }

    #[tokio::test]
    async fn file_board_sink_replaces_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = FileBoardSink::new(dir.path().join("board.md"));
        let handle = sink.upsert(None, "first").await.expect("create");
        sink.upsert(Some(&handle), "second").await.expect("edit");
        let text = std::fs::read_to_string(dir.path().join("board.md")).expect("read");
        assert_eq!(text, "second");
    }

    #[tokio::test]
    async fn jsonl_alert_sink_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alerts.jsonl");
        let sink = JsonlAlertSink::new(&path);
        sink.send(&alert()).await.expect("send");
        sink.send(&alert()).await.expect("send");

        let text = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let record: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(record["worker_id"], "42");
        assert_eq!(record["kind"], "low_rate");
        assert!(
            record["message"]
                .as_str()
                .expect("message")
                .starts_with("<@42> Alert:")
        );
    }
}
