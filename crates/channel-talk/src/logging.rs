//! Interaction logger.
//!
//! Writes one structured JSON line per inbound decision and outbound send,
//! always through `tracing` (target `channel_interaction`) and optionally
//! appended to a file.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// What happened to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    /// Turned away by the policy filter.
    Rejected,
    /// Passed the policy filter and the host callback finished.
    Dispatched,
    /// Host callback failed or timed out.
    DispatchFailed,
    Sent,
    SendFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionLog {
    pub ts: DateTime<Utc>,
    pub account: String,
    pub action: InteractionAction,
    pub chat_id: String,
    pub message_id: Option<String>,
    pub reason: Option<String>,
    pub success: bool,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

pub struct InteractionLogger {
    sink: Option<JsonlSink>,
}

/// Append-only JSONL file. The handle is opened on first write and
/// reopened after a write error; the lock keeps lines whole.
struct JsonlSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl InteractionLogger {
    /// Log to `log_path` as JSON lines; `None` logs through tracing only.
    pub fn new(log_path: Option<PathBuf>) -> Self {
        Self {
            sink: log_path.map(|path| JsonlSink {
                path,
                file: Mutex::new(None),
            }),
        }
    }

    pub async fn log(&self, entry: &InteractionLog) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(account = %entry.account, "interaction entry not encodable: {}", e);
                return;
            }
        };
        tracing::info!(
            target: "channel_interaction",
            account = %entry.account,
            action = ?entry.action,
            "{}",
            line
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&line).await {
                tracing::warn!(path = %sink.path.display(), "interaction log write failed: {}", e);
            }
        }
    }

    /// Entry for an inbound message decision or dispatch.
    pub fn inbound_entry(
        account: &str,
        action: InteractionAction,
        chat_id: &str,
        message_id: &str,
        reason: Option<String>,
        duration_ms: Option<u64>,
        error: Option<String>,
    ) -> InteractionLog {
        InteractionLog {
            ts: Utc::now(),
            account: account.to_string(),
            action,
            chat_id: chat_id.to_string(),
            message_id: Some(message_id.to_string()).filter(|id| !id.is_empty()),
            success: error.is_none() && action != InteractionAction::Rejected,
            reason,
            duration_ms,
            error,
        }
    }

    /// Entry for an outbound send.
    pub fn outbound_entry(
        account: &str,
        group_id: &str,
        message_id: Option<String>,
        duration_ms: u64,
        error: Option<String>,
    ) -> InteractionLog {
        let action = if error.is_none() {
            InteractionAction::Sent
        } else {
            InteractionAction::SendFailed
        };
        InteractionLog {
            ts: Utc::now(),
            account: account.to_string(),
            action,
            chat_id: group_id.to_string(),
            message_id,
            reason: None,
            success: error.is_none(),
            duration_ms: Some(duration_ms),
            error,
        }
    }

}

impl JsonlSink {
    async fn append(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }
        let Some(file) = guard.as_mut() else {
            return Ok(());
        };

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        let written = async {
            file.write_all(&buf).await?;
            file.flush().await
        }
        .await;
        if written.is_err() {
            *guard = None;
        }
        written
    }
}
