//! The `read` action: recent group or thread messages as text lines.
//!
//! Failures never surface as `Err`; they come back as [`ActionResult`]s with
//! `is_error` set so the host can show them to the user as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{ChannelTalkApiClient, ReadQuery};
use crate::events::millis_to_datetime;
use crate::types::iso_timestamp;

pub const READ_ACTION: &str = "read";
pub const DEFAULT_READ_LIMIT: u32 = 20;

const EMPTY_HISTORY: &str = "No messages found.";

/// Parameters of a `read` action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRequest {
    /// Group chat id.
    pub target: String,
    pub limit: Option<u32>,
    /// Root message id; reads the thread's replies instead of the group.
    pub thread_id: Option<String>,
}

impl ReadRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Read `target` (or `to`), a numeric `limit` and `threadId` from host
    /// action parameters. Anything else is ignored.
    pub fn from_params(params: &Value) -> Self {
        let text = |key: &str| {
            params
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            target: text("target").or_else(|| text("to")).unwrap_or_default(),
            limit: params
                .get("limit")
                .and_then(Value::as_u64)
                .map(|n| n.min(u32::MAX as u64) as u32),
            thread_id: text("threadId"),
        }
    }
}

/// Host-facing action outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    pub content: Vec<ActionContent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionContent {
    Text { text: String },
}

impl ActionResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![ActionContent::Text { text: text.into() }],
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ActionContent::Text { text: text.into() }],
        }
    }

    /// All text items joined by newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                ActionContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Fetch and render the latest messages of a group or thread.
pub async fn read_history(client: &ChannelTalkApiClient, request: &ReadRequest) -> ActionResult {
    if request.target.is_empty() {
        return ActionResult::error("Target (group chatId) is required for read action.");
    }
    let query = ReadQuery {
        limit: request.limit.unwrap_or(DEFAULT_READ_LIMIT),
    };

    let fetched = match request.thread_id.as_deref().filter(|id| !id.is_empty()) {
        Some(root) => {
            client
                .get_thread_messages(&request.target, root, &query)
                .await
        }
        None => client.get_messages(&request.target, &query).await,
    };

    match fetched {
        Ok(data) => ActionResult::text(format_history(&data)),
        Err(e) => {
            tracing::warn!(target_group = %request.target, "Channel Talk read failed: {}", e);
            ActionResult::error(format!("Failed to read messages: {}", e))
        }
    }
}

/// Render a newest-first `messages` page in chronological order.
pub fn format_history(data: &Value) -> String {
    let lines: Vec<String> = data
        .get("messages")
        .and_then(Value::as_array)
        .map(|messages| messages.iter().rev().map(format_message).collect())
        .unwrap_or_default();
    if lines.is_empty() {
        EMPTY_HISTORY.to_string()
    } else {
        lines.join("\n")
    }
}

fn format_message(message: &Value) -> String {
    let sender = if message.get("personType").and_then(Value::as_str) == Some("bot") {
        "🤖 Bot".to_string()
    } else {
        let person = message
            .get("personId")
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "Unknown".to_string());
        format!("👤 {}", person)
    };
    let timestamp = message
        .get("createdAt")
        .and_then(Value::as_i64)
        .and_then(millis_to_datetime)
        .map(|ts| iso_timestamp(&ts))
        .unwrap_or_default();
    let thread = if message.get("threadMsg").and_then(Value::as_bool) == Some(true) {
        " [thread]"
    } else {
        ""
    };
    let text = message
        .get("plainText")
        .and_then(Value::as_str)
        .unwrap_or_default();
    format!("[{}] {}{}: {}", timestamp, sender, thread, text)
}
