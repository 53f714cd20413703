use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelTalkError;

/// API credentials sent as `x-access-key` / `x-access-secret`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub access_secret: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            access_secret: access_secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"[redacted]")
            .field("access_secret", &"[redacted]")
            .finish()
    }
}

/// A structured fragment of a rich outbound message.
///
/// The wire form is internally tagged on `type`; any other kind fails to
/// deserialize, so unknown blocks never reach the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBlock {
    /// HTML-formatted text (`<b>`, `<i>`, `<link>`).
    Text { value: String },
    Code { value: String },
    Bullets { blocks: Vec<TextBlock> },
}

/// A bullet item. Only text is allowed inside a bulleted list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TextBlockRepr", into = "TextBlockRepr")]
pub struct TextBlock {
    pub value: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TextBlockRepr {
    Text { value: String },
}

impl From<TextBlockRepr> for TextBlock {
    fn from(repr: TextBlockRepr) -> Self {
        match repr {
            TextBlockRepr::Text { value } => TextBlock { value },
        }
    }
}

impl From<TextBlock> for TextBlockRepr {
    fn from(block: TextBlock) -> Self {
        TextBlockRepr::Text { value: block.value }
    }
}

impl TextBlock {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl MessageBlock {
    pub fn text(value: impl Into<String>) -> Self {
        MessageBlock::Text {
            value: value.into(),
        }
    }

    pub fn code(value: impl Into<String>) -> Self {
        MessageBlock::Code {
            value: value.into(),
        }
    }

    pub fn bullets<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MessageBlock::Bullets {
            blocks: items.into_iter().map(TextBlock::new).collect(),
        }
    }

    /// Parse host-supplied JSON into blocks, rejecting unknown kinds.
    pub fn parse_list(value: serde_json::Value) -> Result<Vec<MessageBlock>, ChannelTalkError> {
        serde_json::from_value(value)
            .map_err(|e| ChannelTalkError::Validation(format!("invalid message block: {}", e)))
    }

    /// Plain-text rendering, used when an inbound event has no `plainText`.
    pub fn flatten_text(blocks: &[MessageBlock]) -> String {
        let mut lines = Vec::new();
        for block in blocks {
            match block {
                MessageBlock::Text { value } | MessageBlock::Code { value } => {
                    lines.push(value.clone())
                }
                MessageBlock::Bullets { blocks } => {
                    lines.extend(blocks.iter().map(|b| format!("- {}", b.value)))
                }
            }
        }
        lines.join("\n")
    }
}

/// Delivery options understood by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageOption {
    ActAsManager,
    DisplayAsChannel,
    DoNotPost,
    DoNotSearch,
    DoNotSendApp,
    DoNotUpdateDesk,
    Immutable,
    Private,
    Silent,
}

/// A message to post into a team-chat group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub group_id: String,
    pub plain_text: String,
    #[serde(default)]
    pub blocks: Vec<MessageBlock>,
    #[serde(default)]
    pub options: Vec<MessageOption>,
    /// Display name for the sender; sent as the `botName` query parameter.
    pub bot_name: Option<String>,
    /// Thread root this message replies to. Not part of the message body.
    pub root_message_id: Option<String>,
}

/// JSON body of `POST /open/v5/groups/{groupId}/messages`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody<'a> {
    plain_text: &'a str,
    #[serde(skip_serializing_if = "is_empty_slice")]
    blocks: &'a [MessageBlock],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    options: Vec<MessageOption>,
}

fn is_empty_slice<T>(slice: &&[T]) -> bool {
    slice.is_empty()
}

impl OutboundMessage {
    pub fn new(group_id: impl Into<String>, plain_text: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            plain_text: plain_text.into(),
            ..Self::default()
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<MessageBlock>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_option(mut self, option: MessageOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_bot_name(mut self, bot_name: impl Into<String>) -> Self {
        self.bot_name = Some(bot_name.into());
        self
    }

    /// Reject messages the provider would refuse before any request is made.
    pub fn validate(&self) -> Result<(), ChannelTalkError> {
        if self.group_id.trim().is_empty() {
            return Err(ChannelTalkError::Validation(
                "groupId cannot be empty".to_string(),
            ));
        }
        if self.plain_text.is_empty() && self.blocks.is_empty() {
            return Err(ChannelTalkError::Validation(
                "message needs plainText or blocks".to_string(),
            ));
        }
        for block in &self.blocks {
            if let MessageBlock::Bullets { blocks } = block {
                if blocks.is_empty() {
                    return Err(ChannelTalkError::Validation(
                        "bullets block needs at least one item".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Wire body; empty `blocks`/`options` are left out entirely.
    pub fn body(&self) -> MessageBody<'_> {
        let mut options: Vec<MessageOption> = Vec::with_capacity(self.options.len());
        for option in &self.options {
            if !options.contains(option) {
                options.push(*option);
            }
        }
        MessageBody {
            plain_text: &self.plain_text,
            blocks: &self.blocks,
            options,
        }
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: String,
    pub group_id: String,
    /// The decoded `message` object exactly as the provider returned it.
    pub message: Option<serde_json::Value>,
}

/// A webhook event that passed normalization, as handed to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    /// Display name only; never used for authorization.
    pub sender: String,
    pub sender_id: Option<String>,
    pub text: String,
    pub chat_id: String,
    pub thread_id: Option<String>,
    pub group_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// `[2024-01-01T00:00:00.000Z] sender [thread]: text`
    pub fn format_line(&self) -> String {
        let thread = if self.thread_id.is_some() {
            " [thread]"
        } else {
            ""
        };
        format!(
            "[{}] {}{}: {}",
            iso_timestamp(&self.timestamp),
            self.sender,
            thread,
            self.text
        )
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Why the policy filter turned an event away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    PolicyClosed,
    NotAllowlisted,
    NoMention,
    /// `mentionOnly` is set but no `botName` is configured.
    MentionUnconfigured,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::PolicyClosed => write!(f, "group policy is closed"),
            RejectReason::NotAllowlisted => write!(f, "group is not allowlisted"),
            RejectReason::NoMention => write!(f, "bot was not mentioned"),
            RejectReason::MentionUnconfigured => {
                write!(f, "mention-only mode without a bot name")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Accept,
    Reject(RejectReason),
}

impl PolicyDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, PolicyDecision::Accept)
    }
}
