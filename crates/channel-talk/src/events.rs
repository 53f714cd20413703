//! Channel Talk webhook payload parsing and normalization.
//!
//! Turns a raw webhook body into either a normalized [`InboundMessage`]
//! candidate or a drop decision. Only team-chat (`group`) messages from
//! people other than the bot itself become candidates.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelTalkError;
use crate::types::InboundMessage;

/// Webhook payload as delivered by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    /// Event action, e.g. `push`.
    #[serde(default)]
    pub event: String,
    /// e.g. `message.created.teamChat`; absent for push events.
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    pub entity: Entity,
    #[serde(default)]
    pub refers: Refers,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub chat_type: ChatType,
    #[serde(default)]
    pub person_type: PersonType,
    pub plain_text: Option<String>,
    /// Kept loosely typed: inbound messages may carry block kinds we never send.
    pub blocks: Option<Vec<serde_json::Value>>,
    pub chat_id: Option<String>,
    pub person_id: Option<String>,
    /// Epoch milliseconds.
    pub created_at: Option<i64>,
    pub thread_msg: Option<bool>,
    pub thread_key: Option<String>,
    pub root_message_id: Option<String>,
    pub thread_root: Option<bool>,
}

/// Display-only references to the manager and group involved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Refers {
    pub manager: Option<EntityRef>,
    pub group: Option<EntityRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChatType {
    Group,
    User,
    Customer,
    Other(String),
}

impl Default for ChatType {
    fn default() -> Self {
        ChatType::Other(String::new())
    }
}

impl From<String> for ChatType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "group" => ChatType::Group,
            "user" => ChatType::User,
            "customer" => ChatType::Customer,
            _ => ChatType::Other(value),
        }
    }
}

impl From<ChatType> for String {
    fn from(value: ChatType) -> Self {
        match value {
            ChatType::Group => "group".to_string(),
            ChatType::User => "user".to_string(),
            ChatType::Customer => "customer".to_string(),
            ChatType::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PersonType {
    Manager,
    Bot,
    Customer,
    Other(String),
}

impl Default for PersonType {
    fn default() -> Self {
        PersonType::Other(String::new())
    }
}

impl From<String> for PersonType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "manager" => PersonType::Manager,
            "bot" => PersonType::Bot,
            "customer" => PersonType::Customer,
            _ => PersonType::Other(value),
        }
    }
}

impl From<PersonType> for String {
    fn from(value: PersonType) -> Self {
        match value {
            PersonType::Manager => "manager".to_string(),
            PersonType::Bot => "bot".to_string(),
            PersonType::Customer => "customer".to_string(),
            PersonType::Other(other) => other,
        }
    }
}

/// Outcome of normalizing one webhook event.
#[derive(Debug, Clone)]
pub enum Classification {
    Candidate(InboundMessage),
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// `user` / `customer` chats are outside team-chat scope.
    NotGroupChat,
    /// Sent by a bot, possibly this one.
    BotSender,
    /// Sent under the bot's own person id.
    OwnMessage,
    MissingChatId,
    EmptyText,
    Duplicate,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropReason::NotGroupChat => "not a group chat",
            DropReason::BotSender => "bot sender",
            DropReason::OwnMessage => "own message",
            DropReason::MissingChatId => "missing chat id",
            DropReason::EmptyText => "empty text",
            DropReason::Duplicate => "duplicate delivery",
        };
        write!(f, "{}", s)
    }
}

/// Parse a webhook body. Malformed JSON or a missing `entity` is a validation error.
pub fn parse_event(body: &[u8]) -> Result<InboundEvent, ChannelTalkError> {
    serde_json::from_slice(body)
        .map_err(|e| ChannelTalkError::Validation(format!("webhook payload: {}", e)))
}

/// Normalize an event into a candidate message or a drop decision.
///
/// `bot_person_id` is the person id the bot posts under, when known.
pub fn classify(event: &InboundEvent, bot_person_id: Option<&str>) -> Classification {
    let entity = &event.entity;

    if entity.chat_type != ChatType::Group {
        return Classification::Dropped(DropReason::NotGroupChat);
    }
    if entity.person_type == PersonType::Bot {
        return Classification::Dropped(DropReason::BotSender);
    }
    if let (Some(own), Some(person)) = (bot_person_id, entity.person_id.as_deref()) {
        if own == person {
            return Classification::Dropped(DropReason::OwnMessage);
        }
    }

    let chat_id = match entity
        .chat_id
        .clone()
        .or_else(|| event.refers.group.as_ref().map(|g| g.id.clone()))
        .filter(|id| !id.is_empty())
    {
        Some(id) => id,
        None => return Classification::Dropped(DropReason::MissingChatId),
    };

    let text = message_text(entity);
    if text.trim().is_empty() {
        return Classification::Dropped(DropReason::EmptyText);
    }

    let thread_id = if entity.thread_msg.unwrap_or(false) {
        entity
            .root_message_id
            .clone()
            .or_else(|| entity.thread_key.clone())
    } else {
        None
    };

    let sender = event
        .refers
        .manager
        .as_ref()
        .and_then(|m| m.name.clone())
        .or_else(|| entity.person_id.clone())
        .unwrap_or_else(|| "unknown".to_string());

    Classification::Candidate(InboundMessage {
        id: entity.id.clone(),
        sender,
        sender_id: entity.person_id.clone(),
        text,
        chat_id,
        thread_id,
        group_name: event.refers.group.as_ref().and_then(|g| g.name.clone()),
        timestamp: entity
            .created_at
            .and_then(millis_to_datetime)
            .unwrap_or_else(Utc::now),
    })
}

pub(crate) fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// `plainText`, or the text carried by the blocks when it is absent.
fn message_text(entity: &Entity) -> String {
    if let Some(text) = entity.plain_text.as_deref().filter(|t| !t.is_empty()) {
        return text.to_string();
    }
    let mut lines = Vec::new();
    if let Some(blocks) = &entity.blocks {
        for block in blocks {
            collect_block_text(block, &mut lines);
        }
    }
    lines.join("\n")
}

fn collect_block_text(block: &serde_json::Value, lines: &mut Vec<String>) {
    if let Some(value) = block.get("value").and_then(|v| v.as_str()) {
        lines.push(value.to_string());
    }
    if let Some(children) = block.get("blocks").and_then(|v| v.as_array()) {
        for child in children {
            collect_block_text(child, lines);
        }
    }
}
