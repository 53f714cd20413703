//! Accept/reject decision for normalized group messages.
//!
//! Checks run in a fixed order and stop at the first rejection:
//! group policy, then allowlist, then mention-only.

use crate::config::{GroupPolicy, ResolvedAccount};
use crate::types::{InboundMessage, PolicyDecision, RejectReason};

/// Filter settings extracted from a resolved account.
#[derive(Debug, Clone)]
pub struct PolicyFilter {
    pub group_policy: GroupPolicy,
    pub allowed_groups: Vec<String>,
    pub mention_only: bool,
    pub bot_name: Option<String>,
}

impl PolicyFilter {
    pub fn from_account(account: &ResolvedAccount) -> Self {
        Self {
            group_policy: account.group_policy,
            allowed_groups: account.config.allowed_groups.iter().cloned().collect(),
            mention_only: account.config.mention_only,
            bot_name: account.config.bot_name().map(str::to_string),
        }
    }

    pub fn decide(&self, message: &InboundMessage) -> PolicyDecision {
        if self.group_policy == GroupPolicy::Closed {
            return PolicyDecision::Reject(RejectReason::PolicyClosed);
        }

        if !self.allowed_groups.is_empty() && !self.allowed_groups.contains(&message.chat_id) {
            return PolicyDecision::Reject(RejectReason::NotAllowlisted);
        }

        if self.mention_only {
            let Some(bot_name) = self.bot_name.as_deref() else {
                return PolicyDecision::Reject(RejectReason::MentionUnconfigured);
            };
            if !mentions(&message.text, bot_name) {
                return PolicyDecision::Reject(RejectReason::NoMention);
            }
        }

        PolicyDecision::Accept
    }
}

/// Case-insensitive mention check: `@name` anywhere, or a bare token equal to the name.
pub fn mentions(text: &str, bot_name: &str) -> bool {
    let name = bot_name.trim().trim_start_matches('@').to_lowercase();
    if name.is_empty() {
        return false;
    }
    let text = text.to_lowercase();
    if text.contains(&format!("@{}", name)) {
        return true;
    }
    text.split_whitespace().any(|token| {
        token
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '_' && c != '-')
            .trim_start_matches('@')
            == name
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(chat_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            id: "m-1".to_string(),
            sender: "alice".to_string(),
            sender_id: None,
            text: text.to_string(),
            chat_id: chat_id.to_string(),
            thread_id: None,
            group_name: None,
            timestamp: Utc::now(),
        }
    }

    fn open_filter() -> PolicyFilter {
        PolicyFilter {
            group_policy: GroupPolicy::Open,
            allowed_groups: vec![],
            mention_only: false,
            bot_name: None,
        }
    }

    #[test]
    fn open_policy_accepts_everything() {
        assert_eq!(
            open_filter().decide(&message("g-1", "anything")),
            PolicyDecision::Accept
        );
    }

    #[test]
    fn closed_policy_rejects_regardless_of_other_settings() {
        let filter = PolicyFilter {
            group_policy: GroupPolicy::Closed,
            allowed_groups: vec!["g-1".to_string()],
            mention_only: true,
            bot_name: Some("Bot".to_string()),
        };
        assert_eq!(
            filter.decide(&message("g-1", "hi @Bot")),
            PolicyDecision::Reject(RejectReason::PolicyClosed)
        );
    }

    #[test]
    fn allowlist_rejects_other_groups_even_when_open() {
        let filter = PolicyFilter {
            allowed_groups: vec!["g-1".to_string()],
            ..open_filter()
        };
        assert_eq!(
            filter.decide(&message("g-2", "hi")),
            PolicyDecision::Reject(RejectReason::NotAllowlisted)
        );
        assert_eq!(filter.decide(&message("g-1", "hi")), PolicyDecision::Accept);
    }

    #[test]
    fn mention_only_requires_bot_name_in_text() {
        let filter = PolicyFilter {
            mention_only: true,
            bot_name: Some("Bot".to_string()),
            ..open_filter()
        };
        assert_eq!(
            filter.decide(&message("g-1", "hello")),
            PolicyDecision::Reject(RejectReason::NoMention)
        );
        assert_eq!(filter.decide(&message("g-1", "hi @Bot")), PolicyDecision::Accept);
        assert_eq!(filter.decide(&message("g-1", "BOT, status?")), PolicyDecision::Accept);
    }

    #[test]
    fn mention_only_without_bot_name_rejects_everything() {
        let filter = PolicyFilter {
            mention_only: true,
            ..open_filter()
        };
        assert_eq!(
            filter.decide(&message("g-1", "hi @Bot")),
            PolicyDecision::Reject(RejectReason::MentionUnconfigured)
        );
    }

    #[test]
    fn allowlist_is_checked_before_mention() {
        let filter = PolicyFilter {
            allowed_groups: vec!["g-1".to_string()],
            mention_only: true,
            bot_name: Some("Bot".to_string()),
            ..open_filter()
        };
        assert_eq!(
            filter.decide(&message("g-9", "hello")),
            PolicyDecision::Reject(RejectReason::NotAllowlisted)
        );
    }

    #[test]
    fn mention_matching() {
        assert!(mentions("hey @helper can you look", "Helper"));
        assert!(mentions("@HELPER", "helper"));
        assert!(mentions("ping helper.", "Helper"));
        assert!(mentions("hi @Support Bot", "Support Bot"));
        assert!(!mentions("helpers unite", "Helper"));
        assert!(!mentions("hello", "Bot"));
        assert!(!mentions("anything", "  "));
    }
}
