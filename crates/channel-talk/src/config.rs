use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ChannelTalkError;
use crate::types::Credentials;

/// The only account id this channel exposes.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

pub const DEFAULT_BASE_URL: &str = "https://api.channel.io";

pub const ACCESS_KEY_ENV: &str = "CHANNEL_TALK_ACCESS_KEY";
pub const ACCESS_SECRET_ENV: &str = "CHANNEL_TALK_ACCESS_SECRET";

/// Whether team-chat groups are processed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    Open,
    Closed,
}

impl std::fmt::Display for GroupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupPolicy::Open => write!(f, "open"),
            GroupPolicy::Closed => write!(f, "closed"),
        }
    }
}

/// Top-level configuration file.
///
/// ```toml
/// [defaults]
/// groupPolicy = "open"
///
/// [channel-talk]
/// accessKey = "..."
/// accessSecret = "..."
/// botName = "Helper"
///
/// [channel-talk.webhook]
/// port = 3979
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default)]
    pub defaults: ChannelDefaults,
    #[serde(rename = "channel-talk", default)]
    pub channel_talk: Option<ChannelTalkConfig>,
}

/// Settings shared by every channel of the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChannelDefaults {
    pub group_policy: Option<GroupPolicy>,
}

/// Channel Talk section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChannelTalkConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub access_secret: String,
    /// Provider API base URL override.
    pub base_url: Option<String>,
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Display name used for sends and for mention detection.
    pub bot_name: Option<String>,
    /// Person id the bot posts as; events from it are never surfaced.
    pub bot_person_id: Option<String>,
    /// Falls back to `[defaults].groupPolicy`, then `open`.
    pub group_policy: Option<GroupPolicy>,
    /// Group ids allowed through. Empty = every group.
    #[serde(default)]
    pub allowed_groups: BTreeSet<String>,
    #[serde(default)]
    pub mention_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookConfig {
    /// Port for the webhook receiver. `0` picks an ephemeral port.
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    #[serde(default = "default_webhook_path")]
    pub path: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Shared token expected as `?token=` or `x-webhook-token`.
    pub token: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_webhook_port() -> u16 {
    3979
}

fn default_webhook_path() -> String {
    "/api/channel-talk".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            port: default_webhook_port(),
            path: default_webhook_path(),
            bind_address: default_bind_address(),
            token: None,
        }
    }
}

impl Default for ChannelTalkConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            access_key: String::new(),
            access_secret: String::new(),
            base_url: None,
            webhook: WebhookConfig::default(),
            bot_name: None,
            bot_person_id: None,
            group_policy: None,
            allowed_groups: BTreeSet::new(),
            mention_only: false,
        }
    }
}

impl ChannelTalkConfig {
    /// Both secrets present, or nothing.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.access_key.is_empty() || self.access_secret.is_empty() {
            return None;
        }
        Some(Credentials::new(&self.access_key, &self.access_secret))
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
    }

    /// Non-empty trimmed bot name.
    pub fn bot_name(&self) -> Option<&str> {
        self.bot_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

impl BridgeConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, ChannelTalkError> {
        toml::from_str(toml_str)
            .map_err(|e| ChannelTalkError::Config(format!("invalid configuration: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String, ChannelTalkError> {
        toml::to_string_pretty(self)
            .map_err(|e| ChannelTalkError::Config(format!("serialize configuration: {}", e)))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ChannelTalkError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChannelTalkError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Write the configuration as TOML, replacing `path`.
    pub fn save(&self, path: &Path) -> Result<(), ChannelTalkError> {
        std::fs::write(path, self.to_toml()?).map_err(|e| {
            ChannelTalkError::Config(format!("cannot write {}: {}", path.display(), e))
        })
    }

    /// Store the given secrets and enable the channel. Secrets that are
    /// `None` or empty keep their current value; other settings are untouched.
    pub fn apply_account_config(&mut self, access_key: Option<&str>, access_secret: Option<&str>) {
        let channel = self.channel_talk.get_or_insert_with(ChannelTalkConfig::default);
        if let Some(key) = access_key.filter(|k| !k.is_empty()) {
            channel.access_key = key.to_string();
        }
        if let Some(secret) = access_secret.filter(|s| !s.is_empty()) {
            channel.access_secret = secret.to_string();
        }
        channel.enabled = true;
    }

    /// Fill empty secrets from `CHANNEL_TALK_ACCESS_KEY` / `CHANNEL_TALK_ACCESS_SECRET`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = lookup(ACCESS_KEY_ENV).filter(|v| !v.is_empty());
        let secret = lookup(ACCESS_SECRET_ENV).filter(|v| !v.is_empty());
        if key.is_none() && secret.is_none() {
            return;
        }
        let channel = self.channel_talk.get_or_insert_with(ChannelTalkConfig::default);
        if channel.access_key.is_empty() {
            if let Some(key) = key {
                channel.access_key = key;
            }
        }
        if channel.access_secret.is_empty() {
            if let Some(secret) = secret {
                channel.access_secret = secret;
            }
        }
    }

    /// Resolve the account the host asked for.
    pub fn resolve_account(&self, account_id: &str) -> Result<ResolvedAccount, ChannelTalkError> {
        if account_id != DEFAULT_ACCOUNT_ID {
            return Err(ChannelTalkError::Config(format!(
                "unknown account '{}'",
                account_id
            )));
        }
        let config = self.channel_talk.clone().unwrap_or_default();
        let group_policy = config
            .group_policy
            .or(self.defaults.group_policy)
            .unwrap_or(GroupPolicy::Open);
        Ok(ResolvedAccount {
            account_id: account_id.to_string(),
            credentials: config.credentials(),
            group_policy,
            config,
        })
    }

    pub fn list_account_ids(&self) -> Vec<String> {
        vec![DEFAULT_ACCOUNT_ID.to_string()]
    }
}

/// Configuration of one account after defaults are applied.
#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    pub account_id: String,
    /// `None` unless both secrets are present.
    pub credentials: Option<Credentials>,
    /// Effective group policy.
    pub group_policy: GroupPolicy,
    pub config: ChannelTalkConfig,
}

impl ResolvedAccount {
    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Security and consistency warnings for the host to display.
    pub fn collect_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.group_policy == GroupPolicy::Open {
            warnings.push(
                "- Channel Talk: groupPolicy=\"open\" processes all team chat messages. \
                 Set channel-talk.groupPolicy=\"closed\" to disable team chat processing."
                    .to_string(),
            );
        }
        if self.config.mention_only && self.config.bot_name().is_none() {
            warnings.push(
                "- Channel Talk: mentionOnly=true without botName rejects every message. \
                 Set channel-talk.botName."
                    .to_string(),
            );
        }
        warnings
    }
}
