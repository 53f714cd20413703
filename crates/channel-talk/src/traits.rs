use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BridgeConfig, ResolvedAccount};
use crate::error::ChannelTalkError;
use crate::types::InboundMessage;

/// Host callback for messages that passed normalization and the policy filter.
///
/// Invoked once per accepted webhook event, on its own task.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_message(&self, message: InboundMessage) -> Result<(), ChannelTalkError>;
}

/// Host-side configuration lookup.
///
/// Called on every start, send and action so that secrets and policy always
/// reflect the latest configuration.
#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn resolve_account(&self, account_id: &str) -> Result<ResolvedAccount, ChannelTalkError>;

    async fn list_account_ids(&self) -> Result<Vec<String>, ChannelTalkError>;
}

/// Resolver over an in-memory configuration.
pub struct StaticResolver {
    config: Arc<BridgeConfig>,
}

impl StaticResolver {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl AccountResolver for StaticResolver {
    async fn resolve_account(&self, account_id: &str) -> Result<ResolvedAccount, ChannelTalkError> {
        self.config.resolve_account(account_id)
    }

    async fn list_account_ids(&self) -> Result<Vec<String>, ChannelTalkError> {
        Ok(self.config.list_account_ids())
    }
}

/// Resolver that re-reads a TOML file on every lookup, so edits apply
/// without restarting the host.
pub struct FileResolver {
    path: PathBuf,
    apply_env: bool,
}

impl FileResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            apply_env: true,
        }
    }

    /// Skip `CHANNEL_TALK_ACCESS_*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.apply_env = false;
        self
    }

    async fn load(&self) -> Result<BridgeConfig, ChannelTalkError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ChannelTalkError::Config(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let mut config = BridgeConfig::from_toml(&content)?;
        if self.apply_env {
            config.apply_env_overrides();
        }
        Ok(config)
    }
}

#[async_trait]
impl AccountResolver for FileResolver {
    async fn resolve_account(&self, account_id: &str) -> Result<ResolvedAccount, ChannelTalkError> {
        self.load().await?.resolve_account(account_id)
    }

    async fn list_account_ids(&self) -> Result<Vec<String>, ChannelTalkError> {
        Ok(self.load().await?.list_account_ids())
    }
}
