//! Channel manager: the host-facing entry points.
//!
//! Resolves configuration through the host's [`AccountResolver`] on every
//! call, starts webhook receivers, sends outbound messages and answers the
//! `read` action and status queries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ChannelTalkApiClient;
use crate::config::ResolvedAccount;
use crate::error::ChannelTalkError;
use crate::history::{read_history, ActionResult, ReadRequest, READ_ACTION};
use crate::logging::InteractionLogger;
use crate::receiver::WebhookReceiver;
use crate::retry::RetryPolicy;
use crate::status::{
    build_account_snapshot, build_channel_summary, AccountSnapshot, ChannelSummary,
    ReceiverState, StatusHandle,
};
use crate::traits::{AccountResolver, InboundHandler};
use crate::types::{OutboundMessage, SendReceipt};

/// Background task of a started account. Resolves when the receiver stops.
pub type AccountTask = JoinHandle<Result<(), ChannelTalkError>>;

pub struct ChannelTalkManager {
    resolver: Arc<dyn AccountResolver>,
    logger: Arc<InteractionLogger>,
    retry: RetryPolicy,
    receivers: RwLock<HashMap<String, StatusHandle>>,
    /// Last outbound 401/403 per account, cleared by the next successful send.
    auth_errors: RwLock<HashMap<String, String>>,
}

impl ChannelTalkManager {
    pub fn new(resolver: Arc<dyn AccountResolver>, logger: Arc<InteractionLogger>) -> Self {
        Self {
            resolver,
            logger,
            retry: RetryPolicy::default(),
            receivers: RwLock::new(HashMap::new()),
            auth_errors: RwLock::new(HashMap::new()),
        }
    }

    /// Retry schedule for outbound calls (sends and reads).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Start the webhook receiver of `account_id`.
    ///
    /// Returns once the listener is bound. The returned task runs until
    /// `abort` is cancelled.
    pub async fn start_account(
        &self,
        account_id: &str,
        abort: CancellationToken,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<AccountTask, ChannelTalkError> {
        let account = self.resolver.resolve_account(account_id).await?;

        let mut receivers = self.receivers.write().await;
        if let Some(existing) = receivers.get(account_id) {
            if existing.snapshot().state.is_active() {
                return Err(ChannelTalkError::AlreadyRunning);
            }
        }

        for warning in account.collect_warnings() {
            tracing::warn!(account = %account_id, "{}", warning);
        }
        let receiver = WebhookReceiver::new(account, handler, self.logger.clone())?;
        let mut status = receiver.status_handle();
        receivers.insert(account_id.to_string(), status.clone());

        tracing::info!(account = %account_id, "starting Channel Talk webhook receiver");
        let task = tokio::spawn(receiver.run(abort));

        // Hold the lock until the receiver settles so a concurrent start
        // sees it as active.
        let settled = status
            .wait_for(|s| matches!(s.state, ReceiverState::Running | ReceiverState::Failed))
            .await;
        drop(receivers);

        match settled {
            Ok(s) if s.state == ReceiverState::Running => Ok(task),
            _ => match task.await {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(ChannelTalkError::Listener(
                    "receiver stopped before it was running".to_string(),
                )),
                Err(e) => Err(ChannelTalkError::Internal(format!(
                    "receiver task failed: {}",
                    e
                ))),
            },
        }
    }

    /// Send a message through `account_id`.
    ///
    /// Fills `bot_name` from the account when the message does not set one.
    pub async fn send(
        &self,
        account_id: &str,
        message: OutboundMessage,
    ) -> Result<SendReceipt, ChannelTalkError> {
        let account = self.resolver.resolve_account(account_id).await?;
        if !account.is_enabled() {
            return Err(ChannelTalkError::Config(format!(
                "Channel Talk account '{}' is disabled",
                account_id
            )));
        }
        let client = self.client_for(&account)?;

        let mut message = message;
        if message.bot_name.as_deref().map_or(true, str::is_empty) {
            message.bot_name = account.config.bot_name().map(str::to_string);
        }

        let start = Instant::now();
        let result = client.send_message(&message).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let entry = match &result {
            Ok(receipt) => InteractionLogger::outbound_entry(
                account_id,
                &message.group_id,
                Some(receipt.message_id.clone()).filter(|id| !id.is_empty()),
                duration_ms,
                None,
            ),
            Err(e) => {
                tracing::error!(
                    account = %account_id,
                    group_id = %message.group_id,
                    "Channel Talk send failed: {}",
                    e
                );
                InteractionLogger::outbound_entry(
                    account_id,
                    &message.group_id,
                    None,
                    duration_ms,
                    Some(e.to_string()),
                )
            }
        };
        self.logger.log(&entry).await;

        let mut auth_errors = self.auth_errors.write().await;
        match &result {
            Ok(_) => {
                auth_errors.remove(account_id);
            }
            Err(e @ ChannelTalkError::Auth { .. }) => {
                auth_errors.insert(account_id.to_string(), e.to_string());
            }
            Err(_) => {}
        }
        result
    }

    /// Actions the host may offer for `account_id`: `read` once credentials exist.
    pub async fn list_actions(&self, account_id: &str) -> Vec<&'static str> {
        match self.resolver.resolve_account(account_id).await {
            Ok(account) if account.is_configured() => vec![READ_ACTION],
            _ => Vec::new(),
        }
    }

    /// Run a host action. Failures of a known action come back as error
    /// content; an unknown action is a validation error.
    pub async fn handle_action(
        &self,
        account_id: &str,
        action: &str,
        params: &Value,
    ) -> Result<ActionResult, ChannelTalkError> {
        if action != READ_ACTION {
            return Err(ChannelTalkError::Validation(format!(
                "unsupported action '{}'",
                action
            )));
        }

        let account = match self.resolver.resolve_account(account_id).await {
            Ok(account) => account,
            Err(e) => return Ok(ActionResult::error(e.to_string())),
        };
        if !account.is_configured() {
            return Ok(ActionResult::error(
                "Channel Talk credentials not configured.",
            ));
        }
        let client = match self.client_for(&account) {
            Ok(client) => client,
            Err(e) => return Ok(ActionResult::error(e.to_string())),
        };
        Ok(read_history(&client, &ReadRequest::from_params(params)).await)
    }

    /// Current configuration and runtime view of `account_id`.
    ///
    /// `last_error` is the receiver's lifecycle error, else the last
    /// outbound authentication failure.
    pub async fn status(&self, account_id: &str) -> Result<AccountSnapshot, ChannelTalkError> {
        let account = self.resolver.resolve_account(account_id).await?;
        let runtime = self
            .receivers
            .read()
            .await
            .get(account_id)
            .map(StatusHandle::snapshot);
        let mut snapshot = build_account_snapshot(&account, runtime.as_ref());
        if snapshot.last_error.is_none() {
            snapshot.last_error = self.auth_errors.read().await.get(account_id).cloned();
        }
        Ok(snapshot)
    }

    pub async fn summary(&self, account_id: &str) -> Result<ChannelSummary, ChannelTalkError> {
        Ok(build_channel_summary(&self.status(account_id).await?))
    }

    /// Status handle of a started account, for following its transitions.
    pub async fn status_handle(&self, account_id: &str) -> Option<StatusHandle> {
        self.receivers.read().await.get(account_id).cloned()
    }

    pub async fn collect_warnings(&self, account_id: &str) -> Result<Vec<String>, ChannelTalkError> {
        Ok(self
            .resolver
            .resolve_account(account_id)
            .await?
            .collect_warnings())
    }

    pub async fn list_account_ids(&self) -> Result<Vec<String>, ChannelTalkError> {
        self.resolver.list_account_ids().await
    }

    fn client_for(&self, account: &ResolvedAccount) -> Result<ChannelTalkApiClient, ChannelTalkError> {
        let credentials = account.credentials.clone().ok_or_else(|| {
            ChannelTalkError::Config(format!(
                "Channel Talk account '{}' is missing accessKey/accessSecret",
                account.account_id
            ))
        })?;
        Ok(ChannelTalkApiClient::new(credentials, account.config.base_url())?
            .with_retry_policy(self.retry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, DEFAULT_ACCOUNT_ID};
    use crate::traits::StaticResolver;
    use crate::types::InboundMessage;
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopHandler;

    #[async_trait]
    impl InboundHandler for NoopHandler {
        async fn handle_message(&self, _message: InboundMessage) -> Result<(), ChannelTalkError> {
            Ok(())
        }
    }

    fn manager(toml: &str) -> ChannelTalkManager {
        let config = BridgeConfig::from_toml(toml).unwrap();
        ChannelTalkManager::new(
            Arc::new(StaticResolver::new(config)),
            Arc::new(InteractionLogger::new(None)),
        )
        .with_retry_policy(RetryPolicy::none())
    }

    const LOCAL: &str = r#"
        [channel-talk]
        accessKey = "k"
        accessSecret = "s"

        [channel-talk.webhook]
        bindAddress = "127.0.0.1"
        port = 0
    "#;

    #[tokio::test]
    async fn read_is_offered_only_when_configured() {
        assert_eq!(manager(LOCAL).list_actions(DEFAULT_ACCOUNT_ID).await, vec!["read"]);
        assert!(manager("").list_actions(DEFAULT_ACCOUNT_ID).await.is_empty());
    }

    #[tokio::test]
    async fn read_without_credentials_is_error_content() {
        let result = manager("")
            .handle_action(DEFAULT_ACCOUNT_ID, "read", &json!({ "target": "g-1" }))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.joined_text(), "Channel Talk credentials not configured.");
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let err = manager(LOCAL)
            .handle_action(DEFAULT_ACCOUNT_ID, "delete", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelTalkError::Validation(_)));
    }

    #[tokio::test]
    async fn send_requires_credentials() {
        let err = manager("")
            .send(DEFAULT_ACCOUNT_ID, OutboundMessage::new("g-1", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelTalkError::Config(_)));
    }

    #[tokio::test]
    async fn auth_failure_becomes_account_last_error() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/open/v5/groups/g-1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;
        let manager = manager(&format!(
            "[channel-talk]\naccessKey = \"k\"\naccessSecret = \"s\"\nbaseUrl = \"{}\"\n",
            server.uri()
        ));

        let err = manager
            .send(DEFAULT_ACCOUNT_ID, OutboundMessage::new("g-1", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelTalkError::Auth { status: 401, .. }));
        let snapshot = manager.status(DEFAULT_ACCOUNT_ID).await.unwrap();
        let last_error = snapshot.last_error.unwrap();
        assert!(last_error.contains("401"), "{}", last_error);
        assert!(manager
            .summary(DEFAULT_ACCOUNT_ID)
            .await
            .unwrap()
            .last_error
            .is_some());

        server.reset().await;
        Mock::given(method("POST"))
            .and(path("/open/v5/groups/g-1/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "message": { "id": "m-1" } })),
            )
            .mount(&server)
            .await;
        manager
            .send(DEFAULT_ACCOUNT_ID, OutboundMessage::new("g-1", "hi"))
            .await
            .unwrap();
        assert!(manager.status(DEFAULT_ACCOUNT_ID).await.unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn status_before_start_is_default_runtime() {
        let snapshot = manager(LOCAL).status(DEFAULT_ACCOUNT_ID).await.unwrap();
        assert!(snapshot.configured);
        assert!(snapshot.enabled);
        assert!(!snapshot.running);
        assert_eq!(snapshot.state, ReceiverState::Stopped);
    }

    #[tokio::test]
    async fn open_policy_is_warned_about() {
        let warnings = manager(LOCAL).collect_warnings(DEFAULT_ACCOUNT_ID).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("groupPolicy=\"open\""));
    }

    #[tokio::test]
    async fn second_start_is_refused_while_running() {
        let manager = manager(LOCAL);
        let abort = CancellationToken::new();
        let task = manager
            .start_account(DEFAULT_ACCOUNT_ID, abort.clone(), Arc::new(NoopHandler))
            .await
            .unwrap();

        let snapshot = manager.status(DEFAULT_ACCOUNT_ID).await.unwrap();
        assert!(snapshot.running);
        assert!(snapshot.port.unwrap() > 0);
        assert!(snapshot.last_start_at.is_some());

        let err = manager
            .start_account(DEFAULT_ACCOUNT_ID, abort.clone(), Arc::new(NoopHandler))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelTalkError::AlreadyRunning));

        abort.cancel();
        task.await.unwrap().unwrap();
        let stopped = manager.status(DEFAULT_ACCOUNT_ID).await.unwrap();
        assert_eq!(stopped.state, ReceiverState::Stopped);
        assert!(stopped.last_stop_at.is_some());
    }

    #[tokio::test]
    async fn disabled_account_does_not_start() {
        let manager = manager(
            r#"
            [channel-talk]
            accessKey = "k"
            accessSecret = "s"
            enabled = false
            "#,
        );
        let err = manager
            .start_account(
                DEFAULT_ACCOUNT_ID,
                CancellationToken::new(),
                Arc::new(NoopHandler),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelTalkError::Config(_)));
        assert!(manager.status_handle(DEFAULT_ACCOUNT_ID).await.is_none());
    }
}
