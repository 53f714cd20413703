//! Webhook receiver for one account.
//!
//! Runs an Axum listener that verifies, parses and normalizes Channel Talk
//! webhook deliveries, acknowledges them immediately and pushes candidates
//! onto a bounded queue. A dispatcher task drains the queue, applies the
//! [`PolicyFilter`] and hands accepted messages to the host's
//! [`InboundHandler`], each on its own task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ResolvedAccount;
use crate::dedup::RecentIds;
use crate::error::ChannelTalkError;
use crate::events::{classify, parse_event, Classification, DropReason};
use crate::logging::{InteractionAction, InteractionLogger};
use crate::policy::PolicyFilter;
use crate::status::{ReceiverState, StatusHandle, StatusPublisher};
use crate::traits::InboundHandler;
use crate::types::{InboundMessage, PolicyDecision};
use crate::verify::{token_from_query, verify_webhook_token, TOKEN_HEADER};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(120);

const HEALTH_PATH: &str = "/health";

/// Shared state for the Axum handlers.
pub(crate) struct WebhookState {
    account_id: String,
    token: Option<String>,
    bot_person_id: Option<String>,
    dedup: Arc<RecentIds>,
    queue: mpsc::Sender<InboundMessage>,
}

impl WebhookState {
    pub(crate) fn new(
        account: &ResolvedAccount,
        dedup: Arc<RecentIds>,
        queue: mpsc::Sender<InboundMessage>,
    ) -> Self {
        Self {
            account_id: account.account_id.clone(),
            token: account.config.webhook.token.clone().filter(|t| !t.is_empty()),
            bot_person_id: account
                .config
                .bot_person_id
                .clone()
                .filter(|id| !id.is_empty()),
            dedup,
            queue,
        }
    }
}

/// Webhook listener plus dispatcher for a single account.
///
/// Consumed by [`WebhookReceiver::run`]; grab a [`StatusHandle`] first to
/// follow its lifecycle.
pub struct WebhookReceiver {
    account: ResolvedAccount,
    path: String,
    handler: Arc<dyn InboundHandler>,
    logger: Arc<InteractionLogger>,
    publisher: Arc<StatusPublisher>,
    dedup: Arc<RecentIds>,
    queue_capacity: usize,
    dispatch_timeout: Duration,
}

impl WebhookReceiver {
    pub fn new(
        account: ResolvedAccount,
        handler: Arc<dyn InboundHandler>,
        logger: Arc<InteractionLogger>,
    ) -> Result<Self, ChannelTalkError> {
        if !account.is_enabled() {
            return Err(ChannelTalkError::Config(format!(
                "Channel Talk account '{}' is disabled",
                account.account_id
            )));
        }
        if !account.is_configured() {
            return Err(ChannelTalkError::Config(format!(
                "Channel Talk account '{}' is missing accessKey/accessSecret",
                account.account_id
            )));
        }

        let path = normalize_path(&account.config.webhook.path);
        if path == HEALTH_PATH {
            return Err(ChannelTalkError::Config(format!(
                "webhook path cannot be {}",
                HEALTH_PATH
            )));
        }

        let (publisher, _) = StatusPublisher::new(&account.account_id);
        Ok(Self {
            account,
            path,
            handler,
            logger,
            publisher: Arc::new(publisher),
            dedup: Arc::new(RecentIds::default()),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        })
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.publisher.subscribe()
    }

    /// Bind, serve until `abort` fires, then drain and stop.
    ///
    /// Returns `Listener` when the bind fails or the server dies; the status
    /// is `Failed` with `last_error` set in both cases.
    pub async fn run(self, abort: CancellationToken) -> Result<(), ChannelTalkError> {
        let account_id = self.account.account_id.clone();
        self.publisher.transition(|s| {
            s.state = ReceiverState::Starting;
            s.last_error = None;
        });

        let webhook = &self.account.config.webhook;
        let addr = format!("{}:{}", webhook.bind_address, webhook.port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                let message = format!("bind {} failed: {}", addr, e);
                tracing::error!(account = %account_id, "Channel Talk webhook listener: {}", message);
                self.publisher.transition(|s| {
                    s.state = ReceiverState::Failed;
                    s.last_error = Some(message.clone());
                });
                return Err(ChannelTalkError::Listener(message));
            }
        };
        let port = listener
            .local_addr()
            .map(|local| local.port())
            .unwrap_or(webhook.port);

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let state = Arc::new(WebhookState::new(&self.account, self.dedup.clone(), tx));
        let app = router(&self.path, state);

        let dispatcher = Dispatcher {
            account_id: account_id.clone(),
            filter: PolicyFilter::from_account(&self.account),
            handler: self.handler.clone(),
            logger: self.logger.clone(),
            timeout: self.dispatch_timeout,
        };
        let dispatch_task = tokio::spawn(dispatcher.run(rx));

        self.publisher.transition(|s| {
            s.state = ReceiverState::Running;
            s.last_start_at = Some(Utc::now());
            s.port = Some(port);
        });
        tracing::info!(
            account = %account_id,
            bind = %webhook.bind_address,
            port,
            path = %self.path,
            "Channel Talk webhook server listening"
        );

        let publisher = self.publisher.clone();
        let shutdown = async move {
            abort.cancelled().await;
            publisher.transition(|s| s.state = ReceiverState::Stopping);
        };
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        // The router, and with it the queue sender, is gone once serve
        // returns, so the dispatcher finishes after draining.
        if let Err(e) = dispatch_task.await {
            tracing::error!(account = %account_id, "Channel Talk dispatcher aborted: {}", e);
        }

        match served {
            Ok(()) => {
                self.publisher.transition(|s| {
                    s.state = ReceiverState::Stopped;
                    s.last_stop_at = Some(Utc::now());
                });
                tracing::info!(account = %account_id, "Channel Talk webhook server stopped");
                Ok(())
            }
            Err(e) => {
                let message = format!("webhook server error: {}", e);
                tracing::error!(account = %account_id, "{}", message);
                self.publisher.transition(|s| {
                    s.state = ReceiverState::Failed;
                    s.last_error = Some(message.clone());
                    s.last_stop_at = Some(Utc::now());
                });
                Err(ChannelTalkError::Listener(message))
            }
        }
    }
}

/// `POST {path}` plus `GET /health`.
pub(crate) fn router(path: &str, state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(path, post(handle_webhook))
        .route(HEALTH_PATH, get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        "/api/channel-talk".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let span = tracing::info_span!(
        "channel_talk_webhook",
        account = %state.account_id,
        delivery = %Uuid::new_v4()
    );
    accept_delivery(&state, query.as_deref(), &headers, &body)
        .instrument(span)
        .await
}

async fn accept_delivery(
    state: &WebhookState,
    query: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> (StatusCode, String) {
    if let Some(ref token) = state.token {
        let presented = headers
            .get(TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| token_from_query(query));
        if let Err(e) = verify_webhook_token(token, presented.as_deref()) {
            tracing::warn!("Channel Talk webhook token verification failed: {}", e);
            return (StatusCode::UNAUTHORIZED, "invalid token".to_string());
        }
    }

    let event = match parse_event(body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Failed to parse Channel Talk webhook: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let message = match classify(&event, state.bot_person_id.as_deref()) {
        Classification::Candidate(message) => message,
        Classification::Dropped(reason) => {
            tracing::debug!(event_id = %event.entity.id, %reason, "webhook event dropped");
            return (StatusCode::OK, String::new());
        }
    };

    if !state.dedup.insert(&message.id) {
        tracing::debug!(
            event_id = %message.id,
            reason = %DropReason::Duplicate,
            "webhook event dropped"
        );
        return (StatusCode::OK, String::new());
    }

    let message_id = message.id.clone();
    match state.queue.try_send(message) {
        Ok(()) => (StatusCode::OK, String::new()),
        Err(TrySendError::Full(_)) => {
            state.dedup.remove(&message_id);
            tracing::warn!(event_id = %message_id, "dispatch queue full; asking for redelivery");
            (StatusCode::SERVICE_UNAVAILABLE, "busy".to_string())
        }
        Err(TrySendError::Closed(_)) => {
            state.dedup.remove(&message_id);
            (StatusCode::SERVICE_UNAVAILABLE, "shutting down".to_string())
        }
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Queue consumer: policy decision, interaction log, host callback.
struct Dispatcher {
    account_id: String,
    filter: PolicyFilter,
    handler: Arc<dyn InboundHandler>,
    logger: Arc<InteractionLogger>,
    timeout: Duration,
}

impl Dispatcher {
    async fn run(self, mut rx: mpsc::Receiver<InboundMessage>) {
        let this = Arc::new(self);
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(message) => this.route(message, &mut tasks).await,
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    report_join(&this.account_id, joined);
                }
            }
        }
        while let Some(joined) = tasks.join_next().await {
            report_join(&this.account_id, joined);
        }
    }

    async fn route(self: &Arc<Self>, message: InboundMessage, tasks: &mut JoinSet<()>) {
        match self.filter.decide(&message) {
            PolicyDecision::Accept => {
                let this = self.clone();
                tasks.spawn(async move { this.dispatch(message).await });
            }
            PolicyDecision::Reject(reason) => {
                tracing::debug!(
                    account = %self.account_id,
                    chat_id = %message.chat_id,
                    %reason,
                    "message rejected by policy"
                );
                let entry = InteractionLogger::inbound_entry(
                    &self.account_id,
                    InteractionAction::Rejected,
                    &message.chat_id,
                    &message.id,
                    Some(reason.to_string()),
                    None,
                    None,
                );
                self.logger.log(&entry).await;
            }
        }
    }

    async fn dispatch(&self, message: InboundMessage) {
        let chat_id = message.chat_id.clone();
        let message_id = message.id.clone();
        let start = Instant::now();

        let error = match tokio::time::timeout(self.timeout, self.handler.handle_message(message))
            .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "handler timed out after {}s",
                self.timeout.as_secs()
            )),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let action = match error {
            None => InteractionAction::Dispatched,
            Some(ref e) => {
                tracing::error!(
                    account = %self.account_id,
                    chat_id = %chat_id,
                    "Failed to handle Channel Talk message: {}",
                    e
                );
                InteractionAction::DispatchFailed
            }
        };
        let entry = InteractionLogger::inbound_entry(
            &self.account_id,
            action,
            &chat_id,
            &message_id,
            None,
            Some(duration_ms),
            error,
        );
        self.logger.log(&entry).await;
    }
}

fn report_join(account_id: &str, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!(account = %account_id, "dispatch task failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, DEFAULT_ACCOUNT_ID};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    struct NoopHandler;

    #[async_trait]
    impl InboundHandler for NoopHandler {
        async fn handle_message(&self, _message: InboundMessage) -> Result<(), ChannelTalkError> {
            Ok(())
        }
    }

    fn account(extra: &str) -> ResolvedAccount {
        let toml = format!(
            "[channel-talk]\naccessKey = \"k\"\naccessSecret = \"s\"\n{}",
            extra
        );
        BridgeConfig::from_toml(&toml)
            .unwrap()
            .resolve_account(DEFAULT_ACCOUNT_ID)
            .unwrap()
    }

    fn group_event(id: &str, text: &str) -> String {
        json!({
            "event": "push",
            "type": "message",
            "entity": {
                "id": id,
                "chatType": "group",
                "personType": "manager",
                "personId": "p-1",
                "chatId": "g-1",
                "plainText": text,
                "createdAt": 1_700_000_000_000_i64
            },
            "refers": { "manager": { "id": "p-1", "name": "Alice" } }
        })
        .to_string()
    }

    fn test_app(
        account: &ResolvedAccount,
        capacity: usize,
    ) -> (Router, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let state = Arc::new(WebhookState::new(account, Arc::new(RecentIds::default()), tx));
        (router("/api/channel-talk", state), rx)
    }

    fn post_webhook(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn group_message_is_queued() {
        let (app, mut rx) = test_app(&account(""), 8);
        let resp = app
            .oneshot(post_webhook("/api/channel-talk", group_event("m-1", "hello")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let message = rx.try_recv().unwrap();
        assert_eq!(message.id, "m-1");
        assert_eq!(message.sender, "Alice");
        assert_eq!(message.chat_id, "g-1");
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let (app, mut rx) = test_app(&account(""), 8);
        let resp = app
            .oneshot(post_webhook("/api/channel-talk", "{not json".to_string()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_group_events_are_acknowledged_and_dropped() {
        let (app, mut rx) = test_app(&account(""), 8);
        let body = json!({
            "event": "push",
            "entity": { "id": "m-2", "chatType": "user", "plainText": "hi", "chatId": "u-1" }
        })
        .to_string();
        let resp = app
            .oneshot(post_webhook("/api/channel-talk", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn redeliveries_are_queued_once() {
        let (app, mut rx) = test_app(&account(""), 8);
        for _ in 0..2 {
            let resp = app
                .clone()
                .oneshot(post_webhook("/api/channel-talk", group_event("m-3", "hello")))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_asks_for_redelivery() {
        let (app, mut rx) = test_app(&account(""), 1);
        let first = app
            .clone()
            .oneshot(post_webhook("/api/channel-talk", group_event("m-4", "one")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .clone()
            .oneshot(post_webhook("/api/channel-talk", group_event("m-5", "two")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);

        // Once there is room the redelivery goes through.
        assert_eq!(rx.try_recv().unwrap().id, "m-4");
        let retried = app
            .oneshot(post_webhook("/api/channel-talk", group_event("m-5", "two")))
            .await
            .unwrap();
        assert_eq!(retried.status(), StatusCode::OK);
        assert_eq!(rx.try_recv().unwrap().id, "m-5");
    }

    #[tokio::test]
    async fn token_is_required_when_configured() {
        let account = account("[channel-talk.webhook]\ntoken = \"sekrit\"\n");
        let (app, mut rx) = test_app(&account, 8);

        let missing = app
            .clone()
            .oneshot(post_webhook("/api/channel-talk", group_event("m-6", "a")))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let via_query = app
            .clone()
            .oneshot(post_webhook(
                "/api/channel-talk?token=sekrit",
                group_event("m-6", "a"),
            ))
            .await
            .unwrap();
        assert_eq!(via_query.status(), StatusCode::OK);

        let mut via_header = post_webhook("/api/channel-talk", group_event("m-7", "b"));
        via_header
            .headers_mut()
            .insert(TOKEN_HEADER, "sekrit".parse().unwrap());
        let resp = app.oneshot(via_header).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(rx.try_recv().unwrap().id, "m-6");
        assert_eq!(rx.try_recv().unwrap().id, "m-7");
    }

    #[tokio::test]
    async fn health_endpoint_answers_ok() {
        let (app, _rx) = test_app(&account(""), 8);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn unconfigured_or_disabled_accounts_are_refused() {
        let logger = Arc::new(InteractionLogger::new(None));
        let unconfigured = BridgeConfig::default()
            .resolve_account(DEFAULT_ACCOUNT_ID)
            .unwrap();
        assert!(matches!(
            WebhookReceiver::new(unconfigured, Arc::new(NoopHandler), logger.clone()),
            Err(ChannelTalkError::Config(_))
        ));

        let disabled = account("enabled = false\n");
        assert!(matches!(
            WebhookReceiver::new(disabled, Arc::new(NoopHandler), logger),
            Err(ChannelTalkError::Config(_))
        ));
    }

    #[test]
    fn webhook_path_is_normalized() {
        assert_eq!(normalize_path("hooks/ct"), "/hooks/ct");
        assert_eq!(normalize_path("/api/channel-talk"), "/api/channel-talk");
        assert_eq!(normalize_path("  "), "/api/channel-talk");
    }

    #[tokio::test]
    async fn bind_failure_marks_the_receiver_failed() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();
        let account = account(&format!(
            "[channel-talk.webhook]\nbindAddress = \"127.0.0.1\"\nport = {}\n",
            port
        ));
        let receiver = WebhookReceiver::new(
            account,
            Arc::new(NoopHandler),
            Arc::new(InteractionLogger::new(None)),
        )
        .unwrap();
        let status = receiver.status_handle();

        let err = receiver.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ChannelTalkError::Listener(_)));
        let snapshot = status.snapshot();
        assert_eq!(snapshot.state, ReceiverState::Failed);
        assert!(!snapshot.running);
        assert!(snapshot.last_error.unwrap().contains("bind"));
        assert!(snapshot.last_start_at.is_none());
    }
}
