//! Channel Talk Open API v5 client.
//!
//! Authenticates with `x-access-key` / `x-access-secret` headers and runs
//! every request under the fixed-schedule [`RetryPolicy`].

use reqwest::RequestBuilder;
use serde_json::Value;

use crate::error::ChannelTalkError;
use crate::retry::{AttemptFailure, RetryPolicy};
use crate::types::{Credentials, OutboundMessage, SendReceipt};

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Channel Talk API client.
#[derive(Clone)]
pub struct ChannelTalkApiClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    retry: RetryPolicy,
}

/// Reads always page newest first.
const READ_SORT_ORDER: &str = "desc";

/// Paging parameters for message reads.
#[derive(Debug, Clone, Copy)]
pub struct ReadQuery {
    pub limit: u32,
}

impl Default for ReadQuery {
    fn default() -> Self {
        Self { limit: 20 }
    }
}

impl ChannelTalkApiClient {
    pub fn new(credentials: Credentials, base_url: &str) -> Result<Self, ChannelTalkError> {
        if credentials.access_key.is_empty() || credentials.access_secret.is_empty() {
            return Err(ChannelTalkError::Config(
                "Channel Talk accessKey and accessSecret are required".to_string(),
            ));
        }
        if base_url.is_empty() {
            return Err(ChannelTalkError::Config(
                "Channel Talk base URL cannot be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChannelTalkError::Internal(format!("HTTP client init: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Post a message to a group via `POST /open/v5/groups/{groupId}/messages`.
    pub async fn send_message(
        &self,
        message: &OutboundMessage,
    ) -> Result<SendReceipt, ChannelTalkError> {
        message.validate()?;

        let url = format!(
            "{}/open/v5/groups/{}/messages",
            self.base_url,
            urlencoding::encode(&message.group_id)
        );
        let body = message.body();
        let bot_name = message.bot_name.as_deref().filter(|name| !name.is_empty());

        let data = self
            .execute("send_message", || {
                let request = self.authed(self.client.post(&url)).json(&body);
                match bot_name {
                    Some(name) => request.query(&[("botName", name)]),
                    None => request,
                }
            })
            .await?;

        let receipt = SendReceipt {
            message_id: extract_message_id(&data),
            group_id: message.group_id.clone(),
            message: data.get("message").cloned(),
        };
        tracing::debug!(
            group_id = %receipt.group_id,
            message_id = %receipt.message_id,
            "Channel Talk message sent"
        );
        Ok(receipt)
    }

    /// Recent messages of a group via `GET /open/v5/groups/{groupId}/messages`.
    pub async fn get_messages(
        &self,
        group_id: &str,
        query: &ReadQuery,
    ) -> Result<Value, ChannelTalkError> {
        let url = format!(
            "{}/open/v5/groups/{}/messages",
            self.base_url,
            urlencoding::encode(group_id)
        );
        self.read(&url, query, "get_messages").await
    }

    /// Replies under a thread root via
    /// `GET /open/v5/groups/{groupId}/messages/{rootMessageId}/threads`.
    pub async fn get_thread_messages(
        &self,
        group_id: &str,
        root_message_id: &str,
        query: &ReadQuery,
    ) -> Result<Value, ChannelTalkError> {
        let url = format!(
            "{}/open/v5/groups/{}/messages/{}/threads",
            self.base_url,
            urlencoding::encode(group_id),
            urlencoding::encode(root_message_id)
        );
        self.read(&url, query, "get_thread_messages").await
    }

    async fn read(
        &self,
        url: &str,
        query: &ReadQuery,
        operation: &str,
    ) -> Result<Value, ChannelTalkError> {
        let limit = query.limit.to_string();
        self.execute(operation, || {
            self.authed(self.client.get(url)).query(&[
                ("sortOrder", READ_SORT_ORDER),
                ("limit", limit.as_str()),
            ])
        })
        .await
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-access-key", &self.credentials.access_key)
            .header("x-access-secret", &self.credentials.access_secret)
    }

    /// Run one request under the retry policy and decode the 2xx body.
    async fn execute<F>(&self, operation: &str, build: F) -> Result<Value, ChannelTalkError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.retry
            .run(operation, |_attempt| {
                let request = build();
                async move {
                    let resp = request
                        .send()
                        .await
                        .map_err(|e| AttemptFailure::Transport(e.to_string()))?;
                    let status = resp.status().as_u16();

                    if !resp.status().is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(AttemptFailure::Status { status, body });
                    }

                    let bytes = resp.bytes().await.map_err(|e| AttemptFailure::Decode {
                        status,
                        detail: format!("reading response body: {}", e),
                    })?;
                    decode_body(status, &bytes)
                }
            })
            .await
    }
}

/// Parse a 2xx body; an empty body reads as `null`.
fn decode_body(status: u16, bytes: &[u8]) -> Result<Value, AttemptFailure> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| AttemptFailure::Decode {
        status,
        detail: format!("invalid JSON response: {}", e),
    })
}

/// `message.id`, else top-level `id`, else empty.
pub fn extract_message_id(data: &Value) -> String {
    data.get("message")
        .and_then(|message| message.get("id"))
        .and_then(id_text)
        .or_else(|| data.get("id").and_then(id_text))
        .unwrap_or_default()
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn creds() -> Credentials {
        Credentials::new("key", "secret")
    }

    #[test]
    fn missing_secrets_rejected() {
        assert!(ChannelTalkApiClient::new(Credentials::new("", "secret"), "https://x").is_err());
        assert!(ChannelTalkApiClient::new(Credentials::new("key", ""), "https://x").is_err());
        assert!(ChannelTalkApiClient::new(creds(), "").is_err());
    }

    #[test]
    fn trailing_slash_stripped() {
        let client = ChannelTalkApiClient::new(creds(), "https://api.channel.io/").unwrap();
        assert_eq!(client.base_url(), "https://api.channel.io");
    }

    #[test]
    fn message_id_prefers_nested_message() {
        assert_eq!(extract_message_id(&json!({ "message": { "id": "m1" } })), "m1");
        assert_eq!(extract_message_id(&json!({ "id": "m2" })), "m2");
        assert_eq!(
            extract_message_id(&json!({ "message": { "id": "m1" }, "id": "m2" })),
            "m1"
        );
        assert_eq!(
            extract_message_id(&json!({ "message": { "text": "x" }, "id": "m3" })),
            "m3"
        );
        assert_eq!(extract_message_id(&json!({ "message": { "id": 42 } })), "42");
        assert_eq!(extract_message_id(&json!({})), "");
        assert_eq!(extract_message_id(&Value::Null), "");
    }

    #[test]
    fn decode_body_handles_empty_and_invalid() {
        assert_eq!(decode_body(200, b"").unwrap(), Value::Null);
        assert_eq!(decode_body(200, b"  \n").unwrap(), Value::Null);
        assert_eq!(decode_body(200, br#"{"id":"m"}"#).unwrap(), json!({ "id": "m" }));
        assert!(matches!(
            decode_body(201, b"<html>"),
            Err(AttemptFailure::Decode { status: 201, .. })
        ));
    }

    #[test]
    fn default_read_query() {
        let query = ReadQuery::default();
        assert_eq!(query.limit, 20);
    }
}
