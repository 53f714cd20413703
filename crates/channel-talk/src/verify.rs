//! Shared-token verification for inbound webhooks.
//!
//! When `webhook.token` is configured, each delivery must present the same
//! value as a `token` query parameter or an `x-webhook-token` header.

use subtle::ConstantTimeEq;

use crate::error::ChannelTalkError;

pub const TOKEN_HEADER: &str = "x-webhook-token";

/// Compare the presented token against the configured one in constant time.
pub fn verify_webhook_token(
    configured: &str,
    presented: Option<&str>,
) -> Result<(), ChannelTalkError> {
    if configured.is_empty() {
        return Err(ChannelTalkError::Config(
            "webhook token not configured".to_string(),
        ));
    }
    let presented = presented.unwrap_or("");

    let expected = configured.as_bytes();
    let actual = presented.as_bytes();
    if expected.len() != actual.len() || expected.ct_eq(actual).unwrap_u8() != 1 {
        return Err(ChannelTalkError::TokenInvalid);
    }
    Ok(())
}

/// Pull `token` out of a raw query string.
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key != "token" {
            return None;
        }
        urlencoding::decode(value).ok().map(|v| v.into_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_passes() {
        assert!(verify_webhook_token("abc123", Some("abc123")).is_ok());
    }

    #[test]
    fn wrong_or_missing_token_fails() {
        assert!(matches!(
            verify_webhook_token("abc123", Some("abc124")),
            Err(ChannelTalkError::TokenInvalid)
        ));
        assert!(matches!(
            verify_webhook_token("abc123", Some("abc")),
            Err(ChannelTalkError::TokenInvalid)
        ));
        assert!(matches!(
            verify_webhook_token("abc123", None),
            Err(ChannelTalkError::TokenInvalid)
        ));
    }

    #[test]
    fn empty_configured_token_is_a_config_error() {
        assert!(matches!(
            verify_webhook_token("", Some("x")),
            Err(ChannelTalkError::Config(_))
        ));
    }

    #[test]
    fn token_is_read_from_query() {
        assert_eq!(
            token_from_query(Some("a=1&token=s%3Dcret")).as_deref(),
            Some("s=cret")
        );
        assert_eq!(token_from_query(Some("a=1")), None);
        assert_eq!(token_from_query(None), None);
    }
}
