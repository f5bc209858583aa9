use std::time::Duration;

use sync_core::{ConversationId, SyncError, SyncErrorCategory};
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8080";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoints and credentials for the chat backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// REST base, for example `http://localhost:8080/api`.
    pub api_base_url: Url,
    /// Push-channel base, for example `ws://localhost:8080`.
    pub ws_base_url: Url,
    /// Bearer token attached to REST requests.
    pub auth_token: Option<String>,
    /// Per-request REST timeout.
    pub http_timeout: Duration,
    /// Upper bound for establishing the push channel.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_base_url: &str, ws_base_url: &str) -> Result<Self, SyncError> {
        let api_base_url = parse_base_url(api_base_url, &["http", "https"])?;
        let ws_base_url = parse_base_url(ws_base_url, &["ws", "wss"])?;
        Ok(Self {
            api_base_url,
            ws_base_url,
            auth_token: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Local development defaults.
    pub fn localhost() -> Result<Self, SyncError> {
        Self::new(DEFAULT_API_BASE_URL, DEFAULT_WS_BASE_URL)
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|token| !token.trim().is_empty());
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// `{ws_base}/chat/{conversation_id}`.
    pub fn channel_url(&self, conversation_id: &ConversationId) -> Result<Url, SyncError> {
        join_segments(&self.ws_base_url, &["chat", conversation_id.as_str()])
    }

    /// REST endpoint under the API base.
    pub fn api_url(&self, segments: &[&str]) -> Result<Url, SyncError> {
        join_segments(&self.api_base_url, segments)
    }
}

fn parse_base_url(raw: &str, schemes: &[&str]) -> Result<Url, SyncError> {
    let url = Url::parse(raw.trim()).map_err(|err| {
        SyncError::new(
            SyncErrorCategory::Config,
            "invalid_base_url",
            format!("invalid base url '{raw}': {err}"),
        )
    })?;

    if !schemes.contains(&url.scheme()) || url.cannot_be_a_base() {
        return Err(SyncError::new(
            SyncErrorCategory::Config,
            "invalid_base_url",
            format!("base url '{raw}' must use one of {schemes:?}"),
        ));
    }
    Ok(url)
}

/// Append percent-encoded path segments to a base URL.
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, SyncError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| {
            SyncError::new(
                SyncErrorCategory::Config,
                "invalid_base_url",
                format!("base url '{base}' cannot carry a path"),
            )
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_channel_url_per_conversation() {
        let config = ClientConfig::localhost().expect("defaults should parse");
        let url = config
            .channel_url(&ConversationId::new("abc-123"))
            .expect("channel url");
        assert_eq!(url.as_str(), "ws://localhost:8080/chat/abc-123");
    }

    #[test]
    fn api_urls_keep_the_base_path_and_escape_segments() {
        let config = ClientConfig::new("https://chat.example.org/api/", "wss://chat.example.org")
            .expect("config should parse");
        let url = config
            .api_url(&["conversations", "a b/c", "messages"])
            .expect("api url");
        assert_eq!(
            url.as_str(),
            "https://chat.example.org/api/conversations/a%20b%2Fc/messages"
        );
    }

    #[test]
    fn rejects_wrong_schemes() {
        let err = ClientConfig::new("ws://localhost:8080/api", "ws://localhost:8080")
            .expect_err("api base must be http");
        assert_eq!(err.code, "invalid_base_url");

        let err = ClientConfig::new("http://localhost:8080/api", "http://localhost:8080")
            .expect_err("channel base must be ws");
        assert_eq!(err.code, "invalid_base_url");
    }

    #[test]
    fn blank_tokens_are_dropped() {
        let config = ClientConfig::localhost()
            .expect("defaults should parse")
            .with_auth_token(Some("   ".into()));
        assert_eq!(config.auth_token, None);
    }
}
