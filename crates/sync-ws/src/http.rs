use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sync_core::{
    ConversationApi, ConversationHistory, ConversationId, ConversationSummary, FollowApi,
    FollowStatus, Origin, PersonaId, SyncError, SyncErrorCategory, TimelineEntry,
};
use tracing::{debug, warn};

use crate::config::ClientConfig;

/// REST client for the chat backend.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    config: ClientConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SenderType {
    User,
    Persona,
}

#[derive(Debug, Deserialize)]
struct MessageRecord {
    id: String,
    sender_type: SenderType,
    content: String,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct ConversationRecord {
    id: String,
    persona_id: String,
    #[serde(default)]
    persona_name: Option<String>,
    #[serde(default)]
    message_count: u64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    messages: Vec<MessageRecord>,
    #[serde(default)]
    conversation: Option<ConversationRecord>,
}

#[derive(Debug, Deserialize)]
struct ConversationListResponse {
    conversations: Vec<ConversationRecord>,
}

#[derive(Debug, Serialize)]
struct CreateConversationRequest<'a> {
    persona_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FollowRequest<'a> {
    persona_id: &'a str,
}

impl HttpApi {
    pub fn new(config: ClientConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|err| {
                SyncError::new(
                    SyncErrorCategory::Config,
                    "http_client_build_error",
                    err.to_string(),
                )
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `GET /conversations`.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, SyncError> {
        let url = self.config.api_url(&["conversations"])?;
        let body: ConversationListResponse = self
            .send_json(self.request(Method::GET, url), SyncErrorCategory::Fetch)
            .await?;
        body.conversations
            .into_iter()
            .map(conversation_summary)
            .collect()
    }

    /// `POST /conversations`.
    pub async fn create_conversation(
        &self,
        persona_id: &PersonaId,
    ) -> Result<ConversationSummary, SyncError> {
        let url = self.config.api_url(&["conversations"])?;
        let request = self
            .request(Method::POST, url)
            .json(&CreateConversationRequest {
                persona_id: persona_id.as_str(),
            });
        let record: ConversationRecord = self.send_json(request, SyncErrorCategory::Fetch).await?;
        conversation_summary(record)
    }

    fn request(&self, method: Method, url: url::Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.config.auth_token.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        category: SyncErrorCategory,
    ) -> Result<Response, SyncError> {
        let response = request
            .send()
            .await
            .map_err(|err| map_request_error(category, err))?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "rest response");
        if status.is_success() {
            return Ok(response);
        }
        Err(map_error_response(category, response).await)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        category: SyncErrorCategory,
    ) -> Result<T, SyncError> {
        self.send(request, category)
            .await?
            .json::<T>()
            .await
            .map_err(|err| {
                SyncError::new(
                    SyncErrorCategory::Serialization,
                    "response_decode_failed",
                    err.to_string(),
                )
            })
    }
}

impl ConversationApi for HttpApi {
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationHistory, SyncError> {
        let url = self
            .config
            .api_url(&["conversations", conversation_id.as_str(), "messages"])?;
        let body: HistoryResponse = self
            .send_json(self.request(Method::GET, url), SyncErrorCategory::Fetch)
            .await?;
        history_from_response(body)
    }

    async fn clear_messages(&self, conversation_id: &ConversationId) -> Result<(), SyncError> {
        let url = self
            .config
            .api_url(&["conversations", conversation_id.as_str(), "messages"])?;
        self.send(self.request(Method::DELETE, url), SyncErrorCategory::Fetch)
            .await
            .map(|_| ())
    }
}

impl FollowApi for HttpApi {
    async fn create_follow(&self, subject: &PersonaId) -> Result<FollowStatus, SyncError> {
        let url = self.config.api_url(&["follow"])?;
        let request = self.request(Method::POST, url).json(&FollowRequest {
            persona_id: subject.as_str(),
        });
        self.send_json(request, SyncErrorCategory::FollowAction).await
    }

    async fn follow_status(&self, subject: &PersonaId) -> Result<FollowStatus, SyncError> {
        let url = self.config.api_url(&["follow", subject.as_str()])?;
        self.send_json(
            self.request(Method::GET, url),
            SyncErrorCategory::FollowAction,
        )
        .await
    }
}

fn history_from_response(body: HistoryResponse) -> Result<ConversationHistory, SyncError> {
    let entries = body
        .messages
        .into_iter()
        .map(|record| {
            let origin = match record.sender_type {
                SenderType::User => Origin::User,
                SenderType::Persona => Origin::Peer,
            };
            Ok(TimelineEntry::confirmed(
                record.id,
                origin,
                record.content,
                parse_timestamp_ms(&record.created_at)?,
            ))
        })
        .collect::<Result<Vec<_>, SyncError>>()?;
    let conversation = body.conversation.map(conversation_summary).transpose()?;
    Ok(ConversationHistory {
        entries,
        conversation,
    })
}

fn conversation_summary(record: ConversationRecord) -> Result<ConversationSummary, SyncError> {
    let created_at_ms = record
        .created_at
        .as_deref()
        .map(parse_timestamp_ms)
        .transpose()?
        .unwrap_or_default();
    let updated_at_ms = record
        .updated_at
        .as_deref()
        .map(parse_timestamp_ms)
        .transpose()?
        .unwrap_or(created_at_ms);
    Ok(ConversationSummary {
        id: ConversationId::new(record.id),
        persona_id: PersonaId::new(record.persona_id),
        persona_name: record.persona_name,
        message_count: record.message_count,
        created_at_ms,
        updated_at_ms,
    })
}

/// Parse RFC 3339 timestamps; offset-less values are read as UTC.
fn parse_timestamp_ms(raw: &str) -> Result<u64, SyncError> {
    let invalid = |reason: String| {
        SyncError::new(
            SyncErrorCategory::Serialization,
            "invalid_timestamp",
            format!("cannot parse timestamp '{raw}': {reason}"),
        )
    };
    let millis = match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed.timestamp_millis(),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc().timestamp_millis())
            .map_err(|err| invalid(err.to_string()))?,
    };
    u64::try_from(millis).map_err(|_| invalid("before the Unix epoch".to_owned()))
}

fn map_request_error(category: SyncErrorCategory, err: reqwest::Error) -> SyncError {
    if let Some(status) = err.status() {
        return SyncError::from_http_status(category, status.as_u16(), err.to_string());
    }
    let code = if err.is_timeout() {
        "request_timeout"
    } else if err.is_connect() {
        "connect_failed"
    } else {
        "network_error"
    };
    SyncError::new(category, code, err.to_string())
}

async fn map_error_response(category: SyncErrorCategory, response: Response) -> SyncError {
    let status = response.status();
    let retry_after = retry_after_hint(&response);
    let body = response.text().await.unwrap_or_default();
    let message = error_message(status, &body);
    warn!(status = status.as_u16(), %message, "rest request rejected");

    let mut err = SyncError::from_http_status(category, status.as_u16(), message);
    if let Some(delay) = retry_after {
        err = err.with_retry_after(delay);
    }
    err
}

fn retry_after_hint(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn error_message(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(alias = "detail", alias = "message")]
        error: String,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error;
    }
    let body = body.trim();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    }
}
