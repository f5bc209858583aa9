//! Environment-backed runtime configuration for `companion-cli`.

use std::{env, time::Duration};

use sync_core::{ConversationId, DEFAULT_FOLLOW_POLL_INTERVAL, PersonaId, RetryPolicy};
use sync_ws::{ClientConfig, DEFAULT_API_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_WS_BASE_URL};
use thiserror::Error;
use url::Url;

const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Runtime configuration used by the terminal host.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    /// Backend endpoints and credentials.
    pub client: ClientConfig,
    /// Conversation to mount on start. When unset, one is picked or created.
    pub conversation_id: Option<ConversationId>,
    /// Persona used to create a conversation when none exists.
    pub persona_id: Option<PersonaId>,
    /// Delay between follow-status polls while a request is pending.
    pub follow_poll_interval: Duration,
    /// Backoff for reopening a dropped push channel.
    pub reconnect: RetryPolicy,
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl CliConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_base_url = parse_url(
            "COMPANION_API_URL",
            DEFAULT_API_BASE_URL,
            &["http", "https"],
            &mut lookup,
        )?;
        let ws_base_url = parse_url(
            "COMPANION_WS_URL",
            DEFAULT_WS_BASE_URL,
            &["ws", "wss"],
            &mut lookup,
        )?;
        let auth_token = optional_trimmed_env("COMPANION_TOKEN", &mut lookup);
        let conversation_id =
            optional_trimmed_env("COMPANION_CONVERSATION_ID", &mut lookup).map(ConversationId::new);
        let persona_id =
            optional_trimmed_env("COMPANION_PERSONA_ID", &mut lookup).map(PersonaId::new);

        let http_timeout_ms = parse_positive_u64(
            "COMPANION_HTTP_TIMEOUT_MS",
            DEFAULT_HTTP_TIMEOUT_MS,
            &mut lookup,
        )?;
        let follow_poll_interval_ms = parse_positive_u64(
            "COMPANION_FOLLOW_POLL_INTERVAL_MS",
            DEFAULT_FOLLOW_POLL_INTERVAL.as_millis() as u64,
            &mut lookup,
        )?;
        let reconnect_attempts = parse_optional_u32(
            "COMPANION_RECONNECT_ATTEMPTS",
            DEFAULT_RECONNECT_ATTEMPTS,
            &mut lookup,
        )?;
        let reconnect_base_delay_ms = parse_positive_u64(
            "COMPANION_RECONNECT_BASE_DELAY_MS",
            DEFAULT_RECONNECT_BASE_DELAY_MS,
            &mut lookup,
        )?;
        let reconnect_max_delay_ms = parse_positive_u64(
            "COMPANION_RECONNECT_MAX_DELAY_MS",
            DEFAULT_RECONNECT_MAX_DELAY_MS,
            &mut lookup,
        )?;

        if reconnect_max_delay_ms < reconnect_base_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "COMPANION_RECONNECT_MAX_DELAY_MS",
                value: reconnect_max_delay_ms.to_string(),
                reason: format!("must be at least the base delay ({reconnect_base_delay_ms} ms)"),
            });
        }

        Ok(Self {
            client: ClientConfig {
                api_base_url,
                ws_base_url,
                auth_token,
                http_timeout: Duration::from_millis(http_timeout_ms),
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            },
            conversation_id,
            persona_id,
            follow_poll_interval: Duration::from_millis(follow_poll_interval_ms),
            reconnect: RetryPolicy::new(
                Duration::from_millis(reconnect_base_delay_ms),
                Duration::from_millis(reconnect_max_delay_ms),
                reconnect_attempts,
            ),
        })
    }
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_url<F>(
    key: &'static str,
    default: &str,
    schemes: &[&str],
    lookup: &mut F,
) -> Result<Url, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let value = optional_trimmed_env(key, lookup).unwrap_or_else(|| default.to_owned());
    let url = Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value: value.clone(),
        reason: err.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) || url.cannot_be_a_base() {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: format!("scheme must be one of {schemes:?}"),
        });
    }
    Ok(url)
}

fn parse_optional_u32<F>(key: &'static str, default: u32, lookup: &mut F) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u32>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_positive_u64<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        }),
        Ok(parsed) => Ok(parsed),
        Err(err) => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        }),
    }
}
