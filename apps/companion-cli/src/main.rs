mod commands;
mod config;
mod logging;
mod render;

use std::{future::Future, process::ExitCode, sync::Arc};

use commands::{Command, HELP};
use config::{CliConfig, ConfigError};
use render::Renderer;
use sync_core::{
    ConversationApi, ConversationId, ConversationSummary, EventStream, FollowPoller, PersonaId,
    RetryPolicy, SessionChannels, SyncError, SyncErrorCategory,
};
use sync_ws::{ConversationSession, HttpApi, WsTransport};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("reading stdin: {0}")]
    Stdin(#[from] std::io::Error),
    #[error("no conversation to open; set COMPANION_CONVERSATION_ID or COMPANION_PERSONA_ID")]
    NoConversation,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting companion-cli");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "companion-cli exiting");
            eprintln!("companion-cli: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), CliError> {
    let config = CliConfig::from_env()?;
    let api = Arc::new(HttpApi::new(config.client.clone())?);
    let channels = SessionChannels::default();
    let session = ConversationSession::new(
        Arc::clone(&api),
        WsTransport::new(config.client.ws_base_url.clone())
            .with_connect_timeout(config.client.connect_timeout),
        channels.clone(),
    );
    let mut follow =
        FollowPoller::new(Arc::clone(&api), channels.clone()).with_interval(config.follow_poll_interval);

    let printer = tokio::spawn(print_events(channels.subscribe()));

    let conversation_id = resolve_conversation(&api, &config).await?;
    let summary = mount(&config.reconnect, &session, &conversation_id).await?;
    if let Some(summary) = summary {
        info!(
            conversation_id = %summary.id,
            persona_id = %summary.persona_id,
            messages = summary.message_count,
            "conversation mounted"
        );
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };

        match command {
            Command::Send(text) => report(session.send_user_message(&text).map(|_| ())),
            Command::Clear => log_failure("clear", session.clear_all().await),
            Command::Follow(subject) => match subject.or_else(|| config.persona_id.clone()) {
                Some(subject) => report(follow.request_follow(&subject).await.map(|_| ())),
                None => println!("usage: /follow <persona-id>"),
            },
            Command::Status(subject) => match subject.or_else(|| config.persona_id.clone()) {
                Some(subject) => report(follow.refresh_status(&subject).await.map(|_| ())),
                None => println!("usage: /status <persona-id>"),
            },
            Command::Reconnect => log_failure(
                "reconnect",
                with_retry(&config.reconnect, "reconnect", || session.reconnect()).await,
            ),
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    follow.stop();
    session.close().await;
    printer.abort();
    info!("companion-cli stopped");
    Ok(())
}

/// Pick the conversation to mount: explicit id, newest for the persona
/// (created on demand), or the most recently updated one.
async fn resolve_conversation(
    api: &HttpApi,
    config: &CliConfig,
) -> Result<ConversationId, CliError> {
    if let Some(conversation_id) = &config.conversation_id {
        return Ok(conversation_id.clone());
    }

    let conversations = api.list_conversations().await?;
    if let Some(persona_id) = &config.persona_id {
        if let Some(existing) = conversations
            .iter()
            .filter(|conversation| &conversation.persona_id == persona_id)
            .max_by_key(|conversation| conversation.updated_at_ms)
        {
            return Ok(existing.id.clone());
        }
        return Ok(create_for(api, persona_id).await?);
    }

    conversations
        .into_iter()
        .max_by_key(|conversation| conversation.updated_at_ms)
        .map(|conversation| conversation.id)
        .ok_or(CliError::NoConversation)
}

async fn create_for(api: &HttpApi, persona_id: &PersonaId) -> Result<ConversationId, SyncError> {
    let created = api.create_conversation(persona_id).await?;
    info!(conversation_id = %created.id, persona_id = %persona_id, "created conversation");
    Ok(created.id)
}

/// Open `conversation_id`, retrying the whole mount only while nothing is
/// seeded. Once history is in place a channel failure is retried with
/// `reconnect`, which keeps the timeline.
async fn mount<A: ConversationApi>(
    policy: &RetryPolicy,
    session: &ConversationSession<A>,
    conversation_id: &ConversationId,
) -> Result<Option<ConversationSummary>, SyncError> {
    let mut attempt = 0;
    let channel_err = loop {
        let err = match session.open(conversation_id.clone()).await {
            Ok(summary) => return Ok(summary),
            Err(err) => err,
        };
        if err.category == SyncErrorCategory::Connection
            && session.current_conversation().as_ref() == Some(conversation_id)
        {
            break err;
        }
        let Some(delay) = policy.next_delay(attempt, &err) else {
            return Err(err);
        };
        warn!(action = "open", attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    };

    warn!(%conversation_id, error = %channel_err, "history seeded but channel failed");
    let Some(delay) = policy.next_delay(0, &channel_err) else {
        return Err(channel_err);
    };
    tokio::time::sleep(delay).await;
    with_retry(policy, "reconnect", || session.reconnect()).await?;
    Ok(None)
}

async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    action: &'static str,
    mut attempt_once: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0;
    loop {
        let err = match attempt_once().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let Some(delay) = policy.next_delay(attempt, &err) else {
            return Err(err);
        };
        warn!(action, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

// Session failures already reach the printer as error events.
fn log_failure(action: &'static str, result: Result<(), SyncError>) {
    if let Err(err) = result {
        warn!(action, code = %err.code, "command failed");
    }
}

fn report(result: Result<(), SyncError>) {
    if let Err(err) = result {
        warn!(code = %err.code, "command failed");
        println!("! {}", err.message);
    }
}

async fn print_events(mut events: EventStream) {
    let mut renderer = Renderer::default();
    loop {
        match events.recv().await {
            Ok(event) => {
                for line in renderer.render(&event) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
