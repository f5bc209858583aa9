//! Tracing/logging bootstrap for the terminal host.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,companion_cli=debug,sync_ws=debug,sync_core=info";

/// Initialize the global tracing subscriber, writing to stderr so stdout
/// stays free for the conversation.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `COMPANION_LOG`
/// 3) internal default filter
pub fn init() {
    let env_filter = filter_from_lookup(|key| env::var(key).ok());
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_lookup<F>(lookup: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    for key in [EnvFilter::DEFAULT_ENV, "COMPANION_LOG"] {
        if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty())
            && let Ok(filter) = EnvFilter::try_new(value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_wins_over_companion_log() {
        let filter = filter_from_lookup(|key| match key {
            "RUST_LOG" => Some("warn".to_owned()),
            "COMPANION_LOG" => Some("trace".to_owned()),
            _ => None,
        });
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn blank_values_fall_through_to_default() {
        let filter = filter_from_lookup(|key| match key {
            "RUST_LOG" => Some("  ".to_owned()),
            _ => None,
        });
        assert!(filter.to_string().contains("companion_cli=debug"));
    }
}
