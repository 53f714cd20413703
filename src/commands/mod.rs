use std::sync::Arc;

use clap::ArgMatches;
use talkbridge_channel_talk::{ChannelTalkManager, FileResolver, InteractionLogger};

pub mod read;
pub mod send;
pub mod serve;
pub mod setup;
pub mod status;

pub const DEFAULT_CONFIG_FILE: &str = "talkbridge.toml";

/// Environment variable naming a JSONL file for interaction logs.
pub const INTERACTION_LOG_ENV: &str = "TALKBRIDGE_INTERACTION_LOG";

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

pub fn config_path(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_FILE)
}

pub fn account_id(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("account")
        .map(String::as_str)
        .unwrap_or(talkbridge_channel_talk::DEFAULT_ACCOUNT_ID)
}

/// Manager over the configuration file, re-read on every call.
pub fn build_manager(matches: &ArgMatches) -> ChannelTalkManager {
    let log_path = std::env::var_os(INTERACTION_LOG_ENV).map(Into::into);
    ChannelTalkManager::new(
        Arc::new(FileResolver::new(config_path(matches))),
        Arc::new(InteractionLogger::new(log_path)),
    )
}
