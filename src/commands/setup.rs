use std::path::Path;

use clap::ArgMatches;
use talkbridge_channel_talk::{BridgeConfig, ChannelTalkError};

use super::config_path;

pub async fn run(matches: &ArgMatches) -> i32 {
    let path = Path::new(config_path(matches));
    let access_key = matches.get_one::<String>("access-key").map(String::as_str);
    let access_secret = matches.get_one::<String>("access-secret").map(String::as_str);

    match write_account_config(path, access_key, access_secret) {
        Ok(config) => {
            println!("✓ Channel Talk enabled in {}", path.display());
            let configured = config
                .channel_talk
                .as_ref()
                .and_then(|channel| channel.credentials())
                .is_some();
            if !configured {
                println!("⚠️  accessKey/accessSecret still missing; pass both to finish setup");
            }
            0
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            1
        }
    }
}

/// Apply the secrets to the file at `path`, creating it when absent.
fn write_account_config(
    path: &Path,
    access_key: Option<&str>,
    access_secret: Option<&str>,
) -> Result<BridgeConfig, ChannelTalkError> {
    let mut config = if path.exists() {
        BridgeConfig::load(path)?
    } else {
        BridgeConfig::default()
    };
    config.apply_account_config(access_key, access_secret);
    config.save(path)?;
    Ok(config)
}
