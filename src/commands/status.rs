use clap::ArgMatches;
use talkbridge_channel_talk::{probe_account, BridgeConfig};

use super::{account_id, config_path};

pub async fn run(matches: &ArgMatches) -> i32 {
    let path = config_path(matches);
    let account_id = account_id(matches);
    println!("📊 Channel Talk status ({})\n", path);

    let mut config = match BridgeConfig::load(std::path::Path::new(path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}", e);
            return 1;
        }
    };
    config.apply_env_overrides();
    let account = match config.resolve_account(account_id) {
        Ok(account) => account,
        Err(e) => {
            eprintln!("✗ {}", e);
            return 1;
        }
    };

    let probe = probe_account(&account);
    println!("Account     {}", account.account_id);
    println!("Configured  {}", mark(probe.configured));
    println!("Enabled     {}", mark(probe.enabled));
    println!("Policy      {:?}", account.group_policy);
    println!("Base URL    {}", account.config.base_url());

    let webhook = &account.config.webhook;
    print!("Webhook     :{}{}  ", webhook.port, webhook.path);
    if webhook.port != 0 && is_port_listening(webhook.port).await {
        println!("✓ Listening");
    } else {
        println!("✗ Not listening (start with: talkbridge serve)");
    }

    let warnings = account.collect_warnings();
    if !warnings.is_empty() {
        println!("\n⚠️  Warnings:");
        for warning in warnings {
            println!("  {}", warning);
        }
    }
    println!();
    0
}

fn mark(flag: bool) -> &'static str {
    if flag {
        "✓"
    } else {
        "✗"
    }
}

async fn is_port_listening(port: u16) -> bool {
    tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .is_ok()
}
