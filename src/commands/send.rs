use clap::ArgMatches;
use talkbridge_channel_talk::{MessageBlock, MessageOption, OutboundMessage};

use super::{account_id, build_manager, init_tracing};

pub async fn run(matches: &ArgMatches) -> i32 {
    init_tracing();

    let message = match build_message(matches) {
        Ok(message) => message,
        Err(e) => {
            eprintln!("✗ {}", e);
            return 1;
        }
    };

    let manager = build_manager(matches);
    match manager.send(account_id(matches), message).await {
        Ok(receipt) => {
            if receipt.message_id.is_empty() {
                println!("✓ Sent to {}", receipt.group_id);
            } else {
                println!("✓ Sent {} to {}", receipt.message_id, receipt.group_id);
            }
            0
        }
        Err(e) => {
            eprintln!("✗ Send failed: {}", e);
            1
        }
    }
}

fn build_message(matches: &ArgMatches) -> Result<OutboundMessage, String> {
    let to = matches
        .get_one::<String>("to")
        .ok_or("--to is required")?;
    let text = matches
        .get_one::<String>("text")
        .ok_or("message text is required")?;

    let mut message = OutboundMessage::new(to, text);
    if let Some(raw) = matches.get_one::<String>("blocks") {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| format!("--blocks is not JSON: {}", e))?;
        let blocks = MessageBlock::parse_list(value).map_err(|e| e.to_string())?;
        message = message.with_blocks(blocks);
    }
    if let Some(name) = matches.get_one::<String>("bot-name") {
        message = message.with_bot_name(name);
    }
    if matches.get_flag("act-as-manager") {
        message = message.with_option(MessageOption::ActAsManager);
    }
    if matches.get_flag("display-as-channel") {
        message = message.with_option(MessageOption::DisplayAsChannel);
    }
    Ok(message)
}
