use clap::ArgMatches;
use serde_json::json;

use super::{account_id, build_manager, init_tracing};

pub async fn run(matches: &ArgMatches) -> i32 {
    init_tracing();

    let mut params = json!({
        "target": matches.get_one::<String>("to").cloned().unwrap_or_default(),
        "limit": matches.get_one::<u32>("limit").copied().unwrap_or(20),
    });
    if let Some(thread) = matches.get_one::<String>("thread") {
        params["threadId"] = json!(thread);
    }

    let manager = build_manager(matches);
    match manager
        .handle_action(account_id(matches), "read", &params)
        .await
    {
        Ok(result) if result.is_error => {
            eprintln!("✗ {}", result.joined_text());
            1
        }
        Ok(result) => {
            println!("{}", result.joined_text());
            0
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            1
        }
    }
}
