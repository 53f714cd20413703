use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use clap::ArgMatches;
use talkbridge_channel_talk::{AccountTask, ChannelTalkError, InboundHandler, InboundMessage};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use super::{account_id, build_manager, config_path, init_tracing};

pub async fn run(matches: &ArgMatches) -> i32 {
    init_tracing();

    let account = account_id(matches);
    let manager = build_manager(matches);
    let json = matches.get_flag("json");

    println!("✓ Loading {}", config_path(matches));
    match manager.collect_warnings(account).await {
        Ok(warnings) => {
            for warning in warnings {
                eprintln!("⚠️  {}", warning);
            }
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            return 1;
        }
    }

    let abort = CancellationToken::new();
    let task = match manager
        .start_account(account, abort.clone(), Arc::new(StdoutHandler { json }))
        .await
    {
        Ok(task) => task,
        Err(e) => {
            eprintln!("✗ Failed to start Channel Talk receiver: {}", e);
            return 1;
        }
    };

    if let Ok(snapshot) = manager.status(account).await {
        if let Some(port) = snapshot.port {
            println!("✓ Channel Talk webhook listening on :{}", port);
        }
    }
    println!("\nPress Ctrl+C to stop");

    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
        println!("\n→ Shutting down...");
    };
    match supervise(task, abort, ctrl_c).await {
        Ok(Ok(())) => {
            println!("✓ Channel Talk receiver stopped");
            0
        }
        Ok(Err(e)) => {
            eprintln!("⚠️  Channel Talk receiver stopped with errors: {}", e);
            1
        }
        Err(e) => {
            eprintln!("✗ Channel Talk receiver task failed: {}", e);
            1
        }
    }
}

/// Wait for `shutdown` or for the receiver to end by itself, whichever
/// comes first, then stop the receiver and collect its result.
async fn supervise<F>(
    mut task: AccountTask,
    abort: CancellationToken,
    shutdown: F,
) -> Result<Result<(), ChannelTalkError>, JoinError>
where
    F: Future<Output = ()>,
{
    let finished = tokio::select! {
        _ = shutdown => None,
        joined = &mut task => Some(joined),
    };
    abort.cancel();
    match finished {
        Some(joined) => joined,
        None => task.await,
    }
}

/// Prints every accepted message, one per line.
struct StdoutHandler {
    json: bool,
}

#[async_trait]
impl InboundHandler for StdoutHandler {
    async fn handle_message(&self, message: InboundMessage) -> Result<(), ChannelTalkError> {
        if self.json {
            let line = serde_json::to_string(&message)
                .map_err(|e| ChannelTalkError::Handler(format!("encode message: {}", e)))?;
            println!("{}", line);
        } else {
            println!("{}", message.format_line());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_when_the_receiver_dies_on_its_own() {
        let abort = CancellationToken::new();
        let task: AccountTask = tokio::spawn(async {
            Err::<(), _>(ChannelTalkError::Listener("accept loop died".to_string()))
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            supervise(task, abort.clone(), std::future::pending()),
        )
        .await
        .expect("supervise hung on a dead receiver");

        assert!(matches!(result, Ok(Err(ChannelTalkError::Listener(_)))));
        assert!(abort.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_cancels_and_waits_for_the_receiver() {
        let abort = CancellationToken::new();
        let watched = abort.clone();
        let task: AccountTask = tokio::spawn(async move {
            watched.cancelled().await;
            Ok::<(), ChannelTalkError>(())
        });

        let result = supervise(task, abort.clone(), async {}).await;
        assert!(matches!(result, Ok(Ok(()))));
        assert!(abort.is_cancelled());
    }
}
