use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn cli() -> Command {
    Command::new("talkbridge")
        .version(VERSION)
        .about("Channel Talk team-chat bridge")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .default_value(commands::DEFAULT_CONFIG_FILE)
                .global(true),
        )
        .arg(
            Arg::new("account")
                .short('a')
                .long("account")
                .value_name("ACCOUNT")
                .help("Account id to use")
                .default_value(talkbridge_channel_talk::DEFAULT_ACCOUNT_ID)
                .global(true),
        )
        .subcommand(
            Command::new("serve")
                .about("Run the webhook receiver and print accepted messages")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print each message as a JSON line")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("send")
                .about("Send a message to a group")
                .arg(
                    Arg::new("to")
                        .short('t')
                        .long("to")
                        .value_name("GROUP_ID")
                        .help("Target group id")
                        .required(true),
                )
                .arg(
                    Arg::new("text")
                        .value_name("TEXT")
                        .help("Plain text of the message")
                        .required(true),
                )
                .arg(
                    Arg::new("blocks")
                        .long("blocks")
                        .value_name("JSON")
                        .help("Rich blocks as a JSON array"),
                )
                .arg(
                    Arg::new("bot-name")
                        .long("bot-name")
                        .value_name("NAME")
                        .help("Display name to post as (defaults to botName)"),
                )
                .arg(
                    Arg::new("act-as-manager")
                        .long("act-as-manager")
                        .help("Post as the manager the credentials belong to")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("display-as-channel")
                        .long("display-as-channel")
                        .help("Show the message as sent by the channel")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("read")
                .about("Print recent messages of a group or thread")
                .arg(
                    Arg::new("to")
                        .short('t')
                        .long("to")
                        .value_name("GROUP_ID")
                        .help("Group id to read")
                        .required(true),
                )
                .arg(
                    Arg::new("limit")
                        .short('n')
                        .long("limit")
                        .value_name("N")
                        .help("Number of messages")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("20"),
                )
                .arg(
                    Arg::new("thread")
                        .long("thread")
                        .value_name("ROOT_MESSAGE_ID")
                        .help("Read the replies of this thread"),
                ),
        )
        .subcommand(
            Command::new("setup")
                .about("Store Channel Talk credentials in the configuration file and enable the channel")
                .arg(
                    Arg::new("access-key")
                        .long("access-key")
                        .value_name("KEY")
                        .help("Channel Talk access key"),
                )
                .arg(
                    Arg::new("access-secret")
                        .long("access-secret")
                        .value_name("SECRET")
                        .help("Channel Talk access secret"),
                ),
        )
        .subcommand(Command::new("status").about("Show account configuration and listener status"))
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let code = match matches.subcommand() {
        Some(("serve", sub_matches)) => commands::serve::run(sub_matches).await,
        Some(("send", sub_matches)) => commands::send::run(sub_matches).await,
        Some(("read", sub_matches)) => commands::read::run(sub_matches).await,
        Some(("setup", sub_matches)) => commands::setup::run(sub_matches).await,
        Some(("status", sub_matches)) => commands::status::run(sub_matches).await,
        _ => {
            println!("talkbridge v{}", VERSION);
            println!("Use --help for available commands");
            0
        }
    };
    std::process::exit(code);
}
