//! Channel Talk team-chat channel for chat-automation hosts.
//!
//! Bridges a host and the Channel Talk Open API v5 in both directions:
//!
//! - **Inbound**: an Axum webhook receiver verifies and normalizes team-chat
//!   events, drops redeliveries and the bot's own messages, applies the
//!   group policy / allowlist / mention filter and hands accepted messages
//!   to the host's [`InboundHandler`].
//! - **Outbound**: [`ChannelTalkApiClient`] posts messages with a fixed
//!   1 s / 3 s retry schedule and classifies failures into
//!   [`ChannelTalkError`] variants.
//!
//! [`ChannelTalkManager`] ties both to a host-supplied [`AccountResolver`]
//! and exposes the `read` history action and status projections.

pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod history;
pub mod logging;
pub mod manager;
pub mod policy;
pub mod receiver;
pub mod retry;
pub mod status;
pub mod traits;
pub mod types;
pub mod verify;

// Re-export core types
pub use api::{extract_message_id, ChannelTalkApiClient, ReadQuery};
pub use config::{
    BridgeConfig, ChannelTalkConfig, GroupPolicy, ResolvedAccount, WebhookConfig,
    DEFAULT_ACCOUNT_ID,
};
pub use error::ChannelTalkError;
pub use events::{classify, parse_event, Classification, DropReason, InboundEvent};
pub use history::{format_history, read_history, ActionContent, ActionResult, ReadRequest};
pub use logging::{InteractionAction, InteractionLog, InteractionLogger};
pub use manager::{AccountTask, ChannelTalkManager};
pub use policy::PolicyFilter;
pub use receiver::WebhookReceiver;
pub use retry::{AttemptFailure, RetryPolicy, RetryStep};
pub use status::{
    build_account_snapshot, build_channel_summary, probe_account, AccountProbe,
    AccountRuntimeStatus, AccountSnapshot, ChannelSummary, ReceiverState, StatusHandle,
};
pub use traits::{AccountResolver, FileResolver, InboundHandler, StaticResolver};
pub use types::{
    Credentials, InboundMessage, MessageBlock, MessageOption, OutboundMessage, PolicyDecision,
    RejectReason, SendReceipt, TextBlock,
};
