//! Receiver lifecycle status and the read-only projections the host sees.
//!
//! The receiver owns a [`StatusPublisher`]; every lifecycle transition
//! builds a new [`AccountRuntimeStatus`] and replaces the published one in a
//! single step, so readers holding a [`StatusHandle`] never observe a
//! half-updated record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::ResolvedAccount;
use crate::error::ChannelTalkError;

/// Webhook receiver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Terminal until the host starts the account again.
    Failed,
}

impl ReceiverState {
    /// Starting or Running.
    pub fn is_active(&self) -> bool {
        matches!(self, ReceiverState::Starting | ReceiverState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRuntimeStatus {
    pub account_id: String,
    pub state: ReceiverState,
    pub running: bool,
    pub last_start_at: Option<DateTime<Utc>>,
    pub last_stop_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub port: Option<u16>,
}

impl AccountRuntimeStatus {
    /// Status of an account whose receiver never ran.
    pub fn default_runtime(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            state: ReceiverState::Stopped,
            running: false,
            last_start_at: None,
            last_stop_at: None,
            last_error: None,
            port: None,
        }
    }
}

/// Writer side, owned by a single receiver.
pub struct StatusPublisher {
    tx: watch::Sender<AccountRuntimeStatus>,
}

impl StatusPublisher {
    pub fn new(account_id: &str) -> (Self, StatusHandle) {
        let (tx, rx) = watch::channel(AccountRuntimeStatus::default_runtime(account_id));
        (Self { tx }, StatusHandle { rx })
    }

    pub fn subscribe(&self) -> StatusHandle {
        StatusHandle {
            rx: self.tx.subscribe(),
        }
    }

    pub fn current(&self) -> AccountRuntimeStatus {
        self.tx.borrow().clone()
    }

    /// Build the next record from the current one and publish it whole.
    pub(crate) fn transition<F>(&self, update: F) -> AccountRuntimeStatus
    where
        F: FnOnce(&mut AccountRuntimeStatus),
    {
        let mut next = self.current();
        update(&mut next);
        next.running = next.state == ReceiverState::Running;
        tracing::debug!(
            account = %next.account_id,
            state = ?next.state,
            "receiver state changed"
        );
        self.tx.send_replace(next.clone());
        next
    }
}

/// Read side of the account status, cheap to clone.
#[derive(Clone)]
pub struct StatusHandle {
    rx: watch::Receiver<AccountRuntimeStatus>,
}

impl StatusHandle {
    pub fn snapshot(&self) -> AccountRuntimeStatus {
        self.rx.borrow().clone()
    }

    /// Wait for the next published status.
    pub async fn changed(&mut self) -> Result<AccountRuntimeStatus, ChannelTalkError> {
        self.rx
            .changed()
            .await
            .map_err(|_| ChannelTalkError::NotRunning)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the status satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Result<AccountRuntimeStatus, ChannelTalkError>
    where
        F: FnMut(&AccountRuntimeStatus) -> bool,
    {
        let status = self
            .rx
            .wait_for(predicate)
            .await
            .map_err(|_| ChannelTalkError::NotRunning)?;
        Ok(status.clone())
    }
}

/// `configured` / `enabled` flags of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountProbe {
    pub configured: bool,
    pub enabled: bool,
}

/// Full per-account view for the host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account_id: String,
    pub configured: bool,
    pub enabled: bool,
    pub state: ReceiverState,
    pub running: bool,
    pub last_start_at: Option<DateTime<Utc>>,
    pub last_stop_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub port: Option<u16>,
}

/// Channel-level summary line.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub configured: bool,
    pub running: bool,
    pub last_start_at: Option<DateTime<Utc>>,
    pub last_stop_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub port: Option<u16>,
}

pub fn probe_account(account: &ResolvedAccount) -> AccountProbe {
    AccountProbe {
        configured: account.is_configured(),
        enabled: account.is_enabled(),
    }
}

pub fn build_account_snapshot(
    account: &ResolvedAccount,
    runtime: Option<&AccountRuntimeStatus>,
) -> AccountSnapshot {
    let runtime = runtime
        .cloned()
        .unwrap_or_else(|| AccountRuntimeStatus::default_runtime(&account.account_id));
    AccountSnapshot {
        account_id: account.account_id.clone(),
        configured: account.is_configured(),
        enabled: account.is_enabled(),
        state: runtime.state,
        running: runtime.running,
        last_start_at: runtime.last_start_at,
        last_stop_at: runtime.last_stop_at,
        last_error: runtime.last_error,
        port: runtime.port,
    }
}

pub fn build_channel_summary(snapshot: &AccountSnapshot) -> ChannelSummary {
    ChannelSummary {
        configured: snapshot.configured,
        running: snapshot.running,
        last_start_at: snapshot.last_start_at,
        last_stop_at: snapshot.last_stop_at,
        last_error: snapshot.last_error.clone(),
        port: snapshot.port,
    }
}
