//! WalletSession - ウォレット操作とキューへの信号転送
//!
//! UI のウォレット一覧から呼ばれる想定です。接続・切断を WalletCollaborator に依頼し、
//! 成功したら QueueManager に connect / disconnect 信号を送ります。

use std::sync::Arc;

use crate::domain::{ConnectError, TaskId};
use crate::ports::WalletCollaborator;
use crate::scheduler::DisconnectReport;

use super::manager::QueueManager;

/// What a `toggle` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Wallet connected; tasks resumed by the signal, oldest first.
    Connected { resumed: Vec<TaskId> },
    Disconnected(DisconnectReport),
    /// Another wallet is connected and `multi_wallets` is off.
    Ignored,
}

pub struct WalletSession {
    manager: Arc<QueueManager>,
    wallets: Arc<dyn WalletCollaborator>,
    wallet_types: Vec<String>,
    multi_wallets: bool,
}

impl WalletSession {
    /// `wallet_types` is the list shown to the user; it is what
    /// `multi_wallets = false` checks for an existing connection.
    pub fn new(
        manager: Arc<QueueManager>,
        wallets: Arc<dyn WalletCollaborator>,
        wallet_types: &[&str],
        multi_wallets: bool,
    ) -> Self {
        Self {
            manager,
            wallets,
            wallet_types: wallet_types.iter().map(|w| w.to_string()).collect(),
            multi_wallets,
        }
    }

    /// Connected wallet: disconnect it. Otherwise connect it on `chain`.
    ///
    /// A `ConnectError` is returned as is; no task is touched in that case.
    pub async fn toggle(
        &self,
        wallet_type: &str,
        chain: &str,
    ) -> Result<ToggleOutcome, ConnectError> {
        let state = self.wallets.current_state(wallet_type);
        if state.connected {
            let report = self.disconnect(wallet_type).await.unwrap_or_default();
            return Ok(ToggleOutcome::Disconnected(report));
        }

        if !self.multi_wallets && self.any_connected() {
            tracing::debug!(wallet_type, "connect ignored, another wallet is connected");
            return Ok(ToggleOutcome::Ignored);
        }
        if !state.installed {
            return Err(ConnectError::NotInstalled(wallet_type.to_string()));
        }

        if let Err(e) = self.wallets.connect(wallet_type, Some(chain)).await {
            tracing::warn!(wallet_type, chain, error = %e, "wallet connect failed");
            return Err(e);
        }
        let resumed = self.manager.on_wallet_connected(wallet_type, chain).await;
        Ok(ToggleOutcome::Connected { resumed })
    }

    /// Disconnect `wallet_type` if it is connected and forward the signal.
    ///
    /// Every disconnect is forwarded, also a repeated one for the same wallet.
    pub async fn disconnect(&self, wallet_type: &str) -> Option<DisconnectReport> {
        if !self.wallets.current_state(wallet_type).connected {
            return None;
        }
        self.wallets.disconnect(wallet_type).await;
        tracing::info!(wallet_type, "forwarding wallet disconnect");
        Some(self.manager.on_wallet_disconnected().await)
    }

    /// Drop half-open connections. Returns the wallets that were disconnected.
    pub async fn disconnect_connecting(&self) -> Vec<String> {
        let mut dropped = Vec::new();
        for wallet_type in &self.wallet_types {
            if self.wallets.current_state(wallet_type).connecting {
                self.wallets.disconnect(wallet_type).await;
                dropped.push(wallet_type.clone());
            }
        }
        dropped
    }

    pub fn multi_wallets(&self) -> bool {
        self.multi_wallets
    }

    fn any_connected(&self) -> bool {
        self.wallet_types
            .iter()
            .any(|w| self.wallets.current_state(w).connected)
    }
}
