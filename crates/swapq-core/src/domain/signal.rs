//! WalletSignal - ウォレット側から届く一時的な通知（永続化しない）

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    Connected,
    Disconnected,
}

/// A wallet state transition reported by the wallet collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSignal {
    pub kind: SignalKind,
    pub wallet_type: Option<String>,
    pub chain: Option<String>,
}

impl WalletSignal {
    pub fn connected(wallet_type: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Connected,
            wallet_type: Some(wallet_type.into()),
            chain: Some(chain.into()),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            kind: SignalKind::Disconnected,
            wallet_type: None,
            chain: None,
        }
    }
}
