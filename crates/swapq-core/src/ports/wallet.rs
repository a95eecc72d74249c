//! WalletCollaborator port - ウォレット接続状態の参照と接続／切断
//!
//! 個別チェーンのウォレットアダプタ実装はこのクレートの外にあります。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ConnectError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletState {
    pub connected: bool,
    pub installed: bool,
    #[serde(default)]
    pub connecting: bool,
}

#[async_trait]
pub trait WalletCollaborator: Send + Sync {
    fn current_state(&self, wallet_type: &str) -> WalletState;

    async fn connect(&self, wallet_type: &str, chain: Option<&str>) -> Result<(), ConnectError>;

    async fn disconnect(&self, wallet_type: &str);

    /// Can this wallet be asked to switch to `chain` by the step itself?
    ///
    /// When true, a task waiting for a network change on `chain` is resumed as
    /// soon as this wallet connects, on any network.
    fn can_switch_network(&self, _wallet_type: &str, _chain: &str) -> bool {
        false
    }
}
