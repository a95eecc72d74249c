//! Step outcome: the only thing the scheduler learns from an executor.
//!
//! The executor is opaque. It never hands back chain-specific payloads the
//! scheduler would need to understand; `result` is stored verbatim on the step.

use serde::{Deserialize, Serialize};

/// What a blocked step needs before it can be re-attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletPrecondition {
    /// A wallet has to be connected (optionally a specific wallet family).
    ConnectWallet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wallet_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chain: Option<String>,
    },

    /// The wallet has to be on `chain`.
    ChangeNetwork {
        chain: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wallet_type: Option<String>,
    },
}

impl WalletPrecondition {
    pub fn connect_wallet(wallet_type: impl Into<String>) -> Self {
        Self::ConnectWallet {
            wallet_type: Some(wallet_type.into()),
            chain: None,
        }
    }

    pub fn any_wallet() -> Self {
        Self::ConnectWallet {
            wallet_type: None,
            chain: None,
        }
    }

    pub fn change_network(chain: impl Into<String>) -> Self {
        Self::ChangeNetwork {
            chain: chain.into(),
            wallet_type: None,
        }
    }

    pub fn with_wallet_type(self, wallet: impl Into<String>) -> Self {
        let wallet = Some(wallet.into());
        match self {
            Self::ConnectWallet { chain, .. } => Self::ConnectWallet {
                wallet_type: wallet,
                chain,
            },
            Self::ChangeNetwork { chain, .. } => Self::ChangeNetwork {
                chain,
                wallet_type: wallet,
            },
        }
    }

    pub fn with_chain(self, chain: impl Into<String>) -> Self {
        let chain = chain.into();
        match self {
            Self::ConnectWallet { wallet_type, .. } => Self::ConnectWallet {
                wallet_type,
                chain: Some(chain),
            },
            Self::ChangeNetwork { wallet_type, .. } => Self::ChangeNetwork { chain, wallet_type },
        }
    }

    pub fn wallet_type(&self) -> Option<&str> {
        match self {
            Self::ConnectWallet { wallet_type, .. } | Self::ChangeNetwork { wallet_type, .. } => {
                wallet_type.as_deref()
            }
        }
    }

    pub fn chain(&self) -> Option<&str> {
        match self {
            Self::ConnectWallet { chain, .. } => chain.as_deref(),
            Self::ChangeNetwork { chain, .. } => Some(chain),
        }
    }
}

/// Result of executing one step.
///
/// - `Done`: the step finished; `result` is kept on the step.
/// - `Blocked`: cannot proceed until the precondition holds; the same step is
///   re-attempted on resume.
/// - `Error`: unrecoverable for this task, the task becomes `FAILED`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Done { result: Option<serde_json::Value> },
    Blocked(WalletPrecondition),
    Error(String),
}

impl StepOutcome {
    pub fn done() -> Self {
        Self::Done { result: None }
    }

    pub fn done_with(result: serde_json::Value) -> Self {
        Self::Done {
            result: Some(result),
        }
    }

    pub fn blocked(precondition: WalletPrecondition) -> Self {
        Self::Blocked(precondition)
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::Error(detail.into())
    }
}
