use serde::{Deserialize, Serialize};

/// A single classified trade on the tracked token, after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub mint: String,
    pub trader: String,
    pub side: TradeSide,
    pub sol_amount: f64,
    pub token_amount: f64,
    pub timestamp_ms: u64,
    pub signature: Option<String>,
    pub is_own: bool,
    pub owner_label: Option<String>,
    pub injected: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WalletRole {
    Funding,
    Creator,
    Bundle,
    Holder,
}

impl WalletRole {
    pub fn as_str(&self) -> &str {
        match self {
            WalletRole::Funding => "funding",
            WalletRole::Creator => "creator",
            WalletRole::Bundle => "bundle",
            WalletRole::Holder => "holder",
        }
    }

    /// Display name used when numbering wallets of the same role.
    pub fn label_base(&self) -> &str {
        match self {
            WalletRole::Funding => "Funding",
            WalletRole::Creator => "Creator",
            WalletRole::Bundle => "Bundle",
            WalletRole::Holder => "Holder",
        }
    }
}

/// One operator-owned wallet as known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEntry {
    pub address: String,
    pub role: WalletRole,
    pub label: String,
}
