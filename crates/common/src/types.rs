use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

impl TradeSide {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// One executed swap for a wallet. Immutable once observed; only the
/// annotation fields are ever changed, and never by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub signature: String,
    /// Empty when the source did not report the token.
    pub token_address: String,
    pub token_symbol: Option<String>,
    pub token_logo_uri: Option<String>,
    pub side: TradeSide,
    pub amount: f64,
    pub value_usd: f64,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Trade {
    pub fn has_token(&self) -> bool {
        !self.token_address.trim().is_empty()
    }
}

/// Trade record as served by the trade-history API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiTrade {
    pub signature: Option<String>,
    #[serde(rename = "tokenAddress")]
    pub token_address: Option<String>,
    #[serde(rename = "tokenSymbol")]
    pub token_symbol: Option<String>,
    #[serde(rename = "tokenLogoURI")]
    pub token_logo_uri: Option<String>,
    #[serde(rename = "type")]
    pub trade_type: Option<String>,
    pub amount: Option<f64>,
    #[serde(rename = "valueUSD")]
    pub value_usd: Option<f64>,
    pub timestamp: Option<i64>,
    pub starred: Option<bool>,
    pub notes: Option<String>,
}

impl ApiTrade {
    /// Converts into a domain trade. Returns `None` when the side or the
    /// timestamp is unusable; quantity checks are left to aggregation.
    pub fn into_trade(self) -> Option<Trade> {
        let side = TradeSide::from_str_loose(self.trade_type.as_deref()?)?;
        let timestamp = self.timestamp?;
        Some(Trade {
            signature: self.signature.unwrap_or_default(),
            token_address: self.token_address.unwrap_or_default(),
            token_symbol: self.token_symbol.filter(|s| !s.is_empty()),
            token_logo_uri: self.token_logo_uri.filter(|s| !s.is_empty()),
            side,
            amount: self.amount.unwrap_or(0.0),
            value_usd: self.value_usd.unwrap_or(0.0),
            timestamp,
            starred: self.starred.unwrap_or(false),
            notes: self.notes.filter(|s| !s.trim().is_empty()),
        })
    }
}
