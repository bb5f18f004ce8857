use thiserror::Error;

/// Failure of a shared wallet load. Cloneable so every caller waiting on
/// the same in-flight fetch receives the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("fetching trades for {wallet} failed: {message}")]
    SourceFetch { wallet: String, message: String },
    #[error("load for {wallet} ended without a result")]
    LoadAborted { wallet: String },
}

impl CacheError {
    pub fn source_fetch(wallet: &str, err: &anyhow::Error) -> Self {
        Self::SourceFetch {
            wallet: wallet.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn wallet(&self) -> &str {
        match self {
            Self::SourceFetch { wallet, .. } | Self::LoadAborted { wallet } => wallet,
        }
    }
}
