pub mod aggregator;
pub mod cache;
pub mod error;
pub mod metrics;
pub mod projections;
pub mod source;

pub use aggregator::{aggregate, TokenPerformanceRecord};
pub use cache::{WalletDataCache, DEFAULT_TTL};
pub use error::CacheError;
pub use projections::ProcessedData;
pub use source::RawTradeSource;
