use anyhow::Result;
use chrono::{DateTime, Utc};
use common::trade_api::TradeApiClient;
use common::types::Trade;
use serde::Serialize;
use std::time::Instant;

/// Snapshot produced by one successful wallet load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawAnalysisResult {
    pub wallet_address: String,
    pub trades: Vec<Trade>,
    pub fetched_at: DateTime<Utc>,
}

impl RawAnalysisResult {
    pub fn new(wallet_address: impl Into<String>, trades: Vec<Trade>) -> Self {
        Self {
            wallet_address: wallet_address.into(),
            trades,
            fetched_at: Utc::now(),
        }
    }
}

/// Supplies the flat trade history of a wallet. Treated by the cache as an
/// opaque, possibly slow, possibly failing call.
pub trait RawTradeSource: Send + Sync + 'static {
    fn fetch_trades(
        &self,
        wallet: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Trade>>> + Send;
}

impl RawTradeSource for TradeApiClient {
    async fn fetch_trades(&self, wallet: &str) -> Result<Vec<Trade>> {
        let start = Instant::now();
        let res = self.fetch_all_trades(wallet).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("tradestats_source_fetch_latency_ms", "source" => "trade_api")
            .record(ms);
        match res {
            Ok(trades) => {
                metrics::counter!("tradestats_source_fetches_total", "source" => "trade_api", "status" => "ok").increment(1);
                tracing::debug!(wallet = wallet, trades = trades.len(), ms, "fetched trade history");
                Ok(trades)
            }
            Err(e) => {
                metrics::counter!("tradestats_source_fetches_total", "source" => "trade_api", "status" => "error").increment(1);
                Err(e)
            }
        }
    }
}
