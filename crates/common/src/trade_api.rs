use crate::config::Source;
use crate::types::{ApiTrade, Trade};
use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use std::time::Duration;

/// Client for the paginated wallet trade-history endpoint:
/// `GET {base_url}/wallets/{wallet}/trades?limit=..&offset=..`.
pub struct TradeApiClient {
    base_url: String,
    http: reqwest::Client,
    page_size: u32,
    max_pages: u32,
    page_delay: Duration,
}

impl TradeApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            page_size: 100,
            max_pages: 50,
            page_delay: Duration::ZERO,
        }
    }

    pub fn from_settings(settings: &Source) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            http,
            page_size: settings.page_size.max(1),
            max_pages: settings.max_pages.max(1),
            page_delay: Duration::from_millis(settings.page_delay_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn trades_url(&self, wallet: &str, limit: u32, offset: u32) -> Result<String> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid trade API base_url {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("trade API base_url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["wallets", wallet, "trades"]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        Ok(url.to_string())
    }

    pub async fn fetch_trades_page(
        &self,
        wallet: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ApiTrade>> {
        let url = self.trades_url(wallet, limit, offset)?;
        let page = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?
            .json::<Vec<ApiTrade>>()
            .await
            .with_context(|| format!("decoding trades page from {url}"))?;
        Ok(page)
    }

    /// Walks pages until a short page or `max_pages`. Records that cannot
    /// become a [`Trade`] are dropped here.
    pub async fn fetch_all_trades(&self, wallet: &str) -> Result<Vec<Trade>> {
        let mut trades = Vec::new();
        let mut dropped = 0usize;

        for page in 0..self.max_pages {
            if page > 0 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            let offset = page * self.page_size;
            let items = self.fetch_trades_page(wallet, self.page_size, offset).await?;
            let received = items.len();

            for item in items {
                match item.into_trade() {
                    Some(trade) => trades.push(trade),
                    None => dropped += 1,
                }
            }

            if received < self.page_size as usize {
                break;
            }
            if page + 1 == self.max_pages {
                tracing::warn!(
                    wallet = wallet,
                    max_pages = self.max_pages,
                    "trade history truncated at max_pages"
                );
            }
        }

        if dropped > 0 {
            tracing::debug!(wallet = wallet, dropped, "dropped undecodable trade records");
        }
        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_constructs_trades_url() {
        let client = TradeApiClient::new("https://stats.example.com/api/");
        let url = client.trades_url("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU", 100, 200).unwrap();
        assert_eq!(
            url,
            "https://stats.example.com/api/wallets/7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU/trades?limit=100&offset=200"
        );
    }

    #[test]
    fn test_trades_url_escapes_path_characters() {
        let client = TradeApiClient::new("http://localhost:8787");
        let url = client.trades_url("a/b", 10, 0).unwrap();
        assert!(url.contains("/wallets/a%2Fb/trades"));
    }

    #[test]
    fn test_invalid_base_url_is_an_error() {
        let client = TradeApiClient::new("not a url");
        assert!(client.trades_url("W", 10, 0).is_err());
    }

    #[test]
    fn test_from_settings_clamps_page_size() {
        let settings = Source {
            base_url: "http://localhost:8787/".to_string(),
            request_timeout_secs: 5,
            page_size: 0,
            max_pages: 0,
            page_delay_ms: 0,
        };
        let client = TradeApiClient::from_settings(&settings).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8787");
        assert_eq!(client.page_size(), 1);
    }

    #[test]
    fn test_parse_fixture_trades() {
        let json = include_str!("../tests/fixtures/wallet_trades_sample.json");
        let trades: Vec<ApiTrade> = serde_json::from_str(json).unwrap();
        assert!(!trades.is_empty());
        let converted: Vec<Trade> = trades.into_iter().filter_map(ApiTrade::into_trade).collect();
        assert!(converted.iter().any(|t| t.starred));
    }
}
