//! Per-wallet cache of trade history with request coalescing.
//!
//! Each wallet key is in one of four states: empty, loading, fresh or
//! stale. While a load is in flight its result channel sits in the
//! `in_flight` registry and every caller for that wallet waits on the same
//! channel, so at most one fetch per wallet runs at any time. The registry
//! and the entry map share one mutex; all check-and-set steps happen under
//! it and it is never held across an `.await`.
//!
//! Loads run on their own task and always finish, even if every caller
//! stops waiting. A finished load writes its entry even when the wallet was
//! cleared meanwhile (last writer wins). A failed load writes nothing, so a
//! previous good entry stays in place.

use crate::aggregator::AggregationReport;
use crate::error::CacheError;
use crate::projections::ProcessedData;
use crate::source::{RawAnalysisResult, RawTradeSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

type LoadOutcome = Result<Arc<RawAnalysisResult>, CacheError>;
type LoadSlot = watch::Receiver<Option<LoadOutcome>>;

struct CacheEntry {
    raw: Arc<RawAnalysisResult>,
    /// Projections of `raw`, computed on first request.
    processed: Option<Arc<ProcessedData>>,
    loaded_at: Instant,
}

impl CacheEntry {
    fn new(raw: Arc<RawAnalysisResult>) -> Self {
        Self {
            raw,
            processed: None,
            loaded_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.loaded_at) < ttl
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, LoadSlot>,
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record_entry_count(state: &CacheState) {
    metrics::gauge!("tradestats_cache_entries").set(state.entries.len() as f64);
}

fn record_request(outcome: &'static str) {
    metrics::counter!("tradestats_cache_requests_total", "outcome" => outcome).increment(1);
}

fn record_skips(report: &AggregationReport) {
    for (reason, count) in [
        ("missing_token", report.missing_token),
        ("non_positive_amount", report.non_positive_amount),
        ("non_finite", report.non_finite),
        ("duplicate_signature", report.duplicate_signature),
    ] {
        if count > 0 {
            metrics::counter!("tradestats_aggregation_skipped_total", "reason" => reason)
                .increment(count as u64);
        }
    }
}

/// Cheap to clone; clones share the same entries and in-flight loads.
pub struct WalletDataCache<S> {
    source: Arc<S>,
    ttl: Duration,
    state: Arc<Mutex<CacheState>>,
}

impl<S> Clone for WalletDataCache<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            ttl: self.ttl,
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: RawTradeSource> WalletDataCache<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self::with_shared_source(Arc::new(source), ttl)
    }

    pub fn with_shared_source(source: Arc<S>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the fresh cached snapshot, or joins / starts the single
    /// in-flight load for `wallet`. `force_refresh` skips the freshness
    /// check but still joins a load that is already running.
    pub async fn get_wallet_data(
        &self,
        wallet: &str,
        force_refresh: bool,
    ) -> Result<Arc<RawAnalysisResult>, CacheError> {
        let slot = {
            let mut state = lock(&self.state);
            if !force_refresh {
                if let Some(entry) = state.entries.get(wallet) {
                    if entry.is_fresh(self.ttl, Instant::now()) {
                        record_request("hit");
                        return Ok(Arc::clone(&entry.raw));
                    }
                }
            }

            let pending = state.in_flight.get(wallet).cloned();
            match pending {
                Some(slot) => {
                    record_request("coalesced");
                    debug!(wallet = wallet, "joining in-flight load");
                    slot
                }
                None => {
                    record_request("miss");
                    self.start_load(&mut state, wallet, force_refresh)
                }
            }
        };

        self.wait_for_load(wallet, slot).await
    }

    /// Projections for the current snapshot, computed once per snapshot.
    pub async fn get_processed_data(
        &self,
        wallet: &str,
        force_refresh: bool,
    ) -> Result<Arc<ProcessedData>, CacheError> {
        let raw = self.get_wallet_data(wallet, force_refresh).await?;

        let cached = lock(&self.state)
            .entries
            .get(wallet)
            .filter(|entry| Arc::ptr_eq(&entry.raw, &raw))
            .and_then(|entry| entry.processed.clone());
        if let Some(processed) = cached {
            return Ok(processed);
        }

        let processed = Arc::new(ProcessedData::from_raw(&raw));
        record_skips(&processed.report);
        if processed.report.skipped() > 0 {
            debug!(
                wallet = wallet,
                skipped = processed.report.skipped(),
                counted = processed.report.counted,
                "skipped malformed or duplicate trades"
            );
        }

        let mut state = lock(&self.state);
        if let Some(entry) = state.entries.get_mut(wallet) {
            if Arc::ptr_eq(&entry.raw, &raw) {
                entry.processed = Some(Arc::clone(&processed));
            }
        }
        drop(state);
        Ok(processed)
    }

    /// True only for a snapshot younger than the TTL.
    pub fn has_cached_data(&self, wallet: &str) -> bool {
        let now = Instant::now();
        lock(&self.state)
            .entries
            .get(wallet)
            .is_some_and(|entry| entry.is_fresh(self.ttl, now))
    }

    pub fn is_loading(&self, wallet: &str) -> bool {
        lock(&self.state).in_flight.contains_key(wallet)
    }

    /// Last successful snapshot, fresh or stale.
    pub fn peek(&self, wallet: &str) -> Option<Arc<RawAnalysisResult>> {
        lock(&self.state)
            .entries
            .get(wallet)
            .map(|entry| Arc::clone(&entry.raw))
    }

    /// Drops the entry for `wallet`. An in-flight load is left running.
    pub fn clear_cache(&self, wallet: &str) {
        let mut state = lock(&self.state);
        if state.entries.remove(wallet).is_some() {
            debug!(wallet = wallet, "cache entry cleared");
        }
        record_entry_count(&state);
    }

    pub fn clear_all_cache(&self) {
        let mut state = lock(&self.state);
        let cleared = state.entries.len();
        state.entries.clear();
        record_entry_count(&state);
        drop(state);
        debug!(cleared, "cache cleared");
    }

    fn start_load(&self, state: &mut CacheState, wallet: &str, forced: bool) -> LoadSlot {
        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(wallet.to_string(), rx.clone());

        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.state);
        let wallet = wallet.to_string();
        debug!(wallet = %wallet, forced, "starting wallet load");

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome: LoadOutcome = match source.fetch_trades(&wallet).await {
                Ok(trades) => Ok(Arc::new(RawAnalysisResult::new(wallet.clone(), trades))),
                Err(e) => Err(CacheError::source_fetch(&wallet, &e)),
            };
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            {
                let mut state = lock(&shared);
                state.in_flight.remove(&wallet);
                if let Ok(raw) = &outcome {
                    state
                        .entries
                        .insert(wallet.clone(), CacheEntry::new(Arc::clone(raw)));
                    record_entry_count(&state);
                }
            }

            match &outcome {
                Ok(raw) => info!(
                    wallet = %wallet,
                    trades = raw.trades.len(),
                    elapsed_ms,
                    "wallet load complete"
                ),
                Err(e) => warn!(wallet = %wallet, error = %e, elapsed_ms, "wallet load failed"),
            }

            tx.send_replace(Some(outcome));
        });

        rx
    }

    async fn wait_for_load(&self, wallet: &str, mut slot: LoadSlot) -> LoadOutcome {
        let published = slot
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| (*value).clone());
        if let Some(outcome) = published {
            return outcome;
        }

        // The load task ended without publishing; unblock later callers.
        let mut state = lock(&self.state);
        if state
            .in_flight
            .get(wallet)
            .is_some_and(|pending| pending.same_channel(&slot))
        {
            state.in_flight.remove(wallet);
        }
        drop(state);
        warn!(wallet = wallet, "wallet load aborted");
        Err(CacheError::LoadAborted {
            wallet: wallet.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{Trade, TradeSide};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinSet;

    struct ScriptedSource {
        calls: AtomicUsize,
        delay: Duration,
        failing: Mutex<HashSet<String>>,
    }

    impl ScriptedSource {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                failing: Mutex::new(HashSet::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, wallet: &str, failing: bool) {
            let mut set = self.failing.lock().unwrap();
            if failing {
                set.insert(wallet.to_string());
            } else {
                set.remove(wallet);
            }
        }
    }

    fn sample_trades(wallet: &str) -> Vec<Trade> {
        let mk = |sig: &str, side, usd, ts| Trade {
            signature: format!("{wallet}-{sig}"),
            token_address: "TokA".to_string(),
            token_symbol: Some("A".to_string()),
            token_logo_uri: None,
            side,
            amount: 10.0,
            value_usd: usd,
            timestamp: ts,
            starred: false,
            notes: None,
        };
        vec![
            mk("1", TradeSide::Buy, 100.0, 1),
            mk("2", TradeSide::Sell, 150.0, 2),
        ]
    }

    impl RawTradeSource for ScriptedSource {
        async fn fetch_trades(&self, wallet: &str) -> anyhow::Result<Vec<Trade>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.failing.lock().unwrap().contains(wallet) {
                anyhow::bail!("rpc unavailable");
            }
            Ok(sample_trades(wallet))
        }
    }

    struct PanickingSource;

    impl RawTradeSource for PanickingSource {
        async fn fetch_trades(&self, _wallet: &str) -> anyhow::Result<Vec<Trade>> {
            tokio::task::yield_now().await;
            panic!("decoder bug");
        }
    }

    fn cache(delay_ms: u64) -> WalletDataCache<ScriptedSource> {
        WalletDataCache::new(
            ScriptedSource::new(Duration::from_millis(delay_ms)),
            DEFAULT_TTL,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_fetch() {
        let cache = cache(100);
        let mut set = JoinSet::new();
        for _ in 0..8 {
            let c = cache.clone();
            set.spawn(async move { c.get_wallet_data("W1", false).await });
        }

        let mut results = Vec::new();
        while let Some(res) = set.join_next().await {
            results.push(res.unwrap().unwrap());
        }

        assert_eq!(cache.source().calls(), 1);
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert!(!cache.is_loading("W1"));
        assert!(cache.has_cached_data("W1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_failure() {
        let cache = cache(100);
        cache.source().set_failing("W1", true);

        let mut set = JoinSet::new();
        for _ in 0..4 {
            let c = cache.clone();
            set.spawn(async move { c.get_wallet_data("W1", false).await });
        }
        let mut errors = Vec::new();
        while let Some(res) = set.join_next().await {
            errors.push(res.unwrap().unwrap_err());
        }

        assert_eq!(cache.source().calls(), 1);
        assert!(errors.iter().all(|e| *e == errors[0]));
        assert!(matches!(&errors[0], CacheError::SourceFetch { wallet, message }
            if wallet == "W1" && message.contains("rpc unavailable")));
        assert!(!cache.has_cached_data("W1"));
        assert!(!cache.is_loading("W1"));

        cache.source().set_failing("W1", false);
        cache.get_wallet_data("W1", false).await.unwrap();
        assert_eq!(cache.source().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_served_until_ttl_elapses() {
        let cache = cache(0);
        let first = cache.get_wallet_data("W1", false).await.unwrap();
        assert_eq!(cache.source().calls(), 1);

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        let second = cache.get_wallet_data("W1", false).await.unwrap();
        assert_eq!(cache.source().calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert!(!cache.has_cached_data("W1"));
        assert!(cache.peek("W1").is_some_and(|raw| Arc::ptr_eq(&raw, &first)));

        let third = cache.get_wallet_data("W1", false).await.unwrap();
        assert_eq!(cache.source().calls(), 2);
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(cache.has_cached_data("W1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_entry() {
        let cache = cache(0);
        let good = cache.get_wallet_data("W1", false).await.unwrap();

        cache.source().set_failing("W1", true);
        let err = cache.get_wallet_data("W1", true).await.unwrap_err();
        assert_eq!(err.wallet(), "W1");
        assert_eq!(cache.source().calls(), 2);

        let after = cache.get_wallet_data("W1", false).await.unwrap();
        assert!(Arc::ptr_eq(&good, &after));
        assert_eq!(cache.source().calls(), 2);
        assert!(cache.has_cached_data("W1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_refetches_fresh_entry() {
        let cache = cache(0);
        let first = cache.get_wallet_data("W1", false).await.unwrap();
        let forced = cache.get_wallet_data("W1", true).await.unwrap();
        assert_eq!(cache.source().calls(), 2);
        assert!(!Arc::ptr_eq(&first, &forced));
        assert!(Arc::ptr_eq(&cache.peek("W1").unwrap(), &forced));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_joins_in_flight_load() {
        let cache = cache(100);
        let c = cache.clone();
        let pending = tokio::spawn(async move { c.get_wallet_data("W1", false).await });
        tokio::task::yield_now().await;
        assert!(cache.is_loading("W1"));

        let forced = cache.get_wallet_data("W1", true).await.unwrap();
        let first = pending.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &forced));
        assert_eq!(cache.source().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_load_still_stores_result() {
        let cache = cache(100);
        let c = cache.clone();
        let pending = tokio::spawn(async move { c.get_wallet_data("W1", false).await });
        tokio::task::yield_now().await;
        assert!(cache.is_loading("W1"));

        cache.clear_all_cache();
        assert!(cache.is_loading("W1"));

        pending.await.unwrap().unwrap();
        assert!(cache.has_cached_data("W1"));
        assert_eq!(cache.source().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache_forces_next_fetch() {
        let cache = cache(0);
        cache.get_wallet_data("W1", false).await.unwrap();
        cache.get_wallet_data("W2", false).await.unwrap();

        cache.clear_cache("W1");
        assert!(!cache.has_cached_data("W1"));
        assert!(cache.peek("W1").is_none());
        assert!(cache.has_cached_data("W2"));

        cache.get_wallet_data("W1", false).await.unwrap();
        assert_eq!(cache.source().calls(), 3);

        cache.clear_all_cache();
        assert!(!cache.has_cached_data("W1"));
        assert!(!cache.has_cached_data("W2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallets_are_independent() {
        let cache = cache(50);
        cache.source().set_failing("BAD", true);

        let (bad, good) = tokio::join!(
            cache.get_wallet_data("BAD", false),
            cache.get_wallet_data("GOOD", false)
        );
        assert!(bad.is_err());
        assert_eq!(good.unwrap().wallet_address, "GOOD");
        assert_eq!(cache.source().calls(), 2);
        assert!(cache.has_cached_data("GOOD"));
        assert!(!cache.has_cached_data("BAD"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_processed_data_cached_per_snapshot() {
        let cache = cache(0);
        let first = cache.get_processed_data("W1", false).await.unwrap();
        let again = cache.get_processed_data("W1", false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.source().calls(), 1);

        let record = &first.records["TokA"];
        assert_eq!(record.profit_loss, 50.0);
        assert_eq!(first.top_trades.len(), 1);

        let refreshed = cache.get_processed_data("W1", true).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(*first, *refreshed);
        assert_eq!(cache.source().calls(), 2);
    }

    #[tokio::test]
    async fn test_panicking_load_reports_abort_and_allows_retry() {
        let cache = WalletDataCache::new(PanickingSource, DEFAULT_TTL);
        let err = cache.get_wallet_data("W1", false).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::LoadAborted {
                wallet: "W1".to_string()
            }
        );
        assert!(!cache.is_loading("W1"));

        let again = cache.get_wallet_data("W1", false).await.unwrap_err();
        assert!(matches!(again, CacheError::LoadAborted { .. }));
    }

    #[test]
    fn test_request_outcomes_are_counted() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            rt.block_on(async {
                let cache = cache(0);
                cache.get_wallet_data("W1", false).await.unwrap();
                cache.get_wallet_data("W1", false).await.unwrap();
            });
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"tradestats_cache_requests_total{outcome="miss"} 1"#));
        assert!(rendered.contains(r#"tradestats_cache_requests_total{outcome="hit"} 1"#));
    }
}
