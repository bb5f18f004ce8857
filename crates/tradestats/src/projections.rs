use crate::aggregator::{
    closed_records, group_by_token, screen_trades, AggregationReport, TokenBucket,
    TokenPerformanceRecord,
};
use crate::source::RawAnalysisResult;
use common::types::Trade;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Token that was bought in the window but never sold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenPosition {
    pub token_address: String,
    pub token_symbol: Option<String>,
    pub token_logo_uri: Option<String>,
    pub total_bought: f64,
    pub total_buy_value_usd: f64,
    pub buy_count: usize,
    pub first_buy_timestamp: i64,
    pub last_buy_timestamp: i64,
}

impl OpenPosition {
    fn from_bucket(bucket: &TokenBucket) -> Option<Self> {
        if !bucket.is_open() {
            return None;
        }
        Some(Self {
            token_address: bucket.token_address.clone(),
            token_symbol: bucket.token_symbol.clone(),
            token_logo_uri: bucket.token_logo_uri.clone(),
            total_bought: bucket.buys.iter().map(|f| f.amount).sum(),
            total_buy_value_usd: bucket.buys.iter().map(|f| f.value_usd).sum(),
            buy_count: bucket.buys.len(),
            first_buy_timestamp: bucket.buys.iter().map(|f| f.timestamp).min()?,
            last_buy_timestamp: bucket.buys.iter().map(|f| f.timestamp).max()?,
        })
    }

    pub fn display_name(&self) -> &str {
        self.token_symbol.as_deref().unwrap_or(&self.token_address)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletSummary {
    pub trade_count: usize,
    pub closed_positions: usize,
    pub open_positions: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// `winning_trades / closed_positions`, zero when nothing closed.
    pub win_rate: f64,
    pub total_profit_loss: f64,
    pub total_volume_usd: f64,
    pub best_profit_loss: Option<f64>,
    pub worst_profit_loss: Option<f64>,
}

/// Every page-level view derived from one raw snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedData {
    pub wallet_address: String,
    pub records: BTreeMap<String, TokenPerformanceRecord>,
    pub top_trades: Vec<TokenPerformanceRecord>,
    pub open_positions: Vec<OpenPosition>,
    pub history: Vec<Trade>,
    pub summary: WalletSummary,
    pub report: AggregationReport,
}

impl ProcessedData {
    pub fn from_raw(raw: &RawAnalysisResult) -> Self {
        let (screened, report) = screen_trades(&raw.trades);
        let buckets = group_by_token(screened.iter().copied());
        let records = closed_records(&buckets);
        let open_positions = open_positions_from(&buckets);
        let history: Vec<Trade> = screened.iter().rev().map(|t| (*t).clone()).collect();
        let summary = summarize(&records, &open_positions, &history);

        Self {
            wallet_address: raw.wallet_address.clone(),
            top_trades: top_trades(&records),
            records,
            open_positions,
            history,
            summary,
            report,
        }
    }
}

/// Closed records, best profit first.
pub fn top_trades(records: &BTreeMap<String, TokenPerformanceRecord>) -> Vec<TokenPerformanceRecord> {
    let mut sorted: Vec<TokenPerformanceRecord> = records.values().cloned().collect();
    sorted.sort_by(|a, b| {
        b.profit_loss
            .total_cmp(&a.profit_loss)
            .then_with(|| a.token_address.cmp(&b.token_address))
    });
    sorted
}

/// Buy-only tokens, most recently bought first.
pub fn open_positions(trades: &[Trade]) -> Vec<OpenPosition> {
    let (screened, _) = screen_trades(trades);
    open_positions_from(&group_by_token(screened))
}

fn open_positions_from(buckets: &BTreeMap<String, TokenBucket>) -> Vec<OpenPosition> {
    let mut open: Vec<OpenPosition> = buckets.values().filter_map(OpenPosition::from_bucket).collect();
    open.sort_by(|a, b| {
        b.last_buy_timestamp
            .cmp(&a.last_buy_timestamp)
            .then_with(|| a.token_address.cmp(&b.token_address))
    });
    open
}

/// Valid, deduplicated trades, newest first.
pub fn trading_history(trades: &[Trade]) -> Vec<Trade> {
    let (screened, _) = screen_trades(trades);
    screened.into_iter().rev().cloned().collect()
}

pub fn summarize(
    records: &BTreeMap<String, TokenPerformanceRecord>,
    open_positions: &[OpenPosition],
    history: &[Trade],
) -> WalletSummary {
    let closed = records.len();
    let winning = records.values().filter(|r| r.profit_loss > 0.0).count();
    let losing = records.values().filter(|r| r.profit_loss < 0.0).count();
    let win_rate = if closed == 0 {
        0.0
    } else {
        winning as f64 / closed as f64
    };

    WalletSummary {
        trade_count: history.len(),
        closed_positions: closed,
        open_positions: open_positions.len(),
        winning_trades: winning,
        losing_trades: losing,
        win_rate,
        total_profit_loss: records.values().map(|r| r.profit_loss).sum(),
        total_volume_usd: history.iter().map(|t| t.value_usd).sum(),
        best_profit_loss: records.values().map(|r| r.profit_loss).max_by(f64::total_cmp),
        worst_profit_loss: records.values().map(|r| r.profit_loss).min_by(f64::total_cmp),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub starred: bool,
    pub notes: Option<String>,
}

/// User annotations keyed by token address, owned by the persistence layer.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    by_token: HashMap<String, Annotation>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds annotations from flags carried on raw trades. A token is
    /// starred if any of its trades is; the most recent note wins.
    pub fn from_trades(trades: &[Trade]) -> Self {
        let (screened, _) = screen_trades(trades);
        let mut annotations = Self::new();
        for trade in screened {
            if !trade.starred && trade.notes.is_none() {
                continue;
            }
            let entry = annotations
                .by_token
                .entry(trade.token_address.clone())
                .or_default();
            entry.starred |= trade.starred;
            if trade.notes.is_some() {
                entry.notes.clone_from(&trade.notes);
            }
        }
        annotations
    }

    pub fn set(&mut self, token_address: impl Into<String>, annotation: Annotation) {
        self.by_token.insert(token_address.into(), annotation);
    }

    pub fn star(&mut self, token_address: impl Into<String>) {
        self.by_token.entry(token_address.into()).or_default().starred = true;
    }

    pub fn get(&self, token_address: &str) -> Option<&Annotation> {
        self.by_token.get(token_address)
    }

    pub fn is_starred(&self, token_address: &str) -> bool {
        self.get(token_address).is_some_and(|a| a.starred)
    }

    /// Entries in `other` replace entries for the same token.
    pub fn merge(&mut self, other: Self) {
        self.by_token.extend(other.by_token);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeLogEntry {
    pub record: TokenPerformanceRecord,
    pub notes: Option<String>,
}

/// Starred closed positions, most recently closed first.
pub fn trade_log(processed: &ProcessedData, annotations: &Annotations) -> Vec<TradeLogEntry> {
    let mut entries: Vec<TradeLogEntry> = processed
        .records
        .values()
        .filter(|r| annotations.is_starred(&r.token_address))
        .map(|r| TradeLogEntry {
            record: r.clone(),
            notes: annotations
                .get(&r.token_address)
                .and_then(|a| a.notes.clone()),
        })
        .collect();
    entries.sort_by(|a, b| {
        b.record
            .last_sell_timestamp
            .cmp(&a.record.last_sell_timestamp)
            .then_with(|| a.record.token_address.cmp(&b.record.token_address))
    });
    entries
}
