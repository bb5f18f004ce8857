//! Groups a wallet's flat trade list by token and derives per-token
//! performance records.
//!
//! Everything here is pure. Input order does not matter: trades are sorted
//! by a total order led by `(timestamp, signature)` before grouping, so
//! display fields carried from the "first observed" trade and every float
//! sum are identical for any permutation of the same input.

use common::types::{Trade, TradeSide};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

/// One side of a trade kept in a token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub amount: f64,
    pub value_usd: f64,
    pub timestamp: i64,
}

impl From<&Trade> for Fill {
    fn from(t: &Trade) -> Self {
        Self {
            amount: t.amount,
            value_usd: t.value_usd,
            timestamp: t.timestamp,
        }
    }
}

/// Accumulator for a single token: buys and sells in timestamp order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenBucket {
    pub token_address: String,
    pub token_symbol: Option<String>,
    pub token_logo_uri: Option<String>,
    pub buys: Vec<Fill>,
    pub sells: Vec<Fill>,
}

impl TokenBucket {
    fn new(token_address: &str) -> Self {
        Self {
            token_address: token_address.to_string(),
            ..Self::default()
        }
    }

    fn push(&mut self, trade: &Trade) {
        if self.token_symbol.is_none() {
            self.token_symbol.clone_from(&trade.token_symbol);
        }
        if self.token_logo_uri.is_none() {
            self.token_logo_uri.clone_from(&trade.token_logo_uri);
        }
        match trade.side {
            TradeSide::Buy => self.buys.push(Fill::from(trade)),
            TradeSide::Sell => self.sells.push(Fill::from(trade)),
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.buys.is_empty() && !self.sells.is_empty()
    }

    pub fn is_open(&self) -> bool {
        !self.buys.is_empty() && self.sells.is_empty()
    }

    /// `None` unless the bucket holds at least one buy and one sell.
    pub fn to_record(&self) -> Option<TokenPerformanceRecord> {
        let first_buy_timestamp = self.buys.iter().map(|f| f.timestamp).min()?;
        let last_sell_timestamp = self.sells.iter().map(|f| f.timestamp).max()?;

        let total_bought = sum(&self.buys, |f| f.amount);
        let total_sold = sum(&self.sells, |f| f.amount);
        let total_buy_value_usd = sum(&self.buys, |f| f.value_usd);
        let total_sell_value_usd = sum(&self.sells, |f| f.value_usd);
        let duration_secs = last_sell_timestamp
            .saturating_sub(first_buy_timestamp)
            .max(0);

        Some(TokenPerformanceRecord {
            token_address: self.token_address.clone(),
            token_symbol: self.token_symbol.clone(),
            token_logo_uri: self.token_logo_uri.clone(),
            total_bought,
            total_sold,
            total_buy_value_usd,
            total_sell_value_usd,
            profit_loss: total_sell_value_usd - total_buy_value_usd,
            volume_usd: total_buy_value_usd + total_sell_value_usd,
            buy_count: self.buys.len(),
            sell_count: self.sells.len(),
            first_buy_timestamp,
            last_sell_timestamp,
            duration_secs,
            duration: humanize_duration(duration_secs),
        })
    }
}

fn sum(fills: &[Fill], field: impl Fn(&Fill) -> f64) -> f64 {
    fills.iter().map(field).sum()
}

/// Closed position for one token: bought and sold within the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenPerformanceRecord {
    pub token_address: String,
    pub token_symbol: Option<String>,
    pub token_logo_uri: Option<String>,
    pub total_bought: f64,
    pub total_sold: f64,
    pub total_buy_value_usd: f64,
    pub total_sell_value_usd: f64,
    pub profit_loss: f64,
    pub volume_usd: f64,
    pub buy_count: usize,
    pub sell_count: usize,
    pub first_buy_timestamp: i64,
    pub last_sell_timestamp: i64,
    pub duration_secs: i64,
    pub duration: String,
}

impl TokenPerformanceRecord {
    pub fn display_name(&self) -> &str {
        self.token_symbol.as_deref().unwrap_or(&self.token_address)
    }
}

/// Why trades were left out of aggregation. Skips are never errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregationReport {
    pub counted: usize,
    pub missing_token: usize,
    pub non_positive_amount: usize,
    pub non_finite: usize,
    pub duplicate_signature: usize,
}

impl AggregationReport {
    pub fn skipped(&self) -> usize {
        self.missing_token + self.non_positive_amount + self.non_finite + self.duplicate_signature
    }
}

/// Ordering used for screening. Ties on `(timestamp, signature)` fall
/// through every remaining field, so only fully identical trades compare
/// equal.
fn trade_order(a: &Trade, b: &Trade) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.signature.cmp(&b.signature))
        .then_with(|| a.token_address.cmp(&b.token_address))
        .then_with(|| side_rank(a.side).cmp(&side_rank(b.side)))
        .then_with(|| a.amount.total_cmp(&b.amount))
        .then_with(|| a.value_usd.total_cmp(&b.value_usd))
        .then_with(|| a.token_symbol.cmp(&b.token_symbol))
        .then_with(|| a.token_logo_uri.cmp(&b.token_logo_uri))
        .then_with(|| a.starred.cmp(&b.starred))
        .then_with(|| a.notes.cmp(&b.notes))
}

fn side_rank(side: TradeSide) -> u8 {
    match side {
        TradeSide::Buy => 0,
        TradeSide::Sell => 1,
    }
}

/// Drops malformed and repeated trades and returns the rest in
/// `(timestamp, signature)` order, ties broken by the remaining fields.
pub fn screen_trades(trades: &[Trade]) -> (Vec<&Trade>, AggregationReport) {
    let mut sorted: Vec<&Trade> = trades.iter().collect();
    sorted.sort_by(|a, b| trade_order(a, b));

    let mut report = AggregationReport::default();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut kept = Vec::with_capacity(sorted.len());

    for trade in sorted {
        if !trade.has_token() {
            report.missing_token += 1;
        } else if !trade.amount.is_finite() || !trade.value_usd.is_finite() {
            report.non_finite += 1;
        } else if trade.amount <= 0.0 {
            report.non_positive_amount += 1;
        } else if !trade.signature.is_empty() && !seen.insert(trade.signature.as_str()) {
            report.duplicate_signature += 1;
        } else {
            report.counted += 1;
            kept.push(trade);
        }
    }

    (kept, report)
}

/// Groups screened trades by token address. Callers pass trades already
/// filtered by [`screen_trades`].
pub fn group_by_token<'a>(
    trades: impl IntoIterator<Item = &'a Trade>,
) -> BTreeMap<String, TokenBucket> {
    let mut buckets: BTreeMap<String, TokenBucket> = BTreeMap::new();
    for trade in trades {
        buckets
            .entry(trade.token_address.clone())
            .or_insert_with(|| TokenBucket::new(&trade.token_address))
            .push(trade);
    }
    buckets
}

pub fn closed_records(
    buckets: &BTreeMap<String, TokenBucket>,
) -> BTreeMap<String, TokenPerformanceRecord> {
    buckets
        .iter()
        .filter_map(|(token, bucket)| bucket.to_record().map(|r| (token.clone(), r)))
        .collect()
}

pub fn aggregate_with_report(
    trades: &[Trade],
) -> (BTreeMap<String, TokenPerformanceRecord>, AggregationReport) {
    let (screened, report) = screen_trades(trades);
    let buckets = group_by_token(screened);
    (closed_records(&buckets), report)
}

/// Per-token performance for every token that was both bought and sold.
pub fn aggregate(trades: &[Trade]) -> BTreeMap<String, TokenPerformanceRecord> {
    aggregate_with_report(trades).0
}

/// Largest whole unit with a value of at least one, floored. Negative
/// spans clamp to zero.
pub fn humanize_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (value, unit) = if secs >= SECS_PER_DAY {
        (secs / SECS_PER_DAY, "day")
    } else if secs >= SECS_PER_HOUR {
        (secs / SECS_PER_HOUR, "hour")
    } else if secs >= SECS_PER_MINUTE {
        (secs / SECS_PER_MINUTE, "minute")
    } else {
        (secs, "second")
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}
