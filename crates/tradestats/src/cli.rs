use anyhow::Result;
use chrono::DateTime;
use std::fmt::Write as _;
use tradestats::aggregator::TokenPerformanceRecord;
use tradestats::projections::{
    trade_log, Annotations, OpenPosition, ProcessedData, TradeLogEntry, WalletSummary,
};
use tradestats::{RawTradeSource, WalletDataCache};

pub const USAGE: &str = "usage: tradestats <top|open|history|log|summary> <wallet> [--json] [--refresh]\n       tradestats watch <wallet>...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Top,
    Open,
    History,
    Log,
    Summary,
}

impl Report {
    fn from_command(cmd: &str) -> Option<Self> {
        match cmd {
            "top" => Some(Self::Top),
            "open" => Some(Self::Open),
            "history" => Some(Self::History),
            "log" => Some(Self::Log),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Report {
        report: Report,
        wallet: String,
        json: bool,
        refresh: bool,
    },
    Watch {
        wallets: Vec<String>,
    },
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Err(USAGE.to_string());
    };

    let mut json = false;
    let mut refresh = false;
    let mut positional = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--json" => json = true,
            "--refresh" => refresh = true,
            flag if flag.starts_with("--") => return Err(format!("unknown flag: {flag}")),
            _ => positional.push(arg),
        }
    }

    if cmd == "watch" {
        if positional.is_empty() {
            return Err("usage: tradestats watch <wallet>...".to_string());
        }
        return Ok(Command::Watch {
            wallets: positional,
        });
    }

    let report = Report::from_command(&cmd).ok_or_else(|| format!("unknown command: {cmd}"))?;
    let mut positional = positional.into_iter();
    let wallet = positional
        .next()
        .ok_or_else(|| format!("usage: tradestats {cmd} <wallet>"))?;
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument: {extra}"));
    }

    Ok(Command::Report {
        report,
        wallet,
        json,
        refresh,
    })
}

pub async fn run_report<S: RawTradeSource>(
    cache: &WalletDataCache<S>,
    report: Report,
    wallet: &str,
    json: bool,
    refresh: bool,
) -> Result<String> {
    let processed = cache.get_processed_data(wallet, refresh).await?;

    let out = match (report, json) {
        (Report::Top, false) => render_top_trades(&processed.top_trades),
        (Report::Top, true) => serde_json::to_string_pretty(&processed.top_trades)?,
        (Report::Open, false) => render_open_positions(&processed.open_positions),
        (Report::Open, true) => serde_json::to_string_pretty(&processed.open_positions)?,
        (Report::History, false) => render_history(&processed),
        (Report::History, true) => serde_json::to_string_pretty(&processed.history)?,
        (Report::Log, _) => render_log_report(&processed, json)?,
        (Report::Summary, false) => render_summary(&processed.wallet_address, &processed.summary),
        (Report::Summary, true) => serde_json::to_string_pretty(&processed.summary)?,
    };
    Ok(out)
}

/// Annotations are read from the same snapshot as the records they join.
fn render_log_report(processed: &ProcessedData, json: bool) -> Result<String> {
    let annotations = Annotations::from_trades(&processed.history);
    let log = trade_log(processed, &annotations);
    if json {
        Ok(serde_json::to_string_pretty(&log)?)
    } else {
        Ok(render_trade_log(&log))
    }
}

fn fmt_usd(x: f64) -> String {
    if x < 0.0 {
        format!("-${:.2}", -x)
    } else {
        format!("${x:.2}")
    }
}

fn fmt_signed_usd(x: f64) -> String {
    if x > 0.0 {
        format!("+{}", fmt_usd(x))
    } else {
        fmt_usd(x)
    }
}

fn fmt_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0).map_or_else(
        || ts.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M").to_string(),
    )
}

pub fn render_top_trades(records: &[TokenPerformanceRecord]) -> String {
    if records.is_empty() {
        return "No closed trades.".to_string();
    }
    let mut out = format!(
        "{:<12} {:>12} {:>12} {:>12}  {}\n",
        "token", "p/l", "bought", "sold", "held"
    );
    for r in records {
        let _ = writeln!(
            out,
            "{:<12} {:>12} {:>12} {:>12}  {}",
            r.display_name(),
            fmt_signed_usd(r.profit_loss),
            fmt_usd(r.total_buy_value_usd),
            fmt_usd(r.total_sell_value_usd),
            r.duration
        );
    }
    out.trim_end().to_string()
}

pub fn render_open_positions(positions: &[OpenPosition]) -> String {
    if positions.is_empty() {
        return "No open positions.".to_string();
    }
    let mut out = format!(
        "{:<12} {:>14} {:>12}  {}\n",
        "token", "amount", "cost", "last buy"
    );
    for p in positions {
        let _ = writeln!(
            out,
            "{:<12} {:>14.4} {:>12}  {}",
            p.display_name(),
            p.total_bought,
            fmt_usd(p.total_buy_value_usd),
            fmt_ts(p.last_buy_timestamp)
        );
    }
    out.trim_end().to_string()
}

pub fn render_history(processed: &ProcessedData) -> String {
    if processed.history.is_empty() {
        return "No trades.".to_string();
    }
    let mut out = String::new();
    for t in &processed.history {
        let name = t.token_symbol.as_deref().unwrap_or(&t.token_address);
        let star = if t.starred { "*" } else { " " };
        let _ = writeln!(
            out,
            "{} {star} {:<4} {:<12} {:>14.4} {:>12}",
            fmt_ts(t.timestamp),
            t.side,
            name,
            t.amount,
            fmt_usd(t.value_usd)
        );
    }
    out.trim_end().to_string()
}

pub fn render_trade_log(entries: &[TradeLogEntry]) -> String {
    if entries.is_empty() {
        return "No starred trades.".to_string();
    }
    let mut out = String::new();
    for e in entries {
        let _ = write!(
            out,
            "{} {} closed {} after {}",
            e.record.display_name(),
            fmt_signed_usd(e.record.profit_loss),
            fmt_ts(e.record.last_sell_timestamp),
            e.record.duration
        );
        if let Some(notes) = &e.notes {
            let _ = write!(out, " - {notes}");
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

pub fn render_summary(wallet: &str, s: &WalletSummary) -> String {
    let mut out = format!("Wallet {wallet}\n");
    let _ = writeln!(out, "  trades:          {}", s.trade_count);
    let _ = writeln!(out, "  closed / open:   {} / {}", s.closed_positions, s.open_positions);
    let _ = writeln!(
        out,
        "  wins / losses:   {} / {} ({:.1}% win rate)",
        s.winning_trades,
        s.losing_trades,
        s.win_rate * 100.0
    );
    let _ = writeln!(out, "  total p/l:       {}", fmt_signed_usd(s.total_profit_loss));
    let _ = writeln!(out, "  volume:          {}", fmt_usd(s.total_volume_usd));
    if let (Some(best), Some(worst)) = (s.best_profit_loss, s.worst_profit_loss) {
        let _ = writeln!(
            out,
            "  best / worst:    {} / {}",
            fmt_signed_usd(best),
            fmt_signed_usd(worst)
        );
    }
    out.trim_end().to_string()
}
