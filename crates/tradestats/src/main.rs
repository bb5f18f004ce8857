use anyhow::Result;
use common::config::Config;
use common::trade_api::TradeApiClient;
use std::time::Duration;
use tokio::task::JoinSet;
use tradestats::{RawTradeSource, WalletDataCache};

mod cli;
mod scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;
    let config = Config::load()?;

    let (dispatch, _otel_guard) = common::observability::build_dispatch(
        "tradestats",
        &config.general.log_level,
        &config.observability,
    );
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let source = TradeApiClient::from_settings(&config.source)?;
    tracing::info!(
        base_url = source.base_url(),
        ttl_secs = config.cache.ttl_secs,
        "tradestats starting"
    );
    let cache = WalletDataCache::new(source, config.cache.ttl());

    match cmd {
        cli::Command::Report {
            report,
            wallet,
            json,
            refresh,
        } => {
            let out = cli::run_report(&cache, report, &wallet, json, refresh).await?;
            println!("{out}");
        }
        cli::Command::Watch { wallets } => run_watch(cache, wallets, &config).await?,
    }

    Ok(())
}

/// Re-reads every wallet on each tick. The cache decides whether a tick
/// actually hits the source, so fetches happen at most once per TTL.
async fn run_watch<S: RawTradeSource>(
    cache: WalletDataCache<S>,
    wallets: Vec<String>,
    config: &Config,
) -> Result<()> {
    if let Some(port) = config.observability.prometheus_port {
        tradestats::metrics::install_prometheus(port)?;
        tradestats::metrics::describe();
        tracing::info!(port, "prometheus exporter listening");
    }

    let (mut ticks, _ticker) = scheduler::start(scheduler::TickerSpec {
        name: "wallet_refresh".to_string(),
        interval: Duration::from_secs(config.watch.refresh_interval_secs.max(1)),
        run_immediately: true,
    });
    tracing::info!(
        wallets = wallets.len(),
        interval_secs = config.watch.refresh_interval_secs,
        "watching wallets"
    );

    loop {
        tokio::select! {
            tick = ticks.recv() => {
                if tick.is_none() {
                    break;
                }
                refresh_wallets(&cache, &wallets).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }
    Ok(())
}

async fn refresh_wallets<S: RawTradeSource>(cache: &WalletDataCache<S>, wallets: &[String]) {
    let mut set = JoinSet::new();
    for wallet in wallets {
        let cache = cache.clone();
        let wallet = wallet.clone();
        set.spawn(async move {
            let res = cache.get_processed_data(&wallet, false).await;
            (wallet, res)
        });
    }

    while let Some(joined) = set.join_next().await {
        let (wallet, res) = match joined {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "wallet refresh task failed");
                continue;
            }
        };
        match res {
            Ok(processed) => {
                let s = &processed.summary;
                tracing::info!(
                    wallet = %wallet,
                    closed = s.closed_positions,
                    open = s.open_positions,
                    win_rate = s.win_rate,
                    total_profit_loss = s.total_profit_loss,
                    volume_usd = s.total_volume_usd,
                    "wallet summary"
                );
            }
            Err(e) => {
                let stale = cache.peek(&wallet).map(|raw| raw.fetched_at.to_rfc3339());
                tracing::error!(
                    wallet = %wallet,
                    error = %e,
                    last_good_snapshot = stale.as_deref().unwrap_or("none"),
                    "wallet refresh failed"
                );
            }
        }
    }
}
