mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use reqwest::Client;

use sp500_cache::config::AppConfig;
use sp500_cache::error::{Context, Result};
use sp500_cache::fetch::{FetchClient, HttpQuoteSource, Period};
use sp500_cache::services::{CacheManager, ConnectivityMonitor, MarketDataResult};
use sp500_cache::storage::PersistentStore;
use sp500_cache::universe::SymbolUniverse;
use sp500_cache::utils::{current_human_timestamp, render_table};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let store = Arc::new(PersistentStore::open(&cli.cache_dir, config.cache.byte_budget)?);
    let monitor = Arc::new(ConnectivityMonitor::new(
        client.clone(),
        config.connectivity.clone(),
    ));
    if cli.offline {
        monitor.set_offline(true);
        info!("offline mode requested, serving from cache only");
    }

    let universe = if cli.offline {
        SymbolUniverse::fallback()
    } else {
        SymbolUniverse::load(&store, &client, &config.universe).await
    };

    let source = Arc::new(HttpQuoteSource::new(client));
    let fetcher = Arc::new(FetchClient::new(source, config.fetch.clone()));
    let manager = CacheManager::new(store, fetcher, monitor, universe, config.cache.clone());

    match cli.command {
        Commands::Quotes {
            symbols,
            period,
            force,
        } => {
            let period: Period = period.parse()?;
            let result = if force {
                manager.force_refresh(&symbols, period).await
            } else {
                manager.get_market_data(&symbols, period).await
            };
            print_quotes(&result);
        }
        Commands::Status => {
            let stats = manager.cache_stats();
            println!("Connectivity: {}", manager.connectivity_state());
            println!(
                "Cache: {} entries, {} bytes on disk",
                stats.entries, stats.bytes
            );
            println!("Universe: {} symbols", manager.universe_size());
            println!("As of {}", current_human_timestamp());
        }
        Commands::Sweep => {
            let removed = manager.sweep_expired();
            println!("Removed {} expired cache entries.", removed);
        }
        Commands::ClearCache => {
            manager.clear_cache();
            println!("Cache cleared.");
        }
        Commands::Universe => {
            let mut symbols: Vec<String> = manager
                .universe_symbols()
                .map(|s| s.to_string())
                .collect();
            symbols.sort();
            for symbol in &symbols {
                println!("{}", symbol);
            }
            println!("{} symbols total.", symbols.len());
        }
    }

    Ok(())
}

fn print_quotes(result: &MarketDataResult) {
    if result.reports.is_empty() {
        println!("No symbols requested.");
        return;
    }

    let rows: Vec<Vec<String>> = result
        .reports
        .iter()
        .map(|report| {
            let (last_close, change, candles) = match result.series.get(&report.symbol) {
                Some(series) if !series.is_empty() => {
                    let last = &series[series.len() - 1];
                    let change = if series.len() > 1 {
                        let prev = series[series.len() - 2].close;
                        format!("{:+.2}%", (last.close - prev) / prev * 100.0)
                    } else {
                        "-".to_string()
                    };
                    (format!("{:.2}", last.close), change, series.len().to_string())
                }
                _ => ("-".to_string(), "-".to_string(), "0".to_string()),
            };
            vec![
                report.symbol.clone(),
                report.status.as_str().to_string(),
                last_close,
                change,
                candles,
            ]
        })
        .collect();

    println!(
        "{}",
        render_table(&["Symbol", "Status", "Last Close", "Change", "Candles"], &rows)
    );
    println!("{}", result.summary());
}
