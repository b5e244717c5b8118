use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sp500-cache")]
#[command(about = "Cached S&P 500 market data with offline fallback")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory for the persistent cache
    #[arg(long, default_value = ".cache")]
    pub cache_dir: String,

    /// Optional JSON config file; missing fields keep their defaults
    #[arg(short, long)]
    pub config: Option<String>,

    /// Serve from cache only, never touching the network
    #[arg(long)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch (or serve from cache) price series for the given symbols
    Quotes {
        /// Tickers to load (e.g. AAPL MSFT BRK.B)
        symbols: Vec<String>,

        /// Lookback period: 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y or 5y
        #[arg(short, long, default_value = "1mo")]
        period: String,

        /// Bypass cached entries and refetch
        #[arg(short, long)]
        force: bool,
    },

    /// Show connectivity state and cache statistics
    Status,

    /// Remove expired cache entries
    Sweep,

    /// Delete every cache entry
    ClearCache,

    /// Print the resolved S&P 500 symbol universe
    Universe,
}
