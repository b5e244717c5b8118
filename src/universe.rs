use std::collections::HashSet;
use std::time::Duration;

use log::{info, warn};
use reqwest::Client;

use crate::config::UniverseConfig;
use crate::error::{AppError, Context, Result};
use crate::storage::PersistentStore;

const UNIVERSE_CACHE_KEY: &str = "sp500_universe";

/// Last-resort constituents list, compiled from a recent S&P 500 membership
/// snapshot. Dots are already mapped to dashes (BRK.B -> BRK-B).
const FALLBACK_SYMBOLS: &[&str] = &[
    "A", "AAL", "AAP", "AAPL", "ABBV", "ABC", "ABT", "ACN",
    "ADBE", "ADI", "ADP", "ADSK", "AEE", "AEP", "AFL", "AIG",
    "AIZ", "AJG", "AKAM", "ALB", "ALGN", "ALL", "ALLE", "AMAT",
    "AMCR", "AMD", "AMGN", "AMT", "AMTM", "AMZN", "ANET", "ANSS",
    "AON", "AOS", "APD", "APH", "APTV", "ARE", "ATO", "AVB",
    "AVGO", "AVY", "AWK", "AXP", "AZO", "BA", "BAC", "BALL",
    "BBWI", "BDX", "BEN", "BF-B", "BIIB", "BKNG", "BLDR", "BLK",
    "BMRN", "BMY", "BR", "BRK-B", "BSX", "BWA", "BXP", "C",
    "CAG", "CAH", "CARR", "CAT", "CB", "CBOE", "CBRE", "CCI",
    "CCL", "CDNS", "CDW", "CE", "CF", "CHD", "CHRW", "CI",
    "CINF", "CL", "CLX", "CMA", "CMCSA", "CME", "CMG", "CMI",
    "CMS", "CNP", "COF", "COO", "COST", "CPB", "CPRT", "CPT",
    "CRL", "CRM", "CSCO", "CSGP", "CSX", "CTAS", "CTLT", "CTSH",
    "CTVA", "CTXS", "CVS", "CVX", "CZR", "DAL", "DD", "DE",
    "DFS", "DG", "DGX", "DHR", "DIS", "DISH", "DLTR", "DOV",
    "DOW", "DTE", "DUK", "DVA", "DVN", "DXC", "DXCM", "EA",
    "EBAY", "ECL", "ED", "EL", "EMN", "EMR", "ENPH", "EOG",
    "EPAM", "EQIX", "EQR", "ES", "ESS", "ETN", "ETR", "ETSY",
    "EVRG", "EW", "EXC", "EXPD", "EXPE", "EXR", "F", "FANG",
    "FAST", "FBHS", "FCX", "FDS", "FE", "FFIV", "FI", "FITB",
    "FMC", "FOX", "FOXA", "FRT", "FSLR", "FTNT", "FTV", "GD",
    "GE", "GEHC", "GEN", "GILD", "GIS", "GLW", "GM", "GNRC",
    "GOOGL", "GPC", "GPS", "GRMN", "GS", "GWW", "HAS", "HBAN",
    "HCA", "HD", "HIG", "HII", "HLT", "HOLX", "HON", "HPE",
    "HPQ", "HRL", "HSIC", "HSY", "HWM", "IBM", "ICE", "IDXX",
    "IEX", "ILMN", "INCY", "INTC", "INTU", "INVH", "IP", "IPG",
    "IQV", "ISRG", "IT", "ITW", "J", "JBHT", "JKHY", "JNJ",
    "JNPR", "JPM", "K", "KDP", "KEYS", "KHC", "KIM", "KLAC",
    "KMB", "KMI", "KMX", "KO", "LDOS", "LEN", "LH", "LIN",
    "LKQ", "LLY", "LOW", "LRCX", "LUMN", "LUV", "LVS", "LW",
    "LYB", "MA", "MAA", "MAR", "MCD", "MCHP", "MCK", "MCO",
    "MDLZ", "MDT", "MET", "META", "MGM", "MHK", "MKC", "MKTX",
    "MLM", "MMC", "MNST", "MOH", "MOS", "MPWR", "MRK", "MRNA",
    "MRVL", "MS", "MSFT", "MSI", "MTB", "MTCH", "MU", "NCLH",
    "NDSN", "NEE", "NEWS", "NFLX", "NI", "NKE", "NLOK", "NOC",
    "NOW", "NRG", "NSC", "NTAP", "NTRS", "NUE", "NVDA", "NVR",
    "NVST", "NWS", "NWSA", "NXPI", "O", "OMC", "ON", "ORCL",
    "ORLY", "OTIS", "PARA", "PAYC", "PAYX", "PCAR", "PEAK", "PENN",
    "PEP", "PFE", "PFG", "PG", "PGR", "PH", "PKI", "PLD",
    "PM", "PNC", "PNR", "POOL", "PPG", "PRU", "PSA", "PVH",
    "PWR", "PXD", "PYPL", "QCOM", "QRVO", "RCL", "REG", "REGN",
    "RF", "RHI", "RL", "RMD", "ROK", "ROP", "ROST", "RSG",
    "RTX", "SBNY", "SBUX", "SCHW", "SEDG", "SEE", "SHW", "SJM",
    "SLB", "SMCI", "SNPS", "SO", "SOLV", "SPG", "SPGI", "STE",
    "STLD", "STZ", "SWK", "SWKS", "SYK", "SYY", "T", "TAP",
    "TDG", "TECH", "TEL", "TFC", "TGT", "TJX", "TMO", "TMUS",
    "TPG", "TPR", "TROW", "TRV", "TSCO", "TSLA", "TTWO", "TXN",
    "TXT", "TYL", "UAL", "UBER", "UDR", "UHS", "ULTA", "UNH",
    "UPS", "URI", "USB", "V", "VFC", "VICI", "VMC", "VNO",
    "VRSK", "VRTX", "VTRS", "VZ", "WAB", "WBA", "WDC", "WEC",
    "WELL", "WFC", "WHR", "WM", "WMB", "WMT", "WRB", "WST",
    "WY", "WYNN", "XEL", "XOM", "XYL", "YUM", "ZBH", "ZBRA",
    "ZION", "ZTS",
];

/// Normalize a user-supplied ticker to the universe's canonical form.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase().replace('.', "-")
}

/// The validated set of S&P 500 tickers. Loaded from cache when fresh, from
/// the remote constituents list when online, from the embedded fallback as a
/// last resort; unknown symbols are rejected before any fetch is attempted.
pub struct SymbolUniverse {
    symbols: HashSet<String>,
}

impl SymbolUniverse {
    pub fn from_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| normalize_symbol(s.as_ref()))
                .collect(),
        }
    }

    pub fn fallback() -> Self {
        Self::from_symbols(FALLBACK_SYMBOLS.iter().copied())
    }

    /// Resolve the universe: cached copy first (1 hour TTL by default), then
    /// the remote list, then a stale cached copy, then the embedded fallback.
    pub async fn load(
        store: &PersistentStore,
        client: &Client,
        config: &UniverseConfig,
    ) -> Self {
        let cached = store.get::<Vec<String>>(UNIVERSE_CACHE_KEY);
        if let Some(ref value) = cached {
            if !value.is_expired {
                return Self::from_symbols(value.data.iter());
            }
        }

        match fetch_constituents(client, &config.url).await {
            Ok(symbols) => {
                info!("refreshed S&P 500 universe: {} constituents", symbols.len());
                if let Err(err) = store.put(
                    UNIVERSE_CACHE_KEY,
                    &symbols,
                    Duration::from_secs(config.ttl_secs),
                ) {
                    warn!("failed to cache symbol universe: {}", err);
                }
                Self::from_symbols(symbols.iter())
            }
            Err(err) => {
                if let Some(value) = cached {
                    warn!("universe refresh failed ({}), using stale cached list", err);
                    Self::from_symbols(value.data.iter())
                } else {
                    warn!("universe refresh failed ({}), using static fallback", err);
                    Self::fallback()
                }
            }
        }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(&normalize_symbol(symbol))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(|s| s.as_str())
    }
}

/// Download the constituents CSV and pull tickers out of the first column.
async fn fetch_constituents(client: &Client, url: &str) -> Result<Vec<String>> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::Network(format!("universe request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(AppError::Network(format!(
            "universe request returned status {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .context("Failed to read universe payload")?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read universe record")?;
        let Some(raw) = record.get(0).filter(|value| !value.trim().is_empty()) else {
            continue;
        };
        let symbol = normalize_symbol(raw);
        if seen.insert(symbol.clone()) {
            symbols.push(symbol);
        }
    }

    if symbols.len() < 400 {
        return Err(AppError::message(format!(
            "universe payload suspiciously small: {} symbols",
            symbols.len()
        )));
    }

    symbols.sort();
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_covers_at_least_400_symbols() {
        let universe = SymbolUniverse::fallback();
        assert!(universe.len() >= 400, "only {} symbols", universe.len());
    }

    #[test]
    fn fallback_contains_household_names() {
        let universe = SymbolUniverse::fallback();
        for symbol in ["AAPL", "MSFT", "NVDA", "JPM", "XOM", "BRK-B"] {
            assert!(universe.contains(symbol), "missing {}", symbol);
        }
    }

    #[test]
    fn validation_is_case_insensitive_and_dot_tolerant() {
        let universe = SymbolUniverse::fallback();
        assert!(universe.contains("aapl"));
        assert!(universe.contains(" brk.b "));
        assert!(!universe.contains("ZZZZ"));
    }

    #[test]
    fn from_symbols_normalizes_input() {
        let universe = SymbolUniverse::from_symbols(["aapl", "Brk.b"]);
        assert_eq!(universe.len(), 2);
        assert!(universe.contains("AAPL"));
        assert!(universe.contains("BRK-B"));
    }
}
