use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub mod client;
pub mod source;

pub use client::{FetchClient, FetchOutcome, SymbolOutcome};
pub use source::{HttpQuoteSource, QuoteSource};

/// Default concurrency guard applied when issuing chunk requests.
pub const FETCH_CONCURRENCY_LIMIT: usize = 5;

#[inline]
pub fn ensure_concurrency_limit(limit: usize) -> usize {
    limit.max(1)
}

/// History window selectable by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    OneDay,
    FiveDays,
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    TwoYears,
    FiveYears,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneDay => "1d",
            Period::FiveDays => "5d",
            Period::OneMonth => "1mo",
            Period::ThreeMonths => "3mo",
            Period::SixMonths => "6mo",
            Period::OneYear => "1y",
            Period::TwoYears => "2y",
            Period::FiveYears => "5y",
        }
    }

    /// Calendar days to request from the source. Short windows over-request a
    /// little so weekends and market holidays still leave trading days in range.
    pub fn range_days(&self) -> i64 {
        match self {
            Period::OneDay => 7,
            Period::FiveDays => 10,
            Period::OneMonth => 31,
            Period::ThreeMonths => 92,
            Period::SixMonths => 183,
            Period::OneYear => 366,
            Period::TwoYears => 731,
            Period::FiveYears => 1_827,
        }
    }

    /// Most recent candles to keep after parsing, for windows narrower than
    /// the over-requested range.
    pub fn tail_limit(&self) -> Option<usize> {
        match self {
            Period::OneDay => Some(2),
            Period::FiveDays => Some(5),
            _ => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1d" => Ok(Period::OneDay),
            "5d" => Ok(Period::FiveDays),
            "1mo" => Ok(Period::OneMonth),
            "3mo" => Ok(Period::ThreeMonths),
            "6mo" => Ok(Period::SixMonths),
            "1y" => Ok(Period::OneYear),
            "2y" => Ok(Period::TwoYears),
            "5y" => Ok(Period::FiveYears),
            other => Err(AppError::message(format!(
                "Unknown period '{}' (expected one of 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y)",
                other
            ))),
        }
    }
}

/// What a cache entry holds; drives the TTL applied on write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Quote,
    History,
    Universe,
}

impl DataKind {
    /// Intraday requests are treated as short-lived quote data; everything
    /// longer is daily history and can serve a full offline session.
    pub fn for_period(period: Period) -> Self {
        match period {
            Period::OneDay => DataKind::Quote,
            _ => DataKind::History,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Quote => "quote",
            DataKind::History => "history",
            DataKind::Universe => "universe",
        }
    }
}

/// One OHLCV bar, validated at the fetch boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

pub type TimeSeries = Vec<Candle>;

/// Identity of an outstanding fetch, used for in-flight deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub symbol: String,
    pub period: Period,
}

/// Cache key for a (symbol, period, kind) triple. Symbols are uppercase
/// tickers, so the result is filesystem-safe.
pub fn cache_key(symbol: &str, period: Period, kind: DataKind) -> String {
    format!("{}_{}_{}", symbol, period.as_str(), kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_round_trips_through_str() {
        for period in [
            Period::OneDay,
            Period::FiveDays,
            Period::OneMonth,
            Period::ThreeMonths,
            Period::SixMonths,
            Period::OneYear,
            Period::TwoYears,
            Period::FiveYears,
        ] {
            assert_eq!(period.as_str().parse::<Period>().unwrap(), period);
        }
        assert!("2w".parse::<Period>().is_err());
    }

    #[test]
    fn intraday_maps_to_quote_kind() {
        assert_eq!(DataKind::for_period(Period::OneDay), DataKind::Quote);
        assert_eq!(DataKind::for_period(Period::OneYear), DataKind::History);
    }

    #[test]
    fn cache_keys_are_distinct_per_dimension() {
        let a = cache_key("AAPL", Period::OneMonth, DataKind::History);
        let b = cache_key("AAPL", Period::OneYear, DataKind::History);
        let c = cache_key("MSFT", Period::OneMonth, DataKind::History);
        assert_eq!(a, "AAPL_1mo_history");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
