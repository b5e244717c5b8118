use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use log::debug;
use reqwest::{Client, StatusCode};

use crate::error::{AppError, Context, Result};
use crate::fetch::{Candle, Period, TimeSeries};

const STOOQ_HISTORY_ENDPOINT: &str = "https://stooq.com/q/d/l/";

/// Boundary to the external market-data source. One call covers one chunk of
/// symbols; a transport-level error fails the whole chunk attempt, while a
/// symbol with no usable rows is simply absent from the returned map.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_chunk(
        &self,
        symbols: &[String],
        period: Period,
    ) -> Result<HashMap<String, TimeSeries>>;
}

/// Fetches daily OHLCV series from the Stooq CSV endpoint, one request per
/// symbol within the chunk. The loose CSV payload is validated into the
/// strict `Candle` schema here; nothing untyped crosses this boundary.
pub struct HttpQuoteSource {
    client: Client,
    endpoint: String,
    symbol_suffix: String,
}

impl HttpQuoteSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: STOOQ_HISTORY_ENDPOINT.to_string(),
            symbol_suffix: ".us".to_string(),
        }
    }

    #[allow(dead_code)]
    pub fn with_endpoint(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            symbol_suffix: ".us".to_string(),
        }
    }

    async fn fetch_symbol(&self, symbol: &str, period: Period) -> Result<TimeSeries> {
        let now = Utc::now().date_naive();
        let from = now - chrono::Duration::days(period.range_days());
        let url = format!(
            "{endpoint}?s={symbol}{suffix}&d1={from}&d2={to}&i=d",
            endpoint = self.endpoint,
            symbol = symbol.to_lowercase(),
            suffix = self.symbol_suffix,
            from = from.format("%Y%m%d"),
            to = now.format("%Y%m%d"),
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("history request failed for {}: {}", symbol, e)))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited(format!(
                "history request for {} returned 429",
                symbol
            )));
        }
        if !response.status().is_success() {
            return Err(AppError::Network(format!(
                "history request for {} returned status {}",
                symbol,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read history body for {}", symbol))?;

        let mut candles = parse_stooq_history(&body)?;
        if let Some(limit) = period.tail_limit() {
            if candles.len() > limit {
                let excess = candles.len() - limit;
                candles.drain(0..excess);
            }
        }

        debug!("fetched {} candles for {} ({})", candles.len(), symbol, period);
        Ok(candles)
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn fetch_chunk(
        &self,
        symbols: &[String],
        period: Period,
    ) -> Result<HashMap<String, TimeSeries>> {
        let mut series = HashMap::with_capacity(symbols.len());

        for symbol in symbols {
            match self.fetch_symbol(symbol, period).await {
                Ok(candles) if !candles.is_empty() => {
                    series.insert(symbol.clone(), candles);
                }
                // No rows for this ticker; the client reports it as a
                // per-symbol failure without retrying the chunk.
                Ok(_) => {}
                // Transport and rate-limit errors abort the chunk attempt so
                // the retry/backoff schedule applies to it as a whole.
                Err(err @ (AppError::Network(_) | AppError::RateLimited(_))) => return Err(err),
                Err(err) => {
                    debug!("skipping {}: {}", symbol, err);
                }
            }
        }

        Ok(series)
    }
}

/// Parse the `Date,Open,High,Low,Close,Volume` payload. Malformed rows are
/// skipped; a payload with no header at all is treated as corrupt.
fn parse_stooq_history(body: &str) -> Result<TimeSeries> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(body));

    let mut candles = Vec::new();

    for result in reader.records() {
        let record = result.context("Failed to read history record")?;

        let Some(date_str) = record.get(0).filter(|value| !value.is_empty()) else {
            continue;
        };

        let parse_number = |idx: usize| -> Option<f64> {
            record
                .get(idx)
                .and_then(|field| field.trim().parse::<f64>().ok())
        };

        let Some(open) = parse_number(1) else { continue };
        let Some(high) = parse_number(2) else { continue };
        let Some(low) = parse_number(3) else { continue };
        let Some(close) = parse_number(4) else { continue };
        let volume = parse_number(5).unwrap_or(0.0);

        let date = match NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            Ok(date) => date,
            Err(_) => continue,
        };
        let Some(naive) = date.and_hms_opt(0, 0, 0) else {
            continue;
        };
        let timestamp = match Utc.from_local_datetime(&naive) {
            chrono::LocalResult::Single(dt) => dt,
            _ => continue,
        };

        candles.push(Candle {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    candles.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(candles)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stooq_payload_sorted_ascending() {
        let body = "Date,Open,High,Low,Close,Volume\n\
                    2024-01-05,186.0,187.4,185.2,186.9,52000000\n\
                    2024-01-04,184.2,186.1,183.9,185.5,48000000\n";
        let candles = parse_stooq_history(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].timestamp < candles[1].timestamp);
        assert!((candles[0].close - 185.5).abs() < 1e-9);
        assert!((candles[1].volume - 52_000_000.0).abs() < 1e-9);
    }

    #[test]
    fn skips_malformed_rows() {
        let body = "Date,Open,High,Low,Close,Volume\n\
                    2024-01-04,184.2,186.1,183.9,185.5,48000000\n\
                    not-a-date,1,2,3,4,5\n\
                    2024-01-05,N/D,N/D,N/D,N/D,N/D\n";
        let candles = parse_stooq_history(body).unwrap();
        assert_eq!(candles.len(), 1);
    }

    #[test]
    fn missing_volume_defaults_to_zero() {
        let body = "Date,Open,High,Low,Close\n2024-01-04,184.2,186.1,183.9,185.5\n";
        let candles = parse_stooq_history(body).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].volume, 0.0);
    }
}
