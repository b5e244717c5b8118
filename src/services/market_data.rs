use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::config::CacheConfig;
use crate::error::AppError;
use crate::fetch::{cache_key, DataKind, FetchClient, Period, TimeSeries};
use crate::services::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::storage::PersistentStore;
use crate::universe::{normalize_symbol, SymbolUniverse};

/// How a symbol's data was (or was not) obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh cache entry.
    Hit,
    /// Not cached (or expired); fetched fresh from the source.
    Miss,
    /// Served from an expired cache entry because the source was unavailable.
    Stale,
    /// No data: fetch failed and no cached copy existed.
    Failed,
    /// Rejected up front: not in the S&P 500 universe.
    Invalid,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
            CacheStatus::Failed => "FAILED",
            CacheStatus::Invalid => "INVALID",
        }
    }

    pub fn has_data(&self) -> bool {
        matches!(self, CacheStatus::Hit | CacheStatus::Miss | CacheStatus::Stale)
    }
}

#[derive(Debug, Clone)]
pub struct SymbolReport {
    pub symbol: String,
    pub status: CacheStatus,
}

/// Combined answer for one request: series keyed by symbol plus a status
/// report for every requested symbol (after duplicate collapsing). The
/// presentation layer never sees a raw error, only per-symbol statuses.
#[derive(Debug, Default)]
pub struct MarketDataResult {
    pub series: HashMap<String, TimeSeries>,
    pub reports: Vec<SymbolReport>,
}

impl MarketDataResult {
    pub fn loaded_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.status.has_data())
            .count()
    }

    pub fn symbols_with(&self, status: CacheStatus) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|report| report.status == status)
            .map(|report| report.symbol.as_str())
            .collect()
    }

    /// One-line summary for the UI, e.g.
    /// "18 of 20 symbols loaded; 2 failed: AAPL, MSFT".
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} of {} symbols loaded",
            self.loaded_count(),
            self.reports.len()
        );
        let failed = self.symbols_with(CacheStatus::Failed);
        if !failed.is_empty() {
            line.push_str(&format!("; {} failed: {}", failed.len(), failed.join(", ")));
        }
        let invalid = self.symbols_with(CacheStatus::Invalid);
        if !invalid.is_empty() {
            line.push_str(&format!(
                "; {} invalid: {}",
                invalid.len(),
                invalid.join(", ")
            ));
        }
        line
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
}

/// Orchestration core between the presentation layer, the persistent store,
/// the fetch client and the connectivity monitor.
///
/// Requests are partitioned into fresh hits and stale-or-missing keys; only
/// the latter go to the network, and only while not offline. Fetched series
/// are written back with the configured TTL; fetch failures fall back to
/// stale cache copies before being reported as FAILED.
pub struct CacheManager {
    store: Arc<PersistentStore>,
    fetcher: Arc<FetchClient>,
    monitor: Arc<ConnectivityMonitor>,
    universe: SymbolUniverse,
    config: CacheConfig,
}

impl CacheManager {
    pub fn new(
        store: Arc<PersistentStore>,
        fetcher: Arc<FetchClient>,
        monitor: Arc<ConnectivityMonitor>,
        universe: SymbolUniverse,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            monitor,
            universe,
            config,
        }
    }

    fn ttl_for(&self, kind: DataKind) -> Duration {
        let secs = match kind {
            DataKind::Quote => self.config.quote_ttl_secs,
            _ => self.config.history_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    /// Normalize, deduplicate and validate the request; returns the symbols
    /// in request order with INVALID ones already recorded.
    fn screen_symbols(
        &self,
        symbols: &[String],
        statuses: &mut HashMap<String, CacheStatus>,
    ) -> (Vec<String>, Vec<String>) {
        let mut ordered = Vec::new();
        let mut valid = Vec::new();
        let mut seen = HashSet::new();

        for raw in symbols {
            let symbol = normalize_symbol(raw);
            if symbol.is_empty() || !seen.insert(symbol.clone()) {
                continue;
            }
            if self.universe.contains(&symbol) {
                valid.push(symbol.clone());
            } else {
                debug!("{}", AppError::InvalidSymbol(symbol.clone()));
                statuses.insert(symbol.clone(), CacheStatus::Invalid);
            }
            ordered.push(symbol);
        }

        (ordered, valid)
    }

    fn emit_reports(
        ordered: Vec<String>,
        mut statuses: HashMap<String, CacheStatus>,
        result: &mut MarketDataResult,
    ) {
        for symbol in ordered {
            let status = statuses.remove(&symbol).unwrap_or(CacheStatus::Failed);
            result.reports.push(SymbolReport { symbol, status });
        }
    }

    /// Resolve price/volume series for the requested symbols over `period`.
    /// Always returns one report per (deduplicated) symbol; never errors.
    pub async fn get_market_data(&self, symbols: &[String], period: Period) -> MarketDataResult {
        let mut result = MarketDataResult::default();
        if symbols.is_empty() {
            return result;
        }

        let kind = DataKind::for_period(period);
        let mut statuses = HashMap::new();
        let (ordered, valid) = self.screen_symbols(symbols, &mut statuses);

        let mut stale: HashMap<String, TimeSeries> = HashMap::new();
        let mut needs_fetch: Vec<String> = Vec::new();

        for symbol in &valid {
            match self.store.get::<TimeSeries>(&cache_key(symbol, period, kind)) {
                Some(value) if !value.is_expired => {
                    statuses.insert(symbol.clone(), CacheStatus::Hit);
                    result.series.insert(symbol.clone(), value.data);
                }
                Some(value) => {
                    stale.insert(symbol.clone(), value.data);
                    needs_fetch.push(symbol.clone());
                }
                None => needs_fetch.push(symbol.clone()),
            }
        }

        if !needs_fetch.is_empty() {
            let state = self.monitor.check().await;
            if state == ConnectivityState::Offline {
                // Serve the last known value where one exists; never touch
                // the network while offline.
                for symbol in needs_fetch {
                    if let Some(series) = stale.remove(&symbol) {
                        statuses.insert(symbol.clone(), CacheStatus::Stale);
                        result.series.insert(symbol, series);
                    } else {
                        statuses.insert(symbol, CacheStatus::Failed);
                    }
                }
            } else {
                self.fetch_and_merge(&needs_fetch, period, kind, &mut stale, &mut statuses, &mut result)
                    .await;
            }
        }

        Self::emit_reports(ordered, statuses, &mut result);
        result
    }

    async fn fetch_and_merge(
        &self,
        symbols: &[String],
        period: Period,
        kind: DataKind,
        stale: &mut HashMap<String, TimeSeries>,
        statuses: &mut HashMap<String, CacheStatus>,
        result: &mut MarketDataResult,
    ) {
        let outcome = self.fetcher.fetch(symbols, period).await;
        let ttl = self.ttl_for(kind);
        let fetched_any = !outcome.series.is_empty();

        for (symbol, series) in outcome.series {
            // Cache writes are best effort; a failed write never fails the
            // in-memory result.
            if let Err(err) = self.store.put(&cache_key(&symbol, period, kind), &series, ttl) {
                warn!(
                    "keeping {} in memory only: {}",
                    symbol,
                    AppError::StoreWrite(err.to_string())
                );
            }
            statuses.insert(symbol.clone(), CacheStatus::Miss);
            result.series.insert(symbol, series);
        }

        for (symbol, reason) in outcome.failures {
            if let Some(series) = stale.remove(&symbol) {
                warn!(
                    "serving stale cached data for {} after fetch failure: {}",
                    symbol, reason
                );
                statuses.insert(symbol.clone(), CacheStatus::Stale);
                result.series.insert(symbol, series);
            } else {
                debug!("no data for {}: {}", symbol, reason);
                statuses.insert(symbol, CacheStatus::Failed);
            }
        }

        if fetched_any {
            self.monitor.mark_online();
        }
    }

    /// Fetch fresh data regardless of cache freshness. Universe validation
    /// and the offline guard still apply.
    pub async fn force_refresh(&self, symbols: &[String], period: Period) -> MarketDataResult {
        let mut result = MarketDataResult::default();
        if symbols.is_empty() {
            return result;
        }

        let kind = DataKind::for_period(period);
        let mut statuses = HashMap::new();
        let (ordered, valid) = self.screen_symbols(symbols, &mut statuses);

        if !valid.is_empty() {
            if self.monitor.check().await == ConnectivityState::Offline {
                for symbol in &valid {
                    statuses.insert(symbol.clone(), CacheStatus::Failed);
                }
            } else {
                let mut no_stale = HashMap::new();
                self.fetch_and_merge(&valid, period, kind, &mut no_stale, &mut statuses, &mut result)
                    .await;
            }
        }

        Self::emit_reports(ordered, statuses, &mut result);
        result
    }

    pub fn connectivity_state(&self) -> ConnectivityState {
        self.monitor.state()
    }

    pub fn clear_cache(&self) {
        self.store.clear();
    }

    pub fn sweep_expired(&self) -> usize {
        self.store.sweep_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.len(),
            bytes: self.store.size_bytes(),
        }
    }

    pub fn universe_size(&self) -> usize {
        self.universe.len()
    }

    pub fn universe_symbols(&self) -> impl Iterator<Item = &str> {
        self.universe.symbols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectivityConfig, FetchConfig};
    use crate::fetch::source::mock::MockSource;
    use reqwest::Client;
    use tempfile::TempDir;

    struct Fixture {
        manager: CacheManager,
        source: Arc<MockSource>,
        monitor: Arc<ConnectivityMonitor>,
        _dir: TempDir,
    }

    fn fixture_with_source(source: MockSource) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(PersistentStore::open(dir.path(), 10 * 1024 * 1024).unwrap());
        let source = Arc::new(source);
        let fetcher = Arc::new(FetchClient::new(
            source.clone(),
            FetchConfig {
                backoff_base_ms: 1,
                ..FetchConfig::default()
            },
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(
            Client::new(),
            ConnectivityConfig {
                probe_url: None,
                ..ConnectivityConfig::default()
            },
        ));
        let universe = SymbolUniverse::from_symbols(["AAPL", "MSFT", "NVDA"]);
        let manager = CacheManager::new(
            store,
            fetcher,
            monitor.clone(),
            universe,
            CacheConfig::default(),
        );
        Fixture {
            manager,
            source,
            monitor,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_source(MockSource::default())
    }

    fn request(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    fn status_of(result: &MarketDataResult, symbol: &str) -> CacheStatus {
        result
            .reports
            .iter()
            .find(|report| report.symbol == symbol)
            .map(|report| report.status)
            .unwrap_or_else(|| panic!("no report for {}", symbol))
    }

    #[tokio::test]
    async fn empty_request_returns_immediately() {
        let fx = fixture();
        let result = fx.manager.get_market_data(&[], Period::OneMonth).await;
        assert!(result.reports.is_empty());
        assert!(result.series.is_empty());
        assert_eq!(fx.source.call_count(), 0);
    }

    #[tokio::test]
    async fn every_symbol_gets_a_report() {
        let fx = fixture();
        let result = fx
            .manager
            .get_market_data(&request(&["AAPL", "MSFT", "ZZZZ"]), Period::OneMonth)
            .await;
        assert_eq!(result.reports.len(), 3);
    }

    #[tokio::test]
    async fn unknown_symbol_is_invalid_not_failed() {
        let fx = fixture();
        let result = fx
            .manager
            .get_market_data(&request(&["AAPL", "ZZZZ"]), Period::OneMonth)
            .await;

        assert_eq!(status_of(&result, "AAPL"), CacheStatus::Miss);
        assert!(result.series.contains_key("AAPL"));
        assert_eq!(status_of(&result, "ZZZZ"), CacheStatus::Invalid);
        assert!(!result.series.contains_key("ZZZZ"));
        // The invalid symbol never reached the network.
        assert_eq!(fx.source.call_count(), 1);
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_a_cache_hit_with_no_fetch() {
        let fx = fixture();
        let symbols = request(&["AAPL", "MSFT"]);

        let first = fx.manager.get_market_data(&symbols, Period::OneMonth).await;
        assert_eq!(status_of(&first, "AAPL"), CacheStatus::Miss);
        assert_eq!(fx.source.call_count(), 1);

        let second = fx.manager.get_market_data(&symbols, Period::OneMonth).await;
        assert_eq!(status_of(&second, "AAPL"), CacheStatus::Hit);
        assert_eq!(status_of(&second, "MSFT"), CacheStatus::Hit);
        assert_eq!(second.series["AAPL"], first.series["AAPL"]);
        assert_eq!(fx.source.call_count(), 1);
    }

    #[tokio::test]
    async fn offline_serves_stale_data_with_zero_network_calls() {
        let fx = fixture();

        // Populate, then expire the entry by rewriting it with a zero TTL.
        let warm = fx
            .manager
            .get_market_data(&request(&["AAPL"]), Period::OneMonth)
            .await;
        fx.manager
            .store
            .put(
                &cache_key("AAPL", Period::OneMonth, DataKind::History),
                &warm.series["AAPL"],
                Duration::from_secs(0),
            )
            .unwrap();

        fx.monitor.set_offline(true);
        let calls_before = fx.source.call_count();

        let result = fx
            .manager
            .get_market_data(&request(&["AAPL", "MSFT"]), Period::OneMonth)
            .await;

        assert_eq!(status_of(&result, "AAPL"), CacheStatus::Stale);
        assert!(result.series.contains_key("AAPL"));
        // MSFT had no cached copy at all.
        assert_eq!(status_of(&result, "MSFT"), CacheStatus::Failed);
        assert_eq!(fx.source.call_count(), calls_before);
    }

    #[tokio::test]
    async fn expired_entry_is_never_a_hit_and_revalidates_online() {
        let fx = fixture();
        fx.manager
            .store
            .put(
                &cache_key("AAPL", Period::OneMonth, DataKind::History),
                &MockSource::sample_series(),
                Duration::from_secs(0),
            )
            .unwrap();

        let result = fx
            .manager
            .get_market_data(&request(&["AAPL"]), Period::OneMonth)
            .await;

        assert_eq!(status_of(&result, "AAPL"), CacheStatus::Miss);
        assert_eq!(fx.source.call_count(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_falls_back_to_stale_before_failed() {
        let fx = fixture_with_source(MockSource {
            fail_first: usize::MAX,
            ..MockSource::default()
        });
        fx.manager
            .store
            .put(
                &cache_key("AAPL", Period::OneMonth, DataKind::History),
                &MockSource::sample_series(),
                Duration::from_secs(0),
            )
            .unwrap();

        let result = fx
            .manager
            .get_market_data(&request(&["AAPL", "MSFT"]), Period::OneMonth)
            .await;

        assert_eq!(status_of(&result, "AAPL"), CacheStatus::Stale);
        assert!(result.series.contains_key("AAPL"));
        assert_eq!(status_of(&result, "MSFT"), CacheStatus::Failed);
    }

    #[tokio::test]
    async fn duplicate_symbols_collapse_into_one_report() {
        let fx = fixture();
        let result = fx
            .manager
            .get_market_data(&request(&["AAPL", "aapl", "AAPL"]), Period::OneMonth)
            .await;
        assert_eq!(result.reports.len(), 1);
        assert_eq!(result.reports[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn force_refresh_bypasses_fresh_cache() {
        let fx = fixture();
        let symbols = request(&["AAPL"]);

        fx.manager.get_market_data(&symbols, Period::OneMonth).await;
        assert_eq!(fx.source.call_count(), 1);

        let refreshed = fx.manager.force_refresh(&symbols, Period::OneMonth).await;
        assert_eq!(status_of(&refreshed, "AAPL"), CacheStatus::Miss);
        assert_eq!(fx.source.call_count(), 2);
    }

    #[tokio::test]
    async fn force_refresh_respects_offline_mode() {
        let fx = fixture();
        fx.monitor.set_offline(true);

        let result = fx
            .manager
            .force_refresh(&request(&["AAPL"]), Period::OneMonth)
            .await;

        assert_eq!(status_of(&result, "AAPL"), CacheStatus::Failed);
        assert_eq!(fx.source.call_count(), 0);
    }

    #[tokio::test]
    async fn clear_cache_forces_refetch() {
        let fx = fixture();
        let symbols = request(&["AAPL"]);

        fx.manager.get_market_data(&symbols, Period::OneMonth).await;
        fx.manager.clear_cache();
        assert_eq!(fx.manager.cache_stats().entries, 0);

        let result = fx.manager.get_market_data(&symbols, Period::OneMonth).await;
        assert_eq!(status_of(&result, "AAPL"), CacheStatus::Miss);
        assert_eq!(fx.source.call_count(), 2);
    }

    #[tokio::test]
    async fn summary_names_failed_and_invalid_symbols() {
        let fx = fixture_with_source(MockSource {
            missing: vec!["MSFT".to_string()],
            ..MockSource::default()
        });

        let result = fx
            .manager
            .get_market_data(&request(&["AAPL", "MSFT", "ZZZZ"]), Period::OneMonth)
            .await;

        let summary = result.summary();
        assert!(summary.starts_with("1 of 3 symbols loaded"), "{}", summary);
        assert!(summary.contains("1 failed: MSFT"), "{}", summary);
        assert!(summary.contains("1 invalid: ZZZZ"), "{}", summary);
    }
}
