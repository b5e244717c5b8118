use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Context, Result};
use crate::fetch::FETCH_CONCURRENCY_LIMIT;

/// Top-level tunables, loadable from a JSON file. Every field falls back to
/// the built-in default, so a partial config file is fine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub connectivity: ConnectivityConfig,
    pub universe: UniverseConfig,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: AppConfig = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for intraday quote series, matching the 5 minute network-cache layer.
    pub quote_ttl_secs: u64,
    /// TTL for daily history series, long enough to cover an offline session.
    pub history_ttl_secs: u64,
    /// On-disk budget; lowest-recency entries are evicted once exceeded.
    pub byte_budget: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quote_ttl_secs: 5 * 60,
            history_ttl_secs: 24 * 60 * 60,
            byte_budget: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Symbols per chunk request, sized to stay under the source's rate limit.
    pub chunk_size: usize,
    /// Concurrent chunk workers.
    pub workers: usize,
    /// Attempts per chunk before its symbols are reported as failed.
    pub max_attempts: usize,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: u64,
    /// Minimum delay after a rate-limited response.
    pub rate_limit_floor_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            workers: FETCH_CONCURRENCY_LIMIT,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_multiplier: 2,
            rate_limit_floor_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Reachability probe target. `None` disables probing entirely and leaves
    /// the monitor at its last known state.
    pub probe_url: Option<String>,
    pub probe_timeout_secs: u64,
    /// Consecutive probe failures before DEGRADED becomes OFFLINE.
    pub offline_threshold: u32,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: Some("https://stooq.com/".to_string()),
            probe_timeout_secs: 3,
            offline_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub url: String,
    pub ttl_secs: u64,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            url: "https://raw.githubusercontent.com/datasets/s-and-p-500-companies/main/data/constituents.csv"
                .to_string(),
            ttl_secs: 60 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = AppConfig::default();
        assert_eq!(config.fetch.chunk_size, 50);
        assert_eq!(config.fetch.workers, 5);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.cache.quote_ttl_secs, 300);
        assert_eq!(config.cache.history_ttl_secs, 86_400);
        assert_eq!(config.connectivity.offline_threshold, 3);
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        let json = r#"{ "fetch": { "chunk_size": 25 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.fetch.chunk_size, 25);
        assert_eq!(config.fetch.workers, 5);
        assert_eq!(config.cache.byte_budget, 50 * 1024 * 1024);
    }
}
