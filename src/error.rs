use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("symbol {0} is not in the S&P 500 universe")]
    InvalidSymbol(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("rate limited by data source: {0}")]
    RateLimited(String),
    #[error("corrupt cache entry for key {0}")]
    CorruptCacheEntry(String),
    #[error("cache write failed: {0}")]
    StoreWrite(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    /// Rate-limit responses are retried like any transient network error,
    /// but with a longer backoff floor.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_name_their_subject() {
        assert_eq!(
            AppError::InvalidSymbol("ZZZZ".to_string()).to_string(),
            "symbol ZZZZ is not in the S&P 500 universe"
        );
        assert_eq!(
            AppError::CorruptCacheEntry("AAPL_1mo_history".to_string()).to_string(),
            "corrupt cache entry for key AAPL_1mo_history"
        );
        assert_eq!(
            AppError::StoreWrite("disk full".to_string()).to_string(),
            "cache write failed: disk full"
        );
    }

    #[test]
    fn only_rate_limit_errors_get_the_longer_floor() {
        assert!(AppError::RateLimited("429".to_string()).is_rate_limited());
        assert!(!AppError::Network("timeout".to_string()).is_rate_limited());
    }
}
