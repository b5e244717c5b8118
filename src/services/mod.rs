pub mod connectivity;
pub mod market_data;

pub use connectivity::{ConnectivityMonitor, ConnectivityState, ConnectivityTracker};
pub use market_data::{CacheManager, CacheStats, CacheStatus, MarketDataResult, SymbolReport};
