use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, warn};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::{sleep, Duration};

use crate::config::FetchConfig;
use crate::error::AppError;
use crate::fetch::source::QuoteSource;
use crate::fetch::{ensure_concurrency_limit, FetchKey, Period, TimeSeries};

/// Final state of one requested symbol, shared with any deduplicated waiters.
#[derive(Debug, Clone)]
pub enum SymbolOutcome {
    Data(TimeSeries),
    Failed(String),
}

/// Result of one batch fetch. Symbols that ultimately failed are listed with
/// a reason; they are never silently dropped and never abort the batch.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub series: HashMap<String, TimeSeries>,
    pub failures: Vec<(String, String)>,
}

type Slot = watch::Receiver<Option<SymbolOutcome>>;

/// Chunked, rate-limit-friendly batch fetcher over a [`QuoteSource`].
///
/// Large symbol sets are split into fixed-size chunks issued through a bounded
/// worker pool; each chunk retries with exponential backoff before its symbols
/// are marked failed. Identical in-flight (symbol, period) requests are
/// deduplicated: a second caller attaches to the outstanding result instead of
/// issuing another network call.
pub struct FetchClient {
    source: Arc<dyn QuoteSource>,
    config: FetchConfig,
    in_flight: Arc<Mutex<HashMap<FetchKey, Slot>>>,
}

impl FetchClient {
    pub fn new(source: Arc<dyn QuoteSource>, config: FetchConfig) -> Self {
        Self {
            source,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn fetch(&self, symbols: &[String], period: Period) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        if symbols.is_empty() {
            return outcome;
        }

        // Claim a slot for every symbol not already in flight; attach to the
        // existing slot otherwise. Duplicates within the request collapse here.
        let mut owned: Vec<String> = Vec::new();
        let mut senders: HashMap<String, watch::Sender<Option<SymbolOutcome>>> = HashMap::new();
        let mut waiting: Vec<(String, Slot)> = Vec::new();
        let mut seen = HashSet::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            for symbol in symbols {
                if !seen.insert(symbol.clone()) {
                    continue;
                }
                let key = FetchKey {
                    symbol: symbol.clone(),
                    period,
                };
                match in_flight.get(&key) {
                    // A slot whose sender is gone without ever publishing is
                    // dead; reclaim it instead of waiting forever.
                    Some(slot) if slot.has_changed().is_ok() || slot.borrow().is_some() => {
                        debug!("attaching to in-flight fetch for {} ({})", symbol, period);
                        waiting.push((symbol.clone(), slot.clone()));
                    }
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        in_flight.insert(key, rx.clone());
                        senders.insert(symbol.clone(), tx);
                        owned.push(symbol.clone());
                        waiting.push((symbol.clone(), rx));
                    }
                }
            }
        }

        // The owned fetch runs on a detached task: dropping this caller
        // neither cancels the network work other waiters attached to nor
        // leaks the claimed slots. This caller waits on its own receivers
        // like any attacher.
        if !owned.is_empty() {
            let source = Arc::clone(&self.source);
            let config = self.config.clone();
            let in_flight = Arc::clone(&self.in_flight);
            tokio::spawn(async move {
                let results = Self::fetch_owned(source, &config, &owned, period).await;
                for (symbol, result) in results {
                    if let Some(tx) = senders.remove(&symbol) {
                        let _ = tx.send(Some(result));
                    }
                }
                let mut in_flight = in_flight.lock().await;
                for symbol in &owned {
                    in_flight.remove(&FetchKey {
                        symbol: symbol.clone(),
                        period,
                    });
                }
            });
        }

        for (symbol, mut slot) in waiting {
            match slot.wait_for(|value| value.is_some()).await {
                Ok(value) => match value.clone() {
                    Some(SymbolOutcome::Data(series)) => {
                        outcome.series.insert(symbol, series);
                    }
                    Some(SymbolOutcome::Failed(reason)) => outcome.failures.push((symbol, reason)),
                    None => unreachable!("wait_for only yields populated slots"),
                },
                // The publishing task died before producing a result.
                Err(_) => outcome
                    .failures
                    .push((symbol, "in-flight fetch was abandoned".to_string())),
            }
        }

        outcome
    }

    /// Fan out the owned symbols in fixed-size chunks through the worker pool
    /// and wait for every chunk before returning (fan-out/fan-in).
    async fn fetch_owned(
        source: Arc<dyn QuoteSource>,
        config: &FetchConfig,
        symbols: &[String],
        period: Period,
    ) -> Vec<(String, SymbolOutcome)> {
        let chunk_size = config.chunk_size.max(1);
        let workers = ensure_concurrency_limit(config.workers);
        let semaphore = Arc::new(Semaphore::new(workers));
        let chunks: Vec<Vec<String>> = symbols
            .chunks(chunk_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        let per_chunk: Vec<Vec<(String, SymbolOutcome)>> = stream::iter(chunks)
            .map(|chunk| {
                let semaphore = Arc::clone(&semaphore);
                let source = Arc::clone(&source);
                async move {
                    let _permit = semaphore.acquire().await.unwrap();
                    Self::fetch_chunk_with_retry(source.as_ref(), config, &chunk, period).await
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        per_chunk.into_iter().flatten().collect()
    }

    async fn fetch_chunk_with_retry(
        source: &dyn QuoteSource,
        config: &FetchConfig,
        chunk: &[String],
        period: Period,
    ) -> Vec<(String, SymbolOutcome)> {
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match source.fetch_chunk(chunk, period).await {
                Ok(mut series) => {
                    return chunk
                        .iter()
                        .map(|symbol| match series.remove(symbol) {
                            Some(data) => (symbol.clone(), SymbolOutcome::Data(data)),
                            None => (
                                symbol.clone(),
                                SymbolOutcome::Failed("no data returned by source".to_string()),
                            ),
                        })
                        .collect();
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        warn!(
                            "chunk of {} symbols failed after {} attempts: {}",
                            chunk.len(),
                            attempt,
                            err
                        );
                        return chunk
                            .iter()
                            .map(|symbol| (symbol.clone(), SymbolOutcome::Failed(err.to_string())))
                            .collect();
                    }

                    let delay = Self::backoff_delay(config, attempt, err.is_rate_limited());
                    debug!(
                        "chunk attempt {}/{} failed ({}), backing off {:?}",
                        attempt, max_attempts, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    fn backoff_delay(config: &FetchConfig, failed_attempts: usize, rate_limited: bool) -> Duration {
        let exponent = failed_attempts.saturating_sub(1) as u32;
        let backoff = config
            .backoff_base_ms
            .saturating_mul(config.backoff_multiplier.saturating_pow(exponent));
        let floor = if rate_limited {
            config.rate_limit_floor_ms
        } else {
            0
        };
        Duration::from_millis(backoff.max(floor))
    }
}
