//! Batch-parallel crawl execution
//!
//! URLs are cut into fixed-size batches and every batch becomes one task.
//! A semaphore caps how many batches run at once; each running batch owns a
//! single browser session and walks its URLs in order. Results are stored
//! first and marked processed only once the ingestion API accepted them.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::catalog::ProcessedSet;
use crate::driver::DriverPool;
use crate::extractor::ProductExtractor;
use crate::models::ForwardPayload;
use crate::storage::ResultStore;
use crate::traits::{DriverFactory, Forwarder};

/// Progress of a single URL, reported as soon as it is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEvent {
    /// Result stored; `forwarded` tells whether the API accepted it
    Stored { url: String, forwarded: bool },
    /// Page missing, blocked or unreachable
    Missing { url: String },
    /// Result could not be stored, or extraction panicked
    Failed { url: String },
    /// Already processed by an earlier run
    Skipped { url: String },
}

/// Outcome counts for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub number: usize,
    pub size: usize,
    pub stored: usize,
    pub forwarded: usize,
    pub missing: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome of a whole scheduler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Summaries of the batches that ran to completion, in batch order
    pub batches: Vec<BatchSummary>,
    pub failed_batches: usize,
}

impl BatchReport {
    pub fn stored(&self) -> usize {
        self.batches.iter().map(|b| b.stored).sum()
    }

    pub fn forwarded(&self) -> usize {
        self.batches.iter().map(|b| b.forwarded).sum()
    }

    pub fn errors(&self) -> usize {
        self.failed_batches
            + self
                .batches
                .iter()
                .map(|b| b.missing + b.failed + (b.stored - b.forwarded))
                .sum::<usize>()
    }
}

struct Batch {
    number: usize,
    start: usize,
    urls: Vec<String>,
}

pub struct BatchScheduler<F: DriverFactory> {
    pool: Arc<DriverPool<F>>,
    extractor: Arc<ProductExtractor>,
    results: Arc<ResultStore>,
    processed: Arc<ProcessedSet>,
    forwarder: Arc<dyn Forwarder>,
    batch_size: usize,
    concurrency: usize,
}

impl<F: DriverFactory> BatchScheduler<F> {
    pub fn new(
        pool: Arc<DriverPool<F>>,
        extractor: Arc<ProductExtractor>,
        results: Arc<ResultStore>,
        processed: Arc<ProcessedSet>,
        forwarder: Arc<dyn Forwarder>,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            pool,
            extractor,
            results,
            processed,
            forwarder,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn pool(&self) -> &Arc<DriverPool<F>> {
        &self.pool
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    /// Crawls `urls`, or the first `limit` of them when `limit` is non-zero.
    ///
    /// Returns once every batch has finished. Batches started after `running`
    /// is cleared do nothing, and running batches stop before their next URL.
    pub async fn run(
        &self,
        mut urls: Vec<String>,
        category: Option<&str>,
        limit: usize,
        running: Arc<AtomicBool>,
        events: Option<mpsc::UnboundedSender<ItemEvent>>,
    ) -> BatchReport {
        if limit > 0 {
            urls.truncate(limit);
        }
        let total = urls.len();
        let batches: Vec<Batch> = urls
            .chunks(self.batch_size)
            .enumerate()
            .map(|(index, chunk)| Batch {
                number: index + 1,
                start: index * self.batch_size,
                urls: chunk.to_vec(),
            })
            .collect();
        info!(
            "Crawling {} URLs (category: {}) in {} batches of up to {}, {} at a time",
            total,
            category.unwrap_or("all"),
            batches.len(),
            self.batch_size,
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for batch in batches {
            let scheduler = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let running = Arc::clone(&running);
            let events = events.clone();
            let span = info_span!("batch", number = batch.number);

            tasks.spawn(
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| anyhow::anyhow!("Batch semaphore closed: {}", e))?;
                    scheduler
                        .process_batch(batch, total, &running, events.as_ref())
                        .await
                }
                .instrument(span),
            );
        }

        let mut report = BatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(summary)) => report.batches.push(summary),
                Ok(Err(e)) => {
                    error!("Batch failed: {:#}", e);
                    report.failed_batches += 1;
                }
                Err(e) => {
                    error!("Batch task aborted: {}", e);
                    report.failed_batches += 1;
                }
            }
        }
        report.batches.sort_by_key(|b| b.number);

        info!(
            "Crawl finished: {} stored, {} forwarded, {} errors, {} failed batches",
            report.stored(),
            report.forwarded(),
            report.errors(),
            report.failed_batches
        );
        report
    }

    async fn process_batch(
        &self,
        batch: Batch,
        total: usize,
        running: &AtomicBool,
        events: Option<&mpsc::UnboundedSender<ItemEvent>>,
    ) -> anyhow::Result<BatchSummary> {
        let mut summary = BatchSummary {
            number: batch.number,
            size: batch.urls.len(),
            ..BatchSummary::default()
        };
        if !running.load(Ordering::SeqCst) {
            info!("Stop requested, batch {} not started", batch.number);
            return Ok(summary);
        }

        let driver = self.pool.acquire().await?;
        info!(
            "Batch {} started with {} URLs",
            batch.number,
            batch.urls.len()
        );

        for (offset, url) in batch.urls.iter().enumerate() {
            if !running.load(Ordering::SeqCst) {
                info!(
                    "Stop requested, leaving batch {} after {} of {} URLs",
                    batch.number,
                    offset,
                    batch.urls.len()
                );
                break;
            }
            let position = batch.start + offset + 1;

            if self.processed.contains(url).await {
                debug!("[{}/{}] Already processed: {}", position, total, url);
                summary.skipped += 1;
                emit(events, ItemEvent::Skipped { url: url.clone() });
                continue;
            }

            info!("[{}/{}] Processing {}", position, total, url);
            let event = match AssertUnwindSafe(self.process_item(&driver, url))
                .catch_unwind()
                .await
            {
                Ok(event) => event,
                Err(_) => {
                    error!("[{}/{}] Extraction panicked: {}", position, total, url);
                    ItemEvent::Failed { url: url.clone() }
                }
            };

            match &event {
                ItemEvent::Stored { forwarded, .. } => {
                    summary.stored += 1;
                    if *forwarded {
                        summary.forwarded += 1;
                    }
                }
                ItemEvent::Missing { .. } => summary.missing += 1,
                ItemEvent::Failed { .. } => summary.failed += 1,
                ItemEvent::Skipped { .. } => summary.skipped += 1,
            }
            emit(events, event);
        }

        self.pool.release(driver).await;
        info!(
            "Batch {} done: {} stored, {} forwarded, {} missing, {} failed, {} skipped",
            summary.number,
            summary.stored,
            summary.forwarded,
            summary.missing,
            summary.failed,
            summary.skipped
        );
        Ok(summary)
    }

    async fn process_item(&self, driver: &F::Driver, url: &str) -> ItemEvent {
        let Some(result) = self.extractor.extract(driver, url).await else {
            warn!("No product extracted from {}", url);
            return ItemEvent::Missing {
                url: url.to_string(),
            };
        };

        let payload = ForwardPayload::new(
            &result.product_info,
            &result.product_code,
            &result.image_urls,
            &self.extractor.profile().name,
        );
        if let Err(e) = self.results.upsert(result).await {
            error!("Failed to store result for {}: {:#}", url, e);
            return ItemEvent::Failed {
                url: url.to_string(),
            };
        }

        let forwarded = self.forwarder.forward(&payload).await;
        if forwarded {
            if let Err(e) = self.processed.mark(url).await {
                error!("Failed to record {} as processed: {:#}", url, e);
            }
        } else {
            warn!("API did not accept {}, it will be retried on the next run", url);
        }

        ItemEvent::Stored {
            url: url.to_string(),
            forwarded,
        }
    }
}

impl<F: DriverFactory> Clone for BatchScheduler<F> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            extractor: Arc::clone(&self.extractor),
            results: Arc::clone(&self.results),
            processed: Arc::clone(&self.processed),
            forwarder: Arc::clone(&self.forwarder),
            batch_size: self.batch_size,
            concurrency: self.concurrency,
        }
    }
}

fn emit(events: Option<&mpsc::UnboundedSender<ItemEvent>>, event: ItemEvent) {
    if let Some(events) = events {
        let _ = events.send(event);
    }
}
