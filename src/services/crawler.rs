//! Product crawl service

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{error, info};

use super::{AlreadyRunning, RunControl, StatusTracker, supervise};
use crate::batch::{BatchScheduler, ItemEvent};
use crate::catalog::UrlCatalog;
use crate::models::{ExtractionResult, ParserStatus, RunState};
use crate::traits::DriverFactory;

pub struct Crawler<F: DriverFactory> {
    scheduler: BatchScheduler<F>,
    catalog: Arc<UrlCatalog>,
    status: Arc<StatusTracker<ParserStatus>>,
    control: Arc<RunControl>,
}

impl<F: DriverFactory> Crawler<F> {
    pub fn new(
        scheduler: BatchScheduler<F>,
        catalog: Arc<UrlCatalog>,
        status: StatusTracker<ParserStatus>,
    ) -> Self {
        Self {
            scheduler,
            catalog,
            status: Arc::new(status),
            control: Arc::new(RunControl::default()),
        }
    }

    pub async fn status(&self) -> ParserStatus {
        self.status.snapshot().await
    }

    /// Starts crawling `category` in the background.
    ///
    /// `limit` caps the number of URLs, 0 meaning all of them.
    pub async fn start(&self, category: &str, limit: usize, force: bool) -> Result<(), AlreadyRunning> {
        let crawler = self.clone();
        let category = category.to_string();
        info!("Starting crawl of '{}' (limit {}, force {})", category, limit, force);
        self.control
            .start("parser", force, move |running| async move {
                crawler.run(category, limit, running).await;
            })
            .await
    }

    /// Stops the active crawl and tears down pooled browser sessions.
    ///
    /// The batch in progress finishes its current URL before it notices.
    pub async fn stop(&self) -> bool {
        let was_running = self.control.signal_stop().await;
        self.scheduler.pool().shutdown().await;
        if was_running {
            self.status
                .update(|s| {
                    if s.status == RunState::Running {
                        s.status = RunState::Stopped;
                        s.end_time = Some(Utc::now());
                    }
                })
                .await;
            info!("Crawl stopped");
        }
        was_running
    }

    /// Records when the scheduler will next trigger this service.
    pub async fn set_next_run(&self, at: Option<DateTime<Utc>>) {
        self.status.update(|s| s.next_run = at).await;
    }

    /// Waits for the active crawl, if any, to finish.
    pub async fn join(&self) {
        self.control.join().await;
    }

    pub async fn products(&self, category: Option<&str>, limit: usize, offset: usize) -> Vec<ExtractionResult> {
        self.scheduler.results().page(category, limit, offset).await
    }

    pub async fn product(&self, product_code: &str) -> Option<ExtractionResult> {
        self.scheduler.results().find_by_code(product_code).await
    }

    async fn run(self, category: String, limit: usize, running: Arc<AtomicBool>) {
        self.status
            .update(|s| {
                s.status = RunState::Running;
                s.start_time = Some(Utc::now());
                s.end_time = None;
                s.errors = 0;
                s.total_products = 0;
                s.processed_products = 0;
                s.current_category = Some(category.clone());
            })
            .await;
        self.scheduler.pool().reopen();

        let work = {
            let crawler = self.clone();
            let running = Arc::clone(&running);
            async move { crawler.crawl(category, limit, running).await }
        };
        if supervise("Crawl", work).await {
            self.status
                .update(|s| {
                    s.status = RunState::Error;
                    s.errors += 1;
                    s.end_time = Some(Utc::now());
                })
                .await;
        }

        self.status
            .update(|s| {
                if s.end_time.is_none() {
                    s.status = RunState::Stopped;
                    s.end_time = Some(Utc::now());
                }
            })
            .await;
    }

    async fn crawl(&self, category: String, limit: usize, running: Arc<AtomicBool>) -> Result<()> {
        let records = self.catalog.load(Some(&category)).await?;
        if records.is_empty() {
            error!("No catalogued URLs for category '{}'", category);
            self.status
                .update(|s| {
                    s.status = RunState::Failed;
                    s.end_time = Some(Utc::now());
                })
                .await;
            return Ok(());
        }

        let total = if limit == 0 {
            records.len()
        } else {
            records.len().min(limit)
        };
        self.status
            .update(|s| {
                s.total_products = total;
                s.processed_products = 0;
            })
            .await;

        let (events, receiver) = mpsc::unbounded_channel();
        let progress = tokio::spawn(track_progress(Arc::clone(&self.status), receiver));

        let urls = records.into_iter().map(|r| r.url).collect();
        let report = self
            .scheduler
            .run(urls, Some(&category), limit, Arc::clone(&running), Some(events))
            .await;
        if let Err(e) = progress.await {
            error!("Progress tracking ended abnormally: {}", e);
        }

        if !running.load(Ordering::SeqCst) {
            info!("Crawl of '{}' stopped after {} stored results", category, report.stored());
            return Ok(());
        }

        let stored = report.stored();
        self.status
            .update(|s| {
                let now = Utc::now();
                s.status = RunState::Completed;
                s.processed_products = stored;
                s.errors += report.failed_batches;
                s.end_time = Some(now);
                s.last_run = Some(now);
            })
            .await;
        info!("Crawl of '{}' completed, {} products stored", category, stored);
        Ok(())
    }
}

impl<F: DriverFactory> Clone for Crawler<F> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            catalog: Arc::clone(&self.catalog),
            status: Arc::clone(&self.status),
            control: Arc::clone(&self.control),
        }
    }
}

/// Folds per-URL events into the status record until every sender is gone.
async fn track_progress(
    status: Arc<StatusTracker<ParserStatus>>,
    mut events: mpsc::UnboundedReceiver<ItemEvent>,
) {
    while let Some(event) = events.recv().await {
        status
            .update(|s| match event {
                ItemEvent::Stored { forwarded, .. } => {
                    s.processed_products += 1;
                    if !forwarded {
                        s.errors += 1;
                    }
                }
                ItemEvent::Missing { .. } | ItemEvent::Failed { .. } => s.errors += 1,
                ItemEvent::Skipped { .. } => {}
            })
            .await;
    }
}
