//! URL catalog refresh service

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

use super::{AlreadyRunning, RunControl, StatusTracker, supervise};
use crate::catalog::{UrlCatalog, filter_product_urls};
use crate::models::{RunState, UrlUpdaterStatus};
use crate::sitemap::SitemapResolver;
use crate::traits::SitemapFetcher;

/// Rebuilds the URL catalog from the sitemap
pub struct UrlRefresher<S> {
    resolver: Arc<SitemapResolver<S>>,
    sitemap_url: String,
    catalog: Arc<UrlCatalog>,
    status: Arc<StatusTracker<UrlUpdaterStatus>>,
    control: Arc<RunControl>,
}

impl<S: SitemapFetcher + 'static> UrlRefresher<S> {
    pub fn new(
        resolver: SitemapResolver<S>,
        sitemap_url: &str,
        catalog: Arc<UrlCatalog>,
        status: StatusTracker<UrlUpdaterStatus>,
    ) -> Self {
        Self {
            resolver: Arc::new(resolver),
            sitemap_url: sitemap_url.to_string(),
            catalog,
            status: Arc::new(status),
            control: Arc::new(RunControl::default()),
        }
    }

    pub async fn status(&self) -> UrlUpdaterStatus {
        self.status.snapshot().await
    }

    pub async fn start(&self, force: bool) -> Result<(), AlreadyRunning> {
        let refresher = self.clone();
        info!("Starting URL refresh from {} (force {})", self.sitemap_url, force);
        self.control
            .start("url-updater", force, move |running| async move {
                refresher.run(running).await;
            })
            .await
    }

    pub async fn stop(&self) -> bool {
        let was_running = self.control.signal_stop().await;
        if was_running {
            self.status
                .update(|s| {
                    if s.status == RunState::Running {
                        s.status = RunState::Stopped;
                        s.end_time = Some(Utc::now());
                    }
                })
                .await;
            info!("URL refresh stopped");
        }
        was_running
    }

    /// Records when the scheduler will next trigger this service.
    pub async fn set_next_run(&self, at: Option<DateTime<Utc>>) {
        self.status.update(|s| s.next_run = at).await;
    }

    pub async fn join(&self) {
        self.control.join().await;
    }

    async fn run(self, running: Arc<AtomicBool>) {
        self.status
            .update(|s| {
                s.status = RunState::Running;
                s.start_time = Some(Utc::now());
                s.end_time = None;
                s.errors = 0;
                s.total_urls = 0;
            })
            .await;

        let work = {
            let refresher = self.clone();
            async move { refresher.refresh(running).await }
        };
        if supervise("URL refresh", work).await {
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

    async fn refresh(&self, running: Arc<AtomicBool>) -> Result<()> {
        let entries = self.resolver.resolve(&self.sitemap_url).await;
        if entries.is_empty() {
            error!("Sitemap {} yielded no URLs", self.sitemap_url);
            return self.fail().await;
        }

        let products = filter_product_urls(entries);
        if products.is_empty() {
            error!("Sitemap {} contains no product URLs", self.sitemap_url);
            return self.fail().await;
        }
        let total = products.len();
        self.status.update(|s| s.total_urls = total).await;

        if !running.load(Ordering::SeqCst) {
            info!("URL refresh stopped before saving {} URLs", total);
            return Ok(());
        }

        let saved = self.catalog.persist(&products).await?;
        self.status
            .update(|s| {
                let now = Utc::now();
                s.status = RunState::Completed;
                s.total_urls = saved;
                s.end_time = Some(now);
                s.last_run = Some(now);
            })
            .await;
        info!("URL refresh completed, {} product URLs catalogued", saved);
        Ok(())
    }

    async fn fail(&self) -> Result<()> {
        self.status
            .update(|s| {
                s.status = RunState::Failed;
                s.end_time = Some(Utc::now());
            })
            .await;
        Ok(())
    }
}

impl<S> Clone for UrlRefresher<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            sitemap_url: self.sitemap_url.clone(),
            catalog: Arc::clone(&self.catalog),
            status: Arc::clone(&self.status),
            control: Arc::clone(&self.control),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StaticFetcher;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const ROOT: &str = "https://shop.example/sitemap.xml";

    async fn refresher(dir: &TempDir, documents: &[(&str, &str)]) -> UrlRefresher<StaticFetcher> {
        let fetcher = StaticFetcher(
            documents
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
        );
        let status =
            StatusTracker::new(dir.path().join("url_status.json"), UrlUpdaterStatus::default()).await;
        UrlRefresher::new(
            SitemapResolver::new(fetcher, 8, 100),
            ROOT,
            Arc::new(UrlCatalog::new(dir.path().join("links.json"))),
            status,
        )
    }

    #[tokio::test]
    async fn refresh_catalogues_product_urls_only() {
        let dir = TempDir::new().unwrap();
        let xml = r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <url><loc>https://shop.example/products/phone-1</loc><lastmod>2024-05-01</lastmod></url>
            <url><loc>https://shop.example/products/phone-1/reviews</loc></url>
            <url><loc>https://shop.example/promo</loc></url>
            <url><loc>https://shop.example/products/tv-2</loc></url>
        </urlset>"#;
        let refresher = refresher(&dir, &[(ROOT, xml)]).await;

        refresher.start(false).await.unwrap();
        refresher.join().await;

        let status = refresher.status().await;
        assert_eq!(status.status, RunState::Completed);
        assert_eq!(status.total_urls, 2);
        assert!(status.last_run.is_some());

        let records = refresher.catalog.load(None).await.unwrap();
        let urls: Vec<&str> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://shop.example/products/phone-1", "https://shop.example/products/tv-2"]
        );
        assert_eq!(records[0].last_modified.as_deref(), Some("2024-05-01"));
    }

    #[tokio::test]
    async fn unreachable_sitemap_fails() {
        let dir = TempDir::new().unwrap();
        let refresher = refresher(&dir, &[]).await;

        refresher.start(false).await.unwrap();
        refresher.join().await;

        assert_eq!(refresher.status().await.status, RunState::Failed);
        assert!(!refresher.catalog.path().exists());
    }

    #[tokio::test]
    async fn sitemap_without_products_fails() {
        let dir = TempDir::new().unwrap();
        let xml = r#"<urlset><url><loc>https://shop.example/about</loc></url></urlset>"#;
        let refresher = refresher(&dir, &[(ROOT, xml)]).await;

        refresher.start(false).await.unwrap();
        refresher.join().await;

        let status = refresher.status().await;
        assert_eq!(status.status, RunState::Failed);
        assert_eq!(status.total_urls, 0);
    }

    #[tokio::test]
    async fn catalog_write_failure_marks_error() {
        let dir = TempDir::new().unwrap();
        let xml = r#"<urlset><url><loc>https://shop.example/products/a</loc></url></urlset>"#;
        let fetcher = StaticFetcher(HashMap::from([(ROOT.to_string(), xml.to_string())]));
        let status =
            StatusTracker::new(dir.path().join("url_status.json"), UrlUpdaterStatus::default()).await;
        let refresher = UrlRefresher::new(
            SitemapResolver::new(fetcher, 8, 100),
            ROOT,
            Arc::new(UrlCatalog::new(dir.path().join("no-such-dir/links.json"))),
            status,
        );

        refresher.start(false).await.unwrap();
        refresher.join().await;

        let status = refresher.status().await;
        assert_eq!(status.status, RunState::Error);
        assert_eq!(status.errors, 1);
    }

    #[tokio::test]
    async fn next_run_is_persisted() {
        let dir = TempDir::new().unwrap();
        let refresher = refresher(&dir, &[]).await;
        let at = Utc::now() + chrono::Duration::hours(12);

        refresher.set_next_run(Some(at)).await;

        assert_eq!(refresher.status().await.next_run, Some(at));
        let on_disk: UrlUpdaterStatus =
            serde_json::from_slice(&std::fs::read(dir.path().join("url_status.json")).unwrap()).unwrap();
        assert_eq!(on_disk.next_run, Some(at));
    }

    #[tokio::test]
    async fn stop_keeps_a_finished_status() {
        let dir = TempDir::new().unwrap();
        let refresher = refresher(&dir, &[]).await;
        refresher.status.update(|s| s.status = RunState::Completed).await;
        refresher
            .control
            .start("url-updater", false, |running| async move {
                while running.load(Ordering::SeqCst) {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();

        assert!(refresher.stop().await);
        refresher.join().await;

        let status = refresher.status().await;
        assert_eq!(status.status, RunState::Completed);
        assert!(status.end_time.is_none());
    }
}
