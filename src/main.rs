use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

mod api;
mod batch;
mod catalog;
mod characteristics;
mod config;
mod driver;
mod extractor;
mod forwarder;
mod logging;
mod models;
mod pacing;
mod scrapers;
mod services;
mod sitemap;
mod storage;
#[cfg(test)]
mod test_utils;
mod traits;

use batch::BatchScheduler;
use catalog::{ProcessedSet, UrlCatalog};
use config::Settings;
use driver::DriverPool;
use driver::chrome::ChromeFactory;
use extractor::{Pacing, ProductExtractor};
use forwarder::ApiForwarder;
use models::{ParserStatus, UrlUpdaterStatus};
use services::{Crawler, StatusTracker, UrlRefresher};
use sitemap::{HttpSitemapFetcher, SitemapResolver};
use storage::ResultStore;
use traits::Forwarder;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    settings.ensure_directories()?;
    let _log_guard = logging::init(&settings.logs_dir, &settings.log_level)?;

    info!("Starting product crawler");

    let factory = ChromeFactory::new(
        settings.chrome_executable.clone(),
        settings.user_agents.clone(),
        settings.timeout,
    );
    let pacing = Pacing {
        timeout: settings.timeout,
        settle_delay: settings.settle_delay,
        min_delay: settings.min_delay,
        max_delay: settings.max_delay,
    };
    let forwarder: Arc<dyn Forwarder> =
        Arc::new(ApiForwarder::new(&settings.api_url, settings.api_timeout)?);
    let scheduler = BatchScheduler::new(
        Arc::new(DriverPool::new(factory, settings.driver_pool_size)),
        Arc::new(ProductExtractor::new(
            scrapers::mvideo::profile(&settings.source_name),
            pacing,
        )?),
        Arc::new(ResultStore::new(&settings.results_file)),
        Arc::new(ProcessedSet::load(&settings.processed_urls_file).await),
        forwarder,
        settings.batch_size,
        settings.max_workers,
    );

    let catalog = Arc::new(UrlCatalog::new(&settings.product_links_file));
    let crawler = Crawler::new(
        scheduler,
        Arc::clone(&catalog),
        StatusTracker::new(&settings.parsing_status_file, ParserStatus::default()).await,
    );

    let fetcher = HttpSitemapFetcher::new(
        &settings.sitemap_cookie,
        settings.timeout,
        settings.user_agents.clone(),
    )?;
    let refresher = UrlRefresher::new(
        SitemapResolver::new(
            fetcher,
            settings.sitemap_max_depth,
            settings.sitemap_max_documents,
        ),
        &settings.sitemap_url,
        catalog,
        StatusTracker::new(&settings.url_update_status_file, UrlUpdaterStatus::default()).await,
    );

    let mut sched = JobScheduler::new().await?;

    let job_refresher = refresher.clone();
    let refresh_job = sched
        .add(Job::new_async(
            settings.url_update_cron.as_str(),
            move |uuid, mut l| {
                let refresher = job_refresher.clone();
                Box::pin(async move {
                    if let Err(e) = refresher.start(false).await {
                        warn!("Scheduled URL refresh skipped: {}", e);
                    }
                    match l.next_tick_for_job(uuid).await {
                        Ok(next) => refresher.set_next_run(next).await,
                        Err(e) => error!("Failed to read next URL refresh time: {}", e),
                    }
                })
            },
        )?)
        .await?;
    info!("URL refresh scheduled: {}", settings.url_update_cron);

    let mut crawl_job = None;
    if let Some(category) = settings.parsing_category.clone() {
        let job_crawler = crawler.clone();
        let job = Job::new_async(settings.parsing_cron.as_str(), move |uuid, mut l| {
            let crawler = job_crawler.clone();
            let category = category.clone();
            Box::pin(async move {
                if let Err(e) = crawler.start(&category, 0, false).await {
                    warn!("Scheduled crawl skipped: {}", e);
                }
                match l.next_tick_for_job(uuid).await {
                    Ok(next) => crawler.set_next_run(next).await,
                    Err(e) => error!("Failed to read next crawl time: {}", e),
                }
            })
        })?;
        crawl_job = Some(sched.add(job).await?);
        info!("Crawl scheduled: {}", settings.parsing_cron);
    } else {
        info!("PARSING_CATEGORY not set, scheduled crawling disabled");
    }

    sched.start().await?;

    refresher
        .set_next_run(sched.next_tick_for_job(refresh_job).await?)
        .await;
    if let Some(job) = crawl_job {
        crawler.set_next_run(sched.next_tick_for_job(job).await?).await;
    }

    let address = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("API listening on {}", address);

    let app = api::router(api::AppState {
        crawler: crawler.clone(),
        refresher: refresher.clone(),
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    if let Err(e) = sched.shutdown().await {
        error!("Failed to stop the scheduler: {}", e);
    }
    crawler.stop().await;
    refresher.stop().await;
    crawler.join().await;
    refresher.join().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
