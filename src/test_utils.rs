//! In-memory drivers, forwarders and page fixtures for tests

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::{ExtractionResult, ForwardPayload};
use crate::traits::{Driver, DriverFactory, Forwarder, SitemapFetcher};

pub fn sample_result(url: &str, code: &str) -> ExtractionResult {
    ExtractionResult {
        url: url.to_string(),
        title: format!("Product {code}"),
        product_code: code.to_string(),
        image_urls: vec![format!("https://img.example/{code}.jpg")],
        characteristics: Default::default(),
        product_info: format!("Артикул: {code}"),
        parsed_at: Utc::now(),
    }
}

/// A product page laid out the way the M.Video profile expects.
pub fn product_page(title: &str, code: &str, images: &[&str]) -> String {
    let images: String = images
        .iter()
        .map(|src| format!(r#"<img src="{src}" alt="">"#))
        .collect();
    format!(
        r#"<html><head><title>{title} купить</title></head><body>
<h1 class="title">{title}</h1>
<div class="product-code-container"><span>Код товара</span><span>{code}</span></div>
<div class="product-gallery">{images}</div>
</body></html>"#
    )
}

/// A characteristics sub-page with the given groups.
pub fn spec_page(groups: &[(&str, &[(&str, &str)])]) -> String {
    let sections: String = groups
        .iter()
        .map(|(title, items)| {
            let items: String = items
                .iter()
                .map(|(name, value)| {
                    format!(
                        r#"<mvid-item-with-dots><dt class="item-with-dots__title"><span class="item-with-dots__text">{name}</span></dt><dd class="item-with-dots__value">{value}</dd></mvid-item-with-dots>"#
                    )
                })
                .collect();
            format!(
                r#"<section class="characteristics__group"><h2 class="characteristics__group-title">{title}</h2><dl class="characteristics__list">{items}</dl></section>"#
            )
        })
        .collect();
    format!("<html><head><title>Характеристики</title></head><body>{sections}</body></html>")
}

pub fn not_found_page() -> String {
    "<html><head><title>404 - Страница не найдена</title></head><body><h1 class=\"title\">Ошибка</h1></body></html>".to_string()
}

/// Serves fixed HTML per URL; unknown URLs fail to navigate.
pub struct FakeDriver {
    pages: Arc<HashMap<String, String>>,
    current: Mutex<Option<String>>,
    live: Arc<AtomicUsize>,
}

impl FakeDriver {
    fn current_html(&self) -> Result<String> {
        let current = self.current.lock().map_err(|_| anyhow!("poisoned"))?;
        let url = current.as_ref().ok_or_else(|| anyhow!("no page loaded"))?;
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no fixture for {url}"))
    }
}

impl Drop for FakeDriver {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        if !self.pages.contains_key(url) {
            bail!("net::ERR_NAME_NOT_RESOLVED at {url}");
        }
        *self.current.lock().map_err(|_| anyhow!("poisoned"))? = Some(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let current = self.current.lock().map_err(|_| anyhow!("poisoned"))?;
        Ok(current.clone().unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn title(&self) -> Result<String> {
        let html = self.current_html()?;
        let document = Html::parse_document(&html);
        let selector = Selector::parse("title").map_err(|e| anyhow!("{e:?}"))?;
        Ok(document
            .select(&selector)
            .next()
            .map(|t| t.text().collect::<String>())
            .unwrap_or_default())
    }

    async fn page_source(&self) -> Result<String> {
        self.current_html()
    }

    async fn wait_for(&self, css: &str, _timeout: Duration) -> bool {
        let Ok(html) = self.current_html() else {
            return false;
        };
        let Ok(selector) = Selector::parse(css) else {
            return false;
        };
        Html::parse_document(&html).select(&selector).next().is_some()
    }
}

/// Builds [`FakeDriver`]s over a shared fixture map and counts the live ones.
#[derive(Clone, Default)]
pub struct FakeFactory {
    pages: Arc<HashMap<String, String>>,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    destroyed: Arc<AtomicUsize>,
    fail_create: Arc<AtomicBool>,
    fail_destroy: Arc<AtomicBool>,
}

impl FakeFactory {
    pub fn new(pages: HashMap<String, String>) -> Self {
        Self {
            pages: Arc::new(pages),
            ..Self::default()
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.fail_destroy.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    type Driver = FakeDriver;

    async fn create(&self) -> Result<FakeDriver> {
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("browser failed to start");
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        Ok(FakeDriver {
            pages: Arc::clone(&self.pages),
            current: Mutex::new(None),
            live: Arc::clone(&self.live),
        })
    }

    async fn destroy(&self, driver: FakeDriver) -> Result<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        drop(driver);
        if self.fail_destroy.load(Ordering::SeqCst) {
            bail!("browser did not exit cleanly");
        }
        Ok(())
    }
}

/// Records every payload and answers with a configurable outcome.
#[derive(Default)]
pub struct RecordingForwarder {
    accept: AtomicBool,
    received: Mutex<Vec<ForwardPayload>>,
}

impl RecordingForwarder {
    pub fn new(accept: bool) -> Self {
        Self {
            accept: AtomicBool::new(accept),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn payloads(&self) -> Vec<ForwardPayload> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, payload: &ForwardPayload) -> bool {
        self.received.lock().unwrap().push(payload.clone());
        self.accept.load(Ordering::SeqCst)
    }
}

/// Serves sitemap documents from memory; unknown URLs are unfetchable.
#[derive(Default)]
pub struct StaticFetcher(pub HashMap<String, String>);

#[async_trait]
impl SitemapFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        self.0.get(url).map(|body| body.clone().into_bytes())
    }
}
