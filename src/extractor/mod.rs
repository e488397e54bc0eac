//! Product page extraction
//!
//! Drives a browser session through a product page and its characteristics
//! sub-page, then reads the rendered source with `scraper`. Every field is
//! located through an ordered selector cascade where the first non-empty
//! match wins. Only navigation failures and "not found" / "access denied"
//! pages abort an extraction; any other miss leaves the field empty.

use anyhow::{Result, anyhow};
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::characteristics::{GroupBuilder, resolve_duplicate_names};
use crate::models::{Characteristics, ExtractionResult};
use crate::pacing;
use crate::traits::{Driver, Locator, Read, SiteProfile};

const PRODUCT_SOURCE_PREFIX: usize = 2000;
const SPEC_SOURCE_PREFIX: usize = 1000;
const QUOTES: &[char] = &['"', '“', '”', '„', '«', '»'];

/// Timing knobs for page loads
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// Upper bound for every explicit wait
    pub timeout: Duration,
    /// Pause after each navigation so scripts can render
    pub settle_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

struct CompiledLocator {
    css: String,
    selector: Selector,
    read: Read,
}

fn compile(cascade: &[Locator]) -> Result<Vec<CompiledLocator>> {
    cascade
        .iter()
        .map(|locator| -> Result<CompiledLocator> {
            let selector = Selector::parse(&locator.css)
                .map_err(|e| anyhow!("Failed to parse selector {}: {:?}", locator.css, e))?;
            Ok(CompiledLocator {
                css: locator.css.clone(),
                selector,
                read: locator.read.clone(),
            })
        })
        .collect()
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Failed to parse selector {}: {:?}", css, e))
}

/// Text of `element` with runs of whitespace collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    let text: String = element.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn read_value(element: ElementRef<'_>, read: &Read) -> String {
    match read {
        Read::Text | Read::Presence => element_text(element),
        Read::TextOrAttr(attr) => {
            let text = element_text(element);
            if text.is_empty() {
                element.value().attr(attr).unwrap_or_default().trim().to_string()
            } else {
                text
            }
        }
    }
}

/// First element matched by the cascade, with the selector that found it.
fn first_present<'a, 'c>(
    scope: ElementRef<'a>,
    cascade: &'c [CompiledLocator],
) -> Option<(ElementRef<'a>, &'c str)> {
    cascade.iter().find_map(|locator| {
        scope
            .select(&locator.selector)
            .next()
            .map(|element| (element, locator.css.as_str()))
    })
}

/// First non-empty value read through the cascade, with the selector that produced it.
fn first_value<'c>(scope: ElementRef<'_>, cascade: &'c [CompiledLocator]) -> Option<(String, &'c str)> {
    cascade.iter().find_map(|locator| {
        let element = scope.select(&locator.selector).next()?;
        let value = read_value(element, &locator.read);
        (!value.is_empty()).then(|| (value, locator.css.as_str()))
    })
}

/// All elements matched by the first selector in the cascade that matches anything.
fn first_non_empty_set<'a>(scope: ElementRef<'a>, cascade: &[CompiledLocator]) -> Vec<ElementRef<'a>> {
    cascade
        .iter()
        .map(|locator| scope.select(&locator.selector).collect::<Vec<_>>())
        .find(|elements| !elements.is_empty())
        .unwrap_or_default()
}

/// Longest prefix of `s` with at most `max_chars` characters.
fn prefix(s: &str, max_chars: usize) -> &str {
    s.char_indices().nth(max_chars).map_or(s, |(end, _)| &s[..end])
}

/// Strips every whitespace character and `&nbsp;` marker from a product code.
pub fn normalize_code(raw: &str) -> String {
    raw.replace("&nbsp;", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Resolves an image source against the page URL, keeping only http(s) results.
fn absolute_image_url(base: Option<&Url>, src: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    let url = match Url::parse(src) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(src).ok()?,
        Err(_) => return None,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Human-readable summary sent downstream. Quotes are stripped from
/// characteristic values only.
pub fn compose_product_info(code: &str, title: &str, characteristics: &Characteristics) -> String {
    let mut lines = vec![format!("Артикул: {code}"), format!("Наименование: {title}")];
    lines.extend(
        characteristics
            .values()
            .flat_map(|group| group.iter())
            .map(|(name, value)| format!("{name}: {}", value.replace(QUOTES, ""))),
    );
    lines.join("\n")
}

/// Fields read from the main product page
#[derive(Debug, Default)]
struct ProductPage {
    title: String,
    product_code: String,
    image_urls: Vec<String>,
}

struct CompiledSelectors {
    title: Vec<CompiledLocator>,
    title_any: String,
    product_code: Vec<CompiledLocator>,
    gallery: Vec<CompiledLocator>,
    images: Vec<Selector>,
    spec_group: Selector,
    spec_group_title: Vec<CompiledLocator>,
    spec_item: Vec<CompiledLocator>,
    spec_name: Vec<CompiledLocator>,
    spec_value: Vec<CompiledLocator>,
}

pub struct ProductExtractor {
    profile: SiteProfile,
    selectors: CompiledSelectors,
    base_url: Option<Url>,
    pacing: Pacing,
}

impl ProductExtractor {
    pub fn new(profile: SiteProfile, pacing: Pacing) -> Result<Self> {
        let s = &profile.selectors;
        let selectors = CompiledSelectors {
            title: compile(&s.title)?,
            title_any: s
                .title
                .iter()
                .map(|l| l.css.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            product_code: compile(&s.product_code)?,
            gallery: compile(&s.gallery)?,
            images: s
                .images
                .iter()
                .map(String::as_str)
                .map(parse_selector)
                .collect::<Result<_>>()?,
            spec_group: parse_selector(&s.spec_group)?,
            spec_group_title: compile(&s.spec_group_title)?,
            spec_item: compile(&s.spec_item)?,
            spec_name: compile(&s.spec_name)?,
            spec_value: compile(&s.spec_value)?,
        };
        let base_url = Url::parse(&profile.base_url).ok();

        Ok(Self {
            profile,
            selectors,
            base_url,
            pacing,
        })
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Extracts one product, or `None` when the page is missing or blocked.
    pub async fn extract<D: Driver>(&self, driver: &D, url: &str) -> Option<ExtractionResult> {
        info!("Extracting {}", url);
        if let Err(e) = driver.navigate(url).await {
            error!("Navigation to {} failed: {:#}", url, e);
            return None;
        }
        self.settle().await;

        match driver.current_url().await {
            Ok(current) if current.trim_end_matches('/') != url.trim_end_matches('/') => {
                warn!("Redirected from {} to {}", url, current);
            }
            Ok(_) => {}
            Err(e) => debug!("Could not read current URL: {:#}", e),
        }

        let page_title = driver.title().await.unwrap_or_default().to_lowercase();
        if let Some(marker) = self.matching_marker(&page_title, &self.profile.not_found_markers) {
            warn!("Page not found ({}): {}", marker, url);
            return None;
        }
        if let Some(marker) = self.matching_marker(&page_title, &self.profile.access_denied_markers) {
            warn!("Access denied ({}): {}", marker, url);
            return None;
        }

        if !driver
            .wait_for(&self.selectors.title_any, self.pacing.timeout)
            .await
        {
            warn!("No title element appeared on {} within {:?}", url, self.pacing.timeout);
        }

        let page = match driver.page_source().await {
            Ok(source) => {
                let base = driver.current_url().await.ok();
                self.parse_product_page(&source, base.as_deref().unwrap_or(url))
            }
            Err(e) => {
                error!("Failed to read page source of {}: {:#}", url, e);
                ProductPage::default()
            }
        };

        let characteristics = resolve_duplicate_names(self.characteristics(driver, url).await);
        let product_info = compose_product_info(&page.product_code, &page.title, &characteristics);

        info!(
            "Extracted {} (code {}, {} images, {} characteristic groups)",
            url,
            page.product_code,
            page.image_urls.len(),
            characteristics.len()
        );
        Some(ExtractionResult {
            url: url.to_string(),
            title: page.title,
            product_code: page.product_code,
            image_urls: page.image_urls,
            characteristics,
            product_info,
            parsed_at: Utc::now(),
        })
    }

    fn matching_marker<'m>(&self, title: &str, markers: &'m [String]) -> Option<&'m str> {
        markers
            .iter()
            .find(|marker| title.contains(marker.to_lowercase().as_str()))
            .map(String::as_str)
    }

    async fn settle(&self) {
        if !self.pacing.settle_delay.is_zero() {
            tokio::time::sleep(self.pacing.settle_delay).await;
        }
    }

    fn parse_product_page(&self, source: &str, page_url: &str) -> ProductPage {
        let document = Html::parse_document(source);
        let root = document.root_element();

        let title = match first_value(root, &self.selectors.title) {
            Some((title, css)) => {
                debug!("Title found with selector {}", css);
                title
            }
            None => {
                error!(
                    "Title not found on {}. Page source starts with: {}",
                    page_url,
                    prefix(source, PRODUCT_SOURCE_PREFIX)
                );
                String::new()
            }
        };

        let product_code = match first_value(root, &self.selectors.product_code) {
            Some((raw, css)) => {
                debug!("Product code found with selector {}", css);
                normalize_code(&raw)
            }
            None => {
                warn!("Product code not found on {}", page_url);
                String::new()
            }
        };

        let base = Url::parse(page_url).ok().or_else(|| self.base_url.clone());
        let image_urls = self.collect_images(root, base.as_ref(), page_url);

        ProductPage {
            title,
            product_code,
            image_urls,
        }
    }

    fn collect_images(&self, root: ElementRef<'_>, base: Option<&Url>, page_url: &str) -> Vec<String> {
        let Some((gallery, css)) = first_present(root, &self.selectors.gallery) else {
            warn!("No image gallery found on {}", page_url);
            return Vec::new();
        };
        debug!("Gallery found with selector {}", css);

        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for selector in &self.selectors.images {
            for img in gallery.select(selector) {
                let resolved = self
                    .profile
                    .selectors
                    .image_attrs
                    .iter()
                    .filter_map(|attr| img.value().attr(attr))
                    .find_map(|src| absolute_image_url(base, src));
                if let Some(url) = resolved {
                    if seen.insert(url.clone()) {
                        urls.push(url);
                    }
                }
            }
        }

        if urls.is_empty() {
            warn!("Gallery on {} contains no usable images", page_url);
        }
        urls
    }

    async fn characteristics<D: Driver>(&self, driver: &D, url: &str) -> Characteristics {
        let spec_url = self.profile.spec_url(url);
        pacing::pause(self.pacing.min_delay, self.pacing.max_delay).await;

        if let Err(e) = driver.navigate(&spec_url).await {
            warn!("Failed to open characteristics page {}: {:#}", spec_url, e);
            return Characteristics::new();
        }
        self.settle().await;

        let group_css = &self.profile.selectors.spec_group;
        if !driver.wait_for(group_css, self.pacing.timeout).await {
            let source = driver.page_source().await.unwrap_or_default();
            error!(
                "No characteristics groups on {} within {:?}. Page source starts with: {}",
                spec_url,
                self.pacing.timeout,
                prefix(&source, SPEC_SOURCE_PREFIX)
            );
            return Characteristics::new();
        }

        match driver.page_source().await {
            Ok(source) => self.parse_spec_page(&source),
            Err(e) => {
                error!("Failed to read characteristics page {}: {:#}", spec_url, e);
                Characteristics::new()
            }
        }
    }

    fn parse_spec_page(&self, source: &str) -> Characteristics {
        let document = Html::parse_document(source);
        let mut characteristics = Characteristics::new();

        for (index, group) in document.select(&self.selectors.spec_group).enumerate() {
            let Some((title, _)) = first_value(group, &self.selectors.spec_group_title) else {
                warn!("Characteristics group {} has no title, skipping", index + 1);
                continue;
            };

            let mut builder = GroupBuilder::default();
            for item in first_non_empty_set(group, &self.selectors.spec_item) {
                let name = first_value(item, &self.selectors.spec_name);
                let value = first_value(item, &self.selectors.spec_value);
                match (name, value) {
                    (Some((name, _)), Some((value, _))) => builder.insert(&name, value),
                    _ => debug!(
                        "Unreadable item in group '{}': {}",
                        title,
                        prefix(&item.html(), 200)
                    ),
                }
            }

            if builder.is_empty() {
                warn!("Characteristics group '{}' has no items, skipping", title);
                continue;
            }
            let specs = builder.finish();
            match characteristics.get_mut(&title) {
                Some(existing) => {
                    debug!("Merging repeated group '{}'", title);
                    let mut merged = GroupBuilder::default();
                    for (name, value) in std::mem::take(existing).into_iter().chain(specs) {
                        merged.insert(&name, value);
                    }
                    *existing = merged.finish();
                }
                None => {
                    characteristics.insert(title, specs);
                }
            }
        }

        info!("Parsed {} characteristics groups", characteristics.len());
        characteristics
    }
}
