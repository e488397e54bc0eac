//! Traits and configuration types at the seams of the crawl pipeline

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::models::ForwardPayload;

/// What a locator reads from the element it matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Read {
    /// Trimmed text content
    Text,
    /// Text content, falling back to the named attribute when the text is blank
    TextOrAttr(String),
    /// The element itself; matching is enough
    Presence,
}

/// One candidate in a first-match-wins selector cascade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub css: String,
    pub read: Read,
}

impl Locator {
    pub fn text(css: &str) -> Self {
        Self {
            css: css.to_string(),
            read: Read::Text,
        }
    }

    pub fn text_or_attr(css: &str, attr: &str) -> Self {
        Self {
            css: css.to_string(),
            read: Read::TextOrAttr(attr.to_string()),
        }
    }

    pub fn presence(css: &str) -> Self {
        Self {
            css: css.to_string(),
            read: Read::Presence,
        }
    }
}

/// CSS selector cascades for the parts of a product page
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    pub title: Vec<Locator>,
    pub product_code: Vec<Locator>,
    pub gallery: Vec<Locator>,
    /// Image candidates searched inside the gallery, in order
    pub images: Vec<String>,
    /// Attributes that may carry an image URL, in order of preference
    pub image_attrs: Vec<String>,
    /// Marks a characteristics group on the specification sub-page
    pub spec_group: String,
    pub spec_group_title: Vec<Locator>,
    /// Name/value items within a group
    pub spec_item: Vec<Locator>,
    pub spec_name: Vec<Locator>,
    pub spec_value: Vec<Locator>,
}

/// Everything site-specific the extractor and forwarder need
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Display name, also sent as the `source` of forwarded products
    pub name: String,
    pub base_url: String,
    /// Appended to a product URL to reach its characteristics page
    pub spec_path: String,
    /// Lowercase page-title fragments that mean "not found"
    pub not_found_markers: Vec<String>,
    /// Lowercase page-title fragments that mean "access denied"
    pub access_denied_markers: Vec<String>,
    pub selectors: SiteSelectors,
}

impl SiteProfile {
    pub fn spec_url(&self, product_url: &str) -> String {
        format!("{}{}", product_url.trim_end_matches('/'), self.spec_path)
    }
}

/// A live browser session rendering pages with full script execution
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    /// Serialized DOM of the current page
    async fn page_source(&self) -> Result<String>;

    /// Waits until `css` matches at least one element.
    ///
    /// Returns `false` once `timeout` elapses without a match.
    async fn wait_for(&self, css: &str, timeout: Duration) -> bool;
}

/// Creates and tears down driver sessions
#[async_trait]
pub trait DriverFactory: Send + Sync + 'static {
    type Driver: Driver;

    async fn create(&self) -> Result<Self::Driver>;

    async fn destroy(&self, driver: Self::Driver) -> Result<()>;
}

/// Source of sitemap documents
#[async_trait]
pub trait SitemapFetcher: Send + Sync {
    /// Body of the document at `url`, or `None` when it could not be fetched
    async fn fetch(&self, url: &str) -> Option<Vec<u8>>;
}

/// Downstream consumer of extracted products
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Delivers `payload`; `true` only when the receiver accepted it.
    async fn forward(&self, payload: &ForwardPayload) -> bool;
}
