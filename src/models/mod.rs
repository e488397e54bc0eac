//! Data models shared by the crawl pipeline, the stores and the HTTP layer

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Characteristic name to value, in page order.
pub type CharacteristicGroup = IndexMap<String, String>;

/// Group title to its characteristics, in page order.
pub type Characteristics = IndexMap<String, CharacteristicGroup>;

/// A `<url>` entry discovered in a sitemap document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapEntry {
    pub url: String,
    pub last_modified: Option<String>,
}

/// A catalogued product URL, as reloaded from the URL catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub last_modified: Option<String>,
}

/// Value side of the persisted `url -> {last_modified}` catalog mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub last_modified: Option<String>,
}

/// Structured data extracted from one product page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub url: String,
    pub title: String,
    pub product_code: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub characteristics: Characteristics,
    #[serde(default)]
    pub product_info: String,
    pub parsed_at: DateTime<Utc>,
}

/// Body posted to the downstream ingestion API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardPayload {
    pub product_info: String,
    pub ean: String,
    pub source: String,
    pub template_id: u32,
    pub img: String,
    pub parsing_result: serde_json::Map<String, serde_json::Value>,
    pub check_result: serde_json::Map<String, serde_json::Value>,
}

impl ForwardPayload {
    pub fn new(product_info: &str, product_code: &str, image_urls: &[String], source: &str) -> Self {
        Self {
            product_info: product_info.to_string(),
            ean: product_code.to_string(),
            source: source.to_string(),
            template_id: 0,
            img: image_urls.join(", "),
            parsing_result: serde_json::Map::new(),
            check_result: serde_json::Map::new(),
        }
    }
}

/// Lifecycle of a long-running service run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Stopped,
    Running,
    Completed,
    Failed,
    Error,
}

/// Status record of the product crawl service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserStatus {
    pub status: RunState,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub total_products: usize,
    pub processed_products: usize,
    pub errors: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub heartbeat: Option<DateTime<Utc>>,
    pub current_category: Option<String>,
}

/// Status record of the URL catalog refresh service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UrlUpdaterStatus {
    pub status: RunState,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub total_urls: usize,
    pub errors: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub heartbeat: Option<DateTime<Utc>>,
}
