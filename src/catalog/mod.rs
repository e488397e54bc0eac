//! Product URL catalog and the set of already-forwarded URLs

use anyhow::{Context, Result};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::models::{CatalogEntry, SitemapEntry, UrlRecord};
use crate::storage::{read_json, write_json_atomic};

static PRODUCT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/products/[^/]+$").unwrap());

pub fn is_product_url(url: &str) -> bool {
    PRODUCT_URL.is_match(url)
}

/// Keeps only entries shaped like `/products/<slug>` with no further segments.
pub fn filter_product_urls(entries: Vec<SitemapEntry>) -> Vec<SitemapEntry> {
    entries
        .into_iter()
        .filter(|entry| is_product_url(&entry.url))
        .collect()
}

fn category_pattern(category: &str) -> Result<Regex> {
    Regex::new(&format!("/products/{}[^/]*$", regex::escape(category)))
        .with_context(|| format!("Invalid category filter: {category}"))
}

/// Persisted `url -> {last_modified}` mapping of candidate product URLs.
pub struct UrlCatalog {
    path: PathBuf,
}

impl UrlCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Atomically replaces the catalog. On duplicate URLs the last entry wins.
    pub async fn persist(&self, entries: &[SitemapEntry]) -> Result<usize> {
        let mapping: IndexMap<&str, CatalogEntry> = entries
            .iter()
            .map(|entry| {
                (
                    entry.url.as_str(),
                    CatalogEntry {
                        last_modified: entry.last_modified.clone(),
                    },
                )
            })
            .collect();

        write_json_atomic(&self.path, &mapping).await?;
        info!("Saved {} product URLs to {}", mapping.len(), self.path.display());
        Ok(mapping.len())
    }

    /// Catalogued URLs in file order, optionally restricted to one category.
    ///
    /// An absent catalog yields an empty list.
    pub async fn load(&self, category: Option<&str>) -> Result<Vec<UrlRecord>> {
        let Some(mapping) = read_json::<IndexMap<String, CatalogEntry>>(&self.path).await? else {
            warn!("URL catalog not found: {}", self.path.display());
            return Ok(Vec::new());
        };

        let pattern = category.map(category_pattern).transpose()?;
        let records: Vec<UrlRecord> = mapping
            .into_iter()
            .filter(|(url, _)| pattern.as_ref().is_none_or(|p| p.is_match(url)))
            .map(|(url, entry)| UrlRecord {
                url,
                last_modified: entry.last_modified,
            })
            .collect();

        info!("Loaded {} product URLs from the catalog", records.len());
        Ok(records)
    }
}

/// URLs whose extraction has been accepted by the downstream API.
///
/// Membership changes are persisted while the internal lock is held, so the
/// file always reflects a state that some caller observed in memory.
pub struct ProcessedSet {
    path: PathBuf,
    urls: Mutex<HashSet<String>>,
}

impl ProcessedSet {
    /// Loads the set from `path`; a missing or unreadable file gives an empty set.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let urls = match read_json::<Vec<String>>(&path).await {
            Ok(urls) => {
                let urls: HashSet<String> = urls.unwrap_or_default().into_iter().collect();
                info!("Loaded {} previously processed URLs", urls.len());
                urls
            }
            Err(e) => {
                error!("Failed to load processed URLs: {:#}", e);
                HashSet::new()
            }
        };

        Self {
            path,
            urls: Mutex::new(urls),
        }
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.urls.lock().await.contains(url)
    }

    pub async fn len(&self) -> usize {
        self.urls.lock().await.len()
    }

    /// Adds `url` and persists the whole set.
    pub async fn mark(&self, url: &str) -> Result<()> {
        let mut urls = self.urls.lock().await;
        if !urls.insert(url.to_string()) {
            return Ok(());
        }

        let mut snapshot: Vec<&String> = urls.iter().collect();
        snapshot.sort();
        write_json_atomic(&self.path, &snapshot).await?;
        info!("Saved {} processed URLs", snapshot.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn entry(url: &str, last_modified: Option<&str>) -> SitemapEntry {
        SitemapEntry {
            url: url.to_string(),
            last_modified: last_modified.map(ToString::to_string),
        }
    }

    #[test]
    fn product_filter_drops_non_product_shapes() {
        let entries = vec![
            entry("https://shop.test/products/smartfon-apple-iphone-15-400123", None),
            entry("https://shop.test/products/smartfon-apple-iphone-15-400123/specification", None),
            entry("https://shop.test/products/", None),
            entry("https://shop.test/promo/sale", None),
            entry("https://shop.test/products/noutbuk-2", Some("2024-01-01")),
        ];

        let kept = filter_product_urls(entries);
        let urls: Vec<&str> = kept.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://shop.test/products/smartfon-apple-iphone-15-400123",
                "https://shop.test/products/noutbuk-2",
            ]
        );
        assert_eq!(kept[1].last_modified.as_deref(), Some("2024-01-01"));
    }

    #[tokio::test]
    async fn persist_then_load_keeps_last_write_per_url() {
        let dir = TempDir::new().unwrap();
        let catalog = UrlCatalog::new(dir.path().join("product_links.json"));
        let entries = vec![
            entry("https://shop.test/products/a-1", Some("2024-01-01")),
            entry("https://shop.test/products/b-2", None),
            entry("https://shop.test/products/a-1", Some("2024-02-02")),
        ];

        assert_eq!(catalog.persist(&entries).await.unwrap(), 2);

        let loaded: BTreeSet<(String, Option<String>)> = catalog
            .load(None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.url, r.last_modified))
            .collect();
        let expected: BTreeSet<(String, Option<String>)> = [
            ("https://shop.test/products/a-1".to_string(), Some("2024-02-02".to_string())),
            ("https://shop.test/products/b-2".to_string(), None),
        ]
        .into_iter()
        .collect();
        assert_eq!(loaded, expected);
    }

    #[tokio::test]
    async fn load_filters_by_category_prefix() {
        let dir = TempDir::new().unwrap();
        let catalog = UrlCatalog::new(dir.path().join("product_links.json"));
        catalog
            .persist(&[
                entry("https://shop.test/products/smartfon-apple-1", None),
                entry("https://shop.test/products/noutbuk-lenovo-2", None),
                entry("https://shop.test/products/smartfon-xiaomi-3", None),
            ])
            .await
            .unwrap();

        let phones = catalog.load(Some("smartfon")).await.unwrap();
        assert_eq!(phones.len(), 2);
        assert!(phones.iter().all(|r| r.url.contains("/products/smartfon")));

        // Regex metacharacters in the category are matched literally.
        assert!(catalog.load(Some("smart.on")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_of_absent_catalog_is_empty() {
        let dir = TempDir::new().unwrap();
        let catalog = UrlCatalog::new(dir.path().join("product_links.json"));
        assert!(catalog.load(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processed_set_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processed_urls.json");

        let set = ProcessedSet::load(&path).await;
        assert_eq!(set.len().await, 0);
        set.mark("https://shop.test/products/a-1").await.unwrap();
        set.mark("https://shop.test/products/a-1").await.unwrap();
        set.mark("https://shop.test/products/b-2").await.unwrap();

        let reloaded = ProcessedSet::load(&path).await;
        assert_eq!(reloaded.len().await, 2);
        assert!(reloaded.contains("https://shop.test/products/b-2").await);
        assert!(!reloaded.contains("https://shop.test/products/c-3").await);
    }
}
