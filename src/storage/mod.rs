//! Crash-safe JSON persistence
//!
//! All persisted files are replaced atomically: the new content is written
//! and synced to a sibling `.tmp` file which is then renamed over the
//! target. An interrupted write leaves the previously committed file intact.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::ExtractionResult;

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Serializes `value` as pretty JSON and atomically replaces `path` with it.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    let tmp = temp_path(path);

    let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("Failed to write {}", path.display()));
    }

    Ok(())
}

/// Reads a JSON document, returning `None` when the file is absent or blank.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    if content.trim().is_empty() {
        return Ok(None);
    }

    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Durable list of extraction results, keyed by product URL.
pub struct ResultStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored results. A corrupt file is logged and treated as empty.
    pub async fn load(&self) -> Vec<ExtractionResult> {
        match read_json::<Vec<ExtractionResult>>(&self.path).await {
            Ok(results) => results.unwrap_or_default(),
            Err(e) => {
                warn!("Results file is unreadable, starting from an empty list: {:#}", e);
                Vec::new()
            }
        }
    }

    /// Stores `result`, replacing an earlier result for the same URL in place.
    ///
    /// Returns `true` when an existing entry was replaced.
    pub async fn upsert(&self, result: ExtractionResult) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut results = self.load().await;
        let replaced = match results.iter_mut().find(|r| r.url == result.url) {
            Some(existing) => {
                debug!("Replacing stored result for {}", result.url);
                *existing = result;
                true
            }
            None => {
                results.push(result);
                false
            }
        };

        write_json_atomic(&self.path, &results).await?;
        Ok(replaced)
    }

    /// A page of results, optionally restricted to URLs containing `category`.
    pub async fn page(
        &self,
        category: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Vec<ExtractionResult> {
        self.load()
            .await
            .into_iter()
            .filter(|r| category.is_none_or(|c| r.url.contains(c)))
            .skip(offset)
            .take(limit)
            .collect()
    }

    pub async fn find_by_code(&self, product_code: &str) -> Option<ExtractionResult> {
        self.load()
            .await
            .into_iter()
            .find(|r| r.product_code == product_code)
    }
}
