//! Environment-driven settings
//!
//! Every knob is read from the process environment (after `.env` has been
//! loaded by `dotenvy`) and falls back to a default tuned for a single
//! headless browser worker.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
];

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub log_level: String,

    pub sitemap_url: String,
    pub sitemap_cookie: String,
    pub sitemap_max_depth: usize,
    pub sitemap_max_documents: usize,

    pub results_file: PathBuf,
    pub product_links_file: PathBuf,
    pub processed_urls_file: PathBuf,
    pub parsing_status_file: PathBuf,
    pub url_update_status_file: PathBuf,

    pub max_workers: usize,
    pub driver_pool_size: usize,
    pub batch_size: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub settle_delay: Duration,
    pub timeout: Duration,

    pub api_url: String,
    pub api_timeout: Duration,
    pub source_name: String,
    pub user_agents: Vec<String>,
    pub chrome_executable: Option<PathBuf>,

    pub url_update_cron: String,
    pub parsing_cron: String,
    pub parsing_category: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let data_dir: PathBuf = env_or("DATA_DIR", PathBuf::from("data"))?;
        let logs_dir: PathBuf = env_or("LOGS_DIR", PathBuf::from("logs"))?;
        let max_workers: usize = env_or("MAX_WORKERS", 1)?;

        let user_agents = match std::env::var("USER_AGENTS") {
            Ok(raw) => raw
                .split('|')
                .map(str::trim)
                .filter(|ua| !ua.is_empty())
                .map(ToString::to_string)
                .collect(),
            Err(_) => DEFAULT_USER_AGENTS.iter().map(ToString::to_string).collect(),
        };

        let settings = Self {
            host: env_or("HOST", "0.0.0.0".to_string())?,
            port: env_or("PORT", 7000)?,

            results_file: data_file("RESULTS_FILE", &data_dir, "results.json")?,
            product_links_file: data_file("PRODUCT_LINKS_FILE", &data_dir, "product_links.json")?,
            processed_urls_file: data_file("PROCESSED_URLS_FILE", &data_dir, "processed_urls.json")?,
            parsing_status_file: data_file("PARSING_STATUS_FILE", &data_dir, "parsing_status.json")?,
            url_update_status_file: data_file(
                "URL_UPDATE_STATUS_FILE",
                &data_dir,
                "url_update_status.json",
            )?,
            data_dir,
            logs_dir,
            log_level: env_or("LOG_LEVEL", "info".to_string())?,

            sitemap_url: env_or("SITEMAP_URL", "https://www.mvideo.ru/sitemap.xml".to_string())?,
            sitemap_cookie: env_or(
                "SITEMAP_COOKIE",
                "__hash_=9f34a6d2bf9e2b0f6790985d3e3ff7d8".to_string(),
            )?,
            sitemap_max_depth: env_or("SITEMAP_MAX_DEPTH", 8)?,
            sitemap_max_documents: env_or("SITEMAP_MAX_DOCUMENTS", 10_000)?,

            max_workers,
            driver_pool_size: env_or("DRIVER_POOL_SIZE", max_workers)?,
            batch_size: env_or("BATCH_SIZE", 10)?,
            min_delay: env_secs("MIN_DELAY", 1.0)?,
            max_delay: env_secs("MAX_DELAY", 3.0)?,
            settle_delay: env_secs("PAGE_SETTLE_DELAY", 2.0)?,
            timeout: env_secs("TIMEOUT", 30.0)?,

            api_url: env_or("API_URL", "https://duomind.ru/api/product-card".to_string())?,
            api_timeout: env_secs("API_TIMEOUT", 30.0)?,
            source_name: env_or("SOURCE_NAME", "МВидео".to_string())?,
            user_agents,
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().map(PathBuf::from),

            url_update_cron: env_or("URL_UPDATE_CRON", "0 0 */12 * * *".to_string())?,
            parsing_cron: env_or("PARSING_CRON", "0 0 3 * * *".to_string())?,
            parsing_category: std::env::var("PARSING_CATEGORY")
                .ok()
                .filter(|c| !c.trim().is_empty()),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("BATCH_SIZE must be at least 1");
        }
        if self.max_workers == 0 {
            bail!("MAX_WORKERS must be at least 1");
        }
        if self.driver_pool_size == 0 {
            bail!("DRIVER_POOL_SIZE must be at least 1");
        }
        if self.min_delay > self.max_delay {
            bail!(
                "MIN_DELAY ({:?}) must not exceed MAX_DELAY ({:?})",
                self.min_delay,
                self.max_delay
            );
        }
        if self.user_agents.is_empty() {
            bail!("USER_AGENTS must contain at least one user agent");
        }
        Ok(())
    }

    /// Creates the data and log directories, including parents of every data file.
    pub fn ensure_directories(&self) -> Result<()> {
        let files = [
            &self.results_file,
            &self.product_links_file,
            &self.processed_urls_file,
            &self.parsing_status_file,
            &self.url_update_status_file,
        ];
        let parents = files.into_iter().filter_map(|f| f.parent());

        for dir in [self.data_dir.as_path(), self.logs_dir.as_path()]
            .into_iter()
            .chain(parents)
            .filter(|d| !d.as_os_str().is_empty())
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Settings rooted in `dir`, with zero delays. Used by tests.
    #[cfg(test)]
    pub fn for_tests(dir: &Path) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            data_dir: dir.to_path_buf(),
            logs_dir: dir.join("logs"),
            log_level: "debug".to_string(),
            sitemap_url: "http://127.0.0.1/sitemap.xml".to_string(),
            sitemap_cookie: "__hash_=test".to_string(),
            sitemap_max_depth: 8,
            sitemap_max_documents: 100,
            results_file: dir.join("results.json"),
            product_links_file: dir.join("product_links.json"),
            processed_urls_file: dir.join("processed_urls.json"),
            parsing_status_file: dir.join("parsing_status.json"),
            url_update_status_file: dir.join("url_update_status.json"),
            max_workers: 2,
            driver_pool_size: 2,
            batch_size: 10,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            settle_delay: Duration::ZERO,
            timeout: Duration::from_millis(50),
            api_url: "http://127.0.0.1/api/product-card".to_string(),
            api_timeout: Duration::from_secs(5),
            source_name: "TestShop".to_string(),
            user_agents: DEFAULT_USER_AGENTS.iter().map(ToString::to_string).collect(),
            chrome_executable: None,
            url_update_cron: "0 0 */12 * * *".to_string(),
            parsing_cron: "0 0 3 * * *".to_string(),
            parsing_category: None,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: f64) -> Result<Duration> {
    let secs: f64 = env_or(key, default)?;
    Duration::try_from_secs_f64(secs).with_context(|| format!("Invalid duration for {key}: {secs}"))
}

fn data_file(key: &str, data_dir: &Path, name: &str) -> Result<PathBuf> {
    env_or(key, data_dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_delay_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = Settings::for_tests(dir.path());
        settings.min_delay = Duration::from_secs(3);
        settings.max_delay = Duration::from_secs(1);

        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = Settings::for_tests(dir.path());
        settings.batch_size = 0;

        assert!(settings.validate().is_err());
    }

    #[test]
    fn creates_nested_data_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut settings = Settings::for_tests(&dir.path().join("data"));
        settings.results_file = dir.path().join("nested/out/results.json");

        settings.ensure_directories().unwrap();

        assert!(dir.path().join("data").is_dir());
        assert!(dir.path().join("nested/out").is_dir());
        assert!(settings.logs_dir.is_dir());
    }
}
