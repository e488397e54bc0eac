//! Headless Chrome sessions over the DevTools protocol

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::pacing::random_user_agent;
use crate::traits::{Driver, DriverFactory};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

const HIDE_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

/// A single browser process with one tab
pub struct ChromeDriver {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    timeout: Duration,
}

#[async_trait]
impl Driver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        tokio::time::timeout(self.timeout, self.page.goto(url))
            .await
            .map_err(|_| anyhow!("Timed out loading {}", url))?
            .with_context(|| format!("Failed to load {url}"))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn page_source(&self) -> Result<String> {
        self.page
            .content()
            .await
            .context("Failed to read page source")
    }

    async fn wait_for(&self, css: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(css).await.is_ok() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Launches Chrome sessions configured to look like a regular desktop browser
pub struct ChromeFactory {
    executable: Option<PathBuf>,
    user_agents: Vec<String>,
    timeout: Duration,
}

impl ChromeFactory {
    pub fn new(executable: Option<PathBuf>, user_agents: Vec<String>, timeout: Duration) -> Self {
        Self {
            executable,
            user_agents,
            timeout,
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--window-size=1920,1080")
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!(
                "--user-agent={}",
                random_user_agent(&self.user_agents)
            ))
            .request_timeout(self.timeout);
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| anyhow!("Invalid browser configuration: {}", e))
    }

    async fn prepare_page(&self, page: &Page) -> Result<()> {
        page.execute(EnableParams::default())
            .await
            .context("Failed to enable network domain")?;
        page.execute(SetUserAgentOverrideParams::new(
            random_user_agent(&self.user_agents).to_string(),
        ))
        .await
        .context("Failed to override user agent")?;
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::json!({
                "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
                "Accept-Language": "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7",
                "Accept-Encoding": "gzip, deflate, br",
                "Connection": "keep-alive",
                "Upgrade-Insecure-Requests": "1",
                "Cache-Control": "max-age=0",
            }),
        )))
        .await
        .context("Failed to set extra HTTP headers")?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(HIDE_WEBDRIVER))
            .await
            .context("Failed to install navigator.webdriver override")?;
        Ok(())
    }
}

#[async_trait]
impl DriverFactory for ChromeFactory {
    type Driver = ChromeDriver;

    async fn create(&self) -> Result<ChromeDriver> {
        let config = self.browser_config()?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch Chrome")?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler.abort();
                return Err(e).context("Failed to open browser tab");
            }
        };
        if let Err(e) = self.prepare_page(&page).await {
            let _ = browser.close().await;
            handler.abort();
            return Err(e);
        }

        info!("Chrome session started");
        Ok(ChromeDriver {
            browser: Mutex::new(browser),
            page,
            handler,
            timeout: self.timeout,
        })
    }

    async fn destroy(&self, driver: ChromeDriver) -> Result<()> {
        let ChromeDriver {
            browser, handler, ..
        } = driver;
        let mut browser = browser.into_inner();
        let closed = browser.close().await;
        if closed.is_ok() {
            let _ = browser.wait().await;
        }
        handler.abort();
        closed.context("Failed to close Chrome")?;
        debug!("Chrome session closed");
        Ok(())
    }
}
