//! Headless Chromium session driven over the DevTools protocol.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::TargetUrl;
use crate::error::HarvestError;
use crate::session::BrowserSession;

/// Overrides the Chromium binary chromiumoxide would otherwise detect.
pub const CHROME_PATH_ENV: &str = "XENA_CHROME_PATH";

pub struct ChromiumSession {
    runtime: Runtime,
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromiumSession {
    pub fn launch(navigation_timeout: Duration) -> Result<Self, HarvestError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|err| HarvestError::Browser(err.to_string()))?;

        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if let Ok(path) = std::env::var(CHROME_PATH_ENV) {
            builder = builder.chrome_executable(PathBuf::from(path));
        }
        let config = builder
            .build()
            .map_err(|err| HarvestError::Browser(format!("browser config: {err}")))?;

        let (browser, mut handler) = runtime
            .block_on(Browser::launch(config))
            .map_err(|err| HarvestError::Browser(format!("failed to launch Chromium: {err}")))?;
        let handler = runtime.spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!("devtools handler: {err}");
                }
            }
        });
        let page = runtime
            .block_on(browser.new_page("about:blank"))
            .map_err(|err| HarvestError::Browser(format!("failed to open page: {err}")))?;

        Ok(Self {
            runtime,
            browser,
            page,
            handler,
            navigation_timeout,
        })
    }
}

impl BrowserSession for ChromiumSession {
    fn navigate(&mut self, url: &TargetUrl) -> Result<TargetUrl, HarvestError> {
        let timeout = self.navigation_timeout;
        let page = &self.page;
        let result = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, page.goto(url.as_str())).await });
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                return Err(HarvestError::Browser(format!("navigate {url}: {err}")));
            }
            Err(_) => {
                return Err(HarvestError::NavigationTimeout {
                    url: url.to_string(),
                    selector: "document".to_string(),
                    timeout,
                });
            }
        }

        let landed = self
            .runtime
            .block_on(self.page.url())
            .map_err(|err| HarvestError::Browser(format!("read URL of {url}: {err}")))?;
        Ok(landed_url(url, landed.as_deref()))
    }

    fn page_source(&mut self) -> Result<String, HarvestError> {
        let result = self
            .runtime
            .block_on(self.page.evaluate("document.documentElement.outerHTML"))
            .map_err(|err| HarvestError::Browser(format!("failed to read DOM: {err}")))?;
        result
            .into_value::<String>()
            .map_err(|err| HarvestError::Browser(format!("failed to read DOM: {err}")))
    }
}

/// The page's reported URL, or the requested one when the browser reports
/// nothing usable.
fn landed_url(requested: &TargetUrl, reported: Option<&str>) -> TargetUrl {
    match reported.map(str::parse::<TargetUrl>) {
        Some(Ok(landed)) => landed,
        Some(Err(err)) => {
            debug!("keeping {requested}: {err}");
            requested.clone()
        }
        None => requested.clone(),
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        let runtime = &self.runtime;
        let browser = &mut self.browser;
        runtime.block_on(async {
            if let Err(err) = browser.close().await {
                warn!("failed to close Chromium: {err}");
            }
            let _ = browser.wait().await;
        });
        self.handler.abort();
    }
}
