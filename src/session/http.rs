use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::domain::TargetUrl;
use crate::error::HarvestError;
use crate::session::BrowserSession;

/// Session that fetches the served HTML without running scripts.
///
/// Suitable for hubs that render their data pages server-side, and for
/// mirrors saved as static HTML.
pub struct HttpSession {
    client: Client,
    current: Option<String>,
}

impl HttpSession {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("xena-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::Browser(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::Browser(err.to_string()))?;
        Ok(Self {
            client,
            current: None,
        })
    }
}

impl BrowserSession for HttpSession {
    fn navigate(&mut self, url: &TargetUrl) -> Result<TargetUrl, HarvestError> {
        self.current = None;
        let response = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|err| HarvestError::Browser(format!("GET {url}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Browser(format!("GET {url}: status {status}")));
        }
        let landed = TargetUrl::try_from(response.url().clone())?;
        let body = response
            .text()
            .map_err(|err| HarvestError::Browser(format!("GET {url}: {err}")))?;
        debug!(bytes = body.len(), "fetched {landed}");
        self.current = Some(body);
        Ok(landed)
    }

    fn page_source(&mut self) -> Result<String, HarvestError> {
        self.current
            .clone()
            .ok_or_else(|| HarvestError::Browser("no page loaded".to_string()))
    }
}
