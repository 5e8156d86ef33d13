use std::thread;
use std::time::{Duration, Instant};

use scraper::{ElementRef, Html};
use tracing::debug;

use crate::domain::TargetUrl;
use crate::error::HarvestError;
use crate::matcher::parse_selector;
use crate::session::BrowserSession;

/// Snapshot of the session's current document.
#[derive(Debug)]
pub struct Page {
    url: TargetUrl,
    document: Html,
}

impl Page {
    pub fn new(url: TargetUrl, html: &str) -> Self {
        Self {
            url,
            document: Html::parse_document(html),
        }
    }

    pub fn url(&self) -> &TargetUrl {
        &self.url
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    pub fn root(&self) -> ElementRef<'_> {
        self.document.root_element()
    }
}

pub struct Navigator<'s, S: BrowserSession> {
    session: &'s mut S,
    poll_interval: Duration,
    current: Option<TargetUrl>,
}

impl<'s, S: BrowserSession> Navigator<'s, S> {
    pub fn new(session: &'s mut S, poll_interval: Duration) -> Self {
        Self {
            session,
            poll_interval,
            current: None,
        }
    }

    /// Navigates to `url` and blocks until an element matching `expected`
    /// is rendered, or fails with `NavigationTimeout` once `timeout` elapses.
    pub fn load(
        &mut self,
        url: &TargetUrl,
        expected: &str,
        timeout: Duration,
    ) -> Result<Page, HarvestError> {
        let selector = parse_selector(expected)?;
        debug!("loading {url}");
        self.current = None;
        let landed = self.session.navigate(url)?;
        if &landed != url {
            debug!("{url} redirected to {landed}");
        }
        self.current = Some(landed);
        self.wait_for(timeout, |page| {
            if page.document().select(&selector).next().is_some() {
                Ok(())
            } else {
                Err(HarvestError::NavigationTimeout {
                    url: url.to_string(),
                    selector: expected.to_string(),
                    timeout,
                })
            }
        })
        .map(|(page, ())| page)
    }

    /// Re-reads the current page until `probe` accepts it. After `timeout`
    /// the probe's last error is returned.
    pub fn wait_for<T, P>(
        &mut self,
        timeout: Duration,
        mut probe: P,
    ) -> Result<(Page, T), HarvestError>
    where
        P: FnMut(&Page) -> Result<T, HarvestError>,
    {
        // An unrepresentable deadline never expires.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let page = self.snapshot()?;
            match probe(&page) {
                Ok(value) => return Ok((page, value)),
                Err(err) if deadline.is_some_and(|deadline| Instant::now() >= deadline) => {
                    return Err(err);
                }
                Err(_) => thread::sleep(self.poll_interval),
            }
        }
    }

    pub fn snapshot(&mut self) -> Result<Page, HarvestError> {
        let url = self
            .current
            .clone()
            .ok_or_else(|| HarvestError::Browser("no page loaded".to_string()))?;
        let html = self.session.page_source()?;
        Ok(Page::new(url, &html))
    }
}
