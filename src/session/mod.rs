//! The browser session the navigator drives.
//!
//! A session is a single, exclusively owned resource: it has one current
//! document, and every navigation replaces it. Implementations release their
//! underlying resources when dropped.

use crate::domain::TargetUrl;
use crate::error::HarvestError;

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod http;

pub use http::HttpSession;

#[cfg(feature = "chromium")]
pub use chromium::ChromiumSession;

pub trait BrowserSession {
    /// Points the session at `url` and returns the URL the session landed on
    /// after redirects. The document may still be rendering.
    fn navigate(&mut self, url: &TargetUrl) -> Result<TargetUrl, HarvestError>;

    /// Serialized HTML of the current document as rendered right now.
    fn page_source(&mut self) -> Result<String, HarvestError>;
}
