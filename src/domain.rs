use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::HarvestError;

/// Absolute http(s) URL that the pipeline is allowed to follow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TargetUrl(Url);

impl TargetUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Resolves `href` against this URL, the way a browser follows a link.
    pub fn join(&self, href: &str) -> Result<TargetUrl, HarvestError> {
        let joined = self
            .0
            .join(href.trim())
            .map_err(|err| HarvestError::InvalidUrl(format!("{href}: {err}")))?;
        Self::from_url(joined)
    }

    fn from_url(url: Url) -> Result<Self, HarvestError> {
        match url.scheme() {
            "http" | "https" => Ok(Self(url)),
            other => Err(HarvestError::InvalidUrl(format!(
                "{url}: unsupported scheme {other}"
            ))),
        }
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<Url> for TargetUrl {
    type Error = HarvestError;

    fn try_from(url: Url) -> Result<Self, Self::Error> {
        Self::from_url(url)
    }
}

impl FromStr for TargetUrl {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(value.trim())
            .map_err(|err| HarvestError::InvalidUrl(format!("{value}: {err}")))?;
        Self::from_url(url)
    }
}

/// A hyperlink harvested from a page: its resolved target and its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRef {
    pub href: TargetUrl,
    pub text: String,
}

/// Final path segment of the URL, used as the on-disk file name.
pub fn file_name_for(url: &TargetUrl) -> Result<String, HarvestError> {
    url.as_url()
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_string())
        .ok_or_else(|| HarvestError::InvalidFileUrl(url.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub url: TargetUrl,
    pub destination: Utf8PathBuf,
}

impl ResolvedFile {
    pub fn new(url: TargetUrl, download_dir: &Utf8Path) -> Result<Self, HarvestError> {
        let name = file_name_for(&url)?;
        Ok(Self {
            destination: download_dir.join(name),
            url,
        })
    }
}

/// What to do when a cohort's file transfer fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadErrorPolicy {
    #[default]
    Abort,
    SkipCohort,
}

impl fmt::Display for DownloadErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadErrorPolicy::Abort => write!(f, "abort"),
            DownloadErrorPolicy::SkipCohort => write!(f, "skip-cohort"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[default]
    Chromium,
    Http,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Chromium => write!(f, "chromium"),
            SessionKind::Http => write!(f, "http"),
        }
    }
}
