use std::fs::File;
use std::io::Write;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::domain::{ResolvedFile, TargetUrl};
use crate::error::HarvestError;

pub trait FileFetcher {
    /// Transfers `url` into `destination_dir` under the URL's basename,
    /// replacing any existing file, and returns the written path and size.
    fn download(
        &self,
        url: &TargetUrl,
        destination_dir: &Utf8Path,
    ) -> Result<Downloaded, HarvestError>;
}

impl<T: FileFetcher + ?Sized> FileFetcher for &T {
    fn download(
        &self,
        url: &TargetUrl,
        destination_dir: &Utf8Path,
    ) -> Result<Downloaded, HarvestError> {
        (**self).download(url, destination_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub path: Utf8PathBuf,
    pub bytes: u64,
}

#[derive(Clone)]
pub struct HttpFileFetcher {
    client: Client,
}

impl HttpFileFetcher {
    pub fn new(timeout: Duration) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("xena-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::DownloadHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| HarvestError::DownloadHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl FileFetcher for HttpFileFetcher {
    fn download(
        &self,
        url: &TargetUrl,
        destination_dir: &Utf8Path,
    ) -> Result<Downloaded, HarvestError> {
        let target = ResolvedFile::new(url.clone(), destination_dir)?;
        let response = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|err| HarvestError::DownloadHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download request failed".to_string());
            return Err(HarvestError::DownloadStatus { status, message });
        }
        let body = response
            .bytes()
            .map_err(|err| HarvestError::DownloadHttp(err.to_string()))?;
        debug!(bytes = body.len(), "received {url}");
        write_replacing(&target.destination, &body)?;
        Ok(Downloaded {
            path: target.destination,
            bytes: body.len() as u64,
        })
    }
}

/// Writes `content` to a temporary sibling and renames it over `path`.
pub fn write_replacing(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
    replace_with(path, |file| {
        file.write_all(content)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))
    })
}

/// Runs `write` against a temporary file next to `path`, then moves it into
/// place. When `write` fails, `path` is left untouched.
pub fn replace_with<F>(path: &Utf8Path, write: F) -> Result<(), HarvestError>
where
    F: FnOnce(&mut File) -> Result<(), HarvestError>,
{
    let parent = path
        .parent()
        .ok_or_else(|| HarvestError::Filesystem("invalid destination path".to_string()))?;
    std::fs::create_dir_all(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".xena-harvest")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    write(temp.as_file_mut())?;
    temp.persist(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    Ok(())
}
