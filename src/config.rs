use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::{BaseDirs, UserDirs};
use serde::{Deserialize, Serialize};

use crate::domain::{DownloadErrorPolicy, SessionKind, TargetUrl};
use crate::error::HarvestError;
use crate::matcher::{CompiledRules, parse_selector};
use crate::pipeline::HarvestSettings;
use crate::retry::RetryPolicy;
use crate::rules::RuleSet;

pub const CONFIG_FILE: &str = "xena-harvest.json";
/// Data pages pinned to the TCGA hub, with the treehouse hub removed.
pub const DEFAULT_INDEX_URL: &str = "https://xenabrowser.net/datapages/?host=https%3A%2F%2Ftcga.xenahubs.net&removeHub=https%3A%2F%2Fxena.treehouse.gi.ucsc.edu%3A443";
pub const DOWNLOAD_DIR_NAME: &str = "XenaDownloads";
/// Upper bound for every configured wait and timeout.
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);
/// Upper bound for the retry backoff step.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub index_url: Option<String>,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub session: Option<SessionKind>,
    #[serde(default)]
    pub waits: Option<WaitsEntry>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub on_download_error: Option<DownloadErrorPolicy>,
    #[serde(default)]
    pub rules: Option<RuleSet>,
    #[serde(default)]
    pub extract: Option<ExtractEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WaitsEntry {
    #[serde(default)]
    pub page_load_secs: Option<u64>,
    #[serde(default)]
    pub file_link_secs: Option<u64>,
    #[serde(default)]
    pub settle_secs: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub index_ready: Option<String>,
    #[serde(default)]
    pub page_ready: Option<String>,
    #[serde(default)]
    pub file_ready: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ExtractEntry {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub remove_archives: bool,
}

/// Bounds and readiness selectors for the navigator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waits {
    pub page_load: Duration,
    pub file_link: Duration,
    pub settle: Duration,
    pub poll_interval: Duration,
    pub index_ready: String,
    pub page_ready: String,
    pub file_ready: String,
}

impl Default for Waits {
    fn default() -> Self {
        Self {
            page_load: Duration::from_secs(30),
            file_link: Duration::from_secs(30),
            settle: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            index_ready: "ul".to_string(),
            page_ready: "ul".to_string(),
            file_ready: "a".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    pub enabled: bool,
    pub remove_archives: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub index_url: TargetUrl,
    pub download_dir: Utf8PathBuf,
    pub session: SessionKind,
    pub waits: Waits,
    pub download_timeout: Duration,
    pub retry: RetryPolicy,
    pub on_download_error: DownloadErrorPolicy,
    pub rules: RuleSet,
    pub extract: ExtractOptions,
}

impl ResolvedConfig {
    pub fn harvest_settings(&self, dry_run: bool) -> HarvestSettings {
        HarvestSettings {
            index_url: self.index_url.clone(),
            download_dir: self.download_dir.clone(),
            waits: self.waits.clone(),
            retry: self.retry,
            on_download_error: self.on_download_error,
            dry_run,
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub index_url: Option<String>,
    pub download_dir: Option<String>,
    pub session: Option<SessionKind>,
    pub on_download_error: Option<DownloadErrorPolicy>,
    pub retries: Option<usize>,
    pub extract: bool,
    pub remove_archives: bool,
}

impl ConfigOverrides {
    pub fn apply(self, mut resolved: ResolvedConfig) -> Result<ResolvedConfig, HarvestError> {
        if let Some(url) = self.index_url {
            resolved.index_url = url.parse::<TargetUrl>()?;
        }
        if let Some(dir) = self.download_dir {
            resolved.download_dir = Utf8PathBuf::from(dir);
        }
        if let Some(session) = self.session {
            resolved.session = session;
        }
        if let Some(policy) = self.on_download_error {
            resolved.on_download_error = policy;
        }
        if let Some(retries) = self.retries {
            resolved.retry.max_retries = retries;
        }
        resolved.extract.enabled |= self.extract;
        resolved.extract.remove_archives |= self.remove_archives;
        Ok(resolved)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `xena-harvest.json` in the working directory when
    /// present. Without either, the built-in defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let index_url = config
            .index_url
            .as_deref()
            .unwrap_or(DEFAULT_INDEX_URL)
            .parse::<TargetUrl>()?;
        let download_dir = match config.download_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_download_dir()?,
        };

        let defaults = Waits::default();
        let entry = config.waits.unwrap_or_default();
        let waits = Waits {
            page_load: entry
                .page_load_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.page_load),
            file_link: entry
                .file_link_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.file_link),
            settle: entry
                .settle_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.settle),
            poll_interval: entry
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            index_ready: entry.index_ready.unwrap_or(defaults.index_ready),
            page_ready: entry.page_ready.unwrap_or(defaults.page_ready),
            file_ready: entry.file_ready.unwrap_or(defaults.file_ready),
        };
        validate_waits(&waits)?;

        let download_timeout = Duration::from_secs(config.download_timeout_secs.unwrap_or(600));
        check_bounds("download_timeout_secs", download_timeout, MAX_WAIT)?;

        let retry_entry = config.retry.unwrap_or_default();
        let retry = RetryPolicy {
            max_retries: retry_entry.max_retries.unwrap_or(0),
            base_delay: retry_entry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(RetryPolicy::none().base_delay),
        };
        if retry.base_delay > MAX_RETRY_DELAY {
            return Err(HarvestError::InvalidConfig(format!(
                "base_delay_ms must not exceed {}ms",
                MAX_RETRY_DELAY.as_millis()
            )));
        }

        let rules = config.rules.unwrap_or_default();
        CompiledRules::compile(&rules)?;

        let extract = config
            .extract
            .map(|entry| ExtractOptions {
                enabled: entry.enabled,
                remove_archives: entry.remove_archives,
            })
            .unwrap_or_default();

        Ok(ResolvedConfig {
            schema_version,
            index_url,
            download_dir,
            session: config.session.unwrap_or_default(),
            waits,
            download_timeout,
            retry,
            on_download_error: config.on_download_error.unwrap_or_default(),
            rules,
            extract,
        })
    }
}

fn validate_waits(waits: &Waits) -> Result<(), HarvestError> {
    for (name, value) in [
        ("page_load_secs", waits.page_load),
        ("file_link_secs", waits.file_link),
        ("settle_secs", waits.settle),
        ("poll_interval_ms", waits.poll_interval),
    ] {
        check_bounds(name, value, MAX_WAIT)?;
    }
    for selector in [&waits.index_ready, &waits.page_ready, &waits.file_ready] {
        parse_selector(selector)?;
    }
    Ok(())
}

fn check_bounds(name: &str, value: Duration, max: Duration) -> Result<(), HarvestError> {
    if value.is_zero() {
        return Err(HarvestError::InvalidConfig(format!(
            "{name} must be greater than zero"
        )));
    }
    if value > max {
        return Err(HarvestError::InvalidConfig(format!(
            "{name} must not exceed {}s",
            max.as_secs()
        )));
    }
    Ok(())
}

/// `<Desktop>/XenaDownloads`, falling back to `~/Desktop/XenaDownloads`.
pub fn default_download_dir() -> Result<Utf8PathBuf, HarvestError> {
    let desktop = UserDirs::new()
        .and_then(|dirs| dirs.desktop_dir().map(|dir| dir.to_path_buf()))
        .or_else(|| BaseDirs::new().map(|dirs| dirs.home_dir().join("Desktop")))
        .ok_or_else(|| {
            HarvestError::Filesystem("unable to resolve desktop directory".to_string())
        })?;
    Utf8PathBuf::from_path_buf(desktop.join(DOWNLOAD_DIR_NAME))
        .map_err(|_| HarvestError::Filesystem("invalid download directory path".to_string()))
}
