//! Index → cohort → data-type → file resolution.
//!
//! Every cohort is resolved and downloaded before the next one is touched.
//! Resolution failures are recorded against the cohort and the run moves on;
//! only a failure to load the index, or a download failure under
//! [`DownloadErrorPolicy::Abort`], ends the run early.

use std::fmt;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Waits;
use crate::domain::{DownloadErrorPolicy, ResolvedFile, TargetUrl};
use crate::error::HarvestError;
use crate::fetcher::FileFetcher;
use crate::matcher::CompiledRules;
use crate::navigator::Navigator;
use crate::retry::{RetryPolicy, retry};
use crate::rules::RuleSet;
use crate::session::BrowserSession;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub index_url: TargetUrl,
    pub download_dir: Utf8PathBuf,
    pub waits: Waits,
    pub retry: RetryPolicy,
    pub on_download_error: DownloadErrorPolicy,
    pub dry_run: bool,
}

/// Step at which a cohort was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    CohortPage,
    Section,
    DataTypeLink,
    FilePage,
    FileLink,
    Download,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CohortPage => "cohort page",
            Stage::Section => "data-type section",
            Stage::DataTypeLink => "data-type link",
            Stage::FilePage => "file page",
            Stage::FileLink => "file link",
            Stage::Download => "download",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum CohortOutcome {
    Downloaded {
        file_url: TargetUrl,
        path: String,
        bytes: u64,
        downloaded_at: String,
    },
    Planned {
        file_url: TargetUrl,
        path: String,
    },
    Skipped {
        stage: Stage,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortReport {
    pub cohort: TargetUrl,
    #[serde(flatten)]
    pub outcome: CohortOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub index_url: TargetUrl,
    pub download_dir: String,
    pub started_at: String,
    pub finished_at: String,
    pub cohorts: Vec<CohortReport>,
}

impl HarvestReport {
    pub fn downloaded(&self) -> usize {
        self.count(|outcome| matches!(outcome, CohortOutcome::Downloaded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, CohortOutcome::Skipped { .. }))
    }

    fn count(&self, predicate: impl Fn(&CohortOutcome) -> bool) -> usize {
        self.cohorts
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

struct Skip {
    stage: Stage,
    error: HarvestError,
}

impl Skip {
    fn at(stage: Stage) -> impl FnOnce(HarvestError) -> Skip {
        move |error| Skip { stage, error }
    }
}

pub struct Pipeline<'s, S: BrowserSession, F: FileFetcher> {
    navigator: Navigator<'s, S>,
    fetcher: F,
    rules: CompiledRules,
    settings: HarvestSettings,
}

impl<'s, S: BrowserSession, F: FileFetcher> Pipeline<'s, S, F> {
    pub fn new(
        session: &'s mut S,
        fetcher: F,
        rules: &RuleSet,
        settings: HarvestSettings,
    ) -> Result<Self, HarvestError> {
        Ok(Self {
            navigator: Navigator::new(session, settings.waits.poll_interval),
            fetcher,
            rules: CompiledRules::compile(rules)?,
            settings,
        })
    }

    pub fn run(&mut self, sink: &dyn ProgressSink) -> Result<HarvestReport, HarvestError> {
        let started_at = Utc::now().to_rfc3339();
        if !self.settings.dry_run {
            std::fs::create_dir_all(self.settings.download_dir.as_std_path()).map_err(|err| {
                HarvestError::Filesystem(format!("create {}: {err}", self.settings.download_dir))
            })?;
        }

        let cohorts = self.discover_cohorts(sink)?;
        let mut reports = Vec::with_capacity(cohorts.len());
        for (position, cohort) in cohorts.into_iter().enumerate() {
            emit(sink, format!("[{}] visiting {cohort}", position + 1));
            let outcome = self.harvest_cohort(&cohort, sink)?;
            reports.push(CohortReport { cohort, outcome });
        }

        let report = HarvestReport {
            index_url: self.settings.index_url.clone(),
            download_dir: self.settings.download_dir.to_string(),
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            cohorts: reports,
        };
        info!(
            cohorts = report.cohorts.len(),
            downloaded = report.downloaded(),
            skipped = report.skipped(),
            "harvest finished"
        );
        Ok(report)
    }

    /// Loads the index page and returns every cohort link in document order.
    /// A failure to load the index is fatal; an index without cohort links
    /// yields an empty set.
    pub fn discover_cohorts(
        &mut self,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<TargetUrl>, HarvestError> {
        let index = self.settings.index_url.clone();
        let waits = &self.settings.waits;
        let navigator = &mut self.navigator;
        let rules = &self.rules;

        emit(sink, format!("loading index {index}"));
        retry(&self.settings.retry, "index page", || {
            navigator.load(&index, &waits.index_ready, waits.page_load)
        })?;

        let cohorts = match navigator.wait_for(waits.settle, |page| {
            let links = rules.cohorts.find_links(page.root(), page.url());
            if links.is_empty() {
                Err(HarvestError::LinkNotFound(format!(
                    "no cohort links on {}",
                    page.url()
                )))
            } else {
                Ok(links)
            }
        }) {
            Ok((_, links)) => links.into_iter().map(|link| link.href).collect::<Vec<_>>(),
            Err(HarvestError::LinkNotFound(reason)) => {
                warn!("{reason}");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        emit(sink, format!("found {} cohort links", cohorts.len()));
        Ok(cohorts)
    }

    fn harvest_cohort(
        &mut self,
        cohort: &TargetUrl,
        sink: &dyn ProgressSink,
    ) -> Result<CohortOutcome, HarvestError> {
        let file_url = match self.resolve_file_url(cohort, sink) {
            Ok(url) => url,
            Err(skip) => return Ok(skipped(cohort, skip, sink)),
        };

        let download_dir = self.settings.download_dir.clone();
        if self.settings.dry_run {
            let resolved = match ResolvedFile::new(file_url, &download_dir) {
                Ok(resolved) => resolved,
                Err(error) => return self.download_failed(cohort, error, sink),
            };
            emit(sink, format!("would download {}", resolved.url));
            return Ok(CohortOutcome::Planned {
                file_url: resolved.url,
                path: resolved.destination.to_string(),
            });
        }

        emit(sink, format!("downloading {file_url}"));
        let start = Instant::now();
        let fetcher = &self.fetcher;
        let result = retry(&self.settings.retry, "download", || {
            fetcher.download(&file_url, &download_dir)
        });
        match result {
            Ok(downloaded) => {
                sink.event(ProgressEvent {
                    message: format!("saved {} ({} bytes)", downloaded.path, downloaded.bytes),
                    elapsed: Some(start.elapsed()),
                });
                Ok(CohortOutcome::Downloaded {
                    file_url,
                    path: downloaded.path.to_string(),
                    bytes: downloaded.bytes,
                    downloaded_at: Utc::now().to_rfc3339(),
                })
            }
            Err(error) => self.download_failed(cohort, error, sink),
        }
    }

    fn download_failed(
        &self,
        cohort: &TargetUrl,
        error: HarvestError,
        sink: &dyn ProgressSink,
    ) -> Result<CohortOutcome, HarvestError> {
        match self.settings.on_download_error {
            DownloadErrorPolicy::Abort => Err(error),
            DownloadErrorPolicy::SkipCohort => Ok(skipped(
                cohort,
                Skip {
                    stage: Stage::Download,
                    error,
                },
                sink,
            )),
        }
    }

    fn resolve_file_url(
        &mut self,
        cohort: &TargetUrl,
        sink: &dyn ProgressSink,
    ) -> Result<TargetUrl, Skip> {
        let waits = &self.settings.waits;
        let policy = &self.settings.retry;
        let navigator = &mut self.navigator;
        let rules = &self.rules;

        retry(policy, "cohort page", || {
            navigator.load(cohort, &waits.page_ready, waits.page_load)
        })
        .map_err(Skip::at(Stage::CohortPage))?;

        let data_type = navigator.wait_for(waits.settle, |page| {
            let section = rules.section.locate(page.document())?;
            rules
                .data_type
                .first_link(section, page.url())
                .ok_or_else(|| {
                    HarvestError::LinkNotFound(format!(
                        "no data-type link in section on {}",
                        page.url()
                    ))
                })
        });
        let data_type = match data_type {
            Ok((_, link)) => link,
            Err(error @ HarvestError::SectionNotFound(_)) => {
                return Err(Skip::at(Stage::Section)(error));
            }
            Err(error @ HarvestError::LinkNotFound(_)) => {
                return Err(Skip::at(Stage::DataTypeLink)(error));
            }
            Err(error) => return Err(Skip::at(Stage::CohortPage)(error)),
        };
        emit(sink, format!("data type: {} -> {}", data_type.text, data_type.href));

        retry(policy, "file page", || {
            navigator.load(&data_type.href, &waits.file_ready, waits.file_link)
        })
        .map_err(Skip::at(Stage::FilePage))?;

        let file = navigator
            .wait_for(waits.settle, |page| {
                rules.file.first_link(page.root(), page.url()).ok_or_else(|| {
                    HarvestError::LinkNotFound(format!("no download link on {}", page.url()))
                })
            })
            .map_err(|error| match error {
                HarvestError::LinkNotFound(_) => Skip::at(Stage::FileLink)(error),
                other => Skip::at(Stage::FilePage)(other),
            })?;
        Ok(file.1.href)
    }
}

fn skipped(cohort: &TargetUrl, skip: Skip, sink: &dyn ProgressSink) -> CohortOutcome {
    let reason = skip.error.to_string();
    debug!(stage = %skip.stage, "skipping {cohort}: {reason}");
    emit(sink, format!("skipped at {}: {reason}", skip.stage));
    CohortOutcome::Skipped {
        stage: skip.stage,
        reason,
    }
}
