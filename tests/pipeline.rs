use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use xena_harvest::config::Waits;
use xena_harvest::domain::{DownloadErrorPolicy, TargetUrl, file_name_for};
use xena_harvest::error::HarvestError;
use xena_harvest::fetcher::{Downloaded, FileFetcher, write_replacing};
use xena_harvest::output::JsonOutput;
use xena_harvest::pipeline::{
    CohortOutcome, HarvestReport, HarvestSettings, Pipeline, ProgressEvent, ProgressSink, Stage,
};
use xena_harvest::retry::RetryPolicy;
use xena_harvest::rules::RuleSet;
use xena_harvest::session::BrowserSession;

const INDEX: &str = "https://xenabrowser.net/datapages/?host=https%3A%2F%2Ftcga.xenahubs.net";
const BRCA: &str = "https://xenabrowser.net/datapages/?cohort=TCGA-BRCA";
const LUAD: &str = "https://xenabrowser.net/datapages/?cohort=TCGA-LUAD";
const BRCA_DATASET: &str = "https://xenabrowser.net/datapages/?dataset=brca-hiseq-pancan";
const LUAD_DATASET: &str = "https://xenabrowser.net/datapages/?dataset=luad-hiseq-pancan";
const BRCA_FILE: &str = "https://tcga.xenahubs.net/download/TCGA.BRCA.sampleMap/HiSeqV2_PANCAN_BRCA.gz";
const LUAD_FILE: &str = "https://tcga.xenahubs.net/download/TCGA.LUAD.sampleMap/HiSeqV2_PANCAN_LUAD.gz";

/// A static site keyed by absolute URL.
#[derive(Default)]
struct FakeSite {
    pages: HashMap<String, String>,
    redirects: HashMap<String, String>,
    current: Option<String>,
    visited: Vec<String>,
}

impl FakeSite {
    fn page(mut self, url: &str, html: String) -> Self {
        self.pages.insert(url.to_string(), html);
        self
    }

    fn redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.to_string(), to.to_string());
        self
    }
}

impl BrowserSession for FakeSite {
    fn navigate(&mut self, url: &TargetUrl) -> Result<TargetUrl, HarvestError> {
        self.visited.push(url.to_string());
        let landed: TargetUrl = match self.redirects.get(url.as_str()) {
            Some(target) => target.parse()?,
            None => url.clone(),
        };
        match self.pages.get(landed.as_str()) {
            Some(html) => {
                self.current = Some(html.clone());
                Ok(landed)
            }
            None => {
                self.current = None;
                Err(HarvestError::Browser(format!("GET {url}: status 404")))
            }
        }
    }

    fn page_source(&mut self) -> Result<String, HarvestError> {
        self.current
            .clone()
            .ok_or_else(|| HarvestError::Browser("no page loaded".to_string()))
    }
}

/// Writes a canned body per URL; URLs in `failing` answer with a 500.
#[derive(Default)]
struct MockFetcher {
    bodies: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn body(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }

    fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl FileFetcher for MockFetcher {
    fn download(
        &self,
        url: &TargetUrl,
        destination_dir: &Utf8Path,
    ) -> Result<Downloaded, HarvestError> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.failing.contains(url.as_str()) {
            return Err(HarvestError::DownloadStatus {
                status: 500,
                message: "upstream failure".to_string(),
            });
        }
        let body = self.bodies.get(url.as_str()).cloned().unwrap_or_default();
        let path = destination_dir.join(file_name_for(url)?);
        write_replacing(&path, &body)?;
        Ok(Downloaded {
            path,
            bytes: body.len() as u64,
        })
    }
}

/// Keeps every progress message.
#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for Recorder {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn index_html(links: &[(&str, &str)]) -> String {
    let items = links
        .iter()
        .map(|(href, text)| format!(r#"<li><a href="{href}">{text}</a></li>"#))
        .collect::<String>();
    format!("<html><body><h2>Cohorts</h2><ul>{items}</ul></body></html>")
}

fn cohort_html(heading: &str, links: &[(&str, &str)]) -> String {
    let items = links
        .iter()
        .map(|(href, text)| format!(r#"<li><a href="{href}">{text}</a></li>"#))
        .collect::<String>();
    format!(
        r#"<html><body><div id="cohort">
            <div class="section"><h3>phenotype</h3><ul><li><a href="?dataset=pheno">Phenotypes</a></li></ul></div>
            <div class="section"><h3>{heading}</h3><ul>{items}</ul></div>
        </div></body></html>"#
    )
}

fn file_html(href: &str) -> String {
    format!(
        r#"<html><body><div>
            <span>cohort: <a href="?cohort=x">TCGA</a></span>
            <span>download: <a href="{href}">{href}</a>; Full metadata</span>
        </div></body></html>"#
    )
}

fn hiseq_link(dataset: &str) -> Vec<(&str, &str)> {
    vec![
        ("?dataset=other", "IlluminaHiSeq"),
        (dataset, "IlluminaHiSeq pancan normalized"),
    ]
}

/// Index listing BRCA and LUAD (plus a non-TCGA cohort), both resolvable.
fn two_cohort_site() -> FakeSite {
    FakeSite::default()
        .page(
            INDEX,
            index_html(&[
                (BRCA, "TCGA Breast Cancer (BRCA)"),
                ("https://xenabrowser.net/datapages/?cohort=GDC-PANCAN", "GDC Pan-Cancer"),
                (LUAD, "TCGA Lung Adenocarcinoma (LUAD)"),
            ]),
        )
        .page(BRCA, cohort_html("gene expression RNAseq", &hiseq_link(BRCA_DATASET)))
        .page(LUAD, cohort_html("gene expression RNAseq", &hiseq_link(LUAD_DATASET)))
        .page(BRCA_DATASET, file_html(BRCA_FILE))
        .page(LUAD_DATASET, file_html(LUAD_FILE))
}

fn settings(dir: &Utf8Path) -> HarvestSettings {
    HarvestSettings {
        index_url: INDEX.parse().unwrap(),
        download_dir: dir.to_path_buf(),
        waits: Waits {
            page_load: Duration::from_millis(50),
            file_link: Duration::from_millis(50),
            settle: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
            ..Waits::default()
        },
        retry: RetryPolicy::none(),
        on_download_error: DownloadErrorPolicy::Abort,
        dry_run: false,
    }
}

fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().join("XenaDownloads")).unwrap();
    (temp, dir)
}

fn run(
    site: &mut FakeSite,
    fetcher: &MockFetcher,
    settings: HarvestSettings,
) -> Result<HarvestReport, HarvestError> {
    let mut pipeline = Pipeline::new(site, fetcher, &RuleSet::default(), settings)?;
    pipeline.run(&JsonOutput)
}

#[test]
fn downloads_one_file_per_tcga_cohort() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site();
    let fetcher = MockFetcher::default()
        .body(BRCA_FILE, b"sample\tTCGA-A1\n")
        .body(LUAD_FILE, b"sample\tTCGA-05\n");

    let report = run(&mut site, &fetcher, settings(&dir)).unwrap();

    assert_eq!(report.cohorts.len(), 2);
    assert_eq!(report.cohorts[0].cohort.as_str(), BRCA);
    assert_eq!(report.cohorts[1].cohort.as_str(), LUAD);
    assert_eq!(report.downloaded(), 2);
    assert_eq!(fetcher.calls(), vec![BRCA_FILE.to_string(), LUAD_FILE.to_string()]);
    assert_eq!(
        std::fs::read(dir.join("HiSeqV2_PANCAN_BRCA.gz").as_std_path()).unwrap(),
        b"sample\tTCGA-A1\n"
    );
    assert_matches!(
        &report.cohorts[1].outcome,
        CohortOutcome::Downloaded { path, bytes: 15, .. } if path.ends_with("HiSeqV2_PANCAN_LUAD.gz")
    );
    assert_eq!(
        site.visited,
        vec![INDEX, BRCA, BRCA_DATASET, LUAD, LUAD_DATASET]
    );
}

#[test]
fn cohort_without_rnaseq_section_is_skipped() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site().page(
        BRCA,
        cohort_html("copy number", &hiseq_link(BRCA_DATASET)),
    );
    let fetcher = MockFetcher::default();

    let report = run(&mut site, &fetcher, settings(&dir)).unwrap();

    assert_matches!(
        &report.cohorts[0].outcome,
        CohortOutcome::Skipped { stage: Stage::Section, .. }
    );
    assert_matches!(&report.cohorts[1].outcome, CohortOutcome::Downloaded { .. });
    assert_eq!(fetcher.calls(), vec![LUAD_FILE.to_string()]);
}

#[test]
fn section_without_pancan_link_is_skipped() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site().page(
        LUAD,
        cohort_html(
            "gene expression RNAseq",
            &[(LUAD_DATASET, "IlluminaHiSeq percentile")],
        ),
    );
    let fetcher = MockFetcher::default();

    let report = run(&mut site, &fetcher, settings(&dir)).unwrap();

    assert_matches!(
        &report.cohorts[1].outcome,
        CohortOutcome::Skipped { stage: Stage::DataTypeLink, .. }
    );
    assert_eq!(report.skipped(), 1);
}

#[test]
fn missing_download_link_is_skipped() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site().page(
        BRCA_DATASET,
        "<html><body><span>metadata: <a href=\"meta.json\">meta</a></span></body></html>"
            .to_string(),
    );
    let fetcher = MockFetcher::default();

    let report = run(&mut site, &fetcher, settings(&dir)).unwrap();

    assert_matches!(
        &report.cohorts[0].outcome,
        CohortOutcome::Skipped { stage: Stage::FileLink, reason } if reason.contains("link not found")
    );
    assert_eq!(report.downloaded(), 1);
}

#[test]
fn each_skip_is_reported_once() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site().page(
        BRCA,
        cohort_html("copy number", &hiseq_link(BRCA_DATASET)),
    );
    let fetcher = MockFetcher::default();
    let recorder = Recorder::default();

    let mut pipeline =
        Pipeline::new(&mut site, &fetcher, &RuleSet::default(), settings(&dir)).unwrap();
    pipeline.run(&recorder).unwrap();

    let messages = recorder.messages.lock().unwrap();
    let skips = messages
        .iter()
        .filter(|message| message.starts_with("skipped"))
        .collect::<Vec<_>>();
    assert_eq!(skips.len(), 1);
    assert!(skips[0].contains("data-type section"));
}

#[test]
fn unreachable_cohort_page_is_skipped() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site();
    site.pages.remove(BRCA);
    let fetcher = MockFetcher::default();

    let report = run(&mut site, &fetcher, settings(&dir)).unwrap();

    assert_matches!(
        &report.cohorts[0].outcome,
        CohortOutcome::Skipped { stage: Stage::CohortPage, .. }
    );
    assert_matches!(&report.cohorts[1].outcome, CohortOutcome::Downloaded { .. });
}

#[test]
fn index_that_never_renders_fails_the_run() {
    let (_temp, dir) = scratch();
    let mut site = FakeSite::default().page(INDEX, "<p>Loading…</p>".to_string());
    let fetcher = MockFetcher::default();

    let err = run(&mut site, &fetcher, settings(&dir)).unwrap_err();

    assert_matches!(err, HarvestError::NavigationTimeout { .. });
    assert!(fetcher.calls().is_empty());
}

#[test]
fn index_without_tcga_links_finishes_empty() {
    let (_temp, dir) = scratch();
    let mut site = FakeSite::default().page(
        INDEX,
        index_html(&[("https://xenabrowser.net/datapages/?cohort=GDC-PANCAN", "GDC")]),
    );
    let fetcher = MockFetcher::default();

    let report = run(&mut site, &fetcher, settings(&dir)).unwrap();

    assert!(report.cohorts.is_empty());
    assert!(dir.as_std_path().is_dir());
}

#[test]
fn download_failure_aborts_by_default() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site();
    let fetcher = MockFetcher::default().failing(BRCA_FILE);

    let err = run(&mut site, &fetcher, settings(&dir)).unwrap_err();

    assert_matches!(err, HarvestError::DownloadStatus { status: 500, .. });
    assert_eq!(fetcher.calls(), vec![BRCA_FILE.to_string()]);
}

#[test]
fn download_failure_can_skip_the_cohort() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site();
    let fetcher = MockFetcher::default().failing(BRCA_FILE);
    let mut settings = settings(&dir);
    settings.on_download_error = DownloadErrorPolicy::SkipCohort;

    let report = run(&mut site, &fetcher, settings).unwrap();

    assert_matches!(
        &report.cohorts[0].outcome,
        CohortOutcome::Skipped { stage: Stage::Download, .. }
    );
    assert_matches!(&report.cohorts[1].outcome, CohortOutcome::Downloaded { .. });
}

#[test]
fn transient_download_failures_are_retried() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site();
    let fetcher = MockFetcher::default().failing(BRCA_FILE);
    let mut settings = settings(&dir);
    settings.on_download_error = DownloadErrorPolicy::SkipCohort;
    settings.retry = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
    };

    run(&mut site, &fetcher, settings).unwrap();

    let calls = fetcher.calls();
    assert_eq!(calls.iter().filter(|url| url.as_str() == BRCA_FILE).count(), 3);
    assert_eq!(calls.iter().filter(|url| url.as_str() == LUAD_FILE).count(), 1);
}

#[test]
fn same_basename_is_overwritten_by_the_later_cohort() {
    let (_temp, dir) = scratch();
    let shared_a = "https://tcga.xenahubs.net/download/a/HiSeqV2_PANCAN.gz";
    let shared_b = "https://tcga.xenahubs.net/download/b/HiSeqV2_PANCAN.gz";
    let mut site = two_cohort_site()
        .page(BRCA_DATASET, file_html(shared_a))
        .page(LUAD_DATASET, file_html(shared_b));
    let fetcher = MockFetcher::default()
        .body(shared_a, b"first")
        .body(shared_b, b"second");

    let report = run(&mut site, &fetcher, settings(&dir)).unwrap();

    assert_eq!(report.downloaded(), 2);
    assert_eq!(
        std::fs::read(dir.join("HiSeqV2_PANCAN.gz").as_std_path()).unwrap(),
        b"second"
    );
}

#[test]
fn dry_run_plans_without_downloading() {
    let (_temp, dir) = scratch();
    let mut site = two_cohort_site();
    let fetcher = MockFetcher::default();
    let mut settings = settings(&dir);
    settings.dry_run = true;

    let report = run(&mut site, &fetcher, settings).unwrap();

    assert!(fetcher.calls().is_empty());
    assert!(!dir.as_std_path().exists());
    assert_matches!(
        &report.cohorts[0].outcome,
        CohortOutcome::Planned { path, .. } if path.ends_with("HiSeqV2_PANCAN_BRCA.gz")
    );
}

#[test]
fn relative_links_resolve_against_the_redirect_target() {
    let (_temp, dir) = scratch();
    let mirror = "https://mirror.example.org/xena/cohorts/brca";
    let mirror_dataset = "https://mirror.example.org/xena/cohorts/hiseq-pancan";
    let mut site = two_cohort_site()
        .redirect(BRCA, mirror)
        .page(
            mirror,
            cohort_html(
                "gene expression RNAseq",
                &[("hiseq-pancan", "IlluminaHiSeq pancan normalized")],
            ),
        )
        .page(mirror_dataset, file_html(BRCA_FILE));
    let fetcher = MockFetcher::default();

    let report = run(&mut site, &fetcher, settings(&dir)).unwrap();

    assert_eq!(report.downloaded(), 2);
    assert_eq!(site.visited[1], BRCA);
    assert_eq!(site.visited[2], mirror_dataset);
}

#[test]
fn rerun_resolves_the_same_cohorts_and_file_names() {
    let (_temp, dir) = scratch();
    let fetcher = MockFetcher::default();

    let first = run(&mut two_cohort_site(), &fetcher, settings(&dir)).unwrap();
    let second = run(&mut two_cohort_site(), &fetcher, settings(&dir)).unwrap();

    let summarize = |report: &HarvestReport| {
        report
            .cohorts
            .iter()
            .map(|item| match &item.outcome {
                CohortOutcome::Downloaded { path, .. } => (item.cohort.to_string(), path.clone()),
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(summarize(&first), summarize(&second));
}
