use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::{CohortOutcome, HarvestReport, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Console,
    Json,
}

/// Prints progress lines to stdout as they happen.
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_summary(report: &HarvestReport) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let reset = "\x1b[0m";
        println!("{cyan}xena-harvest summary{reset}");
        println!("{cyan}  index: {}{reset}", report.index_url);
        println!("{cyan}  folder: {}{reset}", report.download_dir);
        println!(
            "{green}  downloaded: {}{reset}  {yellow}skipped: {}{reset}",
            report.downloaded(),
            report.skipped()
        );
        for item in &report.cohorts {
            match &item.outcome {
                CohortOutcome::Downloaded { path, bytes, .. } => {
                    println!("{green}  + {} -> {path} ({bytes} bytes){reset}", item.cohort);
                }
                CohortOutcome::Planned { path, .. } => {
                    println!("{cyan}  ~ {} -> {path}{reset}", item.cohort);
                }
                CohortOutcome::Skipped { stage, reason } => {
                    println!("{yellow}  - {} ({stage}): {reason}{reset}", item.cohort);
                }
            }
        }
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => println!("{} in {:.1}s", event.message, elapsed.as_secs_f64()),
            None => println!("{}", event.message),
        }
    }
}

/// Keeps stdout clean for the final JSON document.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &HarvestReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_extracted(paths: &[String]) -> io::Result<()> {
        Self::print_json(&paths)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
