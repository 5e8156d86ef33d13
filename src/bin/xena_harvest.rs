use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use xena_harvest::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use xena_harvest::domain::{DownloadErrorPolicy, SessionKind};
use xena_harvest::error::HarvestError;
use xena_harvest::extract::gunzip_dir;
use xena_harvest::fetcher::HttpFileFetcher;
use xena_harvest::output::{ConsoleOutput, JsonOutput, OutputMode};
use xena_harvest::pipeline::{HarvestReport, HarvestSettings, Pipeline, ProgressSink};
use xena_harvest::session::{BrowserSession, HttpSession};

#[cfg(feature = "chromium")]
use xena_harvest::session::ChromiumSession;

#[derive(Parser)]
#[command(name = "xena-harvest")]
#[command(
    about = "Download the IlluminaHiSeq pancan normalized expression matrix of every TCGA cohort on the Xena data pages"
)]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Crawl the data pages and download every matching file (default)")]
    Harvest(HarvestArgs),
    #[command(about = "Decompress the .gz files in the download folder")]
    Extract(ExtractArgs),
}

#[derive(Args, Clone, Default)]
struct HarvestArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    index_url: Option<String>,

    #[arg(long)]
    download_dir: Option<String>,

    #[arg(long)]
    session: Option<SessionKind>,

    #[arg(long)]
    on_download_error: Option<DownloadErrorPolicy>,

    #[arg(long)]
    retries: Option<usize>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    extract: bool,

    #[arg(long)]
    remove_archives: bool,
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    dir: Option<String>,

    #[arg(long)]
    remove_archives: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::InvalidUrl(_)
        | HarvestError::InvalidSelector { .. }
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_) => 2,
        HarvestError::NavigationTimeout { .. }
        | HarvestError::Browser(_)
        | HarvestError::DownloadHttp(_)
        | HarvestError::DownloadStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };

    match cli.command {
        Some(Commands::Harvest(args)) => run_harvest(args, output_mode),
        Some(Commands::Extract(args)) => run_extract(args, output_mode),
        None => run_harvest(HarvestArgs::default(), output_mode),
    }
}

fn run_harvest(args: HarvestArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        index_url: args.index_url,
        download_dir: args.download_dir,
        session: args.session,
        on_download_error: args.on_download_error,
        retries: args.retries,
        extract: args.extract,
        remove_archives: args.remove_archives,
    };
    let resolved = overrides.apply(ConfigLoader::resolve(args.config.as_deref())?)?;
    let settings = resolved.harvest_settings(args.dry_run);
    info!(
        session = %resolved.session,
        on_download_error = %resolved.on_download_error,
        "harvesting into {}",
        resolved.download_dir
    );

    let report = match resolved.session {
        SessionKind::Http => {
            let mut session = HttpSession::new(resolved.waits.page_load)?;
            harvest(&mut session, &resolved, settings, output_mode)?
        }
        #[cfg(feature = "chromium")]
        SessionKind::Chromium => {
            let mut session = ChromiumSession::launch(resolved.waits.page_load)?;
            harvest(&mut session, &resolved, settings, output_mode)?
        }
        #[cfg(not(feature = "chromium"))]
        SessionKind::Chromium => {
            return Err(HarvestError::Browser(
                "built without the `chromium` feature; use --session http".to_string(),
            )
            .into());
        }
    };

    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Console => ConsoleOutput::print_summary(&report),
    }

    if resolved.extract.enabled && !args.dry_run {
        let extracted = gunzip_dir(&resolved.download_dir, resolved.extract.remove_archives)?;
        if matches!(output_mode, OutputMode::Console) {
            println!("extracted {} archives", extracted.len());
        }
    }
    Ok(())
}

fn harvest<S: BrowserSession>(
    session: &mut S,
    resolved: &ResolvedConfig,
    settings: HarvestSettings,
    output_mode: OutputMode,
) -> miette::Result<HarvestReport> {
    let fetcher = HttpFileFetcher::new(resolved.download_timeout)?;
    let mut pipeline = Pipeline::new(session, fetcher, &resolved.rules, settings)?;
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Console => &ConsoleOutput,
    };
    Ok(pipeline.run(sink)?)
}

fn run_extract(args: ExtractArgs, output_mode: OutputMode) -> miette::Result<()> {
    let dir = match args.dir {
        Some(dir) => Utf8PathBuf::from(dir),
        None => ConfigLoader::resolve(args.config.as_deref())?.download_dir,
    };
    let extracted = gunzip_dir(&dir, args.remove_archives)?;
    match output_mode {
        OutputMode::Json => {
            let paths = extracted
                .iter()
                .map(|path| path.to_string())
                .collect::<Vec<_>>();
            JsonOutput::print_extracted(&paths).into_diagnostic()?;
        }
        OutputMode::Console => {
            for path in &extracted {
                println!("extracted {path}");
            }
            println!("{} archives in {dir}", extracted.len());
        }
    }
    Ok(())
}
