use std::{
    fs,
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use env_logger::{Env, Target};
use judgment_crawler::{
    browser_controller::{BrowserOptions, ChromeEngine},
    navigator::Timings,
    runner::{Runner, RunnerOptions},
    types::{DownloaderError, RunSummary},
    utils::{TeeWriter, DEFAULT_DOWNLOAD_DIR, LOG_FILE_NAME, START_URL},
};
use log::{debug, error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use tokio::task;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Karnataka High Court judgment downloader", long_about = None)]
struct Args {
    /// Directory downloads land in and are sorted into
    #[arg(short = 'd', long, default_value = DEFAULT_DOWNLOAD_DIR)]
    download_dir: PathBuf,
    /// Page listing the judgment categories
    #[arg(short = 'u', long, default_value = START_URL)]
    url: String,
    /// Ignore saved progress and start over
    #[arg(long)]
    fresh: bool,
    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,
    /// Attempts per year, month or case before it is skipped
    #[arg(short = 'r', long, default_value_t = 2)]
    entry_attempts: usize,
    /// Maximum time in seconds the browser may stay idle before timing out
    #[arg(long, default_value_t = 45)]
    browser_timeout: u64,
    /// Milliseconds to let the page settle after each click
    #[arg(long, default_value_t = 500)]
    click_delay_ms: u64,
}

fn init_logging(log_file: &Path) -> anyhow::Result<()> {
    let tee = TeeWriter::new(log_file).context(format!("could not open log file {:?}", log_file))?;
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Pipe(Box::new(tee)))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    fs::create_dir_all(&args.download_dir).context(format!(
        "could not create download directory {:?}",
        args.download_dir
    ))?;
    init_logging(&args.download_dir.join(LOG_FILE_NAME))?;

    debug!("Starting downloader with {:#?}", args.clone());

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let timings = Timings {
        after_click: Duration::from_millis(args.click_delay_ms),
        ..Timings::default()
    };
    let options = RunnerOptions::default_builder()
        .download_dir(args.download_dir.clone())
        .start_url(args.url.clone())
        .resume(!args.fresh)
        .entry_attempts(args.entry_attempts)
        .timings(timings)
        .build()?;
    let browser_options = BrowserOptions::default_builder()
        .download_dir(args.download_dir.clone())
        .headless(args.headless)
        .idle_timeout(args.browser_timeout)
        .build()?;

    // headless_chrome blocks, so the whole crawl lives on a blocking thread;
    // chrome is killed when the runner drops at the end of the closure
    let result = task::spawn_blocking(move || -> anyhow::Result<RunSummary> {
        let engine = ChromeEngine::new(&browser_options)?;
        let mut runner = Runner::new(options, engine, should_terminate)?;
        runner.run()
    })
    .await?;

    match result {
        Ok(summary) => {
            info!(
                "{} cases processed, {} files downloaded in {}s",
                summary.counters.cases,
                summary.counters.files_downloaded,
                summary.duration().num_seconds()
            );
            Ok(())
        }
        Err(e) if DownloaderError::is_interrupted(&e) => {
            warn!("Interrupted. Download state saved, run again to resume.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error in main process: {:#}", e);
            info!("Download state saved. You can resume later by running again without --fresh");
            Err(e)
        }
    }
}
