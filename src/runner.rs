use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use anyhow::Context;
use chrono::Local;

use crate::{
    engine::BrowserEngine,
    layout::SiteLayout,
    materializer::FileMaterializer,
    navigator::{PageNavigator, Timings},
    progress::ProgressStore,
    types::{CompletionCounters, DownloaderError, HierarchyPath, RunSummary},
    utils::{banner, DEFAULT_DOWNLOAD_DIR, DOWNLOAD_EXTENSION, START_URL, STATE_FILE_NAME},
    walker::{HierarchyWalker, PageSizes, WalkerOptions},
};

pub struct Runner<E: BrowserEngine> {
    navigator: PageNavigator<E>,
    store: ProgressStore,
    materializer: FileMaterializer,
    options: RunnerOptions,
    walker_options: WalkerOptions,
    should_terminate: Arc<AtomicBool>,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    // where downloads land, get sorted, and where the state file lives
    #[builder(default = "self.default_download_dir()")]
    download_dir: PathBuf,
    #[builder(default = "self.default_start_url()")]
    start_url: String,
    // pick up from the saved state file instead of starting over
    #[builder(default = "true")]
    resume: bool,
    // tries per entry before moving on to its next sibling
    #[builder(default = "2")]
    entry_attempts: usize,
    #[builder(default = "500")]
    max_pages: usize,
    #[builder(default)]
    page_sizes: PageSizes,
    #[builder(default)]
    layout: SiteLayout,
    #[builder(default)]
    timings: Timings,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.download_dir.join(STATE_FILE_NAME)
    }
}

impl RunnerOptionsBuilder {
    fn default_download_dir(&self) -> PathBuf {
        PathBuf::from(DEFAULT_DOWNLOAD_DIR)
    }
    fn default_start_url(&self) -> String {
        START_URL.into()
    }
}

impl<E: BrowserEngine> Runner<E> {
    pub fn new(
        options: RunnerOptions,
        engine: E,
        should_terminate: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        fs::create_dir_all(&options.download_dir).context(format!(
            "could not create download directory {:?}",
            options.download_dir
        ))?;

        let store = ProgressStore::open(&options.state_file(), options.resume);
        let materializer = FileMaterializer::new(
            &options.download_dir,
            &options.download_dir,
            DOWNLOAD_EXTENSION,
        );
        let navigator = PageNavigator::new(
            engine,
            options.layout.clone(),
            options.timings.clone(),
            &options.download_dir,
        );
        let walker_options = WalkerOptions {
            entry_attempts: options.entry_attempts,
            max_pages: options.max_pages,
            page_sizes: options.page_sizes.clone(),
        };

        info!("Download Directory: {:?}", options.download_dir);
        info!("Resume mode: {}", options.resume);

        Ok(Runner {
            navigator,
            store,
            materializer,
            options,
            walker_options,
            should_terminate,
        })
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Crawls every category that is not checkpointed yet. The state file is
    /// removed only when nothing failed; otherwise it is kept for the next run.
    pub fn run(&mut self) -> anyhow::Result<RunSummary> {
        let started_at = Local::now();
        info!("=== Judgment Downloader Started at {} ===", started_at);

        self.open_start_page()?;
        let categories = self.categories()?;
        if categories.is_empty() {
            error!("No categories found!");
            return Err(DownloaderError::NoCategories.into());
        }

        let mut totals = CompletionCounters::default();
        let mut incomplete = 0;
        let mut on_start_page = true;

        for (idx, category) in categories.iter().enumerate() {
            if self.should_terminate.load(Ordering::Relaxed) {
                return Err(DownloaderError::Interrupted.into());
            }
            let path = HierarchyPath::category(category);
            if self.store.is_path_done(&path) {
                info!("Skipping already processed category: {}", category);
                continue;
            }
            if !on_start_page {
                self.open_start_page()?;
            }
            on_start_page = false;

            info!("{}", banner('=', 80));
            info!(
                "PROCESSING CATEGORY {}/{}: {}",
                idx + 1,
                categories.len(),
                category
            );
            info!("{}", banner('=', 80));
            let started = Instant::now();

            if !self.select_category(category)? {
                error!("Failed to select category: {}", category);
                incomplete += 1;
                continue;
            }

            let walked = HierarchyWalker::new(
                &self.navigator,
                &mut self.store,
                &self.materializer,
                &self.walker_options,
                self.should_terminate.clone(),
            )
            .walk_category(category);
            let counters = match walked {
                Ok(counters) => counters,
                Err(e) if DownloaderError::is_interrupted(&e) => return Err(e),
                Err(e) => {
                    error!("Error processing years for category {}: {:#}", category, e);
                    incomplete += 1;
                    continue;
                }
            };

            totals += counters;
            totals.categories += 1;

            info!("{}", banner('*', 70));
            info!("CATEGORY COMPLETED: {}", category);
            info!("  Years processed: {}", counters.years);
            info!("  Months processed: {}", counters.months);
            info!("  Cases processed: {}", counters.cases);
            info!("  Files downloaded: {}", counters.files_downloaded);
            info!("  Time taken: {:.2} seconds", started.elapsed().as_secs_f64());
            info!("{}", banner('*', 70));

            if counters.failed_entries == 0 {
                self.store.complete(&path);
            } else {
                warn!(
                    "category {} kept open, {} entries failed",
                    category, counters.failed_entries
                );
                incomplete += 1;
            }
        }

        let summary = RunSummary {
            counters: totals,
            started_at,
            finished_at: Local::now(),
            download_dir: self.options.download_dir.clone(),
        };
        log_summary(&summary);

        if incomplete == 0 {
            self.store.clear()?;
        } else {
            warn!(
                "{} categories incomplete, progress kept at {:?} for the next run",
                incomplete,
                self.store.path()
            );
        }
        Ok(summary)
    }

    fn open_start_page(&self) -> anyhow::Result<()> {
        info!("Navigating to {}...", self.options.start_url);
        if self.navigator.open(&self.options.start_url)? {
            info!("Page loaded successfully");
        }
        Ok(())
    }

    fn categories(&self) -> anyhow::Result<Vec<String>> {
        info!("Fetching all available categories...");
        let table = &self.options.layout.categories;
        self.navigator
            .select_option(&table.length_select, &self.options.page_sizes.categories);

        let mut categories = vec![];
        for idx in 0..self.navigator.count(&table.entries)? {
            if let Some(name) = self.navigator.text(&table.entries.nth(idx))? {
                let name = name.trim();
                if !name.is_empty() {
                    categories.push(name.to_string());
                }
            }
        }
        info!("Found {} categories: {:?}", categories.len(), categories);
        Ok(categories)
    }

    fn select_category(&self, category: &str) -> anyhow::Result<bool> {
        info!("Selecting category: {}", category);
        let table = &self.options.layout.categories;
        self.navigator
            .select_option(&table.length_select, &self.options.page_sizes.categories);

        for idx in 0..self.navigator.count(&table.entries)? {
            let button = table.entries.nth(idx);
            let text = self.navigator.text(&button)?.unwrap_or_default();
            if text.trim() == category {
                self.navigator.click(&button)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn log_summary(summary: &RunSummary) {
    let c = &summary.counters;
    info!("{}", banner('=', 80));
    info!("FINAL DOWNLOAD SUMMARY:");
    info!("{}", banner('=', 80));
    info!("Categories processed: {}", c.categories);
    info!("Total years processed: {}", c.years);
    info!("Total months processed: {}", c.months);
    info!("Total cases processed: {}", c.cases);
    info!("Cases skipped (already done): {}", c.cases_skipped);
    info!("Files downloaded: {}", c.files_downloaded);
    info!("Files moved: {}", c.files_moved);
    info!("Duplicates discarded: {}", c.duplicates);
    info!("Failed entries: {}", c.failed_entries);
    info!("Total time taken: {}s", summary.duration().num_seconds());
    info!("Files saved at: {:?}", summary.download_dir);
    info!("=== Process completed at {} ===", summary.finished_at);
}
