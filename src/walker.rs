use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use anyhow::{Context, Result};

use crate::{
    engine::{BrowserEngine, ElementRef},
    layout::TableLayout,
    materializer::FileMaterializer,
    navigator::PageNavigator,
    progress::ProgressStore,
    types::{CompletionCounters, DownloaderError, HierarchyPath},
    utils::{banner, year_label, DOWNLOAD_EXTENSION},
};

/// Rows per page requested from each listing's length select.
#[derive(Debug, Clone)]
pub struct PageSizes {
    pub categories: String,
    pub years: String,
    pub months: String,
    pub cases: String,
}

impl Default for PageSizes {
    fn default() -> Self {
        PageSizes {
            categories: "100".into(),
            years: "50".into(),
            months: "50".into(),
            cases: "50".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkerOptions {
    /// Tries per entry before it is logged as failed and skipped.
    pub entry_attempts: usize,
    pub max_pages: usize,
    pub page_sizes: PageSizes,
}

impl Default for WalkerOptions {
    fn default() -> Self {
        WalkerOptions {
            entry_attempts: 2,
            max_pages: 500,
            page_sizes: PageSizes::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Year,
    Month,
    Case,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Year => write!(f, "year"),
            Level::Month => write!(f, "month"),
            Level::Case => write!(f, "case"),
        }
    }
}

/// A row of the listing as it was rendered when it was read.
struct Entry {
    element: ElementRef,
    text: String,
    // 1-based, counted across pages
    position: usize,
}

struct Visit {
    counters: CompletionCounters,
    navigated: bool,
}

impl Visit {
    fn skipped(counters: CompletionCounters) -> Self {
        Visit {
            counters,
            navigated: false,
        }
    }

    fn entered(counters: CompletionCounters) -> Self {
        Visit {
            counters,
            navigated: true,
        }
    }
}

/// Walks one category's year → month → case tree, checkpointing every unit of work.
pub struct HierarchyWalker<'a, E: BrowserEngine> {
    nav: &'a PageNavigator<E>,
    store: &'a mut ProgressStore,
    materializer: &'a FileMaterializer,
    options: &'a WalkerOptions,
    should_terminate: Arc<AtomicBool>,
}

impl<'a, E: BrowserEngine> HierarchyWalker<'a, E> {
    pub fn new(
        nav: &'a PageNavigator<E>,
        store: &'a mut ProgressStore,
        materializer: &'a FileMaterializer,
        options: &'a WalkerOptions,
        should_terminate: Arc<AtomicBool>,
    ) -> Self {
        HierarchyWalker {
            nav,
            store,
            materializer,
            options,
            should_terminate,
        }
    }

    /// Processes every year of the category whose page is currently open.
    pub fn walk_category(&mut self, category: &str) -> Result<CompletionCounters> {
        info!("Starting year processing for category: {}", category);
        let base = HierarchyPath::category(category);
        self.walk_table(Level::Year, |w, entry| w.visit_year(&base, entry))
    }

    fn table(&self, level: Level) -> &'a TableLayout {
        let nav: &'a PageNavigator<E> = self.nav;
        let layout = nav.layout();
        match level {
            Level::Year => &layout.years,
            Level::Month => &layout.months,
            Level::Case => &layout.cases,
        }
    }

    fn page_size(&self, level: Level) -> &'a str {
        let options: &'a WalkerOptions = self.options;
        match level {
            Level::Year => &options.page_sizes.years,
            Level::Month => &options.page_sizes.months,
            Level::Case => &options.page_sizes.cases,
        }
    }

    fn check_terminated(&self) -> Result<()> {
        if self.should_terminate.load(Ordering::Relaxed) {
            return Err(DownloaderError::Interrupted.into());
        }
        Ok(())
    }

    /// Brings the listing back to `page`: choosing a page size redraws the
    /// table from its first page, so the pager is replayed from there.
    fn restore_listing(&self, level: Level, page: usize) -> Result<()> {
        let table = self.table(level);
        if !self
            .nav
            .select_option(&table.length_select, self.page_size(level))
        {
            // without the select the pager cannot be rewound to page 1
            if page > 0 {
                return Err(DownloaderError::ElementMissing(table.length_select.to_string()))
                    .context(format!("could not return #{} to page {}", table.id, page + 1));
            }
            debug!("page size select for #{} not available", table.id);
        }
        for _ in 0..page {
            if !self.nav.paginate(table)? {
                warn!("#{} has fewer pages than before", table.id);
                break;
            }
        }
        Ok(())
    }

    /// Enumerates a listing page by page, re-reading it before every entry.
    fn walk_table<F>(&mut self, level: Level, mut visit: F) -> Result<CompletionCounters>
    where
        F: FnMut(&mut Self, &Entry) -> Result<Visit>,
    {
        let table = self.table(level);
        let mut totals = CompletionCounters::default();
        let mut page = 0;
        let mut seen = 0;
        let mut dirty = true;

        loop {
            if dirty {
                self.restore_listing(level, page)?;
                dirty = false;
            }
            let on_page = self.nav.count(&table.entries)?;
            if on_page == 0 {
                break;
            }
            info!("  Found {} {} entries on page {}", on_page, level, page + 1);

            for idx in 0..on_page {
                self.check_terminated()?;
                let position = seen + idx + 1;
                let mut attempt = 0;
                let mut truncated = false;
                loop {
                    attempt += 1;
                    let outcome = self.attempt_entry(level, page, idx, position, dirty, &mut visit);
                    dirty = true;

                    match outcome {
                        Ok(Some(done)) => {
                            totals += done.counters;
                            dirty = done.navigated;
                            break;
                        }
                        Ok(None) => {
                            // rows that disappeared still have to be visited by a later run
                            totals.failed_entries += on_page - idx;
                            truncated = true;
                            break;
                        }
                        Err(e) if DownloaderError::is_interrupted(&e) => return Err(e),
                        Err(e) => {
                            error!("Error processing {} {}: {:#}", level, position, e);
                            if attempt >= self.options.entry_attempts.max(1) {
                                totals.failed_entries += 1;
                                break;
                            }
                            warn!(
                                "retrying {} {} (attempt {}/{})",
                                level,
                                position,
                                attempt + 1,
                                self.options.entry_attempts
                            );
                        }
                    }
                }
                if truncated {
                    break;
                }
            }

            if page + 1 >= self.options.max_pages {
                warn!("#{} reached the page limit of {}", table.id, self.options.max_pages);
                break;
            }
            if dirty {
                self.restore_listing(level, page)?;
                dirty = false;
            }
            if !self.nav.paginate(table)? {
                break;
            }
            seen += on_page;
            page += 1;
        }
        Ok(totals)
    }

    /// One try at the `idx`-th row of the current page. `None` when the
    /// listing no longer renders that many rows.
    fn attempt_entry<F>(
        &mut self,
        level: Level,
        page: usize,
        idx: usize,
        position: usize,
        dirty: bool,
        visit: &mut F,
    ) -> Result<Option<Visit>>
    where
        F: FnMut(&mut Self, &Entry) -> Result<Visit>,
    {
        let table = self.table(level);
        if dirty {
            self.restore_listing(level, page)?;
        }
        let present = self.nav.count(&table.entries)?;
        if idx >= present {
            warn!(
                "#{} now shows {} rows, expected at least {}; leaving page {}",
                table.id,
                present,
                idx + 1,
                page + 1
            );
            return Ok(None);
        }
        let entry = self.read_entry(table, idx, position)?;
        visit(self, &entry).map(Some)
    }

    fn read_entry(&self, table: &TableLayout, idx: usize, position: usize) -> Result<Entry> {
        let element = table.entries.nth(idx);
        let text = self.nav.require_text(&element)?;
        Ok(Entry {
            element,
            text,
            position,
        })
    }

    /// Clicks into `element`, runs `body`, records `path` if nothing inside
    /// failed, and returns to the parent listing whatever happened.
    fn descend<F>(
        &mut self,
        element: &ElementRef,
        path: &HierarchyPath,
        body: F,
    ) -> Result<CompletionCounters>
    where
        F: FnOnce(&mut Self) -> Result<CompletionCounters>,
    {
        self.nav.click(element)?;
        let result = body(self);
        match &result {
            Ok(counters) if counters.failed_entries == 0 => self.store.complete(path),
            Ok(counters) => warn!(
                "{} left incomplete, {} entries failed",
                path, counters.failed_entries
            ),
            Err(_) => {}
        }
        let back = self.nav.back();
        let counters = result?;
        if !back.context(format!("could not return from {}", path))? {
            warn!("no back button after {}", path);
        }
        Ok(counters)
    }

    fn place(&self, path: &HierarchyPath, counters: &mut CompletionCounters) -> Result<()> {
        let year = match &path.year {
            Some(year) => year,
            None => return Ok(()),
        };
        if self.materializer.staged_count() == 0 {
            return Ok(());
        }
        let placement = self
            .materializer
            .place(&path.category, year, path.month.as_deref())?;
        if placement.failed > 0 {
            warn!("{} files could not be moved for {}", placement.failed, path);
        }
        counters.add_placement(placement);
        Ok(())
    }

    fn listing_has_entries(&self, level: Level) -> Result<bool> {
        let table = self.table(level);
        if !self.nav.probe(&table.table()) {
            return Ok(false);
        }
        self.restore_listing(level, 0)?;
        Ok(self.nav.count(&table.entries)? > 0)
    }

    fn visit_year(&mut self, category: &HierarchyPath, entry: &Entry) -> Result<Visit> {
        let year = year_label(&entry.text, entry.position);
        let path = category.year(&year);
        if self.store.is_path_done(&path) {
            info!("  Skipping already processed year: {}", year);
            return Ok(Visit::skipped(CompletionCounters::default()));
        }

        let started = Instant::now();
        info!("{}", banner('=', 70));
        info!("PROCESSING YEAR: {}", year);
        info!("Category: {}", path.category);
        info!("Position: {}", entry.position);
        info!("{}", banner('=', 70));

        let mut counters = self.descend(&entry.element, &path, |w| {
            let mut counters = if w.listing_has_entries(Level::Month)? {
                w.walk_table(Level::Month, |w, entry| w.visit_month(&path, entry))?
            } else {
                info!("  No month table found, processing cases directly...");
                w.walk_cases(&path)?
            };
            w.place(&path, &mut counters)?;
            Ok(counters)
        })?;
        counters.years += 1;

        info!("{}", banner('-', 60));
        info!("YEAR {} COMPLETED:", year);
        info!("  Months processed: {}", counters.months);
        info!("  Cases processed: {}", counters.cases);
        info!("  Files downloaded: {}", counters.files_downloaded);
        info!("  Files moved: {}", counters.files_moved);
        info!("  Time taken: {:.2} seconds", started.elapsed().as_secs_f64());
        info!("{}", banner('-', 60));
        Ok(Visit::entered(counters))
    }

    fn visit_month(&mut self, year: &HierarchyPath, entry: &Entry) -> Result<Visit> {
        let month = if entry.text.is_empty() {
            format!("Month_{}", entry.position)
        } else {
            entry.text.clone()
        };
        let path = year.month(&month);
        if self.store.is_path_done(&path) {
            info!("  Skipping already processed month: {}", month);
            return Ok(Visit::skipped(CompletionCounters::default()));
        }

        info!("  Processing month: {}", month);
        let mut counters = self.descend(&entry.element, &path, |w| {
            let mut counters = w.walk_cases(&path)?;
            w.place(&path, &mut counters)?;
            Ok(counters)
        })?;
        counters.months += 1;

        info!("  Month {} completed:", month);
        info!("    Cases processed: {}", counters.cases);
        info!("    Files moved: {}", counters.files_moved);
        Ok(Visit::entered(counters))
    }

    fn walk_cases(&mut self, parent: &HierarchyPath) -> Result<CompletionCounters> {
        let counters = self.walk_table(Level::Case, |w, entry| w.visit_case(parent, entry))?;
        info!("    {}: {} cases processed", parent, counters.cases);
        Ok(counters)
    }

    fn visit_case(&mut self, parent: &HierarchyPath, entry: &Entry) -> Result<Visit> {
        let title = if entry.text.is_empty() {
            format!("Case_{}", entry.position)
        } else {
            entry.text.clone()
        };
        let path = parent.case(&title);
        if self.store.is_path_done(&path) {
            debug!("    Skipping already processed case: {}", title);
            return Ok(Visit::skipped(CompletionCounters {
                cases_skipped: 1,
                ..Default::default()
            }));
        }

        info!("    Processing case: {}", title);
        let counters = self.descend(&entry.element, &path, |w| {
            let mut counters = CompletionCounters {
                cases: 1,
                files_downloaded: w.download_case_files()?,
                ..Default::default()
            };
            w.place(&path, &mut counters)?;
            Ok(counters)
        })?;
        Ok(Visit::entered(counters))
    }

    /// Downloads every PDF linked from the open case. Individual file failures are logged only.
    fn download_case_files(&self) -> Result<usize> {
        let links = &self.nav.layout().case_files;
        let total = self.nav.count(links)?;
        let suffix = format!(".{}", DOWNLOAD_EXTENSION);
        let mut downloaded = 0;

        for idx in 0..total {
            let href = match self.nav.attribute(&links.nth(idx), "href") {
                Ok(Some(href)) => href,
                Ok(None) => continue,
                Err(e) => {
                    error!("    Error reading link {}: {}", idx + 1, e);
                    continue;
                }
            };
            if !href.to_lowercase().ends_with(&suffix) {
                continue;
            }
            info!(
                "      Downloading PDF: {}",
                href.rsplit('/').next().unwrap_or(&href)
            );
            match self.nav.download(&href) {
                Ok(true) => {
                    downloaded += 1;
                    info!("    Downloaded PDF {}/{}", idx + 1, total);
                }
                Ok(false) => warn!("      PDF download may have failed"),
                Err(e) => error!("    Error downloading PDF {}: {:#}", idx + 1, e),
            }
        }
        Ok(downloaded)
    }
}
