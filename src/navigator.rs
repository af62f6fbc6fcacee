use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};

use crate::{
    engine::{BrowserEngine, ElementRef, Selector},
    layout::{SiteLayout, TableLayout},
    types::DownloaderError,
    utils::{count_files_with_extension, DOWNLOAD_EXTENSION},
};

/// Every pause the crawler takes after a UI action.
#[derive(Debug, Clone)]
pub struct Timings {
    pub page_load: Duration,
    pub after_click: Duration,
    pub after_select: Duration,
    pub after_back: Duration,
    pub popup_delay: Duration,
    pub after_popup: Duration,
    pub landmark_timeout: Duration,
    pub probe_timeout: Duration,
    pub tab_open: Duration,
    pub after_tab_close: Duration,
    pub download_timeout: Duration,
    pub download_poll: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            page_load: Duration::from_secs(2),
            after_click: Duration::from_millis(500),
            after_select: Duration::from_millis(300),
            after_back: Duration::from_millis(300),
            popup_delay: Duration::from_millis(500),
            after_popup: Duration::from_secs(1),
            landmark_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
            tab_open: Duration::from_secs(2),
            after_tab_close: Duration::from_secs(1),
            download_timeout: Duration::from_secs(10),
            download_poll: Duration::from_millis(250),
        }
    }
}

impl Timings {
    /// No waiting at all, for engines that render synchronously.
    pub fn instant() -> Self {
        Timings {
            page_load: Duration::ZERO,
            after_click: Duration::ZERO,
            after_select: Duration::ZERO,
            after_back: Duration::ZERO,
            popup_delay: Duration::ZERO,
            after_popup: Duration::ZERO,
            landmark_timeout: Duration::ZERO,
            probe_timeout: Duration::ZERO,
            tab_open: Duration::ZERO,
            after_tab_close: Duration::ZERO,
            download_timeout: Duration::ZERO,
            download_poll: Duration::ZERO,
        }
    }
}

/// Performs single logical page actions and lets the DOM settle afterwards.
pub struct PageNavigator<E: BrowserEngine> {
    engine: E,
    layout: SiteLayout,
    timings: Timings,
    staging_dir: PathBuf,
}

impl<E: BrowserEngine> PageNavigator<E> {
    pub fn new(engine: E, layout: SiteLayout, timings: Timings, staging_dir: &Path) -> Self {
        PageNavigator {
            engine,
            layout,
            timings,
            staging_dir: staging_dir.to_path_buf(),
        }
    }

    pub fn layout(&self) -> &SiteLayout {
        &self.layout
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The only place the crawler sleeps.
    pub fn settle(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }

    /// Loads `url` and waits for the landmark element. Returns whether it showed up.
    pub fn open(&self, url: &str) -> Result<bool> {
        self.engine
            .navigate(url)
            .context(format!("could not navigate to {}", url))?;
        let ready = self
            .engine
            .wait_for(&self.layout.landmark, self.timings.landmark_timeout)?;
        if !ready {
            warn!(
                "landmark {} did not appear within {:?}",
                self.layout.landmark, self.timings.landmark_timeout
            );
        }
        self.settle(self.timings.page_load);
        self.dismiss_popup();
        Ok(ready)
    }

    pub fn click(&self, element: &ElementRef) -> Result<()> {
        self.engine
            .click(element)
            .context(format!("could not click {}", element))?;
        self.settle(self.timings.after_click);
        self.dismiss_popup();
        Ok(())
    }

    pub fn select_option(&self, selector: &Selector, value: &str) -> bool {
        let selected = match self.engine.select_value(selector, value) {
            Ok(selected) => selected,
            Err(e) => {
                debug!("could not select {} on {}: {}", value, selector, e);
                false
            }
        };
        self.settle(self.timings.after_select);
        selected
    }

    pub fn count(&self, selector: &Selector) -> Result<usize> {
        self.engine.count(selector)
    }

    pub fn text(&self, element: &ElementRef) -> Result<Option<String>> {
        self.engine.text(element)
    }

    /// Like [`text`](Self::text) but a missing element is an error.
    pub fn require_text(&self, element: &ElementRef) -> Result<String> {
        match self.engine.text(element)? {
            Some(text) => Ok(text.trim().to_string()),
            None => Err(DownloaderError::ElementMissing(element.to_string()).into()),
        }
    }

    pub fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        self.engine.attribute(element, name)
    }

    /// Bounded wait for an element that may legitimately be absent.
    pub fn probe(&self, selector: &Selector) -> bool {
        match self.engine.wait_for(selector, self.timings.probe_timeout) {
            Ok(found) => found,
            Err(e) => {
                debug!("probe for {} failed: {}", selector, e);
                false
            }
        }
    }

    /// Moves `table` to its next page. False once the last page is showing.
    pub fn paginate(&self, table: &TableLayout) -> Result<bool> {
        if self.engine.count(&table.next_page)? == 0 {
            return Ok(false);
        }
        self.click(&table.next_page.nth(0))?;
        Ok(true)
    }

    /// Clicks the first visible acknowledgement control, if any.
    pub fn dismiss_popup(&self) -> bool {
        self.settle(self.timings.popup_delay);
        for selector in &self.layout.popups {
            let found = match self.engine.count(selector) {
                Ok(n) => n,
                Err(_) => continue,
            };
            for idx in 0..found {
                let button = selector.nth(idx);
                if !self.engine.is_displayed(&button).unwrap_or(false) {
                    continue;
                }
                info!("Found popup, clicking OK button...");
                if let Err(e) = self.engine.click(&button) {
                    warn!("error handling popup: {}", e);
                    continue;
                }
                self.settle(self.timings.after_popup);
                info!("Popup handled successfully");
                return true;
            }
        }
        false
    }

    /// Clicks the page's "Back" button to return to the parent listing.
    pub fn back(&self) -> Result<bool> {
        let buttons = &self.layout.back_buttons;
        for idx in 0..self.engine.count(buttons)? {
            let button = buttons.nth(idx);
            let is_back = self
                .engine
                .text(&button)?
                .map(|t| t.to_lowercase().contains("back"))
                .unwrap_or(false);
            if is_back {
                self.click(&button)?;
                self.settle(self.timings.after_back);
                return Ok(true);
            }
        }
        debug!("no back button on the page");
        Ok(false)
    }

    /// Opens a file link in its own tab and waits for the browser to save it.
    pub fn download(&self, url: &str) -> Result<bool> {
        let before = self.staged_count();
        let opened = self
            .engine
            .open_tab(url)
            .context(format!("could not open {} in a new tab", url));
        if opened.is_ok() {
            self.settle(self.timings.tab_open);
        }
        let arrived = opened.is_ok() && self.wait_for_download(before);
        if let Err(e) = self.engine.close_secondary_tabs() {
            warn!("could not close download tab: {}", e);
        }
        self.settle(self.timings.after_tab_close);
        opened?;
        Ok(arrived)
    }

    fn wait_for_download(&self, before: usize) -> bool {
        let started = Instant::now();
        loop {
            if self.staged_count() > before {
                return true;
            }
            if started.elapsed() >= self.timings.download_timeout {
                return false;
            }
            self.settle(self.timings.download_poll);
        }
    }

    fn staged_count(&self) -> usize {
        count_files_with_extension(&self.staging_dir, DOWNLOAD_EXTENSION)
    }
}
