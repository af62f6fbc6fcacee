use anyhow::{anyhow, Context, Result};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{browser::default_executable, Browser, Element, LaunchOptions, Tab};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tempfile::TempDir;

use crate::engine::{BrowserEngine, ElementRef, Selector};
use crate::types::DownloaderError;

const CHROME_ARGS: &[&str] = &[
    "--disable-extensions",
    "--disable-plugins",
    "--disable-notifications",
    "--blink-settings=imagesEnabled=false",
];

const CLICK_JS: &str = "function() { this.scrollIntoView({block: 'center'}); this.click(); }";

const DISPLAYED_JS: &str =
    "function() { return !!(this.offsetWidth || this.offsetHeight || this.getClientRects().length); }";

const SELECT_JS: &str = r#"function(value) {
    if (!Array.from(this.options || []).some((o) => o.value === value)) {
        return false;
    }
    this.value = value;
    this.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
}"#;

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct BrowserOptions {
    // directory chrome saves downloads into
    download_dir: PathBuf,
    #[builder(default = "false")]
    headless: bool,
    // seconds chrome may stay idle before the connection is dropped
    #[builder(default = "45")]
    idle_timeout: u64,
    #[builder(default = "(1920, 1080)")]
    window_size: (u32, u32),
}

impl BrowserOptions {
    pub fn default_builder() -> BrowserOptionsBuilder {
        BrowserOptionsBuilder::default()
    }
}

/// Profile preferences that make Chrome save PDFs into `download_dir`
/// instead of rendering them in its built-in viewer.
pub fn download_preferences(download_dir: &str) -> Value {
    json!({
        "download": {
            "default_directory": download_dir,
            "prompt_for_download": false,
            "directory_upgrade": true
        },
        "plugins": {
            "always_open_pdf_externally": true
        },
        "profile": {
            "default_content_setting_values": { "notifications": 2 }
        }
    })
}

// chrome reads <user data dir>/Default/Preferences at startup
fn write_profile(download_dir: &str) -> Result<TempDir> {
    let profile = tempfile::Builder::new()
        .prefix("judgment-crawler-profile")
        .tempdir()
        .context("could not create chrome profile dir")?;
    let default = profile.path().join("Default");
    fs::create_dir_all(&default).context("could not create chrome profile dir")?;
    let prefs = serde_json::to_vec_pretty(&download_preferences(download_dir))?;
    fs::write(default.join("Preferences"), prefs)
        .context(format!("could not write chrome preferences in {:?}", default))?;
    Ok(profile)
}

/// [`BrowserEngine`] backed by a local Chrome driven over the DevTools protocol.
pub struct ChromeEngine {
    browser: Browser,
    tab: Arc<Tab>,
    secondary_tabs: RefCell<Vec<Arc<Tab>>>,
    download_dir: String,
    // removed after the browser is killed
    _profile: TempDir,
}

impl ChromeEngine {
    pub fn new(options: &BrowserOptions) -> Result<Self> {
        let download_dir = options
            .download_dir
            .canonicalize()
            .context(format!("download dir {:?} is not usable", options.download_dir))?
            .to_string_lossy()
            .into_owned();
        let profile = write_profile(&download_dir)?;

        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let executable = default_executable().map_err(|e| anyhow!(e))?;
        let launch = LaunchOptions::default_builder()
            .path(Some(executable))
            .user_data_dir(Some(profile.path().to_path_buf()))
            .headless(options.headless)
            .window_size(Some(options.window_size))
            .idle_browser_timeout(Duration::from_secs(options.idle_timeout))
            // warning only do this if in docker env
            .sandbox(!is_docker)
            .args(CHROME_ARGS.iter().map(OsStr::new).collect())
            .build()
            .map_err(|e| anyhow!("invalid chrome launch options: {}", e))?;
        let browser = Browser::new(launch).context("browser launching error")?;
        let tab = browser.new_tab().context("could not create new tab")?;

        let engine = ChromeEngine {
            browser,
            tab,
            secondary_tabs: RefCell::new(vec![]),
            download_dir,
            _profile: profile,
        };
        engine.allow_downloads(&engine.tab)?;
        Ok(engine)
    }

    fn allow_downloads(&self, tab: &Tab) -> Result<()> {
        tab.call_method(Page::SetDownloadBehavior {
            behavior: Page::SetDownloadBehaviorBehaviorOption::Allow,
            download_path: Some(self.download_dir.clone()),
        })
        .context("could not set download directory")?;
        Ok(())
    }

    // a query that matches nothing is an empty list, not an error
    fn find_all(&self, selector: &Selector) -> Vec<Element<'_>> {
        let found = match selector {
            Selector::Css(css) => self.tab.find_elements(css),
            Selector::XPath(xpath) => self.tab.find_elements_by_xpath(xpath),
        };
        match found {
            Ok(elements) => elements,
            Err(e) => {
                debug!("no match for {}: {}", selector, e);
                vec![]
            }
        }
    }

    fn resolve(&self, element: &ElementRef) -> Option<Element<'_>> {
        self.find_all(&element.selector)
            .into_iter()
            .nth(element.index)
    }

    fn call(&self, element: &ElementRef, js: &str, args: Vec<Value>) -> Result<Option<Value>> {
        let el = self
            .resolve(element)
            .ok_or_else(|| DownloaderError::ElementMissing(element.to_string()))?;
        let result = el
            .call_js_fn(js, args, false)
            .context(format!("script on {} failed", element))?;
        Ok(result.value)
    }

    pub fn kill(&self) -> bool {
        let pid = match self.browser.get_process_id() {
            Some(pid) => pid,
            None => return false,
        };
        let mut s = System::new();
        s.refresh_processes();
        if let Some(process) = s.process(Pid::from_u32(pid)) {
            debug!("killing process with id {}", pid);
            process.kill();
            return true;
        }
        false
    }
}

impl BrowserEngine for ChromeEngine {
    fn navigate(&self, url: &str) -> Result<()> {
        let nv = match self.tab.navigate_to(url) {
            Ok(t) => t,
            Err(e) => {
                error!("could not navigate to {} with error {}", url, e);
                self.tab.navigate_to(url)?
            }
        };
        if let Err(e) = nv.wait_until_navigated() {
            // we wait one more timeout
            warn!("error waiting for navigation, retrying {}", e);
            nv.wait_until_navigated()?;
        }
        Ok(())
    }

    fn wait_for(&self, selector: &Selector, timeout: Duration) -> Result<bool> {
        let found = match selector {
            Selector::Css(css) => self
                .tab
                .wait_for_element_with_custom_timeout(css, timeout)
                .is_ok(),
            Selector::XPath(xpath) => self
                .tab
                .wait_for_xpath_with_custom_timeout(xpath, timeout)
                .is_ok(),
        };
        Ok(found)
    }

    fn count(&self, selector: &Selector) -> Result<usize> {
        Ok(self.find_all(selector).len())
    }

    fn text(&self, element: &ElementRef) -> Result<Option<String>> {
        match self.resolve(element) {
            Some(el) => Ok(Some(el.get_inner_text().context(format!(
                "could not read text of {}",
                element
            ))?)),
            None => Ok(None),
        }
    }

    fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        let el = match self.resolve(element) {
            Some(el) => el,
            None => return Ok(None),
        };
        let attributes = el
            .get_attributes()
            .context(format!("could not get attributes for {}", element))?
            .unwrap_or_default();
        // attributes come back flattened as [name, value, name, value, ...]
        Ok(attributes
            .chunks(2)
            .find(|pair| pair[0] == name)
            .and_then(|pair| pair.get(1).cloned()))
    }

    fn is_displayed(&self, element: &ElementRef) -> Result<bool> {
        if self.resolve(element).is_none() {
            return Ok(false);
        }
        let value = self.call(element, DISPLAYED_JS, vec![])?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn click(&self, element: &ElementRef) -> Result<()> {
        self.call(element, CLICK_JS, vec![])?;
        Ok(())
    }

    fn select_value(&self, selector: &Selector, value: &str) -> Result<bool> {
        let target = selector.nth(0);
        if self.resolve(&target).is_none() {
            return Ok(false);
        }
        let selected = self.call(&target, SELECT_JS, vec![json!(value)])?;
        Ok(selected.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn open_tab(&self, url: &str) -> Result<()> {
        let tab = self
            .browser
            .new_tab()
            .context("could not open download tab")?;
        self.allow_downloads(&tab)?;
        // a download aborts the navigation, so a failed navigate is expected here
        if let Err(e) = tab.navigate_to(url) {
            debug!("navigation to {} ended with {}", url, e);
        }
        self.secondary_tabs.borrow_mut().push(tab);
        Ok(())
    }

    fn close_secondary_tabs(&self) -> Result<()> {
        for tab in self.secondary_tabs.borrow_mut().drain(..) {
            if let Err(e) = tab.close(true) {
                warn!("could not close tab {}: {}", tab.get_target_id(), e);
            }
        }
        Ok(())
    }
}

impl Drop for ChromeEngine {
    fn drop(&mut self) {
        debug!("killing browser process...");
        self.kill();
    }
}
