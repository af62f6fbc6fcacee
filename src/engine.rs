//! The narrow browser capability the crawler is written against.
//!
//! Elements are never held across page actions: an [`ElementRef`] is only a
//! selector plus an index, and every engine call resolves it against the page
//! as it is rendered at that moment.

use std::{fmt, time::Duration};

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn css(selector: &str) -> Self {
        Selector::Css(selector.to_string())
    }

    pub fn xpath(selector: &str) -> Self {
        Selector::XPath(selector.to_string())
    }

    pub fn nth(&self, index: usize) -> ElementRef {
        ElementRef {
            selector: self.clone(),
            index,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(s) => write!(f, "css:{}", s),
            Selector::XPath(s) => write!(f, "xpath:{}", s),
        }
    }
}

/// The `index`-th match of `selector` in the current document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef {
    pub selector: Selector,
    pub index: usize,
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.selector, self.index)
    }
}

pub trait BrowserEngine {
    /// Loads `url` in the main tab and waits for the navigation to finish.
    fn navigate(&self, url: &str) -> Result<()>;

    /// Blocks until `selector` matches or `timeout` elapses.
    fn wait_for(&self, selector: &Selector, timeout: Duration) -> Result<bool>;

    fn count(&self, selector: &Selector) -> Result<usize>;

    /// Rendered text of the element, `None` if it is not on the page.
    fn text(&self, element: &ElementRef) -> Result<Option<String>>;

    fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>>;

    fn is_displayed(&self, element: &ElementRef) -> Result<bool>;

    /// Scrolls the element into view and dispatches a click on it.
    fn click(&self, element: &ElementRef) -> Result<()>;

    /// Sets the first `<select>` matching `selector` to `value`. False if either is absent.
    fn select_value(&self, selector: &Selector, value: &str) -> Result<bool>;

    /// Opens `url` in a new tab, leaving the main tab where it is.
    fn open_tab(&self, url: &str) -> Result<()>;

    fn close_secondary_tabs(&self) -> Result<()>;
}
