#![allow(dead_code)]

use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use judgment_crawler::{
    engine::{BrowserEngine, ElementRef, Selector},
    layout::{SiteLayout, TableLayout},
    navigator::{PageNavigator, Timings},
};

pub const BASE_URL: &str = "https://court.test/judgments/";

// DataTables renders 10 rows until the length select says otherwise
const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct CaseSpec {
    pub title: String,
    pub files: Vec<String>,
    // clicks on this case that fail before one gets through
    pub failures: usize,
}

impl CaseSpec {
    pub fn failing(mut self, times: usize) -> Self {
        self.failures = times;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MonthSpec {
    pub name: String,
    pub cases: Vec<CaseSpec>,
}

#[derive(Debug, Clone)]
pub struct YearSpec {
    pub label: String,
    pub months: Vec<MonthSpec>,
    pub cases: Vec<CaseSpec>,
    pub failures: usize,
    // month table rendered above the cases but without rows
    pub empty_month_table: bool,
}

impl YearSpec {
    pub fn failing(mut self, times: usize) -> Self {
        self.failures = times;
        self
    }

    pub fn with_empty_month_table(mut self) -> Self {
        self.empty_month_table = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CategorySpec {
    pub name: String,
    pub years: Vec<YearSpec>,
}

pub fn case(title: &str, files: &[&str]) -> CaseSpec {
    CaseSpec {
        title: title.into(),
        files: files.iter().map(|f| f.to_string()).collect(),
        failures: 0,
    }
}

pub fn month(name: &str, cases: Vec<CaseSpec>) -> MonthSpec {
    MonthSpec {
        name: name.into(),
        cases,
    }
}

pub fn year(label: &str, cases: Vec<CaseSpec>) -> YearSpec {
    YearSpec {
        label: label.into(),
        months: vec![],
        cases,
        failures: 0,
        empty_month_table: false,
    }
}

pub fn year_with_months(label: &str, months: Vec<MonthSpec>) -> YearSpec {
    YearSpec {
        label: label.into(),
        months,
        cases: vec![],
        failures: 0,
        empty_month_table: false,
    }
}

pub fn category(name: &str, years: Vec<YearSpec>) -> CategorySpec {
    CategorySpec {
        name: name.into(),
        years,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Categories,
    Years(usize),
    Months(usize, usize),
    Cases(usize, usize, Option<usize>),
    Case(usize, usize, Option<usize>, usize),
}

struct State {
    layout: SiteLayout,
    categories: Vec<CategorySpec>,
    staging: PathBuf,
    view: View,
    page: usize,
    page_size: usize,
    popup: bool,
    popup_on_category: bool,
    downloads: Vec<String>,
    navigations: usize,
    interrupt: Option<(usize, Arc<AtomicBool>)>,
    length_select: bool,
    // case rows still rendered once a case has been opened
    shrink_cases_to: Option<usize>,
    case_row_limit: Option<usize>,
}

impl State {
    fn table(&self) -> Option<&TableLayout> {
        match self.view {
            View::Categories => Some(&self.layout.categories),
            View::Years(_) => Some(&self.layout.years),
            View::Months(..) => Some(&self.layout.months),
            View::Cases(..) => Some(&self.layout.cases),
            View::Case(..) => None,
        }
    }

    fn cases(&self, c: usize, y: usize, m: Option<usize>) -> &Vec<CaseSpec> {
        let year = &self.categories[c].years[y];
        match m {
            Some(m) => &year.months[m].cases,
            None => &year.cases,
        }
    }

    fn labels(&self) -> Vec<String> {
        match self.view {
            View::Categories => self.categories.iter().map(|c| c.name.clone()).collect(),
            View::Years(c) => self.categories[c]
                .years
                .iter()
                .map(|y| y.label.clone())
                .collect(),
            View::Months(c, y) => self.categories[c].years[y]
                .months
                .iter()
                .map(|m| m.name.clone())
                .collect(),
            View::Cases(c, y, m) => self
                .cases(c, y, m)
                .iter()
                .take(self.case_row_limit.unwrap_or(usize::MAX))
                .map(|k| k.title.clone())
                .collect(),
            View::Case(..) => vec![],
        }
    }

    fn visible(&self) -> Vec<String> {
        self.labels()
            .into_iter()
            .skip(self.page * self.page_size)
            .take(self.page_size)
            .collect()
    }

    fn has_next(&self) -> bool {
        (self.page + 1) * self.page_size < self.labels().len()
    }

    fn buttons(&self) -> Vec<String> {
        let mut buttons = self.visible();
        if self.view != View::Categories {
            buttons.push("Back".into());
        }
        buttons
    }

    fn files(&self) -> Vec<String> {
        match self.view {
            View::Case(c, y, m, k) => self.cases(c, y, m)[k].files.clone(),
            _ => vec![],
        }
    }

    fn shows_empty_month_table(&self) -> bool {
        match self.view {
            View::Cases(c, y, None) => self.categories[c].years[y].empty_month_table,
            _ => false,
        }
    }

    fn show(&mut self, view: View) {
        self.view = view;
        self.page = 0;
        self.page_size = DEFAULT_PAGE_SIZE;
    }

    fn enter(&mut self, idx: usize) -> Result<()> {
        let visible = self.visible().len();
        if idx >= visible {
            return Err(anyhow!("row {} is not rendered", idx));
        }
        let g = self.page * self.page_size + idx;
        let next = match self.view {
            View::Categories => {
                if self.popup_on_category {
                    self.popup = true;
                }
                View::Years(g)
            }
            View::Years(c) => {
                let year = &mut self.categories[c].years[g];
                if year.failures > 0 {
                    year.failures -= 1;
                    return Err(anyhow!("click intercepted on {}", year.label));
                }
                if year.months.is_empty() {
                    View::Cases(c, g, None)
                } else {
                    View::Months(c, g)
                }
            }
            View::Months(c, y) => View::Cases(c, y, Some(g)),
            View::Cases(c, y, m) => {
                let year = &mut self.categories[c].years[y];
                let spec = match m {
                    Some(m) => &mut year.months[m].cases[g],
                    None => &mut year.cases[g],
                };
                if spec.failures > 0 {
                    spec.failures -= 1;
                    return Err(anyhow!("click intercepted on {}", spec.title));
                }
                if self.shrink_cases_to.is_some() {
                    self.case_row_limit = self.shrink_cases_to;
                }
                View::Case(c, y, m, g)
            }
            View::Case(..) => return Err(anyhow!("case page has no rows")),
        };
        self.show(next);
        Ok(())
    }

    fn back(&mut self) -> Result<()> {
        let parent = match self.view {
            View::Case(c, y, m, _) => View::Cases(c, y, m),
            View::Cases(c, y, Some(_)) => View::Months(c, y),
            View::Cases(c, _, None) | View::Months(c, _) => View::Years(c),
            View::Years(_) => View::Categories,
            View::Categories => return Err(anyhow!("no back button on the start page")),
        };
        self.show(parent);
        Ok(())
    }

    fn is_popup(&self, selector: &Selector) -> bool {
        self.popup && self.layout.popups.first() == Some(selector)
    }
}

/// In-memory rendition of the judgment portal: one table visible at a time,
/// DataTables paging, "Back" buttons, and PDFs that land in the staging
/// directory when opened in a tab.
#[derive(Clone)]
pub struct FakeSite {
    state: Rc<RefCell<State>>,
}

impl FakeSite {
    pub fn new(categories: Vec<CategorySpec>, staging: &Path) -> Self {
        FakeSite {
            state: Rc::new(RefCell::new(State {
                layout: SiteLayout::default(),
                categories,
                staging: staging.to_path_buf(),
                view: View::Categories,
                page: 0,
                page_size: DEFAULT_PAGE_SIZE,
                popup: false,
                popup_on_category: false,
                downloads: vec![],
                navigations: 0,
                interrupt: None,
                length_select: true,
                shrink_cases_to: None,
                case_row_limit: None,
            })),
        }
    }

    /// Shows an acknowledgement modal every time a category is opened.
    pub fn with_category_popup(self) -> Self {
        self.state.borrow_mut().popup_on_category = true;
        self
    }

    /// Raises `flag` once `downloads` files have been fetched.
    pub fn interrupt_after(self, downloads: usize, flag: Arc<AtomicBool>) -> Self {
        self.state.borrow_mut().interrupt = Some((downloads, flag));
        self
    }

    /// Renders tables without their page-size select.
    pub fn without_length_select(self) -> Self {
        self.state.borrow_mut().length_select = false;
        self
    }

    /// After the first case is opened, case listings only render `rows` rows.
    pub fn shrink_cases_after_first_open(self, rows: usize) -> Self {
        self.state.borrow_mut().shrink_cases_to = Some(rows);
        self
    }

    /// Puts the browser on the year listing of the `idx`-th category.
    pub fn open_category(&self, idx: usize) {
        self.state.borrow_mut().show(View::Years(idx));
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state.borrow().downloads.clone()
    }

    pub fn navigations(&self) -> usize {
        self.state.borrow().navigations
    }

    pub fn popup_showing(&self) -> bool {
        self.state.borrow().popup
    }
}

impl BrowserEngine for FakeSite {
    fn navigate(&self, _url: &str) -> Result<()> {
        let mut s = self.state.borrow_mut();
        s.navigations += 1;
        s.popup = false;
        s.show(View::Categories);
        Ok(())
    }

    fn wait_for(&self, selector: &Selector, _timeout: Duration) -> Result<bool> {
        Ok(self.count(selector)? > 0)
    }

    fn count(&self, selector: &Selector) -> Result<usize> {
        let s = self.state.borrow();
        if s.is_popup(selector) {
            return Ok(1);
        }
        if let Some(t) = s.table() {
            if selector == &t.entries {
                return Ok(s.visible().len());
            }
            if selector == &t.length_select || selector == &t.table() {
                return Ok(1);
            }
            if selector == &t.next_page {
                return Ok(s.has_next() as usize);
            }
        }
        if selector == &s.layout.months.table() && s.shows_empty_month_table() {
            return Ok(1);
        }
        if selector == &s.layout.case_files {
            return Ok(s.files().len());
        }
        if selector == &s.layout.back_buttons {
            return Ok(s.buttons().len());
        }
        Ok(0)
    }

    fn text(&self, element: &ElementRef) -> Result<Option<String>> {
        let s = self.state.borrow();
        if s.is_popup(&element.selector) && element.index == 0 {
            return Ok(Some("OK".into()));
        }
        if let Some(t) = s.table() {
            if element.selector == t.entries {
                return Ok(s.visible().get(element.index).cloned());
            }
        }
        if element.selector == s.layout.back_buttons {
            return Ok(s.buttons().get(element.index).cloned());
        }
        Ok(None)
    }

    fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        let s = self.state.borrow();
        if element.selector == s.layout.case_files && name == "href" {
            return Ok(s
                .files()
                .get(element.index)
                .map(|f| format!("{}{}", BASE_URL, f)));
        }
        Ok(None)
    }

    fn is_displayed(&self, element: &ElementRef) -> Result<bool> {
        let s = self.state.borrow();
        Ok(s.is_popup(&element.selector) && element.index == 0)
    }

    fn click(&self, element: &ElementRef) -> Result<()> {
        let mut s = self.state.borrow_mut();
        if s.is_popup(&element.selector) && element.index == 0 {
            s.popup = false;
            return Ok(());
        }
        if s.popup {
            return Err(anyhow!("click intercepted by modal"));
        }
        if let Some(t) = s.table().cloned() {
            if element.selector == t.entries {
                return s.enter(element.index);
            }
            if element.selector == t.next_page && element.index == 0 && s.has_next() {
                s.page += 1;
                return Ok(());
            }
        }
        if element.selector == s.layout.back_buttons {
            let rows = s.visible().len();
            if element.index < rows {
                return s.enter(element.index);
            }
            if element.index == rows {
                return s.back();
            }
        }
        Err(anyhow!("no such element {}", element))
    }

    fn select_value(&self, selector: &Selector, value: &str) -> Result<bool> {
        let mut s = self.state.borrow_mut();
        let matches =
            s.length_select && s.table().map(|t| selector == &t.length_select).unwrap_or(false);
        if !matches {
            return Ok(false);
        }
        s.page_size = value.parse()?;
        s.page = 0;
        Ok(true)
    }

    fn open_tab(&self, url: &str) -> Result<()> {
        let mut s = self.state.borrow_mut();
        let name = url.rsplit('/').next().unwrap_or_default().to_string();
        if name.ends_with(".pdf") {
            fs::write(s.staging.join(&name), format!("%PDF {}", url))?;
        }
        s.downloads.push(name);
        if let Some((after, flag)) = &s.interrupt {
            if s.downloads.len() >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn close_secondary_tabs(&self) -> Result<()> {
        Ok(())
    }
}

pub fn navigator(site: &FakeSite, staging: &Path) -> PageNavigator<FakeSite> {
    PageNavigator::new(
        site.clone(),
        SiteLayout::default(),
        Timings::instant(),
        staging,
    )
}

/// Names of the PDFs directly inside `dir`, sorted.
pub fn pdfs_in(dir: &Path) -> Vec<String> {
    let mut names = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".pdf"))
            .collect::<Vec<String>>(),
        Err(_) => vec![],
    };
    names.sort();
    names
}
