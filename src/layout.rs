use crate::{engine::Selector, utils::POPUP_SELECTORS};

/// One DataTables listing: its entries, page-size select and pager.
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub id: String,
    pub entries: Selector,
    pub length_select: Selector,
    pub next_page: Selector,
}

impl TableLayout {
    /// A table whose entries are the buttons in its body cells.
    pub fn buttons(id: &str) -> Self {
        Self::with_entries(id, &format!("#{} > tbody > tr > td > button", id))
    }

    pub fn with_entries(id: &str, entries: &str) -> Self {
        TableLayout {
            id: id.to_string(),
            entries: Selector::css(entries),
            length_select: Selector::css(&format!("select[name='{}_length']", id)),
            next_page: Selector::css(&format!(
                "#{}_paginate li.paginate_button.next:not(.disabled) > a",
                id
            )),
        }
    }

    pub fn table(&self) -> Selector {
        Selector::css(&format!("#{}", self.id))
    }
}

/// Markup of the portal the crawler walks.
#[derive(Debug, Clone)]
pub struct SiteLayout {
    pub landmark: Selector,
    pub categories: TableLayout,
    pub years: TableLayout,
    pub months: TableLayout,
    pub cases: TableLayout,
    pub case_files: Selector,
    pub back_buttons: Selector,
    pub popups: Vec<Selector>,
}

impl Default for SiteLayout {
    fn default() -> Self {
        SiteLayout {
            landmark: Selector::css("#example"),
            categories: TableLayout::buttons("example"),
            years: TableLayout::buttons("example1"),
            months: TableLayout::buttons("example3"),
            cases: TableLayout::with_entries(
                "example4",
                "#example4 > tbody > tr > td:nth-child(2) > button",
            ),
            case_files: Selector::xpath("//table//tr//td[2]/a"),
            back_buttons: Selector::css("button"),
            popups: POPUP_SELECTORS.clone(),
        }
    }
}
