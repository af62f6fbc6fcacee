use std::{fmt, ops::AddAssign, path::PathBuf};

use chrono::{DateTime, Local};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::{COMPLETED_SUFFIX, PROCESSED};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DownloaderError {
    #[error("interrupted")]
    Interrupted,
    #[error("no categories found on the start page")]
    NoCategories,
    #[error("element_missing: {0}")]
    ElementMissing(String),
}

impl DownloaderError {
    /// True if `err` carries an interruption request somewhere in its chain.
    pub fn is_interrupted(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<DownloaderError>(),
                Some(DownloaderError::Interrupted)
            )
        })
    }
}

/// Position of a unit of work in the category/year/month/case tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HierarchyPath {
    pub category: String,
    pub year: Option<String>,
    pub month: Option<String>,
    pub case: Option<String>,
}

impl HierarchyPath {
    pub fn category(name: &str) -> Self {
        HierarchyPath {
            category: name.to_string(),
            year: None,
            month: None,
            case: None,
        }
    }

    pub fn year(&self, year: &str) -> Self {
        HierarchyPath {
            year: Some(year.to_string()),
            month: None,
            case: None,
            ..self.clone()
        }
    }

    pub fn month(&self, month: &str) -> Self {
        HierarchyPath {
            month: Some(month.to_string()),
            case: None,
            ..self.clone()
        }
    }

    pub fn case(&self, case: &str) -> Self {
        HierarchyPath {
            case: Some(case.to_string()),
            ..self.clone()
        }
    }

    pub fn is_case(&self) -> bool {
        self.case.is_some()
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.category.as_str())
            .chain(self.year.as_deref())
            .chain(self.month.as_deref())
            .chain(self.case.as_deref())
    }

    /// Present segments joined with `_`; absent levels are left out entirely.
    pub fn key(&self) -> String {
        self.segments().join("_")
    }

    /// The key this path is checkpointed under in the progress file.
    pub fn progress_key(&self) -> String {
        if self.is_case() {
            self.key()
        } else if self.year.is_none() {
            format!("category_{}{}", self.category, COMPLETED_SUFFIX)
        } else {
            format!("{}{}", self.key(), COMPLETED_SUFFIX)
        }
    }

    /// The marker recorded once this path is done.
    pub fn done_mark(&self) -> Mark {
        if self.is_case() {
            Mark::Status(PROCESSED.into())
        } else {
            Mark::Flag(true)
        }
    }
}

impl fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments().join(" / "))
    }
}

/// Value stored against a progress key: `"processed"` for cases, `true` for subtrees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Mark {
    Flag(bool),
    Status(String),
}

impl Mark {
    pub fn is_done(&self) -> bool {
        match self {
            Mark::Flag(done) => *done,
            Mark::Status(status) => status == PROCESSED,
        }
    }
}

/// Per-level tallies threaded upward through return values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompletionCounters {
    pub categories: usize,
    pub years: usize,
    pub months: usize,
    pub cases: usize,
    pub cases_skipped: usize,
    pub files_downloaded: usize,
    pub files_moved: usize,
    pub duplicates: usize,
    pub failed_entries: usize,
}

impl AddAssign for CompletionCounters {
    fn add_assign(&mut self, other: Self) {
        self.categories += other.categories;
        self.years += other.years;
        self.months += other.months;
        self.cases += other.cases;
        self.cases_skipped += other.cases_skipped;
        self.files_downloaded += other.files_downloaded;
        self.files_moved += other.files_moved;
        self.duplicates += other.duplicates;
        self.failed_entries += other.failed_entries;
    }
}

impl CompletionCounters {
    pub fn add_placement(&mut self, placement: Placement) {
        self.files_moved += placement.moved;
        self.duplicates += placement.duplicates;
    }
}

/// Outcome of moving staged downloads into their final directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub moved: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct RunSummary {
    pub counters: CompletionCounters,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub download_dir: PathBuf,
}

impl RunSummary {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn case_key_without_month_has_no_placeholder() {
        let path = HierarchyPath::category("Civil")
            .year("2020")
            .case("WP 123/2020");
        assert_eq!(path.progress_key(), "Civil_2020_WP 123/2020");
        assert!(!path.progress_key().contains("None"));
        assert!(!path.progress_key().contains("null"));
    }

    #[test]
    fn case_key_with_month() {
        let path = HierarchyPath::category("Civil")
            .year("2020")
            .month("January")
            .case("WP 1/2020");
        assert_eq!(path.progress_key(), "Civil_2020_January_WP 1/2020");
        assert_eq!(path.done_mark(), Mark::Status("processed".into()));
    }

    #[test]
    fn subtree_keys() {
        let category = HierarchyPath::category("Civil");
        assert_eq!(category.progress_key(), "category_Civil_completed");

        let year = category.year("2020");
        assert_eq!(year.progress_key(), "Civil_2020_completed");
        assert_eq!(year.done_mark(), Mark::Flag(true));

        let month = year.month("March");
        assert_eq!(month.progress_key(), "Civil_2020_March_completed");
    }

    #[test]
    fn descending_resets_deeper_levels() {
        let month = HierarchyPath::category("A").year("2019").month("May");
        let other_year = month.case("x").year("2020");
        assert_eq!(other_year.month, None);
        assert_eq!(other_year.case, None);
    }

    #[test]
    fn marks_serialize_like_the_state_file() {
        let processed = serde_json::to_string(&Mark::Status("processed".into())).unwrap();
        assert_eq!(processed, "\"processed\"");
        let done: Mark = serde_json::from_str("true").unwrap();
        assert!(done.is_done());
        let not_done: Mark = serde_json::from_str("false").unwrap();
        assert!(!not_done.is_done());
        let other: Mark = serde_json::from_str("\"pending\"").unwrap();
        assert!(!other.is_done());
    }

    #[test]
    fn interrupted_is_found_through_context() {
        let err = anyhow::Error::new(DownloaderError::Interrupted).context("walking years");
        assert!(DownloaderError::is_interrupted(&err));
        let other = anyhow::anyhow!("stale element");
        assert!(!DownloaderError::is_interrupted(&other));
    }
}
